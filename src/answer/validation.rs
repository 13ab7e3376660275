use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static LEADING_SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*SELECT\s+").expect("valid regex"));

static INTERNAL_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bdatatalk_\w+").expect("valid regex"));

/// Why a candidate query was refused before reaching the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRejection {
    Empty,
    NotSelect,
    MultipleStatements,
    InternalTable,
}

impl fmt::Display for QueryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryRejection::Empty => write!(
                f,
                "Query is empty. Please make sure you are using a valid, non-expired API key."
            ),
            QueryRejection::NotSelect => write!(f, "Query must begin with SELECT."),
            QueryRejection::MultipleStatements => {
                write!(f, "Query must be a single SELECT statement.")
            }
            QueryRejection::InternalTable => {
                write!(f, "Query must not read DataTalk's own tables.")
            }
        }
    }
}

impl std::error::Error for QueryRejection {}

/// Accepts a single statement starting with SELECT (any case) that leaves
/// the settings and question tables alone.
pub fn validate_query(query: &str) -> Result<(), QueryRejection> {
    let trimmed = query.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("SELECT") {
        return Err(QueryRejection::Empty);
    }
    if !LEADING_SELECT.is_match(trimmed) {
        return Err(QueryRejection::NotSelect);
    }
    if INTERNAL_TABLE.is_match(trimmed) {
        return Err(QueryRejection::InternalTable);
    }
    if has_statement_separator(trimmed.trim_end_matches(|c: char| c == ';' || c.is_whitespace())) {
        return Err(QueryRejection::MultipleStatements);
    }
    Ok(())
}

/// True when a `;` appears outside string literals, quoted identifiers and
/// comments.
fn has_statement_separator(sql: &str) -> bool {
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                // a doubled quote re-enters the literal on the next pass
                for inner in chars.by_ref() {
                    if inner == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            ';' => return true,
            _ => {}
        }
    }
    false
}
