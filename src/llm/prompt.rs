use super::models::Prompt;
use crate::db::schema_manager::TableInfo;

const INSTRUCTIONS: [&str; 3] = [
    "Suggest a query with descriptive column aliases to answer user questions using the above tables.",
    "Reply with only a valid SQL SELECT query and no other text.",
    "The output SQL should only include the fields mentioned in the database structure. Do not include any fields not stated in the structure.",
];

/// `orders: (id, customer_id, amount)`
pub fn describe_table(table: &TableInfo) -> String {
    format!("{}: ({})", table.name, table.columns.join(", "))
}

pub fn build_prompt(question: &str, tables: &[TableInfo]) -> Prompt {
    let mut lines = vec!["Tables:".to_string(), String::new()];
    lines.extend(tables.iter().map(|t| format!("- {}", describe_table(t))));
    lines.push(String::new());
    lines.extend(INSTRUCTIONS.iter().map(|s| s.to_string()));

    Prompt {
        system: lines.join("\n"),
        user: question.to_string(),
    }
}
