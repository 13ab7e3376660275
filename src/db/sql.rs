//! SQL used by the DataTalk cache and settings tables.
//!
//! Every statement that carries user input is parameterized.

pub const SETTINGS_TABLE: &str = "datatalk_settings";
pub const QUESTIONS_TABLE: &str = "datatalk_questions";

pub const CREATE_SETTINGS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS datatalk_settings (
        name VARCHAR PRIMARY KEY,
        value VARCHAR
    );
";

pub const CREATE_QUESTIONS_SEQUENCE_SQL: &str =
    "CREATE SEQUENCE IF NOT EXISTS datatalk_questions_id_seq START 1;";

pub const CREATE_QUESTIONS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS datatalk_questions (
        id BIGINT PRIMARY KEY DEFAULT nextval('datatalk_questions_id_seq'),
        question VARCHAR NOT NULL,
        question_key VARCHAR NOT NULL,
        query VARCHAR NOT NULL,
        asked_at TIMESTAMP NOT NULL,
        member_id VARCHAR NOT NULL,
        results_count BIGINT NOT NULL DEFAULT 0,
        is_error BOOLEAN NOT NULL DEFAULT false
    );
    CREATE INDEX IF NOT EXISTS idx_datatalk_questions_member ON datatalk_questions(member_id);
";

/// Executed in order by `Database::setup`.
pub const SETUP_SQL: &[&str] = &[
    CREATE_SETTINGS_TABLE_SQL,
    CREATE_QUESTIONS_SEQUENCE_SQL,
    CREATE_QUESTIONS_TABLE_SQL,
];

pub const UPSERT_SETTING_SQL: &str =
    "INSERT OR REPLACE INTO datatalk_settings (name, value) VALUES (?, ?)";

pub const SELECT_SETTING_SQL: &str = "SELECT value FROM datatalk_settings WHERE name = ?";

pub const INSERT_QUESTION_SQL: &str = "
    INSERT INTO datatalk_questions
        (question, question_key, query, asked_at, member_id, results_count, is_error)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    RETURNING id
";

const QUESTION_COLUMNS: &str =
    "id, question, query, asked_at, member_id, results_count, is_error";

pub fn select_question_by_id_sql() -> String {
    format!(
        "SELECT {} FROM datatalk_questions WHERE member_id = ? AND id = ? LIMIT 1",
        QUESTION_COLUMNS
    )
}

pub fn select_question_by_key_sql() -> String {
    format!(
        "SELECT {} FROM datatalk_questions WHERE member_id = ? AND question_key = ? \
         ORDER BY asked_at DESC, id DESC LIMIT 1",
        QUESTION_COLUMNS
    )
}

pub fn select_recent_questions_sql(limit: usize) -> String {
    format!(
        "SELECT {} FROM datatalk_questions WHERE member_id = ? \
         ORDER BY asked_at DESC, id DESC LIMIT {}",
        QUESTION_COLUMNS, limit
    )
}

pub const DELETE_QUESTION_SQL: &str =
    "DELETE FROM datatalk_questions WHERE member_id = ? AND id = ?";

/// Columns of every user table and view, in declaration order.
pub const SELECT_TABLE_COLUMNS_SQL: &str = "
    SELECT table_name, column_name
    FROM information_schema.columns
    WHERE table_catalog = current_database() AND table_schema = 'main'
    ORDER BY table_name, ordinal_position
";
