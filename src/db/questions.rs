use super::{sql, Database, DbError};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{params, OptionalExt, Row};
use serde::Serialize;
use tracing::debug;

/// A question asked by a member together with the query that answered it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub id: i64,
    pub question: String,
    pub query: String,
    pub asked_at: DateTime<Utc>,
    pub member_id: String,
    pub results_count: i64,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub member_id: String,
    pub question: String,
    pub query: String,
    pub results_count: usize,
    pub is_error: bool,
}

/// Cache key for a question: lower-cased with runs of whitespace collapsed.
pub fn question_key(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn record_from_row(row: &Row<'_>) -> Result<QuestionRecord, duckdb::Error> {
    let asked_at: NaiveDateTime = row.get(3)?;
    Ok(QuestionRecord {
        id: row.get(0)?,
        question: row.get(1)?,
        query: row.get(2)?,
        asked_at: asked_at.and_utc(),
        member_id: row.get(4)?,
        results_count: row.get(5)?,
        is_error: row.get(6)?,
    })
}

impl Database {
    /// Stores a question and returns its generated id.
    pub async fn insert_question(&self, new: NewQuestion) -> Result<i64, DbError> {
        let id = self
            .with_conn(move |conn| {
                conn.query_row(
                    sql::INSERT_QUESTION_SQL,
                    params![
                        new.question.trim(),
                        question_key(&new.question),
                        new.query.trim(),
                        Utc::now().naive_utc(),
                        new.member_id,
                        new.results_count as i64,
                        new.is_error,
                    ],
                    |row| row.get::<_, i64>(0),
                )
            })
            .await?;
        debug!("Stored question {}", id);
        Ok(id)
    }

    pub async fn question_by_id(
        &self,
        member_id: &str,
        id: i64,
    ) -> Result<Option<QuestionRecord>, DbError> {
        let member_id = member_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &sql::select_question_by_id_sql(),
                params![member_id, id],
                record_from_row,
            )
            .optional()
        })
        .await
    }

    /// Most recent record of `member_id` whose text matches `question`
    /// ignoring case and whitespace.
    pub async fn question_by_text(
        &self,
        member_id: &str,
        question: &str,
    ) -> Result<Option<QuestionRecord>, DbError> {
        let member_id = member_id.to_string();
        let key = question_key(question);
        self.with_conn(move |conn| {
            conn.query_row(
                &sql::select_question_by_key_sql(),
                params![member_id, key],
                record_from_row,
            )
            .optional()
        })
        .await
    }

    pub async fn recent_questions(
        &self,
        member_id: &str,
        limit: usize,
    ) -> Result<Vec<QuestionRecord>, DbError> {
        let member_id = member_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql::select_recent_questions_sql(limit))?;
            let rows = stmt.query_map(params![member_id], record_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Returns true only when a record owned by `member_id` was removed.
    pub async fn delete_question(&self, member_id: &str, id: i64) -> Result<bool, DbError> {
        let member_id = member_id.to_string();
        let deleted = self
            .with_conn(move |conn| conn.execute(sql::DELETE_QUESTION_SQL, params![member_id, id]))
            .await?;
        Ok(deleted > 0)
    }
}
