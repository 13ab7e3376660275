//! The question-answering pipeline.
//!
//! cache lookup -> prompt -> LLM -> shape check -> execution (with one
//! fallback candidate) -> cache write. Every step runs sequentially and
//! every failure ends the request.

pub mod context;
pub mod validation;

use crate::db::executor::ResultRow;
use crate::db::questions::{NewQuestion, QuestionRecord};
use crate::db::schema_manager::SchemaManager;
use crate::db::{Database, DbError};
use crate::llm::models::{Prompt, TokenUsage};
use crate::llm::prompt::build_prompt;
use crate::llm::{LlmError, SqlGenerator};
use context::RequestContext;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use validation::{validate_query, QueryRejection};

pub const MISSING_API_KEY: &str =
    "API key is not set. Please save it in the DataTalk settings first.";

#[derive(Debug)]
pub enum AnswerError {
    Configuration(String),
    MissingQuestion,
    Llm(LlmError),
    Rejected(QueryRejection),
    CachedFailure,
    Execution(DbError),
    Storage(DbError),
}

impl fmt::Display for AnswerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerError::Configuration(msg) => write!(f, "{}", msg),
            AnswerError::MissingQuestion => write!(f, "Question is empty."),
            AnswerError::Llm(e) => write!(f, "{}", e),
            AnswerError::Rejected(r) => write!(f, "{}", r),
            AnswerError::CachedFailure => write!(
                f,
                "This question previously produced an unusable query. Delete it and ask again."
            ),
            AnswerError::Execution(e) => write!(f, "{}", e),
            AnswerError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl Error for AnswerError {}

/// Reply to a question. A non-empty `error` means the request failed.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: Option<i64>,
    pub prompt: Option<Prompt>,
    pub query: Option<String>,
    pub alternative_query: Option<String>,
    pub answer: Option<Vec<ResultRow>>,
    pub token_usage: Option<TokenUsage>,
    pub error: Option<String>,
}

impl Answer {
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

pub struct QuestionAnswerer {
    db: Database,
    schema: Arc<SchemaManager>,
    generator: Arc<dyn SqlGenerator>,
}

impl QuestionAnswerer {
    pub fn new(db: Database, schema: Arc<SchemaManager>, generator: Arc<dyn SqlGenerator>) -> Self {
        Self {
            db,
            schema,
            generator,
        }
    }

    /// Answers `question` for the identity in `ctx`, replaying the stored
    /// query when `cached_id` (or the same question text) is already known.
    pub async fn answer(
        &self,
        ctx: &RequestContext,
        question: &str,
        cached_id: Option<i64>,
    ) -> Answer {
        let mut reply = Answer::default();
        if let Err(e) = self.run(ctx, question, cached_id, &mut reply).await {
            warn!("Question from {} failed: {}", ctx.identity, e);
            reply.error = Some(e.to_string());
        }
        reply
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        question: &str,
        cached_id: Option<i64>,
        reply: &mut Answer,
    ) -> Result<(), AnswerError> {
        let api_key = ctx
            .settings
            .api_key()
            .await
            .map_err(AnswerError::Storage)?
            .ok_or_else(|| AnswerError::Configuration(MISSING_API_KEY.to_string()))?;

        if let Some(record) = self.cached(ctx, question, cached_id).await? {
            info!("Cache hit: question {} for {}", record.id, ctx.identity);
            reply.id = Some(record.id);
            reply.query = Some(record.query.clone());
            if record.is_error {
                return Err(match validate_query(&record.query) {
                    Err(rejection) => AnswerError::Rejected(rejection),
                    Ok(()) => AnswerError::CachedFailure,
                });
            }

            reply.prompt = Some(self.prompt_for(&record.question).await?);
            let (rows, _) = self.execute(&record.query, None).await?;
            reply.answer = Some(rows);
            return Ok(());
        }

        if question.trim().is_empty() {
            return Err(AnswerError::MissingQuestion);
        }

        let prompt = self.prompt_for(question).await?;
        reply.prompt = Some(prompt.clone());

        let completion = self
            .generator
            .generate_sql(&api_key, &prompt)
            .await
            .map_err(AnswerError::Llm)?;
        debug!(
            "Candidates: {:?} / {:?}",
            completion.query, completion.alternative_query
        );
        reply.query = Some(completion.query.clone());
        reply.alternative_query = completion.alternative_query.clone();
        reply.token_usage = completion.usage;

        if let Err(rejection) = validate_query(&completion.query) {
            reply.id = self
                .remember(ctx, question, &completion.query, 0, true)
                .await;
            return Err(AnswerError::Rejected(rejection));
        }

        let (rows, executed) = self
            .execute(&completion.query, completion.alternative_query.as_deref())
            .await?;
        reply.id = self
            .remember(ctx, question, executed, rows.len(), false)
            .await;
        reply.answer = Some(rows);
        Ok(())
    }

    async fn cached(
        &self,
        ctx: &RequestContext,
        question: &str,
        cached_id: Option<i64>,
    ) -> Result<Option<QuestionRecord>, AnswerError> {
        if let Some(id) = cached_id {
            let record = self
                .db
                .question_by_id(&ctx.identity, id)
                .await
                .map_err(AnswerError::Storage)?;
            if record.is_some() {
                return Ok(record);
            }
            debug!("Question {} not found for {}", id, ctx.identity);
        }

        if question.trim().is_empty() {
            return Ok(None);
        }
        self.db
            .question_by_text(&ctx.identity, question)
            .await
            .map_err(AnswerError::Storage)
    }

    async fn prompt_for(&self, question: &str) -> Result<Prompt, AnswerError> {
        let tables = self.schema.tables().await.map_err(AnswerError::Storage)?;
        Ok(build_prompt(question, &tables))
    }

    /// Runs `primary`, falling back to `alternative` when it fails. Returns the
    /// rows and the text of the query that produced them.
    async fn execute<'a>(
        &self,
        primary: &'a str,
        alternative: Option<&'a str>,
    ) -> Result<(Vec<ResultRow>, &'a str), AnswerError> {
        let primary_err = match self.db.run_select(primary).await {
            Ok(rows) => return Ok((rows, primary)),
            Err(e) => e,
        };

        let Some(alternative) = alternative.filter(|q| validate_query(q).is_ok()) else {
            return Err(AnswerError::Execution(primary_err));
        };

        warn!("Primary query failed ({}), trying alternative", primary_err);
        match self.db.run_select(alternative).await {
            Ok(rows) => Ok((rows, alternative)),
            Err(e) => Err(AnswerError::Execution(e)),
        }
    }

    /// Stores a newly answered question. Storage failures are logged only.
    async fn remember(
        &self,
        ctx: &RequestContext,
        question: &str,
        query: &str,
        results_count: usize,
        is_error: bool,
    ) -> Option<i64> {
        let new = NewQuestion {
            member_id: ctx.identity.clone(),
            question: question.to_string(),
            query: query.to_string(),
            results_count,
            is_error,
        };
        match self.db.insert_question(new).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to store question for {}: {}", ctx.identity, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{seed_orders, test_database};
    use crate::llm::models::Completion;
    use async_trait::async_trait;
    use context::SettingsAccessor;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGenerator {
        completion: Option<Completion>,
        calls: AtomicUsize,
    }

    impl FakeGenerator {
        fn returning(query: &str, alternative: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                completion: Some(Completion {
                    query: query.to_string(),
                    alternative_query: alternative.map(str::to_string),
                    usage: Some(TokenUsage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        total_tokens: 15,
                    }),
                }),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                completion: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SqlGenerator for FakeGenerator {
        async fn generate_sql(&self, api_key: &str, _prompt: &Prompt) -> Result<Completion, LlmError> {
            assert_eq!(api_key, "sk-test");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.completion
                .clone()
                .ok_or_else(|| LlmError::ConnectionError("timed out".to_string()))
        }
    }

    struct Fixture {
        db: Database,
        answerer: QuestionAnswerer,
        generator: Arc<FakeGenerator>,
    }

    impl Fixture {
        fn ctx(&self, identity: &str) -> RequestContext {
            RequestContext::new(
                identity,
                SettingsAccessor::new(self.db.clone(), Some("sk-test".to_string())),
            )
        }
    }

    async fn fixture(generator: Arc<FakeGenerator>) -> Fixture {
        let db = test_database().await;
        seed_orders(&db).await;
        let schema = Arc::new(SchemaManager::new(db.clone(), 0));
        let answerer = QuestionAnswerer::new(db.clone(), schema, generator.clone());
        Fixture {
            db,
            answerer,
            generator,
        }
    }

    const COUNT_ORDERS: &str = "SELECT COUNT(*) AS orders FROM orders";

    #[tokio::test]
    async fn cache_miss_answers_and_stores_the_question() {
        let fx = fixture(FakeGenerator::returning(COUNT_ORDERS, None)).await;
        let ctx = fx.ctx("alice");

        let answer = fx.answerer.answer(&ctx, "How many orders?", None).await;

        assert!(!answer.is_error(), "{:?}", answer.error);
        assert_eq!(answer.query.as_deref(), Some(COUNT_ORDERS));
        assert_eq!(answer.answer, Some(vec![json!({"orders": 3}).as_object().unwrap().clone()]));
        assert_eq!(answer.token_usage.map(|u| u.total_tokens), Some(15));
        let prompt = answer.prompt.unwrap();
        assert!(prompt.system.contains("- orders: (id, customer_id, amount, placed_on)"));
        assert!(!prompt.system.contains("datatalk_"));
        assert_eq!(prompt.user, "How many orders?");

        let record = fx.db.question_by_id("alice", answer.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(record.query, COUNT_ORDERS);
        assert_eq!(record.results_count, 1);
        assert!(!record.is_error);
        assert_eq!(fx.generator.calls(), 1);
    }

    #[tokio::test]
    async fn cached_id_replays_the_stored_query_without_the_llm() {
        let fx = fixture(FakeGenerator::returning(COUNT_ORDERS, None)).await;
        let ctx = fx.ctx("alice");
        let first = fx.answerer.answer(&ctx, "How many orders?", None).await;

        let again = fx.answerer.answer(&ctx, "How many orders?", first.id).await;
        assert_eq!(again.id, first.id);
        assert_eq!(again.query.as_deref(), Some(COUNT_ORDERS));
        assert_eq!(again.answer, first.answer);
        assert!(again.token_usage.is_none());
        assert!(again.prompt.is_some());
        assert_eq!(fx.generator.calls(), 1);

        // same text, different spacing and case
        let by_text = fx.answerer.answer(&ctx, "  how many ORDERS? ", None).await;
        assert_eq!(by_text.id, first.id);
        assert_eq!(fx.generator.calls(), 1);
        assert_eq!(fx.db.recent_questions("alice", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cache_is_scoped_to_the_identity() {
        let fx = fixture(FakeGenerator::returning(COUNT_ORDERS, None)).await;
        let first = fx.answerer.answer(&fx.ctx("alice"), "How many orders?", None).await;

        let bob = fx.answerer.answer(&fx.ctx("bob"), "How many orders?", first.id).await;
        assert!(!bob.is_error());
        assert_ne!(bob.id, first.id);
        assert_eq!(fx.generator.calls(), 2);
    }

    #[tokio::test]
    async fn side_effect_candidates_are_rejected_and_remembered() {
        let fx = fixture(FakeGenerator::returning("DROP TABLE orders", None)).await;
        let ctx = fx.ctx("alice");

        let answer = fx.answerer.answer(&ctx, "Remove orders", None).await;
        assert_eq!(answer.error.as_deref(), Some("Query must begin with SELECT."));
        assert!(answer.answer.is_none());
        let record = fx.db.question_by_id("alice", answer.id.unwrap()).await.unwrap().unwrap();
        assert!(record.is_error);
        assert_eq!(record.results_count, 0);

        // the table is untouched
        let rows = fx.db.run_select(COUNT_ORDERS).await.unwrap();
        assert_eq!(rows[0]["orders"], json!(3));

        // asking again returns the stored failure without the LLM
        let again = fx.answerer.answer(&ctx, "remove orders", None).await;
        assert_eq!(again.error.as_deref(), Some("Query must begin with SELECT."));
        assert_eq!(again.id, answer.id);
        assert!(again.answer.is_none());
        assert!(again.prompt.is_none());
        assert_eq!(fx.generator.calls(), 1);
    }

    #[tokio::test]
    async fn stored_row_count_matches_a_multi_row_answer() {
        let fx = fixture(FakeGenerator::returning("SELECT * FROM orders ORDER BY id", None)).await;

        let answer = fx.answerer.answer(&fx.ctx("alice"), "List the orders", None).await;

        assert!(!answer.is_error(), "{:?}", answer.error);
        let rows = answer.answer.as_ref().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["amount"], json!(99.0));
        let record = fx.db.question_by_id("alice", answer.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(record.results_count, 3);
    }

    #[tokio::test]
    async fn cached_failure_never_reaches_the_database() {
        let fx = fixture(FakeGenerator::returning(COUNT_ORDERS, None)).await;
        // passes the shape check, but would fail with a catalog error if run
        let id = fx
            .db
            .insert_question(NewQuestion {
                member_id: "alice".to_string(),
                question: "Old totals".to_string(),
                query: "SELECT * FROM archived_orders".to_string(),
                results_count: 0,
                is_error: true,
            })
            .await
            .unwrap();

        let answer = fx.answerer.answer(&fx.ctx("alice"), "old totals", None).await;
        assert_eq!(answer.id, Some(id));
        assert_eq!(answer.error, Some(AnswerError::CachedFailure.to_string()));
        assert!(!answer.error.unwrap().contains("archived_orders"));
        assert!(answer.answer.is_none());
        assert_eq!(fx.generator.calls(), 0);
    }

    #[tokio::test]
    async fn internal_tables_are_off_limits_to_generated_queries() {
        let fx = fixture(FakeGenerator::returning(
            "SELECT * FROM datatalk_settings",
            Some("SELECT member_id, query FROM datatalk_questions"),
        ))
        .await;
        fx.ctx("alice").settings.save_api_key("sk-test").await.unwrap();

        let answer = fx
            .answerer
            .answer(&fx.ctx("mallory"), "select everything from datatalk_settings", None)
            .await;

        assert_eq!(answer.error.as_deref(), Some("Query must not read DataTalk's own tables."));
        assert!(answer.answer.is_none());
        let record = fx.db.question_by_id("mallory", answer.id.unwrap()).await.unwrap().unwrap();
        assert!(record.is_error);
    }

    #[tokio::test]
    async fn bare_select_is_rejected_as_empty() {
        let fx = fixture(FakeGenerator::returning("SELECT ", None)).await;
        let answer = fx.answerer.answer(&fx.ctx("alice"), "anything", None).await;
        assert!(answer.error.unwrap().starts_with("Query is empty."));
        assert!(answer.answer.is_none());
    }

    #[tokio::test]
    async fn failing_primary_falls_back_to_the_alternative() {
        let fx = fixture(FakeGenerator::returning(
            "SELECT total FROM orders",
            Some(COUNT_ORDERS),
        ))
        .await;

        let answer = fx.answerer.answer(&fx.ctx("alice"), "How many orders?", None).await;

        assert!(!answer.is_error(), "{:?}", answer.error);
        assert_eq!(answer.query.as_deref(), Some("SELECT total FROM orders"));
        assert_eq!(answer.alternative_query.as_deref(), Some(COUNT_ORDERS));
        assert_eq!(answer.answer.as_ref().unwrap()[0]["orders"], json!(3));

        let record = fx.db.question_by_id("alice", answer.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(record.query, COUNT_ORDERS);
    }

    #[tokio::test]
    async fn exhausted_candidates_surface_the_database_error() {
        let fx = fixture(FakeGenerator::returning(
            "SELECT total FROM orders",
            Some("SELECT grand_total FROM orders"),
        ))
        .await;

        let answer = fx.answerer.answer(&fx.ctx("alice"), "Totals?", None).await;
        assert!(answer.error.unwrap().contains("grand_total"));
        assert!(answer.id.is_none());
        assert!(answer.answer.is_none());
        assert!(fx.db.recent_questions("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsafe_alternative_is_never_executed() {
        let fx = fixture(FakeGenerator::returning(
            "SELECT total FROM orders",
            Some("DELETE FROM orders"),
        ))
        .await;

        let answer = fx.answerer.answer(&fx.ctx("alice"), "Totals?", None).await;
        assert!(answer.error.unwrap().contains("total"));
        let rows = fx.db.run_select(COUNT_ORDERS).await.unwrap();
        assert_eq!(rows[0]["orders"], json!(3));
    }

    #[tokio::test]
    async fn llm_failure_is_returned_without_storing() {
        let fx = fixture(FakeGenerator::failing()).await;
        let answer = fx.answerer.answer(&fx.ctx("alice"), "How many orders?", None).await;

        assert!(answer.error.unwrap().contains("timed out"));
        assert!(answer.prompt.is_some());
        assert!(answer.query.is_none());
        assert!(fx.db.recent_questions("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_api_key_stops_before_any_work() {
        let fx = fixture(FakeGenerator::returning(COUNT_ORDERS, None)).await;
        let ctx = RequestContext::new("alice", SettingsAccessor::new(fx.db.clone(), None));

        let answer = fx.answerer.answer(&ctx, "How many orders?", None).await;
        assert_eq!(answer.error.as_deref(), Some(MISSING_API_KEY));
        assert!(answer.prompt.is_none());
        assert_eq!(fx.generator.calls(), 0);
    }

    #[tokio::test]
    async fn blank_question_without_cache_hit_is_refused() {
        let fx = fixture(FakeGenerator::returning(COUNT_ORDERS, None)).await;
        let answer = fx.answerer.answer(&fx.ctx("alice"), "   ", Some(404)).await;
        assert_eq!(answer.error.as_deref(), Some("Question is empty."));
        assert_eq!(fx.generator.calls(), 0);
    }

    #[test]
    fn answer_serializes_with_camel_case_keys() {
        let answer = Answer {
            alternative_query: Some("SELECT 2".into()),
            ..Answer::default()
        };
        let value = serde_json::to_value(&answer).unwrap();
        assert_eq!(value["alternativeQuery"], "SELECT 2");
        assert!(value.get("tokenUsage").is_some());
        assert_eq!(value["error"], serde_json::Value::Null);
    }
}
