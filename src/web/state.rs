use crate::answer::context::{RequestContext, SettingsAccessor};
use crate::answer::QuestionAnswerer;
use crate::config::AppConfig;
use crate::db::schema_manager::SchemaManager;
use crate::db::Database;
use crate::llm::SqlGenerator;
use std::sync::Arc;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub schema_manager: Arc<SchemaManager>,
    pub answerer: QuestionAnswerer,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database, generator: Arc<dyn SqlGenerator>) -> Self {
        let schema_manager = Arc::new(SchemaManager::new(
            db.clone(),
            config.database.schema_refresh_secs,
        ));
        let answerer = QuestionAnswerer::new(db.clone(), Arc::clone(&schema_manager), generator);

        Self {
            config,
            db,
            schema_manager,
            answerer,
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn settings(&self) -> SettingsAccessor {
        SettingsAccessor::new(self.db.clone(), self.config.llm.api_key.clone())
    }

    /// Context for one request made on behalf of `identity`
    pub fn context(&self, identity: &str) -> RequestContext {
        RequestContext::new(identity, self.settings())
    }
}
