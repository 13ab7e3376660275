use crate::db::{Database, DbError};

pub const API_KEY_SETTING: &str = "chatgpt_api_key";

/// Reads and writes the settings the answerer depends on.
#[derive(Clone)]
pub struct SettingsAccessor {
    db: Database,
    fallback_api_key: Option<String>,
}

impl SettingsAccessor {
    pub fn new(db: Database, fallback_api_key: Option<String>) -> Self {
        Self {
            db,
            fallback_api_key: fallback_api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
        }
    }

    /// The stored key wins over the one from configuration.
    pub async fn api_key(&self) -> Result<Option<String>, DbError> {
        Ok(self
            .db
            .setting(API_KEY_SETTING)
            .await?
            .or_else(|| self.fallback_api_key.clone()))
    }

    pub async fn save_api_key(&self, key: &str) -> Result<(), DbError> {
        self.db.set_setting(API_KEY_SETTING, key).await
    }
}

/// Who is asking, and where their settings live.
#[derive(Clone)]
pub struct RequestContext {
    pub identity: String,
    pub settings: SettingsAccessor,
}

impl RequestContext {
    pub fn new(identity: impl Into<String>, settings: SettingsAccessor) -> Self {
        Self {
            identity: identity.into(),
            settings,
        }
    }
}
