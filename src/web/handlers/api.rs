use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::answer::context::RequestContext;
use crate::answer::MISSING_API_KEY;
use crate::db::questions::QuestionRecord;
use crate::db::schema_manager::TableInfo;
use crate::db::DbError;
use crate::web::handlers::identity::Identity;
use crate::web::state::AppState;

// Request types

/// Everything the DataTalk endpoint can be asked to do.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "purpose", rename_all = "kebab-case")]
pub enum DataTalkRequest {
    SaveSettings {
        chatgpt_api_key: String,
    },
    GetAnswer {
        #[serde(default)]
        question: String,
        #[serde(default)]
        id: Option<i64>,
    },
    DeleteQuestion {
        id: i64,
    },
}

// System status

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub api_key_configured: bool,
    pub table_count: usize,
}

fn storage_error(e: DbError) -> (StatusCode, String) {
    error!("Storage error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Database error: {}", e),
    )
}

// API Implementations

pub async fn datatalk(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    body: Bytes,
) -> Response {
    let request: DataTalkRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejected DataTalk request: {}", e);
            return (StatusCode::BAD_REQUEST, format!("Invalid purpose: {}", e)).into_response();
        }
    };

    let ctx = state.context(&identity);

    if !matches!(request, DataTalkRequest::SaveSettings { .. }) {
        match ctx.settings.api_key().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, MISSING_API_KEY).into_response();
            }
            Err(e) => return storage_error(e).into_response(),
        }
    }

    match request {
        DataTalkRequest::SaveSettings { chatgpt_api_key } => {
            save_settings(&ctx, &chatgpt_api_key).await.into_response()
        }
        DataTalkRequest::GetAnswer { question, id } => {
            get_answer(&state, &ctx, &question, id).await
        }
        DataTalkRequest::DeleteQuestion { id } => {
            delete_question(&state, &ctx, id).await.into_response()
        }
    }
}

async fn save_settings(
    ctx: &RequestContext,
    api_key: &str,
) -> Result<&'static str, (StatusCode, String)> {
    if api_key.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "API key must not be empty".to_string()));
    }
    ctx.settings.save_api_key(api_key).await.map_err(storage_error)?;
    info!("API key updated by {}", ctx.identity);
    Ok("Settings saved successfully.")
}

async fn get_answer(
    state: &AppState,
    ctx: &RequestContext,
    question: &str,
    id: Option<i64>,
) -> Response {
    if question.trim().is_empty() && id.is_none() {
        return (StatusCode::BAD_REQUEST, "Question must not be empty").into_response();
    }

    let answer = state.answerer.answer(ctx, question, id).await;
    let status = if answer.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(answer)).into_response()
}

async fn delete_question(
    state: &AppState,
    ctx: &RequestContext,
    id: i64,
) -> Result<StatusCode, (StatusCode, String)> {
    let deleted = state
        .db
        .delete_question(&ctx.identity, id)
        .await
        .map_err(storage_error)?;

    if deleted {
        info!("Question {} deleted by {}", id, ctx.identity);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Question {} could not be deleted", id),
        ))
    }
}

// History
pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
) -> Result<Json<Vec<QuestionRecord>>, (StatusCode, String)> {
    let questions = state
        .db
        .recent_questions(&identity, state.config.history_limit)
        .await
        .map_err(storage_error)?;
    Ok(Json(questions))
}

// Schema
pub async fn get_schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TableInfo>>, (StatusCode, String)> {
    let tables = state.schema_manager.tables().await.map_err(storage_error)?;
    Ok(Json(tables))
}

// System status
pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, (StatusCode, String)> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    let api_key_configured = state
        .settings()
        .api_key()
        .await
        .map_err(storage_error)?
        .is_some();
    let table_count = state
        .schema_manager
        .tables()
        .await
        .map_err(storage_error)?
        .len();

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        api_key_configured,
        table_count,
    }))
}
