use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod answer;
mod config;
mod db;
mod llm;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs, Command};
use crate::db::Database;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let db = Database::connect(&config.database)?;
    db.setup().await?;

    info!("Initializing LLM backend: {} ({})", config.llm.backend, config.llm.model);
    let generator = llm::providers::from_config(&config.llm)?;

    let app_state = Arc::new(AppState::new(config.clone(), db, generator));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            if let Err(e) = app_state.schema_manager.refresh_cache().await {
                error!("Failed to initialize schema cache: {}", e);
                // Continue anyway, it will be refreshed on the next question
            }

            info!("Starting DataTalk server on {}:{}", config.web.host, config.web.port);
            match web::run_server(config.web, app_state).await {
                Ok(_) => info!("Server stopped gracefully"),
                Err(e) => {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
        }
        Command::Ask {
            member,
            id,
            question,
        } => {
            let ctx = app_state.context(&member);
            let answer = app_state.answerer.answer(&ctx, &question, id).await;
            println!("{}", serde_json::to_string_pretty(&answer)?);
            if answer.is_error() {
                std::process::exit(1);
            }
        }
        Command::SetKey { key } => {
            app_state.settings().save_api_key(&key).await?;
            info!("API key saved");
        }
    }

    Ok(())
}
