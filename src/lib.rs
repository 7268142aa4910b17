pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::services::sandbox::Judge0Client;
use crate::services::store::PgStore;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let sandbox = Judge0Client::from_settings(settings.sandbox())?;
    tracing::info!(
        base_url = %settings.sandbox().base_url,
        language_id = settings.sandbox().language_id,
        "Code sandbox configured"
    );

    let state = AppState::new(settings, Arc::new(PgStore::new(db_pool)), Arc::new(sandbox));
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Eduvers assessment API listening"
    );

    axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await?;
    tracing::info!("Server stopped");

    Ok(())
}
