//! Server entry point.

use std::sync::Arc;

use parleql_core::config::{ExporterKind, Settings};
use parleql_core::Engine;
use tracing_subscriber::EnvFilter;

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match settings.observability_exporter {
        ExporterKind::Console => {
            tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
        },
        // OTLP export is wired by the deployment; structured JSON logs are
        // the portable substrate either way.
        ExporterKind::Otlp | ExporterKind::None => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();
    init_tracing(&settings);

    let engine = Engine::builder(settings).build().await?;
    let router = parleql_server::build_router(Arc::new(engine));

    let host = std::env::var("HOST").unwrap_or_else(|_| String::from("0.0.0.0"));
    let port = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()).unwrap_or(8000);
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    tracing::info!(%host, port, "parleql server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
