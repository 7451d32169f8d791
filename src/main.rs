use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use concierge::cli::Cli;
use concierge::config::Settings;
use concierge::orchestrator::llm::OpenAiClient;
use concierge::orchestrator::{Orchestrator, RateLimitSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concierge=info,tower_http=info".into()),
        )
        .init();

    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting Concierge on {}:{}", host, port);

    let llm = Arc::new(OpenAiClient::from_env(
        &settings.llm.model,
        settings.llm.base_url.clone(),
    )?);

    let mut builder = Orchestrator::builder(llm)
        .with_config(settings.react.clone())
        .with_pool_config(settings.pool.clone());

    if let Some(persona) = &settings.persona {
        builder = builder.with_persona(persona);
    }
    if let Some(rate_limit) = &settings.rate_limit {
        if rate_limit.enabled {
            builder = builder.with_rate_limit(RateLimitSettings {
                requests_per_second: rate_limit.requests_per_second,
                burst_size: rate_limit.burst_size,
            });
        }
    }

    let orchestrator = builder.build()?;
    orchestrator.start().await?;

    let app = concierge::create_app(orchestrator.clone());
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    orchestrator.shutdown();
    Ok(())
}
