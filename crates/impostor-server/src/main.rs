use clap::Parser;

use impostor_server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real env vars and flags still apply.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "impostor_server=debug,impostor_common=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = ServerConfig::parse();

    tracing::info!("Starting impostor server on {}:{}", config.host, config.port);
    impostor_server::run(config).await
}
