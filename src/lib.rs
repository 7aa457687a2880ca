use cli::Command;
use config::Config;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod algorithm;
pub mod barrier;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod jose;
pub mod keygen;
pub mod keypool;
pub mod query;
pub mod service;

/// Installs the global subscriber: pretty output in debug builds, JSON in
/// release builds, filtered by `KEYPOOL_LOG`.
pub fn init_tracing() -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("KEYPOOL_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("KEYPOOL_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    Ok(())
}

/// Returns a builder for one invocation of the command line tool.
#[bon::builder(finish_fn = start)]
pub async fn run(config: Config, command: Command) -> eyre::Result<()> {
    let service = service::Service::connect_with()
        .config(config)
        .call()
        .await?;

    let result = command.execute(&service).await;

    service.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);

    Ok(())
}
