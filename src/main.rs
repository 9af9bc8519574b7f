use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod app;
mod backfill;
mod catalog;
mod cli;
mod client;
mod config;
mod embeddings;
mod search;
#[cfg(test)]
mod tests;
mod web;

use app::{AppFactory, AppServices};
use config::{Config, Credentials};
use search::RawRequest;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();
    let config = Config::load_with(&args.config_dir)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args.command, config))
}

async fn run(command: cli::Command, config: Config) -> anyhow::Result<()> {
    match command {
        cli::Command::Serve { bind } => {
            let services = create_services(&config);
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            web::serve(&bind, services).await
        }

        cli::Command::Search { query, limit } => {
            let services = create_services(&config);
            let mut body = json!({ "q": query });
            if let Some(limit) = limit {
                body["limit"] = json!(limit);
            }

            let response = services
                .search
                .handle(RawRequest::post(body.to_string()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }

        cli::Command::Backfill { batch_size } => {
            let services = create_services(&config);
            let result = services.backfill()?.run(batch_size).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }

        cli::Command::Client { endpoint } => {
            let endpoint = endpoint.unwrap_or_else(|| config.client.endpoint.clone());
            let client = client::SearchClient::new(&endpoint, config.client.limit);
            client::run_interactive(client, Duration::from_millis(config.client.debounce_ms)).await
        }
    }
}

fn create_services(config: &Config) -> AppServices {
    AppFactory::create_services(config, &Credentials::from_env())
}
