// One-shot runner: load the config document, execute a single query (or
// list the configured targets when no query is given), print the result as
// JSON, and tear down the connections.
use std::sync::Arc;
use tracing::{error, info};

use dbsearch_core::{Config, ConnectionManager, QueryRequest, QueryService};

struct CliArgs {
    query: Option<String>,
    database_id: Option<String>,
    target_database: Option<String>,
    raw_sql: bool,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut args = std::env::args().skip(1);
    let mut parsed = CliArgs {
        query: None,
        database_id: None,
        target_database: None,
        raw_sql: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--database" => {
                parsed.database_id = Some(args.next().ok_or("--database needs a value")?);
            }
            "--target" => {
                parsed.target_database = Some(args.next().ok_or("--target needs a value")?);
            }
            "--raw" => parsed.raw_sql = true,
            other => {
                let mut query = parsed.query.unwrap_or_default();
                if !query.is_empty() {
                    query.push(' ');
                }
                query.push_str(other);
                parsed.query = Some(query);
            }
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args().map_err(|e| anyhow::anyhow!(e))?;

    // The subscriber must be up before the config loader runs, or its
    // warnings about unset placeholders and bad overrides are dropped.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level =
                    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
                tracing_subscriber::EnvFilter::new(level)
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path =
        std::env::var("DBSEARCH_CONFIG").unwrap_or_else(|_| "config/databases.json".to_string());
    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("{}; falling back to default config", e);
            Config::default()
        }
    };

    let connections = Arc::new(ConnectionManager::new());
    let service = QueryService::new(config, connections.clone());

    let outcome = run(&service, args).await;
    connections.close_all().await;

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(service: &QueryService, args: CliArgs) -> dbsearch_core::Result<()> {
    match args.query {
        None => {
            info!("no query given, listing configured targets");
            let listings = service.list_databases(args.database_id.as_deref()).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&listings).unwrap_or_default()
            );
        }
        Some(query) => {
            let request = QueryRequest {
                query,
                database_id: args.database_id,
                target_database: args.target_database,
                raw_sql: args.raw_sql,
            };
            let execution = service.run(request).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&execution).unwrap_or_default()
            );
        }
    }
    Ok(())
}
