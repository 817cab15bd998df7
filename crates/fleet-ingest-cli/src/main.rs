//! fleet-ingest CLI - vehicle telemetry ingestion consumer and fleet simulator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_ingest_core::config::LogFormat;
use fleet_ingest_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Process exit status.
///
/// Zero for success, including a clean drain; orchestration distinguishes
/// dropped events (4) from startup failures (1-3).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution, including a clean drain on shutdown
    Success = 0,
    /// Configuration could not be loaded or is invalid
    ConfigError = 1,
    /// Kafka-related error (connection, subscription, delivery)
    KafkaError = 2,
    /// Sink error outside the ingestion loop
    SinkError = 3,
    /// Buffered events were dropped because the final write failed
    DrainFailed = 4,
    /// Monitoring endpoint unreachable or unhealthy
    HealthCheckError = 6,
    /// Anything else
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code.
    ///
    /// Core errors are matched by type; anything else falls back to
    /// inspecting the message.
    fn from_error(error: &anyhow::Error) -> Self {
        use fleet_ingest_core::Error as CoreError;

        if let Some(core) = error.downcast_ref::<CoreError>() {
            return match core {
                CoreError::Config(_) | CoreError::Serialization(_) | CoreError::Io(_) => {
                    ExitCode::ConfigError
                }
                CoreError::Kafka(_) | CoreError::Intake(_) => ExitCode::KafkaError,
                CoreError::Sink(_) => ExitCode::SinkError,
                CoreError::DrainFailed { .. } => ExitCode::DrainFailed,
                CoreError::Accumulator(_) => ExitCode::RuntimeError,
            };
        }

        let error_str = format!("{:#}", error).to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("kafka") {
            ExitCode::KafkaError
        } else if error_str.contains("health") {
            ExitCode::HealthCheckError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "fleet-ingest")]
#[command(about = "Vehicle telemetry ingestion: Kafka to warehouse", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume positions and deliver them to the warehouse
    Ingest {
        /// Override Kafka bootstrap servers (comma separated)
        #[arg(long, env = "FLEET_BOOTSTRAP_SERVERS")]
        bootstrap_servers: Option<String>,

        /// Override Kafka topic
        #[arg(long, env = "FLEET_TOPIC")]
        topic: Option<String>,

        /// Override consumer group
        #[arg(long, env = "FLEET_CONSUMER_GROUP")]
        consumer_group: Option<String>,

        /// Override batch size
        #[arg(long, env = "FLEET_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Create the destination table first (postgres sink only)
        #[arg(long)]
        create_table: bool,
    },

    /// Run the fleet simulator and publish positions
    Produce {
        /// Override Kafka bootstrap servers (comma separated)
        #[arg(long, env = "FLEET_BOOTSTRAP_SERVERS")]
        bootstrap_servers: Option<String>,

        /// Override Kafka topic
        #[arg(long, env = "FLEET_TOPIC")]
        topic: Option<String>,

        /// Override the number of simulated vehicles
        #[arg(long)]
        fleet_size: Option<usize>,

        /// Override the interval between updates in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many fleet-wide updates
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Show status and health
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log format comes from the config when it parses; JSON otherwise
    let log_format = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring.log_format)
        .unwrap_or(LogFormat::Json);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            bootstrap_servers,
            topic,
            consumer_group,
            batch_size,
            create_table,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_kafka_overrides(&mut config, bootstrap_servers, topic);
            if let Some(group) = consumer_group {
                config.kafka.consumer_group = group;
            }
            if let Some(size) = batch_size {
                config.batch.batch_size = size;
            }
            commands::ingest::run(config, create_table).await?;
        }

        Commands::Produce {
            bootstrap_servers,
            topic,
            fleet_size,
            interval_ms,
            ticks,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_kafka_overrides(&mut config, bootstrap_servers, topic);
            if let Some(size) = fleet_size {
                config.producer.fleet_size = size;
            }
            if let Some(interval) = interval_ms {
                config.producer.interval_ms = interval;
            }
            commands::produce::run(config, ticks).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, &metrics_url).await?;
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

fn apply_kafka_overrides(
    config: &mut Config,
    bootstrap_servers: Option<String>,
    topic: Option<String>,
) {
    if let Some(servers) = bootstrap_servers {
        config.kafka.bootstrap_servers = servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(t) = topic {
        config.kafka.topic = t;
    }
}

/// Load the config file and fill secrets from the environment.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or_else(|| Path::new("config.toml"));

    let mut config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    apply_secret_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Secrets may live outside the file: `FLEET_PG_PASSWORD`, `SNOWFLAKE_TOKEN`.
fn apply_secret_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let (Some(pg), Some(password)) = (config.sink.postgres.as_mut(), lookup("FLEET_PG_PASSWORD"))
    {
        pg.password = Some(password);
    }
    if let (Some(sf), Some(token)) = (config.sink.snowflake.as_mut(), lookup("SNOWFLAKE_TOKEN")) {
        sf.token = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
        [kafka]
        bootstrap_servers = ["localhost:9092"]

        [sink]
        kind = "postgres"

        [sink.postgres]
        host = "localhost"
        database = "fleet"
        user = "vehicle_app_user"
    "#;

    #[test]
    fn test_exit_code_from_core_error() {
        let err = anyhow::Error::new(fleet_ingest_core::Error::DrainFailed {
            dropped: 3,
            source: fleet_ingest_core::WriteError::Timeout { elapsed_ms: 30000 },
        });
        assert_eq!(ExitCode::from_error(&err), ExitCode::DrainFailed);

        let err = anyhow::Error::new(fleet_ingest_core::Error::Config("bad".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);
    }

    #[test]
    fn test_exit_code_from_message() {
        let err = anyhow::anyhow!("Kafka broker unreachable");
        assert_eq!(ExitCode::from_error(&err), ExitCode::KafkaError);

        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&err), ExitCode::RuntimeError);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.kafka.topic, "vehicle_positions");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/fleet.toml"))).unwrap_err();
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);
        assert!(format!("{:#}", err).contains("Failed to load config"));
    }

    #[test]
    fn test_secret_env_overrides() {
        let mut config: Config = toml::from_str(CONFIG).unwrap();
        apply_secret_env(&mut config, |key| match key {
            "FLEET_PG_PASSWORD" => Some("s3cret".into()),
            "SNOWFLAKE_TOKEN" => Some("ignored".into()),
            _ => None,
        });

        let pg = config.sink.postgres.as_ref().unwrap();
        assert_eq!(pg.password.as_deref(), Some("s3cret"));
        assert!(config.sink.snowflake.is_none());
    }

    #[test]
    fn test_bootstrap_override_splits_list() {
        let mut config: Config = toml::from_str(CONFIG).unwrap();
        apply_kafka_overrides(
            &mut config,
            Some("broker-1:9092, broker-2:9092".into()),
            Some("positions_v2".into()),
        );
        assert_eq!(
            config.kafka.bootstrap_servers,
            vec!["broker-1:9092", "broker-2:9092"]
        );
        assert_eq!(config.kafka.topic, "positions_v2");
    }
}
