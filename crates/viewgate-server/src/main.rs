//! viewgate server: product page queue over WebSocket.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use viewgate::transport::{ServerConfig, serve};
use viewgate::{AdmissionConfig, QueueService, VIEWGATE_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    #[value(alias = "warning")]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Filter applied when RUST_LOG is unset: this level for our crates only.
    fn directives(self) -> String {
        let level = self.as_str();
        format!("viewgate={level},viewgate_server={level}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "viewgate", version, about = "Exclusive product page queue server")]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "VIEWGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "VIEWGATE_PORT", default_value_t = 5000)]
    port: u16,

    /// Undelivered control frames buffered per connection.
    #[arg(long, env = "VIEWGATE_CHANNEL_CAPACITY", default_value_t = 64)]
    channel_capacity: usize,

    /// Evict an occupant after this many seconds. Unset: never evict.
    #[arg(long, env = "VIEWGATE_HOLD_LIMIT_SECS")]
    hold_limit_secs: Option<u64>,

    /// Seconds between eviction/pruning sweeps.
    #[arg(long, env = "VIEWGATE_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    sweep_interval_secs: u64,

    /// Ignored when RUST_LOG is set.
    #[arg(long, env = "VIEWGATE_LOG", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }

    fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            channel_capacity: self.channel_capacity,
            hold_limit: self.hold_limit_secs.map(Duration::from_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    fn init_tracing(&self) -> anyhow::Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.directives()));
        let json = self.log_format == LogFormat::Json;

        tracing_subscriber::registry()
            .with(filter)
            .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
            .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
            .try_init()?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.init_tracing()?;

    info!(version = VIEWGATE_VERSION, "viewgate starting");

    let service = Arc::new(QueueService::new(cli.admission_config()));
    serve(cli.server_config(), service).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_map_to_configs() {
        let cli = Cli::try_parse_from([
            "viewgate",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--channel-capacity",
            "8",
            "--hold-limit-secs",
            "300",
            "--sweep-interval-secs",
            "5",
        ])
        .unwrap();

        assert_eq!(
            cli.server_config(),
            ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            }
        );
        assert_eq!(
            cli.admission_config(),
            AdmissionConfig {
                channel_capacity: 8,
                hold_limit: Some(Duration::from_secs(300)),
                sweep_interval: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn hold_limit_defaults_to_disabled() {
        let cli = Cli::try_parse_from(["viewgate"]).unwrap();
        assert_eq!(cli.admission_config().hold_limit, None);
    }

    #[test]
    fn log_flags_parse() {
        let cli = Cli::try_parse_from(["viewgate", "--log-level", "warning", "--log-format", "json"])
            .unwrap();
        assert_eq!(cli.log_level, LogLevel::Warn);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.log_level.directives(), "viewgate=warn,viewgate_server=warn");

        assert!(Cli::try_parse_from(["viewgate", "--log-level", "loud"]).is_err());
    }
}
