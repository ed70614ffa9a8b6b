//! CLI entrypoint: gateway daemon plus REST client subcommands.

mod client;
mod config;
mod daemon;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use gateway::{
    QueueGateway, QuicServer, QuicServerHandle, SessionSweeper, ensure_crypto_provider,
};
use proto::GatewayError;
use rest::{Encoding, RestServer};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::client::{GatewayClient, ReadParams};
use crate::config::Config;

const SERVICE_NAME: &str = "mq-gateway";

/// Top-level command-line arguments.
#[derive(Parser)]
#[command(name = "mq-gateway")]
#[command(about = "Message queue protocol gateway", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Also write debug-level logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Gateway REST base URL for client commands (default: local REST port)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (REST and RPC adapters) until SIGINT/SIGTERM
    Start,

    /// Put one message on a queue
    Put {
        queue: String,
        message: String,
        /// Message argument is base64 encoded
        #[arg(long)]
        base64: bool,
    },

    /// Get (remove) the next message from a queue
    Get {
        queue: String,
        #[arg(long, default_value_t = 0)]
        wait_ms: i64,
        #[arg(long, default_value_t = 0)]
        max_bytes: i64,
        /// Print the message base64 encoded
        #[arg(long)]
        base64: bool,
    },

    /// Browse messages without removing them
    Browse {
        queue: String,
        /// Maximum number of messages to show
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        #[arg(long, default_value_t = 0)]
        wait_ms: i64,
        #[arg(long, default_value_t = 0)]
        max_bytes: i64,
        #[arg(long)]
        base64: bool,
    },

    /// Show queue attributes
    Inquire { queue: String },
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Start => "start",
            Commands::Put { .. } => "put",
            Commands::Get { .. } => "get",
            Commands::Browse { .. } => "browse",
            Commands::Inquire { .. } => "inquire",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard = init_tracing(&cli)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = cli.command.label(),
        "mq-gateway invoked"
    );

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Start => {
            let span = info_span!("gateway", service = SERVICE_NAME);
            cmd_start(config).instrument(span).await
        }
        command => {
            let base = cli
                .url
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.rest.port));
            let client = GatewayClient::new(base);
            debug!(url = client.base(), "Using gateway REST endpoint");
            run_client(client, command).await
        }
    }
}

fn init_tracing(
    cli: &Cli,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let console = match cli.log_format {
        LogFormat::Text => fmt::layer().with_target(false).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    }
    .with_filter(console_filter);

    let (file, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "mq-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug,hyper_util=info,rustls=info,quinn=info"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Ok(guard)
}

/// Connects the backend and serves until SIGINT/SIGTERM.
async fn cmd_start(config: Config) -> anyhow::Result<()> {
    info!("Starting mq-gateway");

    let options = config.to_connection_options()?;
    let client = gateway::connect(&options).await?;
    let core = Arc::new(QueueGateway::with_ttl(client, config.browse.ttl()));
    info!(
        ttl_secs = core.browse_ttl().as_secs(),
        "Gateway core ready"
    );

    let pid_file = daemon::PidFile::new(daemon::PidFile::default_path());
    let served = serve(&config, core, async {
        pid_file.write().await?;
        if let Err(e) = daemon::wait_for_shutdown().await {
            error!("Signal handling failed: {e}");
        }
        Ok::<(), anyhow::Error>(())
    })
    .await;

    pid_file.remove().await;
    info!("mq-gateway stopped");
    served
}

/// Starts the adapters around `core`, waits for `until`, then tears down.
///
/// Teardown always runs, also when an adapter fails to start: the core
/// closes its browse sessions and disconnects before the adapters stop.
async fn serve<F>(config: &Config, core: Arc<QueueGateway>, until: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let sweeper = config
        .browse
        .sweep_interval()
        .map(|interval| SessionSweeper::spawn(core.clone(), interval));

    let mut adapters = Adapters::default();
    let served = match adapters.start(config, &core).await {
        Ok(()) => until.await,
        Err(e) => {
            error!("Adapter startup failed: {e:#}");
            Err(e)
        }
    };

    if let Some(sweeper) = sweeper {
        sweeper.stop();
    }
    core.shutdown().await;
    adapters.stop().await;
    served
}

/// Running protocol adapters.
#[derive(Default)]
struct Adapters {
    rest: Option<(oneshot::Sender<()>, JoinHandle<Result<(), GatewayError>>)>,
    rpc: Option<(QuicServerHandle, JoinHandle<()>)>,
}

impl Adapters {
    /// Starts the enabled adapters. Ones already running stay recorded on error.
    async fn start(&mut self, config: &Config, core: &Arc<QueueGateway>) -> anyhow::Result<()> {
        if config.rest.enabled {
            let server = RestServer::bind(config.rest.socket_addr()?, core.clone()).await?;
            let (stop, stopped) = oneshot::channel::<()>();
            let shutdown = async move {
                let _ = stopped.await;
            };
            let task = tokio::spawn(server.run(shutdown).in_current_span());
            self.rest = Some((stop, task));
        }

        if config.rpc.enabled {
            ensure_crypto_provider();
            let addr = config.rpc.socket_addr()?;
            let server = match (&config.rpc.cert_path, &config.rpc.key_path) {
                (Some(cert), Some(key)) => {
                    let cert_pem =
                        std::fs::read(cert).with_context(|| format!("reading {cert}"))?;
                    let key_pem = std::fs::read(key).with_context(|| format!("reading {key}"))?;
                    QuicServer::new_with_certs(addr, &cert_pem, &key_pem, core.clone())?
                }
                (None, None) => QuicServer::new_self_signed(addr, core.clone())?,
                _ => anyhow::bail!("rpc.cert_path and rpc.key_path must be set together"),
            };
            let handle = server.handle();
            self.rpc = Some((handle, tokio::spawn(server.run().in_current_span())));
        }
        Ok(())
    }

    async fn stop(self) {
        if let Some((handle, task)) = self.rpc {
            handle.close();
            if let Err(e) = task.await {
                warn!("RPC server task ended abnormally: {e}");
            }
        }

        if let Some((stop, task)) = self.rest {
            let _ = stop.send(());
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("REST adapter error: {e}"),
                Err(e) => warn!("REST server task ended abnormally: {e}"),
            }
        }
    }
}

async fn run_client(client: GatewayClient, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Put {
            queue,
            message,
            base64,
        } => {
            client.put(&queue, &message, encoding(base64)).await?;
            println!("ok");
        }
        Commands::Get {
            queue,
            wait_ms,
            max_bytes,
            base64,
        } => {
            let response = client
                .get(&queue, read_params(wait_ms, max_bytes, base64))
                .await?;
            match response.message {
                Some(message) if !response.empty => println!("{message}"),
                _ => println!("(empty)"),
            }
        }
        Commands::Browse {
            queue,
            count,
            wait_ms,
            max_bytes,
            base64,
        } => {
            let messages = client
                .browse(&queue, count, read_params(wait_ms, max_bytes, base64))
                .await?;
            if messages.is_empty() {
                println!("(empty)");
            }
            for (i, message) in messages.iter().enumerate() {
                println!("[{}] {message}", i + 1);
            }
        }
        Commands::Inquire { queue } => {
            let info = client.inquire(&queue).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Start => anyhow::bail!("start is not a client command"),
    }
    Ok(())
}

fn encoding(base64: bool) -> Encoding {
    if base64 { Encoding::Base64 } else { Encoding::Text }
}

fn read_params(wait_ms: i64, max_msg_bytes: i64, base64: bool) -> ReadParams {
    ReadParams {
        wait_ms,
        max_msg_bytes,
        encoding: encoding(base64),
    }
}

#[cfg(test)]
mod tests {
    use gateway::InMemoryQueueManager;

    use super::*;

    const Q: &str = "DEV.QUEUE.1";

    fn local_config() -> Config {
        let mut config = Config::default();
        config.rest.bind = "127.0.0.1".to_string();
        config.rest.port = 0;
        config.rpc.bind = "127.0.0.1".to_string();
        config.rpc.port = 0;
        config
    }

    async fn core_with_open_session() -> (Arc<InMemoryQueueManager>, Arc<QueueGateway>) {
        let qm = Arc::new(InMemoryQueueManager::with_queues("QM1", [Q]));
        let core = Arc::new(QueueGateway::new(qm.clone()));
        core.put(Q, b"m").await.expect("put");
        core.browse_first(Q, 0, 0).await.expect("browse");
        assert_eq!(qm.stats().browse_open, 1);
        (qm, core)
    }

    #[tokio::test]
    async fn adapter_startup_failure_still_shuts_core_down() {
        let (qm, core) = core_with_open_session().await;
        let mut config = local_config();
        config.rpc.cert_path = Some("only-cert.pem".to_string());

        let err = serve(&config, core.clone(), async { Ok(()) })
            .await
            .expect_err("half-configured certificates must fail");
        assert!(err.to_string().contains("must be set together"));

        assert!(core.is_shut_down());
        let stats = qm.stats();
        assert_eq!(stats.browse_open, 0);
        assert!(!stats.connected);
    }

    #[tokio::test]
    async fn invalid_bind_address_still_shuts_core_down() {
        let (qm, core) = core_with_open_session().await;
        let mut config = local_config();
        config.rest.bind = "not-an-ip".to_string();

        serve(&config, core.clone(), async { Ok(()) })
            .await
            .expect_err("bad bind address must fail");
        assert!(core.is_shut_down());
        assert!(!qm.stats().connected);
    }

    #[tokio::test]
    async fn serve_tears_down_after_shutdown_future() {
        let (qm, core) = core_with_open_session().await;
        let mut config = local_config();
        config.browse.sweep_interval_secs = 60;

        serve(&config, core.clone(), async { Ok(()) })
            .await
            .expect("serve");
        assert!(core.is_shut_down());
        assert_eq!(qm.stats().browse_open, 0);
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mq-gateway",
            "get",
            "DEV.QUEUE.1",
            "--wait-ms",
            "250",
            "--log-format",
            "json",
        ])
        .expect("parse");
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Get { queue, wait_ms, .. } => {
                assert_eq!(queue, "DEV.QUEUE.1");
                assert_eq!(wait_ms, 250);
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn browse_defaults_to_ten_messages() {
        let cli = Cli::try_parse_from(["mq-gateway", "browse", "Q"]).expect("parse");
        assert!(matches!(cli.command, Commands::Browse { count: 10, .. }));
        assert_eq!(cli.command.label(), "browse");
    }

    #[test]
    fn start_requires_no_arguments() {
        let cli = Cli::try_parse_from(["mq-gateway", "--config", "gw.toml", "start"])
            .expect("parse");
        assert!(matches!(cli.command, Commands::Start));
        assert_eq!(cli.config, Some(PathBuf::from("gw.toml")));
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn read_params_select_encoding() {
        assert_eq!(read_params(0, 0, true).encoding, Encoding::Base64);
        assert_eq!(read_params(0, 0, false).encoding, Encoding::Text);
    }
}
