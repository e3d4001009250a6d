//! splitd: multi-uplink traffic splitter daemon
//!
//! Reads new sessions from NFQUEUE, scores the configured uplinks and
//! accepts each packet with the chosen uplink's routing mark.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration file
//! sudo ./splitd
//!
//! # Run with a custom configuration and queue
//! sudo ./splitd -c /path/to/splitd.json -q 47
//!
//! # Reload the configuration
//! kill -HUP $(pidof splitd)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use splitd::config::{load_config_with_env, Config};
use splitd::manager::Manager;
use splitd::queue::PacketQueue;
use splitd::reader::Reader;
use splitd::rules::RuleRegistry;
use splitd::uplink::{LinkMonitor, LinkStatusBoard, SysfsDiscovery, UplinkDiscovery};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Queue number override
    queue: Option<u16>,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/splitd/splitd.json");
        let mut queue = None;
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-q" | "--queue" => match args.next().map(|n| n.parse::<u16>()) {
                    Some(Ok(number)) => queue = Some(number),
                    _ => {
                        eprintln!("--queue expects a number between 0 and 65535");
                        std::process::exit(1);
                    }
                },
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("splitd v{}", splitd::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            queue,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"splitd v{}

Multi-uplink traffic splitter. Scores every new session queued by the
firewall and marks it for the chosen uplink's routing table.

USAGE:
    splitd [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/splitd/splitd.json]
    -q, --queue <NUM>       NFQUEUE number, overrides the configuration
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    SPLITD_LOG_LEVEL    Override log level (trace, debug, info, warn, error)
    SPLITD_QUEUE_NUM    Override NFQUEUE number
    SPLITD_ENABLED      Override the master switch (true/false)

SIGNALS:
    SIGHUP              Reload the configuration file
    SIGINT, SIGTERM     Shut down

EXAMPLE:
    # Queue new sessions and route by mark (uplink N uses table 64 + N)
    iptables -t mangle -A PREROUTING -m conntrack --ctstate NEW -j NFQUEUE --queue-num 47
    ip rule add fwmark 65 lookup 65
    ip rule add fwmark 66 lookup 66

    sudo splitd -c /etc/splitd/splitd.json
"#,
        splitd::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    match (config.log.format.as_str(), config.log.timestamps) {
        ("json", true) => builder.json().init(),
        ("json", false) => builder.json().without_time().init(),
        (_, true) => builder.init(),
        (_, false) => builder.without_time().init(),
    }
}

#[cfg(all(target_os = "linux", feature = "nfqueue"))]
fn open_queue(config: &Config) -> Result<splitd::queue::NfQueue> {
    splitd::queue::NfQueue::open(&config.queue)
        .with_context(|| format!("Failed to open NFQUEUE {}", config.queue.number))
}

#[cfg(not(all(target_os = "linux", feature = "nfqueue")))]
fn open_queue(_config: &Config) -> Result<splitd::queue::ChannelQueue> {
    anyhow::bail!("splitd was built without NFQUEUE support")
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        splitd::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    // Load configuration
    let mut config = load_config_with_env(&args.config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config_path))?;
    if let Some(number) = args.queue {
        config.queue.number = number;
    }

    // Handle check-config
    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    // Initialize logging
    init_logging(&config);

    info!("splitd v{}", splitd::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let queue = open_queue(&config)?;
    run(queue, config, &args, start_time).await
}

async fn run<Q: PacketQueue + 'static>(
    queue: Q,
    config: Config,
    args: &Args,
    start_time: Instant,
) -> Result<()> {
    // Reader first, so the manager has somewhere to publish
    let (reader, handle) = Reader::new(queue);
    let reader_task = reader.spawn();

    let status = Arc::new(LinkStatusBoard::new());
    let registry = Arc::new(RuleRegistry::with_builtin(Arc::clone(&status)));
    info!("Registered rules: {}", registry.names().join(", "));

    let discovery: Arc<dyn UplinkDiscovery> = Arc::new(SysfsDiscovery::new());
    let manager = Arc::new(Manager::new(Arc::clone(&registry), discovery, handle));
    let link_check = Duration::from_secs(config.link_check_interval_seconds);
    apply(&manager, config).await.context("Initial configuration rejected")?;

    let monitor_task = tokio::spawn(LinkMonitor::new().run(
        Arc::clone(&manager),
        Arc::clone(&status),
        link_check,
    ));

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    // Serve until a shutdown signal, reloading on SIGHUP
    let mut sighup = hangup_signal()?;
    let mut sigterm = terminate_signal()?;
    loop {
        tokio::select! {
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading configuration");
                match reload(&manager, args).await {
                    Ok(()) => info!("Configuration reloaded"),
                    Err(e) => error!("Reload failed, keeping current configuration: {e:#}"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, initiating shutdown...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
                break;
            }
        }
    }

    // Graceful shutdown
    info!("Shutting down...");
    monitor_task.abort();
    let _ = monitor_task.await;
    if let Err(e) = manager.shutdown() {
        error!("Reader already stopped: {}", e);
    }
    let stats = reader_task.await.context("Reader task failed")?;
    info!("Final stats: {}", stats);

    // Unload libraries once nothing references them
    drop(manager);
    match Arc::try_unwrap(registry) {
        Ok(mut registry) => registry.shutdown(),
        Err(_) => error!("Rule registry still referenced at shutdown"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Apply `config` off the async workers; rule init may block
async fn apply(manager: &Arc<Manager>, config: Config) -> Result<()> {
    let manager = Arc::clone(manager);
    tokio::task::spawn_blocking(move || manager.set_config(config))
        .await
        .context("Configuration task failed")??;
    Ok(())
}

async fn reload(manager: &Arc<Manager>, args: &Args) -> Result<()> {
    let mut config = load_config_with_env(&args.config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config_path))?;
    if let Some(number) = args.queue {
        config.queue.number = number;
    }
    apply(manager, config).await
}

#[cfg(unix)]
fn hangup_signal() -> Result<tokio::signal::unix::Signal> {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")
}

#[cfg(unix)]
fn terminate_signal() -> Result<tokio::signal::unix::Signal> {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")
}
