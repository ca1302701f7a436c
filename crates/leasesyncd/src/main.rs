// # leasesyncd - Lease Sync Daemon
//
// The leasesyncd daemon is a thin integration layer. It is responsible for:
// 1. Reading settings from the command line or `LEASESYNC_*` variables
// 2. Building the OPNsense source, the nsupdate applier and the lease cache
// 3. Running one sync cycle, or cycling until SIGINT/SIGTERM with `--loop`
//
// All reconcile and update logic lives in leasesync-core.
//
// ## Example
//
// ```bash
// # One-shot, as run from a DHCP hook
// leasesyncd -k "$(cat /usr/local/etc/namedb/rndc.secret)"
//
// # Watch config.xml and push changes to a remote server
// export LEASESYNC_KEY=c3VwZXItc2VjcmV0
// leasesyncd --loop --interval 30 --server 192.0.2.53
// ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use leasesync_core::cache::{self, DEFAULT_SQLITE_CACHE_PATH};
use leasesync_core::config::{
    DEFAULT_ALGORITHM, DEFAULT_KEY_NAME, DEFAULT_NSUPDATE_PROGRAM, DEFAULT_OPNSENSE_CONFIG_PATH,
};
use leasesync_core::transaction::DEFAULT_TTL;
use leasesync_core::{CacheConfig, EngineEvent, RunMode, SourceConfig, SyncConfig, SyncEngine};
use leasesync_nsupdate::NsupdateApplier;
use leasesync_opnsense::OpnsenseSource;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_FILE_CACHE_PATH: &str = "./static_leases.json";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeasesyncExitCode {
    /// One-shot success or shutdown signal
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// One-shot cycle failure or fatal loop error
    RuntimeError = 2,
}

impl From<LeasesyncExitCode> for ExitCode {
    fn from(code: LeasesyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CacheBackend {
    Sqlite,
    File,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Keep DNS records in sync with OPNsense static DHCP leases
#[derive(Parser)]
#[command(name = "leasesyncd", version, about)]
struct Cli {
    /// TSIG algorithm
    #[arg(short = 'a', long, env = "LEASESYNC_ALGORITHM", default_value = DEFAULT_ALGORITHM)]
    algorithm: String,

    /// TSIG key name
    #[arg(short = 'n', long = "keyname", env = "LEASESYNC_KEYNAME", default_value = DEFAULT_KEY_NAME)]
    key_name: String,

    /// TSIG key secret (base64)
    #[arg(short = 'k', long = "key", env = "LEASESYNC_KEY", hide_env_values = true)]
    key_secret: String,

    /// Keep running and resync whenever the config changes
    #[arg(short = 'l', long = "loop", env = "LEASESYNC_LOOP")]
    continuous: bool,

    /// Seconds between config checks with --loop (minimum 5)
    #[arg(short = 'i', long, env = "LEASESYNC_INTERVAL", default_value_t = 60)]
    interval: u64,

    /// Resend every binding, not only the changed ones
    #[arg(short = 'f', long, env = "LEASESYNC_FORCE")]
    force: bool,

    /// OPNsense configuration file
    #[arg(long, env = "LEASESYNC_CONFIG_PATH", default_value = DEFAULT_OPNSENSE_CONFIG_PATH)]
    config_path: PathBuf,

    /// Lease cache backend
    #[arg(long, env = "LEASESYNC_CACHE_BACKEND", value_enum, default_value_t = CacheBackend::Sqlite)]
    cache_backend: CacheBackend,

    /// Lease cache location (sqlite and file backends)
    #[arg(long, env = "LEASESYNC_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    /// DNS server to update; the local server when unset
    #[arg(long, env = "LEASESYNC_SERVER")]
    server: Option<String>,

    /// TTL of generated records
    #[arg(long, env = "LEASESYNC_TTL", default_value_t = DEFAULT_TTL)]
    ttl: u32,

    /// Seconds an update transaction may take
    #[arg(long, env = "LEASESYNC_APPLY_TIMEOUT", default_value_t = 120)]
    apply_timeout: u64,

    /// Update program
    #[arg(long, env = "LEASESYNC_NSUPDATE", default_value = DEFAULT_NSUPDATE_PROGRAM)]
    nsupdate: PathBuf,

    /// Log the updates instead of sending them
    #[arg(long, env = "LEASESYNC_DRY_RUN")]
    dry_run: bool,

    /// Log verbosity
    #[arg(long, env = "LEASESYNC_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

impl Cli {
    fn to_config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(self.key_secret.clone());

        config.source = SourceConfig::Opnsense {
            path: self.config_path.clone(),
        };

        config.cache = match self.cache_backend {
            CacheBackend::Sqlite => CacheConfig::Sqlite {
                path: self.cache_path_or(DEFAULT_SQLITE_CACHE_PATH),
            },
            CacheBackend::File => CacheConfig::File {
                path: self.cache_path_or(DEFAULT_FILE_CACHE_PATH),
            },
            CacheBackend::Memory => CacheConfig::Memory,
        };

        config.applier.algorithm = self.algorithm.clone();
        config.applier.key_name = self.key_name.clone();
        config.applier.server = self.server.clone();
        config.applier.program = self.nsupdate.clone();
        config.applier.dry_run = self.dry_run;

        config.update.ttl = self.ttl;

        config.engine.mode = if self.continuous {
            RunMode::Continuous
        } else {
            RunMode::OneShot
        };
        config.engine.poll_interval_secs = self.interval;
        config.engine.force = self.force;
        config.engine.apply_timeout_secs = self.apply_timeout;

        config
    }

    fn cache_path_or(&self, default: &str) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(default))
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                LeasesyncExitCode::ConfigError.into()
            } else {
                LeasesyncExitCode::CleanShutdown.into()
            };
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::from(cli.log_level))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return LeasesyncExitCode::ConfigError.into();
    }

    let config = cli.to_config();
    if let Err(e) = config.validate() {
        error!("Configuration validation error: {}", e);
        return LeasesyncExitCode::ConfigError.into();
    }

    if config.engine.poll_interval_secs < config.engine.effective_poll_interval().as_secs() {
        warn!(
            "Interval {}s is below the minimum, using {}s",
            config.engine.poll_interval_secs,
            config.engine.effective_poll_interval().as_secs()
        );
    }

    info!("Starting leasesyncd daemon");

    let (engine, event_rx) = match build_engine(config) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Startup error: {:#}", e);
            return LeasesyncExitCode::ConfigError.into();
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return LeasesyncExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        tokio::spawn(log_events(event_rx));

        match run_daemon(&engine).await {
            Ok(()) => LeasesyncExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                LeasesyncExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Wire the OPNsense source, the nsupdate applier and the configured cache
fn build_engine(config: SyncConfig) -> Result<(SyncEngine, mpsc::Receiver<EngineEvent>)> {
    let source = Arc::new(OpnsenseSource::from_config(&config.source));
    let applier = NsupdateApplier::from_config(&config.applier)
        .context("Failed to configure nsupdate")?;
    let cache = cache::factory_for(&config.cache);

    info!(
        "Source: {}, cache: {}, mode: {:?}{}",
        source.path().display(),
        config.cache.backend_name(),
        config.engine.mode,
        if config.applier.dry_run { " (dry run)" } else { "" }
    );

    SyncEngine::new(source, Box::new(applier), cache, config)
        .context("Failed to create sync engine")
}

async fn run_daemon(engine: &SyncEngine) -> Result<()> {
    match engine.mode() {
        RunMode::OneShot => {
            let report = engine.run_once().await.context("Sync cycle failed")?;
            if report.is_up_to_date() {
                info!("DNS already up to date");
            } else if report.is_dry_run() {
                info!(
                    "Dry run complete, {} update groups not sent",
                    report.transaction.len()
                );
            } else {
                info!("Sync complete, {} update groups sent", report.transaction.len());
            }
            Ok(())
        }
        RunMode::Continuous => {
            engine
                .run(Box::new(engine.polling_trigger()))
                .await
                .context("Sync loop failed")?;
            info!("Shutting down daemon");
            Ok(())
        }
    }
}

async fn log_events(mut event_rx: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = event_rx.recv().await {
        debug!("Engine event: {:?}", event);
    }
}
