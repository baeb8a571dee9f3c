//! pgcompare - comparative diagnostics for two PostgreSQL servers.
//!
//! Collects a catalog snapshot from both servers concurrently, compares them,
//! ranks root causes and writes a markdown (or JSON) report.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgcompare_core::collector::{
    Cancellation, ConnectionDescriptor, PgCatalog, SnapshotCollector, collect_pair,
};
use pgcompare_core::config::{ConfigError, ServerProfile};
use pgcompare_core::model::{ComputeTier, ServerIdentity, StorageTier};
use pgcompare_core::{Config, ReportFormat};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

impl From<Format> for ReportFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Markdown => ReportFormat::Markdown,
            Format::Json => ReportFormat::Json,
        }
    }
}

/// Compare two PostgreSQL servers and explain the performance gap.
#[derive(Parser)]
#[command(name = "pgcompare", about = "Comparative PostgreSQL performance report", version)]
struct Args {
    #[arg(long, env = "PG1_HOST", default_value = "localhost")]
    server1_host: String,

    #[arg(long, env = "PG1_PORT", default_value = "5432")]
    server1_port: u16,

    #[arg(long, env = "PG1_DB", default_value = "postgres")]
    server1_db: String,

    #[arg(long, env = "PG1_USER", default_value = "postgres")]
    server1_user: String,

    #[arg(long, env = "PG1_PASS", hide_env_values = true)]
    server1_pass: Option<String>,

    /// Compute tier id of server 1 (e.g. "E8ds_v5"), looked up in the price table.
    #[arg(long, env = "PG1_TIER")]
    server1_tier: Option<String>,

    /// Storage tier id of server 1 (e.g. "P30").
    #[arg(long, env = "PG1_STORAGE")]
    server1_storage: Option<String>,

    #[arg(long, env = "PG2_HOST", default_value = "localhost")]
    server2_host: String,

    #[arg(long, env = "PG2_PORT", default_value = "5432")]
    server2_port: u16,

    #[arg(long, env = "PG2_DB", default_value = "postgres")]
    server2_db: String,

    #[arg(long, env = "PG2_USER", default_value = "postgres")]
    server2_user: String,

    #[arg(long, env = "PG2_PASS", hide_env_values = true)]
    server2_pass: Option<String>,

    /// Compute tier id of server 2.
    #[arg(long, env = "PG2_TIER")]
    server2_tier: Option<String>,

    /// Storage tier id of server 2.
    #[arg(long, env = "PG2_STORAGE")]
    server2_storage: Option<String>,

    /// JSON file overriding thresholds, impact ranges, prices and collector limits.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Report destination; "-" writes to stdout.
    #[arg(short, long, default_value = "pg_comparison.md")]
    output: String,

    #[arg(short, long, value_enum, default_value = "markdown")]
    format: Format,

    /// Overall collection deadline in seconds. Categories still running are
    /// reported as timed out.
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

struct ServerArgs {
    label: &'static str,
    host: String,
    port: u16,
    database: String,
    user: String,
    password: Option<String>,
    profile: ServerProfile,
}

impl Args {
    /// Splits the flat argument list per server. Tier flags override the
    /// config file's server profiles.
    fn servers(&self, config: &Config) -> [ServerArgs; 2] {
        let profile = |base: &ServerProfile, tier: &Option<String>, storage: &Option<String>| {
            ServerProfile {
                compute_tier: tier.clone().or_else(|| base.compute_tier.clone()),
                storage_tier: storage.clone().or_else(|| base.storage_tier.clone()),
            }
        };
        [
            ServerArgs {
                label: "Server 1",
                host: self.server1_host.clone(),
                port: self.server1_port,
                database: self.server1_db.clone(),
                user: self.server1_user.clone(),
                password: self.server1_pass.clone(),
                profile: profile(
                    &config.servers.baseline,
                    &self.server1_tier,
                    &self.server1_storage,
                ),
            },
            ServerArgs {
                label: "Server 2",
                host: self.server2_host.clone(),
                port: self.server2_port,
                database: self.server2_db.clone(),
                user: self.server2_user.clone(),
                password: self.server2_pass.clone(),
                profile: profile(
                    &config.servers.comparison,
                    &self.server2_tier,
                    &self.server2_storage,
                ),
            },
        ]
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pgcompare", "pgcompare_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

fn resolve_tiers(
    server: &ServerArgs,
    config: &Config,
) -> Result<(Option<ComputeTier>, Option<StorageTier>), ConfigError> {
    let compute = server.profile.resolve_compute(&config.pricing);
    if let Some(id) = &server.profile.compute_tier
        && compute.is_none()
    {
        return Err(ConfigError::Invalid(format!(
            "{}: unknown compute tier '{}'",
            server.label, id
        )));
    }
    let storage = server.profile.resolve_storage(&config.pricing);
    if let Some(id) = &server.profile.storage_tier
        && storage.is_none()
    {
        return Err(ConfigError::Invalid(format!(
            "{}: unknown storage tier '{}'",
            server.label, id
        )));
    }
    if compute.is_none() {
        warn!(
            "{}: no compute tier given, tier-based checks will be skipped",
            server.label
        );
    }
    Ok((compute, storage))
}

fn build_collector(
    server: ServerArgs,
    config: &Config,
) -> Result<SnapshotCollector<PgCatalog>, ConfigError> {
    let (compute, storage) = resolve_tiers(&server, config)?;
    let identity = ServerIdentity {
        label: format!("{} ({})", server.label, server.host),
        host: server.host.clone(),
        port: server.port,
        database: server.database.clone(),
    };
    let descriptor = ConnectionDescriptor {
        host: server.host,
        port: server.port,
        database: server.database,
        user: server.user,
        password: server.password,
    };
    debug!(?descriptor, "connection target");

    let c = &config.collector;
    let catalog = PgCatalog::new(
        descriptor,
        c.pool_size,
        c.connect_timeout(),
        c.category_timeout(),
    );
    Ok(SnapshotCollector::new(
        catalog,
        identity,
        compute,
        storage,
        c.category_timeout(),
    ))
}

fn write_output(output: &str, text: &str) -> std::io::Result<()> {
    if output == "-" {
        use std::io::Write;
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    } else {
        std::fs::write(output, text)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("pgcompare {} starting", pgcompare_core::VERSION);

    let config = match load_config(args.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let [first, second] = args.servers(&config);
    let collectors =
        build_collector(first, &config).and_then(|a| Ok((a, build_collector(second, &config)?)));
    let (baseline, comparison) = match collectors {
        Ok(pair) => pair,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let cancel = Cancellation::new();
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupted, finishing report with what was collected");
        flag.cancel();
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let deadline = args
        .deadline
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    info!(
        "Collecting {} and {}",
        baseline.identity().address(),
        comparison.identity().address()
    );
    let pair = collect_pair(&baseline, &comparison, deadline, &cancel);

    let report = match pgcompare_core::diagnose(pair, &config, Utc::now(), args.format.into()) {
        Ok(r) => r,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(3);
        }
    };

    if let Err(e) = write_output(&args.output, &report) {
        error!("Failed to write {}: {}", args.output, e);
        return ExitCode::from(4);
    }
    if args.output != "-" {
        info!("Report written to {}", args.output);
    }

    ExitCode::SUCCESS
}
