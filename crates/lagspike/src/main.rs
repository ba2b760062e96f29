//! lagspike CLI
//!
//! - `demo`: run a synthetic main loop with injected stalls under a real
//!   detection session
//! - `snapshot`: dump this process's threads once, grouped by stack
//! - `config`: print the effective configuration as TOML

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use lagspike_core::collector::SnapshotCollector;
use lagspike_core::config::{Config, LogFormat};
use lagspike_core::heartbeat::HeartbeatRegister;
use lagspike_core::host::{FlagLifecycle, Requester, TracingLogSink, TracingOutputSink};
use lagspike_core::logging::init_logging;
use lagspike_core::noise::IdleWorkerFilter;
use lagspike_core::procfs::ProcfsIntrospector;
use lagspike_core::report::ThreadDump;
use lagspike_core::session::{LagSpikeMonitor, SessionOutcome};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "lagspike",
    version,
    about = "Watch a main loop for lag spikes and dump deduplicated thread stacks",
    long_about = None
)]
struct Cli {
    /// Path to lagspike.toml
    #[arg(long, global = true, env = "LAGSPIKE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format override (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Report every thread with lock detail, not just the main loop
    #[arg(long, global = true)]
    all_threads: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a synthetic main loop that stalls periodically, under detection
    Demo {
        /// Session length in seconds
        #[arg(long, default_value_t = 10)]
        duration: u64,

        /// Main-loop tick period (ms)
        #[arg(long, default_value_t = 50)]
        tick_ms: u64,

        /// Time between injected stalls (ms)
        #[arg(long, default_value_t = 3_000)]
        stall_every_ms: u64,

        /// Length of each injected stall (ms)
        #[arg(long, default_value_t = 600)]
        stall_for_ms: u64,
    },

    /// Dump the threads of this process once
    Snapshot {
        /// Emit the dump as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load_with(cli.config.as_deref()).context("loading configuration")?;
    if cli.all_threads {
        config.threads.all_threads = true;
    }
    if let Some(level) = &cli.log_level {
        config.general.log_level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        if let Some(remediation) = err
            .downcast_ref::<lagspike_core::Error>()
            .and_then(lagspike_core::Error::remediation)
        {
            eprintln!();
            eprint!("{}", remediation.render_plain());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    init_logging(&config.general.log_config()).context("initializing logging")?;

    match cli.command {
        Command::Demo {
            duration,
            tick_ms,
            stall_every_ms,
            stall_for_ms,
        } => {
            run_demo(
                &config,
                duration,
                DemoLoop {
                    tick: Duration::from_millis(tick_ms.max(1)),
                    stall_every: Duration::from_millis(stall_every_ms),
                    stall_for: Duration::from_millis(stall_for_ms),
                },
            )
            .await
        }
        Command::Snapshot { json } => run_snapshot(&config, json),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DemoLoop {
    tick: Duration,
    stall_every: Duration,
    stall_for: Duration,
}

/// Spawn the synthetic main loop on a thread matching the default
/// main-loop prefix.
fn spawn_main_loop(
    heartbeat: Arc<HeartbeatRegister>,
    shutdown: Arc<AtomicBool>,
    pattern: DemoLoop,
    name: String,
) -> anyhow::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            let mut last_stall = Instant::now();
            while !shutdown.load(Ordering::SeqCst) {
                heartbeat.tick();
                if !pattern.stall_every.is_zero() && last_stall.elapsed() >= pattern.stall_every {
                    info!(stall_ms = pattern.stall_for.as_millis() as u64, "Injecting stall");
                    std::thread::sleep(pattern.stall_for);
                    last_stall = Instant::now();
                }
                std::thread::sleep(pattern.tick);
            }
        })
        .context("spawning demo main loop")
}

async fn run_demo(config: &Config, duration: u64, pattern: DemoLoop) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let lifecycle = Arc::new(FlagLifecycle::running());

    // The monitor below reads the same process-wide register.
    let main_loop = spawn_main_loop(
        HeartbeatRegister::global(),
        Arc::clone(&shutdown),
        pattern,
        "Server thread".to_string(),
    )?;

    let monitor = LagSpikeMonitor::new(
        Arc::new(ProcfsIntrospector::new()),
        Arc::new(TracingOutputSink),
        Arc::new(TracingLogSink),
        lifecycle.clone(),
    )
    .with_detector(config.detector.clone())
    .with_selection(config.threads.clone())
    .with_noise_filter(Arc::new(IdleWorkerFilter::new(config.noise.clone())));

    let handle = monitor.start(Some(Requester::interactive("cli")), duration)?;
    let waker = handle.waker();
    let mut session = tokio::task::spawn_blocking(move || handle.join());

    let outcome = tokio::select! {
        joined = &mut session => joined.context("joining detector session")??,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; stopping demo main loop");
            lifecycle.stop();
            shutdown.store(true, Ordering::SeqCst);
            waker.wake();
            session.await.context("joining detector session")??
        }
    };

    shutdown.store(true, Ordering::SeqCst);
    let _ = main_loop.join();

    match outcome {
        SessionOutcome::Finished { reason, reports } => {
            println!("Session finished ({reason}); {reports} lag spike report(s).");
            Ok(())
        }
        SessionOutcome::Faulted { cause } => anyhow::bail!("detector session failed: {cause}"),
    }
}

fn run_snapshot(config: &Config, json: bool) -> anyhow::Result<()> {
    let collector = SnapshotCollector::new(Arc::new(ProcfsIntrospector::new()), config.threads.clone());
    let collection = collector.collect(config.threads.all_threads)?;
    let dump = ThreadDump::from_collection(collection, &IdleWorkerFilter::new(config.noise.clone()));
    if json {
        println!("{}", serde_json::to_string_pretty(&dump)?);
    } else {
        print!("{}", dump.render());
    }
    Ok(())
}
