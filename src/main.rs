use anyhow::{bail, Context};
use clap::Parser;
use std::fs;
use std::io;
use std::path::PathBuf;
use tickstep::executor::{finish_when_idle, run_interactive, ConsoleHost, RunOutcome};
use tickstep::{dap, script, SchedulerConfig, TickScheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tickstep", version, about = "Run and step through tick-scheduled scripts")]
struct Cli {
    /// Script to run. Not needed with --dap.
    program: Option<PathBuf>,

    /// Serve the Debug Adapter Protocol on stdin/stdout.
    #[arg(long, alias = "debug-adapter")]
    dap: bool,

    /// TOML file with scheduler settings.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Speed slider position in [0, 1].
    #[arg(long)]
    speed: Option<f64>,

    /// Breakpoint line (repeatable).
    #[arg(long = "break", short = 'b', value_name = "LINE")]
    breakpoints: Vec<usize>,

    /// Pause before the first line runs.
    #[arg(long)]
    stop_on_entry: bool,

    /// End the run as timed out after this many ticks.
    #[arg(long)]
    max_ticks: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries program output or DAP traffic.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.dap {
        info!("starting in DAP mode");
        dap::run_dap_mode(config)?;
        return Ok(());
    }

    let Some(path) = &cli.program else {
        bail!("a program path is required unless --dap is given");
    };
    let source =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let (program, text) =
        script::load(&source).with_context(|| format!("parsing {}", path.display()))?;

    let mut scheduler =
        TickScheduler::new(config, ConsoleHost::new(&source)).with_finish(finish_when_idle());
    scheduler.set_breakpoints(cli.breakpoints.clone());
    scheduler.start(Box::new(program), text.line_map());
    run_interactive(&mut scheduler, &mut io::stdin().lock())?;

    match scheduler.outcome() {
        Some(RunOutcome::Failed { .. }) => std::process::exit(1),
        Some(RunOutcome::TimedOut { .. }) => std::process::exit(2),
        _ => Ok(()),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SchedulerConfig> {
    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::default(),
    };
    if let Some(speed) = cli.speed {
        config.speed = speed;
    }
    if cli.stop_on_entry {
        config.pause_on_entry = true;
    }
    if cli.max_ticks.is_some() {
        config.max_ticks = cli.max_ticks;
    }
    config.validate()?;
    Ok(config)
}
