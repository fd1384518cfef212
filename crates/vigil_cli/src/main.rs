//! Vigil CLI
//!
//! Check dashboard configuration and simulate widget lifecycles.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vigil_core::LifecycleConfig;
use vigil_lifecycle::{contexts, keys, Runtime, StateId, StateTable};

mod config;
mod simulate;

use config::{DashboardConfig, CONFIG_FILE};
use simulate::{SimulatedBackend, Simulation};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Vigil dashboard lifecycle tools", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a dashboard's configuration and state table
    Check {
        /// Dashboard directory
        #[arg(default_value = ".")]
        dir: String,
    },

    /// Run the dashboard's widgets against a synthetic backend
    Simulate {
        /// Dashboard directory
        #[arg(default_value = ".")]
        dir: String,

        /// Override the simulated duration
        #[arg(short, long)]
        duration_ms: Option<u64>,
    },

    /// Create a vigil.toml in the current directory
    Init {
        /// Dashboard name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show the default configuration and state table
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Check { dir } => cmd_check(&dir),
        Commands::Simulate { dir, duration_ms } => cmd_simulate(&dir, duration_ms),
        Commands::Init { name } => cmd_init(name.as_deref()),
        Commands::Info => cmd_info(),
    }
}

fn cmd_check(dir: &str) -> Result<()> {
    let path = PathBuf::from(dir);
    let config = DashboardConfig::load_from_dir(&path)?;
    let table = config.state_table(&path)?;

    info!("Checking dashboard: {}", config.dashboard.name);
    info!(
        "Refresh every {} ms, escalate after {} ms",
        config.lifecycle.refresh_period_ms, config.lifecycle.transient_error_delay_ms
    );

    // Every context reachable from Initial must resolve for the Normal key
    let mut context = contexts::INITIAL.to_string();
    let mut visited = vec![context.clone()];
    loop {
        let kind = table.resolve(&StateId::new(&context, keys::NORMAL))?;
        info!("  {}/{} -> {}", context, keys::NORMAL, kind);

        let Ok(next) = table.next_context(&context) else {
            break;
        };
        if visited.iter().any(|seen| seen == next) {
            anyhow::bail!("Context chain loops back to {}", next);
        }
        context = next.to_string();
        visited.push(context.clone());
    }

    for key in [keys::TEMPORARY, keys::TRANSIENT_ERROR, keys::ERROR] {
        if table.resolve(&StateId::new(contexts::NORMAL, key)).is_err() {
            warn!("No state for {}/{}; errors will fail", contexts::NORMAL, key);
        }
    }

    for widget in &config.simulation.widgets {
        if widget.machine.is_empty() {
            warn!("Widget '{}' has no machine", widget.name);
        }
    }

    info!("{} states, {} contexts in chain", table.len(), visited.len());
    Ok(())
}

fn cmd_simulate(dir: &str, duration_ms: Option<u64>) -> Result<()> {
    let path = PathBuf::from(dir);
    let mut config = DashboardConfig::load_from_dir(&path)?;
    let table = config.state_table(&path)?;
    if let Some(duration_ms) = duration_ms {
        config.simulation.duration_ms = duration_ms;
    }

    info!(
        "Simulating {} for {} ms ({} widgets)",
        config.dashboard.name,
        config.simulation.duration_ms,
        config.simulation.widgets.len()
    );

    let runtime = Runtime::with_config(SimulatedBackend::default(), config.lifecycle);
    let mut simulation = Simulation::new(runtime, config.simulation);
    simulation.mount_all(table)?;
    simulation.run()?;
    let report = simulation.finish()?;

    println!();
    for widget in &report.widgets {
        let state = widget
            .state
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        let value = widget
            .value
            .map_or_else(|| "-".to_string(), |value| format!("{value:.1}"));
        println!(
            "{:<16} {:<28} value {:>8}  refreshes {:>4}  transitions {:>4}{}",
            widget.name,
            state,
            value,
            widget.refreshes,
            widget.transitions,
            if widget.error_shown { "  [error]" } else { "" }
        );
    }
    println!();
    println!("Requests sent:        {}", report.requests);
    println!("Disconnect notices:   {}", report.disconnects);
    println!("States created:       {}", report.stats.states);
    println!("Transitions:          {}", report.stats.transitions);
    println!("Simulated time:       {} ms", report.stats.now);

    Ok(())
}

fn cmd_init(name: Option<&str>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let name = name
        .or_else(|| cwd.file_name().and_then(|n| n.to_str()))
        .unwrap_or("dashboard");

    info!("Initializing dashboard {} in current directory", name);

    write_config(&cwd, name)?;

    info!("Dashboard initialized!");
    info!("Run `vigil simulate` to watch its widgets");

    Ok(())
}

fn write_config(dir: &Path, name: &str) -> Result<()> {
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() {
        anyhow::bail!("This directory already contains a {}", CONFIG_FILE);
    }
    fs::write(&config_path, DashboardConfig::new(name).to_toml_string()?)?;
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("Vigil");
    println!("=====");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Default lifecycle configuration:");
    println!();
    print!("{}", LifecycleConfig::default().to_toml_string()?);
    println!();
    println!("Standard state table:");
    let table = StateTable::standard();
    for (id, kind) in table.entries() {
        println!("  {:<32} {}", id.to_string(), kind);
    }
    println!();
    println!("Context chain:");
    for (from, to) in table.successors() {
        println!("  {} -> {}", from, to);
    }

    Ok(())
}
