//! # trafsim
//!
//! CLI runner for the TrafSim traffic sensor-network simulation.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trafsim_common::SimTime;
use trafsim_control::{run_control_pass, ControllerLayout, ScriptedNetwork};
use trafsim_model::{build_simulation, BuildOptions, Scenario};
use trafsim_packet::sensorlog::SensorLogReader;
use trafsim_runner::animation::write_animation_metadata;
use trafsim_runner::{EventLoop, RunnerError, SimulationStats};

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a duration string with units into seconds.
///
/// Supported formats:
/// - Plain number: `100` (interpreted as seconds)
/// - With unit suffix: `60s`, `10m`, `2h`, `1d`
/// - Combined units: `1h30m`, `1d2h30m45s`
fn parse_duration(s: &str) -> Result<f64, String> {
    let s = s.trim();

    if let Ok(secs) = s.parse::<f64>() {
        return Ok(secs);
    }

    let mut total_seconds: f64 = 0.0;
    let mut current_number = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() || c == '.' {
            current_number.push(c);
            continue;
        }
        if current_number.is_empty() {
            return Err(format!("invalid duration: unexpected '{}' in '{}'", c, s));
        }
        let value: f64 = current_number
            .parse()
            .map_err(|_| format!("invalid number '{}' in duration '{}'", current_number, s))?;
        let multiplier = match c {
            's' => 1.0,
            'm' => 60.0,
            'h' => 3600.0,
            'd' => 86400.0,
            _ => return Err(format!("unknown duration unit '{}' in '{}'; use s, m, h, or d", c, s)),
        };
        total_seconds += value * multiplier;
        current_number.clear();
    }

    // A trailing number without a unit counts as seconds.
    if !current_number.is_empty() {
        let value: f64 = current_number
            .parse()
            .map_err(|_| format!("invalid number '{}' in duration '{}'", current_number, s))?;
        total_seconds += value;
    }

    if total_seconds == 0.0 && !s.is_empty() {
        return Err(format!("invalid duration: '{}'", s));
    }

    Ok(total_seconds)
}

// ============================================================================
// CLI Configuration
// ============================================================================

/// TrafSim - traffic wireless sensor network simulator
#[derive(Parser, Debug)]
#[command(name = "trafsim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an integrated sensor-network and traffic-control simulation
    Run(RunConfig),
    /// Run a one-shot control pass over an existing sensor log
    Control(ControlConfig),
}

/// Configuration for running a simulation
#[derive(Parser, Debug)]
struct RunConfig {
    /// Simulation duration.
    /// Accepts plain seconds or units: 100, 90s, 10m, 1h30m
    #[arg(short, long, default_value = "100", value_parser = parse_duration)]
    duration: f64,

    /// Random seed (default: random)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of leaf (RFD) sensor nodes
    #[arg(long, default_value = "10")]
    leaves: u32,

    /// Number of relay (FFD) nodes
    #[arg(long, default_value = "3")]
    relays: u32,

    /// Scenario YAML file (takes precedence over --leaves/--relays)
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Controller layout YAML (controller id -> junction list)
    #[arg(long)]
    controllers: Option<PathBuf>,

    /// Directory for output files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Sensor log path (default: <output-dir>/traffic_sensor_data.csv)
    #[arg(long)]
    sensor_data: Option<PathBuf>,

    /// Traffic simulator step length in seconds
    #[arg(long, default_value = "0.1")]
    step_length: f64,

    /// Frames each node may send before stopping
    #[arg(long, default_value = "1000")]
    packet_budget: u32,

    /// Transmission rate in bits per second
    #[arg(long, default_value = "1000")]
    data_rate: u32,

    /// Request the external traffic simulator GUI
    #[arg(long)]
    gui: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Configuration for a one-shot control pass
#[derive(Parser, Debug)]
struct ControlConfig {
    /// Path to an existing sensor log CSV
    input: PathBuf,

    /// Controller layout YAML; derived one-per-junction from the log's node
    /// ids when omitted
    #[arg(long)]
    controllers: Option<PathBuf>,
}

// ============================================================================
// Run Command
// ============================================================================

fn run_command(config: RunConfig) -> Result<SimulationStats, RunnerError> {
    let seed = config.seed.unwrap_or_else(|| {
        use rand::Rng;
        rand::thread_rng().gen()
    });
    if config.verbose {
        eprintln!("Using seed: {}", seed);
    }

    let scenario = match &config.scenario {
        Some(path) => Scenario::load(path)?,
        None => {
            let mut scenario = Scenario::generate(config.leaves, config.relays, seed);
            scenario.defaults.packet_budget = config.packet_budget;
            scenario.defaults.data_rate_bps = config.data_rate;
            scenario.defaults.sampler.step_length_s = config.step_length;
            scenario
        }
    };

    let controllers = match &config.controllers {
        Some(path) => Some(ControllerLayout::load(path)?),
        None => None,
    };

    std::fs::create_dir_all(&config.output_dir)?;
    let sensor_log_path = config
        .sensor_data
        .clone()
        .unwrap_or_else(|| config.output_dir.join("traffic_sensor_data.csv"));

    let opts = BuildOptions {
        sensor_log_path: sensor_log_path.clone(),
        controllers,
    };
    let simulation = build_simulation(&scenario, &opts)?;

    if config.verbose {
        eprintln!(
            "Built simulation with {} entities ({} nodes)",
            simulation.entities.len(),
            simulation.node_infos.len()
        );
    }
    if config.gui {
        tracing::info!("GUI requested; the scripted traffic network has no display");
    }

    write_animation_metadata(
        &config.output_dir.join("animation-metadata.json"),
        &simulation.node_infos,
    )?;

    let network = simulation.network.clone();
    let mut event_loop = EventLoop::new(simulation, seed);

    eprintln!("Running simulation for {} seconds...", config.duration);
    let stats = event_loop.run(SimTime::from_secs(config.duration))?;

    print_summary_table(&event_loop);
    print_program_summary(&network);
    eprintln!(
        "Simulation completed. Data stored in {}",
        sensor_log_path.display()
    );

    Ok(stats)
}

// ============================================================================
// Control Command
// ============================================================================

fn control_command(config: ControlConfig) -> Result<(), RunnerError> {
    let layout = match &config.controllers {
        Some(path) => ControllerLayout::load(path)?,
        None => {
            // Derive one controller per junction from the node ids present
            // in the log.
            let mut reader = SensorLogReader::open(&config.input)?;
            let records = reader.read_all()?;
            let mut node_ids: Vec<u32> = records.iter().map(|r| r.node_id).collect();
            node_ids.sort_unstable();
            node_ids.dedup();
            ControllerLayout::one_per_junction(node_ids)
        }
    };

    let mut network = ScriptedNetwork::new(layout);
    let applied = run_control_pass(&config.input, &mut network)?;
    println!("{}", serde_json::to_string_pretty(&applied)?);
    Ok(())
}

// ============================================================================
// Terminal UI Functions
// ============================================================================

/// Print the final summary table with per-node statistics.
fn print_summary_table(event_loop: &EventLoop) {
    eprintln!();
    eprintln!(
        "┌{}┬{}┬{}┬{}┬{}┬{}┐",
        "─".repeat(14),
        "─".repeat(8),
        "─".repeat(8),
        "─".repeat(10),
        "─".repeat(11),
        "─".repeat(10)
    );
    eprintln!(
        "│ {:^12} │ {:^6} │ {:^6} │ {:^8} │ {:^9} │ {:^8} │",
        "Node", "Role", "Id", "Sent", "Forwarded", "Received"
    );
    eprintln!(
        "├{}┼{}┼{}┼{}┼{}┼{}┤",
        "─".repeat(14),
        "─".repeat(8),
        "─".repeat(8),
        "─".repeat(10),
        "─".repeat(11),
        "─".repeat(10)
    );

    for info in event_loop.node_infos() {
        let stats = event_loop
            .node_stats()
            .get(&info.entity_id)
            .cloned()
            .unwrap_or_default();
        eprintln!(
            "│ {:12} │ {:6} │ {:>6} │ {:>8} │ {:>9} │ {:>8} │",
            info.name,
            info.role.as_label(),
            info.node_id,
            stats.sent,
            stats.forwarded,
            stats.received
        );
    }

    eprintln!(
        "└{}┴{}┴{}┴{}┴{}┴{}┘",
        "─".repeat(14),
        "─".repeat(8),
        "─".repeat(8),
        "─".repeat(10),
        "─".repeat(11),
        "─".repeat(10)
    );
    let _ = std::io::stderr().flush();
}

/// Print the active traffic-light program per controller.
fn print_program_summary(network: &ScriptedNetwork) {
    use trafsim_control::TrafficLightControl;

    let mut controllers = network.controller_ids();
    controllers.sort();
    if controllers.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("Active traffic-light programs:");
    for controller in controllers {
        match network.active_program(&controller) {
            Some(program) => eprintln!("  {:8} {}", controller, program.as_label()),
            None => eprintln!("  {:8} (never set)", controller),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), RunnerError> {
    // Initialize tracing subscriber with the RUST_LOG env filter, defaulting
    // to "warn".
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => {
            let stats = run_command(config)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Control(config) => {
            control_command(config)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_duration;

    #[test]
    fn test_parse_duration_plain_seconds() {
        assert_eq!(parse_duration("100").unwrap(), 100.0);
        assert_eq!(parse_duration("0.5").unwrap(), 0.5);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90s").unwrap(), 90.0);
        assert_eq!(parse_duration("10m").unwrap(), 600.0);
        assert_eq!(parse_duration("1h30m").unwrap(), 5400.0);
        assert_eq!(parse_duration("1d2h").unwrap(), 93600.0);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("5x").is_err());
    }
}
