//! # tagsim
//!
//! CLI runner for the backscatter tag simulator.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tagsim_common::tag_tracer::{TagTracer, TagTracerConfig, TRACE_TARGET};
use tagsim_fsm::{InputField, Opcode};
use tagsim_metrics::metric_defs;
use tagsim_model::{load_models, Blueprint, Model, ModelError};
use tagsim_runner::{
    CurrentEventInfo, InMemoryRecorder, JsonLinesSink, MetricSpec, RunnerError, SimTime,
    Simulation, SimulationStats, StopCondition, Watchdog,
};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Default watchdog timeout in seconds.
pub const DEFAULT_WATCHDOG_TIMEOUT_S: u64 = 10;

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a duration string with units into simulation time.
///
/// Supported formats:
/// - Plain number: `0.5` (interpreted as seconds)
/// - With unit suffix: `250ns`, `10us`, `3ms`, `2s`, `1m`, `1h`
/// - Combined units: `1s500ms`, `1m30s`
fn parse_duration(s: &str) -> Result<SimTime, String> {
    let s = s.trim();
    let invalid = || format!("Invalid duration format: '{}'", s);

    if let Ok(secs) = s.parse::<f64>() {
        return SimTime::from_secs_f64(secs).ok_or_else(invalid);
    }

    let mut total_seconds = 0.0;
    let mut chars = s.chars().peekable();
    while chars.peek().is_some() {
        let number: String =
            std::iter::from_fn(|| chars.next_if(|c| c.is_ascii_digit() || *c == '.')).collect();
        let unit: String = std::iter::from_fn(|| chars.next_if(|c| c.is_ascii_alphabetic())).collect();

        if number.is_empty() {
            return Err(match chars.peek() {
                Some(c) if unit.is_empty() => {
                    format!("Invalid duration format: unexpected '{}' in '{}'", c, s)
                }
                _ => invalid(),
            });
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", number, s))?;
        let scale = match unit.as_str() {
            "" | "s" => 1.0,
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "m" => 60.0,
            "h" => 3600.0,
            other => {
                return Err(format!(
                    "Unknown duration unit '{}' in '{}'. Use ns, us, ms, s, m or h.",
                    other, s
                ))
            }
        };
        total_seconds += value * scale;
    }

    if s.is_empty() {
        return Err(invalid());
    }
    SimTime::from_secs_f64(total_seconds).ok_or_else(invalid)
}

// ============================================================================
// CLI Configuration
// ============================================================================

/// tagsim - backscatter tag network simulator
#[derive(Parser, Debug)]
#[command(name = "tagsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulation from YAML model files
    Run(RunConfig),
    /// Validate model files without running them
    Check(CheckConfig),
    /// List all metrics with descriptions and labels
    Metrics,
    /// List the instruction set and input registers
    Opcodes,
}

/// Formats for the metrics export
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MetricsFormat {
    /// Pretty-printed JSON on stdout
    Json,
}

/// Configuration for running a simulation
#[derive(Parser, Debug)]
pub struct RunConfig {
    /// Path(s) to model file(s). Multiple files are merged in order (later overrides earlier).
    #[arg(required = true)]
    pub models: Vec<PathBuf>,

    /// Stop before the first event after this simulation time.
    /// Accepts plain seconds or units: 0.5, 10ms, 250us, 1s500ms
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<SimTime>,

    /// Stop after this many dispatched events.
    #[arg(long)]
    pub max_events: Option<u64>,

    /// Random seed for receiver noise (default: model seed, else random)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Output log file (JSON lines). Default: logs/tagsim-<timestamp>.jsonl
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Trace specific tags. Comma-separated list of tag names or "tag:ID" for IDs.
    /// Use "*" to trace all tags.
    #[arg(long)]
    pub trace: Option<String>,

    /// Watchdog timeout in seconds (0 disables).
    /// If one dispatch takes longer than this, the watchdog prints its details.
    #[arg(long, default_value_t = DEFAULT_WATCHDOG_TIMEOUT_S)]
    pub watchdog_timeout: u64,

    /// Record metrics and print them on stdout when the run ends.
    /// The run statistics then go to stderr instead.
    #[arg(long, value_enum)]
    pub metrics_output: Option<MetricsFormat>,

    /// Select a metric for the export, with its label breakdown:
    /// "tagsim.fsm.transitions/tag/machine". Repeatable. Default: all metrics.
    #[arg(long = "metric", value_name = "SPEC")]
    pub metrics: Vec<MetricSpec>,

    /// Suppress progress output on stderr
    #[arg(short, long)]
    pub quiet: bool,
}

/// Configuration for validating models
#[derive(Parser, Debug)]
pub struct CheckConfig {
    /// Path(s) to model file(s), merged in order.
    #[arg(required = true)]
    pub models: Vec<PathBuf>,
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), RunnerError> {
    let cli = Cli::parse();

    // Default to "warn" if RUST_LOG is not set; --trace enables the tracer target.
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if matches!(&cli.command, Commands::Run(config) if config.trace.is_some()) {
        let directive = format!("{}=info", TRACE_TARGET)
            .parse::<Directive>()
            .map_err(|e| RunnerError::Config(format!("bad trace directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run(config) => {
            let recorder = match config.metrics_output {
                Some(MetricsFormat::Json) => Some(install_metrics_recorder()?),
                None => None,
            };
            let (specs, quiet) = (config.metrics.clone(), config.quiet);

            let stats = serde_json::to_string_pretty(&run_simulation(config)?)?;
            match recorder {
                Some(recorder) => {
                    if !quiet {
                        eprintln!("{}", stats);
                    }
                    println!("{}", serde_json::to_string_pretty(&recorder.export(&specs))?);
                }
                None => println!("{}", stats),
            }
        }
        Commands::Check(config) => check_models(&config)?,
        Commands::Metrics => print_metrics_info(),
        Commands::Opcodes => print_opcodes(),
    }

    Ok(())
}

fn install_metrics_recorder() -> Result<Arc<InMemoryRecorder>, RunnerError> {
    let recorder = Arc::new(InMemoryRecorder::new());
    metrics::set_global_recorder(Arc::clone(&recorder))
        .map_err(|e| RunnerError::Config(format!("cannot install metrics recorder: {}", e)))?;
    tagsim_metrics::describe_metrics();
    Ok(recorder)
}

fn load(paths: &[PathBuf]) -> Result<Model, ModelError> {
    let paths: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
    load_models(&paths)
}

fn default_output_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    PathBuf::from("logs").join(format!("tagsim-{}.jsonl", stamp))
}

fn run_simulation(config: RunConfig) -> Result<SimulationStats, RunnerError> {
    let mut model = load(&config.models)?;

    let seed = config.seed.or(model.simulation.seed).unwrap_or_else(|| {
        use rand::Rng;
        rand::thread_rng().gen()
    });
    model.simulation.seed = Some(seed);
    if !config.quiet {
        eprintln!("Using seed: {}", seed);
    }

    let output = config.output.clone().unwrap_or_else(default_output_path);
    let sink = JsonLinesSink::create(&output)?;

    let tracer = match &config.trace {
        Some(spec) => {
            let tracer_config = TagTracerConfig::from_spec(spec);
            if !tracer_config.is_enabled() {
                tracing::warn!("--trace '{}' matches no tags", spec);
            }
            TagTracer::new(tracer_config)
        }
        None => TagTracer::disabled(),
    };

    let mut simulation = Simulation::load_with_sink(&model, sink)?.with_tracer(tracer);
    let stop = match (config.duration, config.max_events) {
        (None, None) => simulation.configured_stop(),
        (time, events) => StopCondition::from_limits(
            time.or(model.simulation.duration_s.and_then(SimTime::from_secs_f64)),
            events.or(model.simulation.max_events),
        ),
    };
    if !config.quiet {
        eprintln!(
            "Running {} tags, {} queued events ({:?})",
            simulation.tags().len(),
            simulation.pending_events(),
            stop
        );
    }

    let result = if config.watchdog_timeout > 0 {
        let watchdog = Watchdog::new(Duration::from_secs(config.watchdog_timeout));
        let state = Arc::clone(watchdog.state());
        state.set_seed(seed);
        state.register_tag_names(
            simulation
                .tags()
                .iter()
                .map(|t| (t.id().0, t.name().to_string())),
        );
        let result = simulation.run_observed(stop, |event, n| {
            state.set_current_event(Some(CurrentEventInfo::from_event(event, n)));
        });
        state.set_current_event(None);
        watchdog.stop();
        result
    } else {
        simulation.run(stop)
    };
    result?;

    let stats = simulation.stats().clone();
    if !config.quiet {
        eprintln!("Wrote {} records to {}", stats.log_records, output.display());
    }
    Ok(stats)
}

fn check_models(config: &CheckConfig) -> Result<(), RunnerError> {
    let model = load(&config.models)?;
    let blueprint = Blueprint::build(&model).map_err(ModelError::from)?;

    println!("Model OK");
    println!();
    println!("Machines ({}):", blueprint.machines.len());
    for (name, def) in &blueprint.machines {
        println!("  {:<20} {:<10} {} states", name, def.kind(), def.state_count());
    }
    println!();
    println!("Tags ({}):", blueprint.tags.len());
    for tag in &blueprint.tags {
        let machines: Vec<String> = tag
            .machines()
            .iter()
            .map(|m| format!("{}@{}", m.definition().name(), m.current_state_name()))
            .collect();
        println!("  {:<20} {}  {}", tag.name(), tag.position(), machines.join(" "));
    }
    println!();
    println!("Scripted events: {}", blueprint.script.len());
    if let Some(duration) = model.simulation.duration_s {
        println!("Duration: {}s", duration);
    }
    if let Some(seed) = model.simulation.seed {
        println!("Seed: {}", seed);
    }
    Ok(())
}

/// Print information about all metrics
fn print_metrics_info() {
    println!("tagsim Metrics");
    println!("==============\n");

    let mut groups: Vec<&str> = metric_defs::ALL.iter().map(|m| m.group()).collect();
    groups.dedup();

    for group in groups {
        println!("## {}\n", group);

        for metric in metric_defs::ALL.iter().filter(|m| m.group() == group) {
            println!("  {}", metric.name);
            println!("    Type: {}", metric.kind);
            let unit_str = metric.unit_str();
            if !unit_str.is_empty() {
                println!("    Unit: {}", unit_str);
            }
            if !metric.description.is_empty() {
                println!("    Description: {}", metric.description);
            }
            if !metric.labels.is_empty() {
                println!("    Labels: {}", metric.labels.join(", "));
            }
            println!();
        }
    }
}

/// Print the instruction set
fn print_opcodes() {
    println!("Instructions");
    println!("============\n");
    for opcode in Opcode::ALL {
        println!("  {:<12} {}", opcode.name(), opcode.synopsis());
    }
    println!();
    println!("Operands: rN (general register), an input register, or a number.\n");
    println!("Input registers");
    println!("===============\n");
    for field in InputField::ALL {
        println!("  {}", field.name());
    }
}
