//! `itrack` CLI: scenario runs, replay of recorded event logs, config dumps.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use detector_models::DetectorLayout;
use event_sim::replay::{load_log, save_log, EventLog};
use event_sim::scenarios::{Scenario, ScenarioKind};
use event_sim::SimulatedEvent;
use std::path::{Path, PathBuf};
use tracking_core::metrics::ReconstructionMetrics;
use tracking_core::pipeline::{IterationConfig, IterativeTracker};

#[derive(Parser)]
#[command(name = "itrack", about = "Iterative track reconstruction CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a named scenario, reconstruct it and print metrics.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Override the scenario's number of events
        #[arg(long)]
        events: Option<u64>,
        /// Iteration configurations (JSON list); defaults to the second step
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the simulated events
        #[arg(long)]
        save_log: Option<PathBuf>,
    },
    /// Reconstruct a previously recorded event log.
    Replay {
        /// Path to event log JSON file
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the default iteration configuration as JSON.
    DumpConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            events,
            config,
            output,
            save_log: log_path,
        } => {
            run_scenario(
                scenario,
                seed,
                events,
                config.as_deref(),
                output.as_deref(),
                log_path.as_deref(),
            )?;
        }
        Commands::Replay {
            input,
            config,
            output,
        } => {
            run_replay(&input, config.as_deref(), output.as_deref())?;
        }
        Commands::DumpConfig => {
            let configs = vec![IterationConfig::second_step()];
            println!("{}", serde_json::to_string_pretty(&configs)?);
        }
    }

    Ok(())
}

fn load_configs(path: Option<&Path>) -> Result<Vec<IterationConfig>> {
    let Some(path) = path else {
        return Ok(vec![IterationConfig::second_step()]);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let configs: Vec<IterationConfig> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(configs)
}

fn run_scenario(
    kind: ScenarioKind,
    seed: u64,
    n_events: Option<u64>,
    config_path: Option<&Path>,
    output_path: Option<&Path>,
    log_path: Option<&Path>,
) -> Result<()> {
    let layout = DetectorLayout::standard();
    let mut scenario = Scenario::build(kind, seed);
    if let Some(n) = n_events {
        scenario.n_events = n;
    }
    let tracker = IterativeTracker::new(layout.clone(), &load_configs(config_path)?)?;

    println!(
        "Running scenario '{}' (seed={}, events={})...",
        scenario.name, seed, scenario.n_events
    );
    let events = scenario.generate(&layout);
    let summary = reconstruct(&tracker, &events);
    print_summary(&summary);

    if let Some(lpath) = log_path {
        let log = EventLog {
            scenario_name: scenario.name.clone(),
            seed,
            events,
        };
        save_log(&log, lpath)?;
        println!("Event log saved to {}", lpath.display());
    }

    if let Some(opath) = output_path {
        write_metrics(opath, &scenario.name, seed, &summary)?;
        println!("Metrics saved to {}", opath.display());
    }

    Ok(())
}

fn run_replay(input: &Path, config_path: Option<&Path>, output_path: Option<&Path>) -> Result<()> {
    let log = load_log(input)?;
    println!(
        "Replaying '{}' ({} events)...",
        log.scenario_name,
        log.events.len()
    );

    let tracker = IterativeTracker::new(DetectorLayout::standard(), &load_configs(config_path)?)?;
    let summary = reconstruct(&tracker, &log.events);
    print_summary(&summary);

    if let Some(opath) = output_path {
        write_metrics(opath, &log.scenario_name, log.seed, &summary)?;
    }

    Ok(())
}

struct RunSummary {
    metrics: ReconstructionMetrics,
    /// (iteration name, merged tracks over all events)
    per_iteration: Vec<(String, usize)>,
    elapsed_s: f64,
}

fn reconstruct(tracker: &IterativeTracker, events: &[SimulatedEvent]) -> RunSummary {
    let mut metrics = ReconstructionMetrics::default();
    let mut per_iteration: Vec<(String, usize)> = tracker
        .iterations
        .iter()
        .map(|it| (it.name.clone(), 0))
        .collect();

    let start = std::time::Instant::now();
    for sim in events {
        let out = tracker.run(&sim.event);
        for (slot, it) in per_iteration.iter_mut().zip(&out.iterations) {
            slot.1 += it.merged.len();
        }
        let tracks: Vec<_> = out.tracks().map(|m| &m.track).collect();
        metrics.accumulate(&tracks, &sim.truth);
    }

    RunSummary {
        metrics,
        per_iteration,
        elapsed_s: start.elapsed().as_secs_f64(),
    }
}

fn print_summary(summary: &RunSummary) {
    let m = &summary.metrics;
    println!(
        "Done: {} events, {} tracks, elapsed={:.2}s",
        m.n_events, m.n_tracks, summary.elapsed_s
    );
    for (name, n) in &summary.per_iteration {
        println!("  {name}: {n} tracks");
    }
    println!(
        "Efficiency {:.3} ({} / {}), fake rate {:.3}, duplicate rate {:.3}",
        m.efficiency(),
        m.n_found,
        m.n_reconstructable,
        m.fake_rate(),
        m.duplicate_rate()
    );
}

fn write_metrics(path: &Path, scenario: &str, seed: u64, summary: &RunSummary) -> Result<()> {
    let m = &summary.metrics;
    let json = serde_json::json!({
        "scenario": scenario,
        "seed": seed,
        "elapsed_s": summary.elapsed_s,
        "events": m.n_events,
        "tracks": m.n_tracks,
        "efficiency": m.efficiency(),
        "fake_rate": m.fake_rate(),
        "duplicate_rate": m.duplicate_rate(),
        "per_iteration": summary.per_iteration,
    });
    std::fs::write(path, serde_json::to_string_pretty(&json)?)?;
    Ok(())
}
