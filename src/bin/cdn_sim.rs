use cdnsim_rs::cdn::CdnWorld;
use cdnsim_rs::scenario::ScenarioSpec;
use cdnsim_rs::sim::{SimTime, Simulator};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "cdn-sim", about = "Run a CDN streaming scenario on the cdnsim-rs simulator")]
struct Args {
    /// Path to scenario.json
    #[arg(long)]
    scenario: PathBuf,

    /// Write all statistics records to this JSON file
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Run until this time (s); defaults to running until completion
    #[arg(long)]
    until_s: Option<f64>,

    /// Evaluate long paths' bottleneck links in parallel
    #[arg(long)]
    parallel: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    let scenario = match ScenarioSpec::load(&args.scenario).and_then(|spec| spec.build()) {
        Ok(s) => s,
        Err(e) => {
            error!(path = %args.scenario.display(), "❌ 场景无效: {e}");
            eprintln!("invalid scenario {}: {e}", args.scenario.display());
            return ExitCode::from(2);
        }
    };

    let mut world: CdnWorld = scenario.into_world();
    if args.parallel {
        world.cfg.parallel_probe = true;
    }
    let mut sim = Simulator::default();
    world.prime(&mut sim);

    let result = match args.until_s {
        Some(secs) => sim.run_until(SimTime::from_secs_f64(secs), &mut world),
        None => sim.run(&mut world),
    };
    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!("❌ 仿真中止: {e}");
            eprintln!("simulation aborted: {e}");
            return ExitCode::FAILURE;
        }
    };

    let stats = world.stats_snapshot();
    let s = stats.summary();
    println!(
        "done events={} t={:.3}s sessions={} cached={} mean_start={:.3}s buffering_events={} caches_torn_down={}",
        summary.events,
        summary.final_time.as_secs_f64(),
        s.sessions,
        s.cached_sessions,
        s.mean_start_time,
        s.total_buffering_events,
        s.caches_torn_down,
    );

    if let Some(path) = args.stats_json {
        let written = serde_json::to_string_pretty(&stats)
            .map_err(|e| e.to_string())
            .and_then(|raw| fs::write(&path, raw).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("failed to write {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
        eprintln!("wrote stats to {}", path.display());
    }
    ExitCode::SUCCESS
}
