// Render every camera of a job file, then optionally trace its light sources.
// Run with: cargo run --release -- <job.json>

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use lumen_core::JobConfig;
use lumen_renderer::{trace_lights, RenderStats, World};

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("Usage: {} <job.json>", args[0]);
    }
    let job_path = PathBuf::from(&args[1]);

    log::info!("Loading job {}", job_path.display());
    let job = JobConfig::load(&job_path)
        .with_context(|| format!("Failed to load job {}", job_path.display()))?;

    let world = World::build(&job).context("Failed to assemble scene")?;
    let orchestrator = world.orchestrator();
    let mut total = RenderStats::default();

    for (index, entry) in world.cameras.iter().enumerate() {
        let Some(entry) = entry else { continue };

        log::info!("Rendering camera {}", index);
        let (image, stats) = orchestrator
            .render(&entry.camera)
            .with_context(|| format!("Failed to render camera {}", index))?;
        image
            .save(&entry.output)
            .with_context(|| format!("Failed to write camera {} image", index))?;

        println!("camera {}: {} -> {}", index, stats, entry.output.display());
        total.merge(&stats);
    }

    if world.light_trace.enabled {
        let report = trace_lights(&world.tracer(), &world.lights, world.light_trace_options())
            .context("Light trace failed")?;

        let escaped = report.total_escaped();
        println!(
            "light trace: emitted {:.6}, escaped ({:.6}, {:.6}, {:.6}); {}",
            report.total_emitted(),
            escaped.x,
            escaped.y,
            escaped.z,
            report.stats
        );
        if let Some(path) = &world.light_trace.trace_output {
            let path = job.resolve_path(path);
            report
                .write_paths(&path)
                .with_context(|| format!("Failed to write traced paths to {}", path.display()))?;
        }
        total.merge(&report.stats);
    }

    println!(
        "total: {} intersections, {} discarded paths",
        total.intersections,
        total.errors()
    );
    Ok(())
}
