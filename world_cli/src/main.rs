use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use crossbeam_channel::Receiver;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use world_core::{
    load_engine_config_from_env, log_channel, ChannelEmitter, EngineConfig, EngineSetup,
    FrameworkValidator, LogEnvelope, WorldDefinition, WorldEngine,
};
use world_domain::{load_world_from_env, reach_setup, ComponentCatalog};

mod output;

use output::EventSink;

#[derive(Parser, Debug)]
#[command(author, version, about = "Grow a procedural world from a domain definition", long_about = None)]
struct Cli {
    #[command(flatten)]
    sources: Sources,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Sources {
    /// Engine config JSON (defaults to WORLDGEN_CONFIG_PATH, then the builtin config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory with domain.json, eras.json, pressures.json, ... (defaults to
    /// WORLDGEN_DEFINITION_DIR, then the builtin Reach)
    #[arg(long, global = true)]
    definition: Option<PathBuf>,
    /// Component catalog overriding the builtin contracts and parameters
    #[arg(long, global = true)]
    components: Option<PathBuf>,
    /// Override the configured seed
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Override the configured scale factor
    #[arg(long, global = true)]
    scale: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the definition and components without running anything
    Validate,
    /// Run until a termination condition fires
    Run(RunArgs),
    /// Run a fixed number of epochs, then stop and export
    Step {
        #[arg(long, default_value_t = 1)]
        epochs: u32,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Write the exported world JSON here
    #[arg(long)]
    output: Option<PathBuf>,
    /// Stream simulation events and engine logs to stdout as JSON lines
    #[arg(long)]
    events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let stream = match &cli.command {
        Command::Run(args) | Command::Step { run: args, .. } => args.events,
        Command::Validate => false,
    };
    let logs = init_tracing(stream);

    match &cli.command {
        Command::Validate => validate(&cli.sources),
        Command::Run(args) => run(&cli.sources, args, None, logs).await,
        Command::Step { epochs, run: args } => run(&cli.sources, args, Some(*epochs), logs).await,
    }
}

/// Human-readable logs go to stderr. When events are streamed, engine logs
/// are also forwarded into the JSON-lines stream.
fn init_tracing(forward: bool) -> Option<Receiver<LogEnvelope>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("worldgen=info"));
    let fmt = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter).with(fmt);
    if forward {
        let (layer, receiver) = log_channel();
        registry.with(layer.with_target_prefix("worldgen")).init();
        Some(receiver)
    } else {
        registry.init();
        None
    }
}

fn load_config(sources: &Sources) -> Result<Arc<EngineConfig>> {
    let base = match &sources.config {
        Some(path) => Arc::new(
            EngineConfig::from_file(path)
                .wrap_err_with(|| format!("failed to load engine config {}", path.display()))?,
        ),
        None => load_engine_config_from_env().0,
    };
    if sources.seed.is_none() && sources.scale.is_none() {
        return Ok(base);
    }
    let mut config = (*base).clone();
    if let Some(seed) = sources.seed {
        config.seed = seed;
    }
    if let Some(scale) = sources.scale {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(eyre!("--scale must be a positive number, got {scale}"));
        }
        config.scale_factor = scale;
    }
    Ok(Arc::new(config))
}

fn load_setup(sources: &Sources) -> Result<EngineSetup> {
    let config = load_config(sources)?;
    let definition = match &sources.definition {
        Some(dir) => WorldDefinition::from_dir(dir)
            .wrap_err_with(|| format!("failed to load world definition from {}", dir.display()))?,
        None => load_world_from_env().wrap_err("failed to load world definition")?,
    };
    let catalog = match &sources.components {
        Some(path) => ComponentCatalog::from_file(path)
            .wrap_err_with(|| format!("failed to load component catalog {}", path.display()))?,
        None => ComponentCatalog::builtin(),
    };
    Ok(reach_setup(config, definition, &catalog))
}

fn validate(sources: &Sources) -> Result<()> {
    let setup = load_setup(sources)?;
    let report = FrameworkValidator::new(&setup.definition, &setup.templates, &setup.systems)
        .with_min_growth_scaling(setup.config.pressure.min_growth_scaling)
        .validate();
    println!("{report}");
    if report.valid() {
        info!(
            target: "worldgen::cli",
            warnings = report.warnings.len(),
            "validation.passed"
        );
        Ok(())
    } else {
        Err(eyre!(
            "validation failed with {} errors",
            report.errors.len()
        ))
    }
}

async fn run(
    sources: &Sources,
    args: &RunArgs,
    epochs: Option<u32>,
    logs: Option<Receiver<LogEnvelope>>,
) -> Result<()> {
    let (emitter, events) = ChannelEmitter::unbounded();
    let mut sink = EventSink::new(events, logs, args.events);
    let setup = load_setup(sources)?.with_emitter(emitter);

    let mut engine = match WorldEngine::new(setup) {
        Ok(engine) => engine,
        Err(err) => {
            sink.drain().await?;
            return Err(err).wrap_err("failed to start the engine");
        }
    };
    info!(
        target: "worldgen::cli",
        seed = engine.config().seed,
        total_epochs = engine.total_epochs(),
        total_target = engine.total_target(),
        "run.started"
    );

    let budget = epochs.unwrap_or(u32::MAX);
    sink.drain().await?;
    while engine.epochs_run() < budget && engine.step() {
        sink.drain().await?;
    }

    let world = engine.finalize().await;
    sink.drain().await?;

    info!(
        target: "worldgen::cli",
        termination = ?world.metadata.termination,
        entities = world.metadata.entity_count,
        relationships = world.metadata.relationship_count,
        historical = world.metadata.historical_relationship_count,
        warnings = world.warnings.len(),
        "run.finished"
    );
    for status in &world.feedback_loops {
        info!(
            target: "worldgen::cli",
            feedback_loop = %status.id,
            health = ?status.health,
            "run.feedback_loop"
        );
    }

    match &args.output {
        Some(path) => {
            let json = world.to_json_pretty()?;
            tokio::fs::write(path, json)
                .await
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            info!(target: "worldgen::cli", path = %path.display(), "export.written");
        }
        None if !args.events => {
            warn!(target: "worldgen::cli", hint = "pass --output", "export.skipped");
        }
        None => {}
    }
    Ok(())
}
