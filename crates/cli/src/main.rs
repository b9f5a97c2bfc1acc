use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rightsizer_fingerprint::{unix_now_ms, SourceFingerprinter};
use rightsizer_reconciler::{
    read_status_snapshot, CancelFlag, ReconcileOutcome, ReconcileUpdate, Reconciler,
    StaticProfileEstimator, WatchDaemon,
};
use rightsizer_store::{
    append_usage, artifact_from_config, artifact_path, assess_drift, read_usage,
    render_kubernetes, state_dir_for_source_root, write_artifact, ConfigDraft, ConfigStore,
    EstimateOrigin, UsageSample,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(name = "rightsizer")]
#[command(about = "Reconcile resource configurations against monitored source code", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass (fingerprint, estimate on drift, commit)
    Check(CheckArgs),

    /// Watch the source and reconcile on change or poll tick
    Watch(CheckArgs),

    /// Show the committed configuration and current drift
    Status(SourceArgs),

    /// List committed configuration versions, oldest first
    History(SourceArgs),

    /// Pin or unpin resource dimensions against automatic updates
    #[command(subcommand)]
    Override(OverrideCommands),

    /// Emit the configuration artifact for downstream provisioning
    Emit(EmitArgs),

    /// Record or inspect observed resource usage
    #[command(subcommand)]
    Usage(UsageCommands),
}

#[derive(Args)]
struct SourceArgs {
    /// Monitored source root
    #[arg(long, default_value = ".")]
    source: PathBuf,

    /// Source identifier (defaults to the root's directory name)
    #[arg(long)]
    source_id: Option<String>,

    /// Settings file (defaults to <state-dir>/settings.toml)
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(Args)]
struct CheckArgs {
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Subcommand)]
enum OverrideCommands {
    /// Pin dimensions at fixed values
    Set(OverrideSetArgs),
    /// Unpin dimensions so future estimates apply again
    Clear(OverrideClearArgs),
}

#[derive(Args)]
struct OverrideSetArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long)]
    memory_bytes: Option<u64>,

    /// Millicores; 1000 = one full core
    #[arg(long)]
    cpu_millis: Option<u64>,

    #[arg(long)]
    bandwidth_bytes_per_sec: Option<u64>,
}

#[derive(Args)]
struct OverrideClearArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long)]
    memory: bool,

    #[arg(long)]
    cpu: bool,

    #[arg(long)]
    bandwidth: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitFormat {
    /// Dimension → value mapping with fingerprint and version
    Artifact,
    /// Kubernetes Deployment manifest (JSON)
    Kubernetes,
}

#[derive(Args)]
struct EmitArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long, value_enum, default_value = "artifact")]
    format: EmitFormat,

    /// Write to a file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// App name for the Kubernetes rendering (defaults to the source id)
    #[arg(long)]
    app_name: Option<String>,
}

#[derive(Subcommand)]
enum UsageCommands {
    /// Append one observed usage sample to the feedback log
    Record(UsageRecordArgs),
    /// Print recorded samples, oldest first
    Show(SourceArgs),
}

#[derive(Args)]
struct UsageRecordArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long)]
    memory_bytes: u64,

    #[arg(long)]
    cpu_millis: u64,

    #[arg(long)]
    bandwidth_bytes_per_sec: u64,
}

struct SourceContext {
    root: PathBuf,
    source_id: String,
    state_dir: PathBuf,
    settings: Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Check(args) => run_check(args).await,
        Commands::Watch(args) => run_watch(args).await,
        Commands::Status(args) => run_status(args).await,
        Commands::History(args) => run_history(args).await,
        Commands::Override(OverrideCommands::Set(args)) => run_override_set(args).await,
        Commands::Override(OverrideCommands::Clear(args)) => run_override_clear(args).await,
        Commands::Emit(args) => run_emit(args).await,
        Commands::Usage(UsageCommands::Record(args)) => run_usage_record(args).await,
        Commands::Usage(UsageCommands::Show(args)) => run_usage_show(args).await,
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn resolve_source(args: &SourceArgs) -> Result<SourceContext> {
    let root = args
        .source
        .canonicalize()
        .with_context(|| format!("source root {} is not accessible", args.source.display()))?;
    let source_id = match &args.source_id {
        Some(id) => id.clone(),
        None => root
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("source")
            .to_string(),
    };
    let state_dir = state_dir_for_source_root(&root);
    let settings = Settings::load(args.settings.as_deref(), &state_dir)?;

    Ok(SourceContext {
        root,
        source_id,
        state_dir,
        settings,
    })
}

fn build_reconciler(ctx: &SourceContext) -> Result<Reconciler> {
    let fingerprinter = SourceFingerprinter::new(ctx.source_id.clone(), &ctx.root)?;
    let store = ConfigStore::open(&ctx.state_dir);
    let client = Arc::new(StaticProfileEstimator::new(&ctx.root));
    Ok(Reconciler::new(
        fingerprinter,
        store,
        client,
        ctx.settings.reconciler_config(),
    ))
}

async fn run_check(args: CheckArgs) -> Result<()> {
    let ctx = resolve_source(&args.source)?;
    let reconciler = build_reconciler(&ctx)?;

    let outcome = reconciler.run_once(&CancelFlag::new()).await?;
    let payload = match outcome {
        ReconcileOutcome::NoChange { version, digest } => serde_json::json!({
            "outcome": "no_change",
            "version": version,
            "digest": digest,
        }),
        ReconcileOutcome::Committed(config) => serde_json::json!({
            "outcome": "committed",
            "version": config.version,
            "digest": config.source_digest,
            "memory_bytes": config.memory_bytes,
            "cpu_millis": config.cpu_millis,
            "bandwidth_bytes_per_sec": config.bandwidth_bytes_per_sec,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_watch(args: CheckArgs) -> Result<()> {
    let ctx = resolve_source(&args.source)?;
    let reconciler = Arc::new(build_reconciler(&ctx)?);
    let daemon = WatchDaemon::start(reconciler, ctx.settings.watch_config())?;
    let mut updates = daemon.subscribe_updates();

    // Converge right away instead of waiting for the first event.
    daemon.trigger("startup").await?;
    log::info!("Watching {} (ctrl-c to stop)", ctx.root.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(update) => print_update(&update)?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Skipped {skipped} updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn print_update(update: &ReconcileUpdate) -> Result<()> {
    let (outcome, version) = match &update.outcome {
        Some(ReconcileOutcome::Committed(config)) => ("committed", Some(config.version)),
        Some(ReconcileOutcome::NoChange { version, .. }) => ("no_change", *version),
        None => ("failed", None),
    };
    // One JSON line per completed pass.
    println!(
        "{}",
        serde_json::to_string(&serde_json::json!({
            "success": update.success,
            "outcome": outcome,
            "version": version,
            "reason": update.reason,
            "duration_ms": update.duration_ms,
            "error": update.error,
        }))?
    );
    Ok(())
}

async fn run_status(args: SourceArgs) -> Result<()> {
    let ctx = resolve_source(&args)?;
    let store = ConfigStore::open(&ctx.state_dir);
    let config = store.load().await?;

    let fingerprinter = SourceFingerprinter::new(ctx.source_id.clone(), &ctx.root)?;
    let snapshot = fingerprinter.capture().await?;
    let digest = snapshot.digest();
    let drift = assess_drift(&digest, config.as_ref());
    let status = read_status_snapshot(&ctx.state_dir).await?;

    let payload = serde_json::json!({
        "source_id": ctx.source_id,
        "current_digest": digest,
        "stale": drift.drifted,
        "stale_reasons": drift.reasons,
        "configuration": config,
        "status": status,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_history(args: SourceArgs) -> Result<()> {
    let ctx = resolve_source(&args)?;
    let store = ConfigStore::open(&ctx.state_dir);
    let history = store.history().await?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

async fn run_override_set(args: OverrideSetArgs) -> Result<()> {
    if args.memory_bytes.is_none()
        && args.cpu_millis.is_none()
        && args.bandwidth_bytes_per_sec.is_none()
    {
        bail!("nothing to pin: pass at least one of --memory-bytes, --cpu-millis, --bandwidth-bytes-per-sec");
    }

    let ctx = resolve_source(&args.source)?;
    let store = ConfigStore::open(&ctx.state_dir);
    let head = store
        .load()
        .await?
        .context("no committed configuration; run `rightsizer check` first")?;

    let mut overrides = head.overrides.clone();
    if let Some(memory) = args.memory_bytes {
        overrides.memory_bytes = Some(memory);
    }
    if let Some(cpu) = args.cpu_millis {
        overrides.cpu_millis = Some(cpu);
    }
    if let Some(bandwidth) = args.bandwidth_bytes_per_sec {
        overrides.bandwidth_bytes_per_sec = Some(bandwidth);
    }

    let committed = store
        .commit(ConfigDraft {
            source_id: head.source_id.clone(),
            fingerprint: head.fingerprint.clone(),
            memory_bytes: overrides.memory_bytes.unwrap_or(head.memory_bytes),
            cpu_millis: overrides.cpu_millis.unwrap_or(head.cpu_millis),
            bandwidth_bytes_per_sec: overrides
                .bandwidth_bytes_per_sec
                .unwrap_or(head.bandwidth_bytes_per_sec),
            overrides,
            derived_from: EstimateOrigin::ManualOverride,
            estimate_confidence: None,
            parent_version: Some(head.version),
        })
        .await?;
    write_artifact(&artifact_path(&ctx.state_dir), &committed).await?;

    println!("{}", serde_json::to_string_pretty(&committed)?);
    Ok(())
}

async fn run_override_clear(args: OverrideClearArgs) -> Result<()> {
    if !args.memory && !args.cpu && !args.bandwidth {
        bail!("nothing to clear: pass at least one of --memory, --cpu, --bandwidth");
    }

    let ctx = resolve_source(&args.source)?;
    let store = ConfigStore::open(&ctx.state_dir);
    let head = store
        .load()
        .await?
        .context("no committed configuration; run `rightsizer check` first")?;

    let mut overrides = head.overrides.clone();
    if args.memory {
        overrides.memory_bytes = None;
    }
    if args.cpu {
        overrides.cpu_millis = None;
    }
    if args.bandwidth {
        overrides.bandwidth_bytes_per_sec = None;
    }

    // Current values stay in force; cleared dimensions simply follow the
    // next estimate again.
    let committed = store
        .commit(ConfigDraft {
            source_id: head.source_id.clone(),
            fingerprint: head.fingerprint.clone(),
            memory_bytes: head.memory_bytes,
            cpu_millis: head.cpu_millis,
            bandwidth_bytes_per_sec: head.bandwidth_bytes_per_sec,
            overrides,
            derived_from: EstimateOrigin::ManualOverride,
            estimate_confidence: None,
            parent_version: Some(head.version),
        })
        .await?;
    write_artifact(&artifact_path(&ctx.state_dir), &committed).await?;

    println!("{}", serde_json::to_string_pretty(&committed)?);
    Ok(())
}

async fn run_emit(args: EmitArgs) -> Result<()> {
    let ctx = resolve_source(&args.source)?;
    let store = ConfigStore::open(&ctx.state_dir);
    let head = store
        .load()
        .await?
        .context("no committed configuration; run `rightsizer check` first")?;

    match args.format {
        EmitFormat::Artifact => {
            if let Some(output) = &args.output {
                write_artifact(output, &head).await?;
                log::info!("Wrote artifact v{} to {}", head.version, output.display());
            } else {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&artifact_from_config(&head))?
                );
            }
        }
        EmitFormat::Kubernetes => {
            let app_name = args.app_name.as_deref().unwrap_or(&ctx.source_id);
            let manifest = render_kubernetes(&head, app_name);
            let rendered = serde_json::to_string_pretty(&manifest)?;
            if let Some(output) = &args.output {
                tokio::fs::write(output, rendered.as_bytes())
                    .await
                    .with_context(|| format!("write manifest {}", output.display()))?;
                log::info!("Wrote Kubernetes manifest to {}", output.display());
            } else {
                println!("{rendered}");
            }
        }
    }
    Ok(())
}

async fn run_usage_record(args: UsageRecordArgs) -> Result<()> {
    let ctx = resolve_source(&args.source)?;
    let store = ConfigStore::open(&ctx.state_dir);
    let config_version = store.load().await?.map(|c| c.version);

    let sample = UsageSample {
        observed_at_unix_ms: unix_now_ms(),
        memory_bytes: args.memory_bytes,
        cpu_millis: args.cpu_millis,
        bandwidth_bytes_per_sec: args.bandwidth_bytes_per_sec,
        config_version,
    };
    append_usage(&ctx.state_dir, &sample).await?;

    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

async fn run_usage_show(args: SourceArgs) -> Result<()> {
    let ctx = resolve_source(&args)?;
    let samples = read_usage(&ctx.state_dir).await?;
    println!("{}", serde_json::to_string_pretty(&samples)?);
    Ok(())
}
