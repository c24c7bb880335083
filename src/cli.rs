use crate::manifest;
use crate::model::{Decision, FailureCause, Phase, Reason, RunConfig, RunSummary, SessionEvent};
use crate::session::{Confirmation, ErrorReporter, SaveSession, UploadConfirmer, WarningSink};
use crate::store::{EventForwarder, LayerEntry};
use crate::units::UploadTarget;
use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

type OutputTx = mpsc::UnboundedSender<OutputLine>;

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (OutputTx, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "layersave",
    version,
    about = "Upload and save modified layers before deleting them or leaving"
)]
pub struct Cli {
    /// JSON manifest listing the layers and what to do with each
    #[arg(long, required_unless_present = "history")]
    pub manifest: Option<PathBuf>,

    /// Server that layers marked for upload are sent to
    #[arg(long)]
    pub server: Option<String>,

    /// Why the layers are being persisted
    #[arg(long, value_enum, default_value_t = Reason::Exit)]
    pub reason: Reason,

    /// Print the run summary as JSON instead of progress lines and a text summary
    #[arg(long)]
    pub json: bool,

    /// Upload without asking for confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Skip uploading and saving entirely and proceed
    #[arg(long)]
    pub discard: bool,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Export the run summary as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Timeout for a single layer upload
    #[arg(long, default_value = "60s")]
    pub upload_timeout: humantime::Duration,

    /// Bytes written or sent per chunk; cancel is checked between chunks
    #[arg(long, default_value_t = 64 * 1024)]
    pub chunk_size: usize,

    /// Print the last N journaled runs and exit
    #[arg(long, value_name = "N")]
    pub history: Option<usize>,

    /// Enable debug logging on stderr
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<RunConfig> {
    if args.chunk_size == 0 {
        anyhow::bail!("--chunk-size must be greater than zero");
    }
    if let Some(server) = args.server.as_deref() {
        Url::parse(server).with_context(|| format!("invalid --server URL '{server}'"))?;
    }
    Ok(RunConfig {
        server_url: args.server.clone(),
        reason: args.reason,
        chunk_size: args.chunk_size,
        upload_timeout: Duration::from(args.upload_timeout),
        user_agent: format!("layersave/{}", env!("CARGO_PKG_VERSION")),
        assume_yes: args.yes,
    })
}

fn build_upload_target(cfg: &RunConfig) -> Result<Option<UploadTarget>> {
    let Some(server) = cfg.server_url.as_deref() else {
        return Ok(None);
    };
    let client = reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(cfg.upload_timeout)
        .build()
        .context("failed to build HTTP client")?;
    Ok(Some(UploadTarget {
        client,
        base_url: Url::parse(server).with_context(|| format!("invalid server URL '{server}'"))?,
        chunk_size: cfg.chunk_size,
    }))
}

/// Run the CLI and report what the caller of the destructive operation should do.
pub async fn run(args: Cli) -> Result<Decision> {
    if let Some(limit) = args.history {
        return show_history(limit).await;
    }

    let cfg = build_config(&args)?;
    let manifest_path = args
        .manifest
        .as_deref()
        .context("--manifest is required")?;
    let manifest = manifest::load(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or(Path::new("."));
    let target = build_upload_target(&cfg)?;
    let entries = manifest::build_entries(&manifest, base_dir, target.as_ref(), cfg.chunk_size)?;

    let (out_tx, out_handle) = spawn_output_writer();
    let decision = run_session(&args, &cfg, entries, &out_tx).await;
    drop(out_tx);
    let _ = out_handle.await;
    decision
}

async fn run_session(
    args: &Cli,
    cfg: &RunConfig,
    entries: Vec<LayerEntry>,
    out_tx: &OutputTx,
) -> Result<Decision> {
    let needs_work = entries.iter().any(|e| e.wants_upload() || e.wants_save());
    if !needs_work {
        tracing::info!("no layer needs uploading or saving");
        return Ok(Decision::Proceed);
    }
    if args.discard {
        let _ = out_tx.send(OutputLine::Stderr("Discarding changes.".into()));
        return Ok(Decision::Proceed);
    }
    let _ = out_tx.send(OutputLine::Stderr(cfg.reason.headline().to_string()));

    let mut session = SaveSession::new()
        .with_warning_sink(StderrWarnings(out_tx.clone()))
        .with_error_reporter(StderrErrors(out_tx.clone()));
    if !cfg.assume_yes {
        session = session.with_confirmer(StdinConfirmer(out_tx.clone()));
    }
    session.populate(entries)?;
    session.preflight()?;

    let printer = if args.json {
        None
    } else {
        let (evt_tx, evt_rx) = mpsc::unbounded_channel::<SessionEvent>();
        session.subscribe(EventForwarder::new(evt_tx));
        Some(tokio::spawn(print_events(evt_rx, out_tx.clone())))
    };

    let cancel = session.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let result = session.run().await;
    ctrl_c.abort();
    // Closes the event channel so the printer drains and exits.
    drop(session);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let summary = result?;

    handle_exports(args, &summary)?;
    if args.json {
        let out = serde_json::to_string_pretty(&summary)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in crate::text_summary::build_text_summary(&summary).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    if args.auto_save {
        match crate::storage::save_run(&summary) {
            Ok(p) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
            }
            Err(e) => tracing::warn!("failed to journal run: {e:#}"),
        }
    }
    Ok(summary.decision)
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<SessionEvent>, out_tx: OutputTx) {
    while let Some(ev) = rx.recv().await {
        let line = match ev {
            SessionEvent::ModeChanged { .. } | SessionEvent::StateChanged { .. } => continue,
            SessionEvent::PhaseStarted { phase } => format!("== {phase} =="),
            SessionEvent::Progress { message } => message,
            SessionEvent::OutcomeRecorded {
                name,
                phase,
                outcome,
                cause,
                ..
            } => match cause {
                Some(cause) => format!("{phase} '{name}': {outcome:?} ({cause})"),
                None => format!("{phase} '{name}': {outcome:?}"),
            },
        };
        let _ = out_tx.send(OutputLine::Stderr(line));
    }
}

async fn show_history(limit: usize) -> Result<Decision> {
    let (out_tx, out_handle) = spawn_output_writer();
    let runs = crate::storage::load_recent(limit)?;
    if runs.is_empty() {
        let _ = out_tx.send(OutputLine::Stderr("No journaled runs.".into()));
    }
    for run in &runs {
        let _ = out_tx.send(OutputLine::Stdout(format!(
            "{}  {:?}  layers {}  canceled {}  failed {}",
            run.timestamp_utc,
            run.decision,
            run.layers.len(),
            run.canceled,
            run.failed
        )));
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(Decision::Proceed)
}

fn handle_exports(args: &Cli, summary: &RunSummary) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, summary)?;
    }
    Ok(())
}

/// Asks on the terminal before each upload: y(es), n(o) or a(ll).
struct StdinConfirmer(OutputTx);

impl UploadConfirmer for StdinConfirmer {
    fn confirm(&mut self, entry: &LayerEntry) -> Confirmation {
        let _ = self.0.send(OutputLine::Stderr(format!(
            "Upload layer '{}'? [y]es / [n]o / [a]ll",
            entry.name()
        )));
        let mut answer = String::new();
        match tokio::task::block_in_place(|| std::io::stdin().read_line(&mut answer)) {
            Ok(_) => parse_answer(&answer),
            Err(e) => {
                tracing::warn!("failed to read confirmation: {e}");
                Confirmation::Decline
            }
        }
    }
}

fn parse_answer(answer: &str) -> Confirmation {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Confirmation::Accept { remember: false },
        "a" | "all" => Confirmation::Accept { remember: true },
        _ => Confirmation::Decline,
    }
}

struct StderrWarnings(OutputTx);

impl WarningSink for StderrWarnings {
    fn warn(&mut self, canceled: usize, failed: usize) {
        let _ = self.0.send(OutputLine::Stderr(format!(
            "{} problem(s) occurred during upload/save ({canceled} canceled, {failed} failed)",
            canceled + failed
        )));
    }
}

struct StderrErrors(OutputTx);

impl ErrorReporter for StderrErrors {
    fn report(&mut self, layer: &str, phase: Phase, cause: &FailureCause) {
        let _ = self
            .0
            .send(OutputLine::Stderr(format!("error: {phase} of '{layer}': {cause}")));
    }
}
