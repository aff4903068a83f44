use crate::engine::{AnalyticsBackend, AnalyticsClient};
use crate::error::QueryError;
use crate::model::{
    default_date_range, format_date, local_today, InfoEvent, Phase, QueryConfig, QueryParams,
    ResultRow, SessionEvent,
};
use crate::orchestrator::{self, ExportTargets, UiCommand};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
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
    name = "product-sales",
    version,
    about = "Query product sales analytics, export CSV and sync to Google Sheets"
)]
pub struct Cli {
    /// Base URL of the analytics backend
    #[arg(long, env = "ANALYTICS_API_URL")]
    pub base_url: String,

    /// Comma-separated product IDs (numeric or gid://shopify/Product/...)
    #[arg(short, long)]
    pub products: Option<String>,

    /// Start date (YYYY-MM-DD); defaults to 90 days ago
    #[arg(long)]
    pub start_date: Option<String>,

    /// End date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub end_date: Option<String>,

    /// Print JSON report and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Client-side deadline for one query
    #[arg(long, default_value = "5m")]
    pub timeout: humantime::Duration,

    /// Export results as CSV (default name: analytics-data-<timestamp>.csv)
    #[arg(long, num_args = 0..=1, value_name = "PATH")]
    pub export_csv: Option<Option<PathBuf>>,

    /// Export the JSON report
    #[arg(long, value_name = "PATH")]
    pub export_json: Option<PathBuf>,

    /// Push the result rows to the Google Sheet after the query
    #[arg(long)]
    pub sync_sheet: bool,

    /// Start the query as soon as the TUI opens when --products is given
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub query_on_launch: bool,

    /// Log filter (e.g. info, debug, product_sales=trace)
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_level: String,
}

impl Cli {
    pub fn is_interactive(&self) -> bool {
        !self.json && !self.text && cfg!(feature = "tui")
    }

    /// Initial form text: identifiers plus both dates, falling back to the trailing window.
    pub fn form_defaults(&self) -> (String, String, String) {
        let (start, end) = default_date_range(local_today());
        (
            self.products.clone().unwrap_or_default(),
            self.start_date.clone().unwrap_or_else(|| format_date(start)),
            self.end_date.clone().unwrap_or_else(|| format_date(end)),
        )
    }

    pub fn export_targets(&self) -> ExportTargets {
        ExportTargets {
            csv: self.export_csv.clone(),
            json: self.export_json.clone(),
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text are mutually exclusive"));
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_once(args, OutputMode::Text).await;
        }
    }

    let mode = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    run_once(args, mode).await
}

/// Build a `QueryConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> QueryConfig {
    QueryConfig {
        base_url: args.base_url.clone(),
        timeout: Duration::from(args.timeout),
        user_agent: format!("product-sales-cli/{}", env!("CARGO_PKG_VERSION")),
    }
}

pub fn build_backend(cfg: &QueryConfig) -> Result<Arc<dyn AnalyticsBackend>> {
    let client = AnalyticsClient::new(cfg).context("create analytics client")?;
    Ok(Arc::new(client))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Json,
}

/// Run a single query without the TUI and print the outcome.
async fn run_once(args: Cli, mode: OutputMode) -> Result<()> {
    let (ids, start, end) = args.form_defaults();
    // Validation happens before anything touches the network.
    let params = QueryParams::parse(&ids, &start, &end).context("invalid query")?;

    let cfg = build_config(&args);
    let backend = build_backend(&cfg)?;
    run_session(&args, &cfg, backend, params, mode, tokio::signal::ctrl_c()).await
}

/// Drive one submission through the controller. `interrupt` resolving asks for
/// cancellation (Ctrl-C in the binary).
async fn run_session<F: std::future::Future>(
    args: &Cli,
    cfg: &QueryConfig,
    backend: Arc<dyn AnalyticsBackend>,
    params: QueryParams,
    mode: OutputMode,
    interrupt: F,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let controller = tokio::spawn(orchestrator::run_controller(
        backend,
        cfg.timeout,
        event_tx,
        cmd_rx,
    ));
    let (out_tx, out_handle) = spawn_output_writer();

    let _ = cmd_tx.send(UiCommand::Submit(params));

    tokio::pin!(interrupt);
    let mut cancel_sent = false;
    let mut last_status: Option<(Phase, String)> = None;

    let outcome: Result<(QueryParams, Vec<ResultRow>), QueryError> = loop {
        tokio::select! {
            ev = event_rx.recv() => {
                match ev {
                    Some(SessionEvent::Progress(s)) => {
                        if mode == OutputMode::Text && s.phase != Phase::Idle {
                            let key = (s.phase, s.status.clone());
                            if last_status.as_ref() != Some(&key) {
                                let _ = out_tx.send(OutputLine::Stderr(format!(
                                    "[{:>3}%] {} (elapsed {}s, est. {}s)",
                                    s.progress, s.status, s.elapsed_secs, s.estimated_secs
                                )));
                                last_status = Some(key);
                            }
                        }
                    }
                    Some(SessionEvent::Completed { params, rows }) => break Ok((params, rows)),
                    Some(SessionEvent::Failed(e)) | Some(SessionEvent::Rejected(e)) => break Err(e),
                    Some(SessionEvent::Cancelled) => break Err(QueryError::Cancelled),
                    Some(SessionEvent::Info(info)) => {
                        let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                    }
                    None => break Err(QueryError::Transport("controller stopped".into())),
                }
            }
            _ = &mut interrupt, if !cancel_sent => {
                cancel_sent = true;
                let _ = out_tx.send(OutputLine::Stderr("Cancelling…".into()));
                let _ = cmd_tx.send(UiCommand::Cancel);
            }
        }
    };

    let result = match outcome {
        Ok((params, rows)) => {
            let processed =
                orchestrator::process_completion(cfg, &args.export_targets(), params, rows);
            for msg in &processed.export_messages {
                let _ = out_tx.send(OutputLine::Stderr(msg.clone()));
            }

            match mode {
                OutputMode::Json => {
                    let out = serde_json::to_string_pretty(&processed.report)?;
                    let _ = out_tx.send(OutputLine::Stdout(out));
                }
                OutputMode::Text => {
                    let summary = crate::text_summary::build_text_summary(&processed.report);
                    for line in summary.lines {
                        let _ = out_tx.send(OutputLine::Stdout(line));
                    }
                }
            }

            if args.sync_sheet {
                sync_sheet(&cmd_tx, &mut event_rx, &out_tx, processed.report.rows).await
            } else {
                Ok(())
            }
        }
        Err(e) if e.is_cancellation() => {
            let _ = out_tx.send(OutputLine::Stderr("Query cancelled".into()));
            Err(anyhow::Error::new(e))
        }
        Err(e) => Err(anyhow::Error::new(e)),
    };

    let _ = cmd_tx.send(UiCommand::Quit);
    controller.await.context("controller task failed")??;
    drop(out_tx);
    let _ = out_handle.await;
    result
}

/// Push rows through the controller and wait for the outcome notice.
async fn sync_sheet(
    cmd_tx: &mpsc::UnboundedSender<UiCommand>,
    event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
    rows: Vec<ResultRow>,
) -> Result<()> {
    if rows.is_empty() {
        let _ = out_tx.send(OutputLine::Stderr("No data to sync".into()));
        return Ok(());
    }
    let _ = cmd_tx.send(UiCommand::SyncSheet(rows));
    while let Some(ev) = event_rx.recv().await {
        if let SessionEvent::Info(info) = ev {
            let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            match info {
                InfoEvent::SheetSynced { .. } => return Ok(()),
                InfoEvent::SheetSyncFailed(e) => {
                    return Err(anyhow::anyhow!("sheet update failed: {e}"))
                }
                InfoEvent::Message(_) => {}
            }
        }
    }
    Err(anyhow::anyhow!("controller stopped before the sheet update finished"))
}
