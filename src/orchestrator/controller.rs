//! Query lifecycle controller.
//!
//! Owns the session state machine, the cancellation token, the 1 s status tick,
//! the absolute deadline and the short completion pause, and emits events for
//! presentation layers.

use crate::engine::{AnalyticsBackend, Milestone, QueryEngine};
use crate::error::QueryError;
use crate::model::{InfoEvent, QueryParams, ResultRow, SessionEvent};
use crate::session::SessionState;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Pause between "rows ingested" and "complete".
pub(crate) const COMPLETION_PAUSE: Duration = Duration::from_millis(500);
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Submit(QueryParams),
    Cancel,
    Clear,
    SyncSheet(Vec<ResultRow>),
    Quit,
}

type RunHandle = JoinHandle<Result<Vec<ResultRow>, QueryError>>;

/// Rows waiting out the completion pause.
struct PendingCompletion {
    params: QueryParams,
    rows: Vec<ResultRow>,
    at: Instant,
}

/// Drive query sessions from UI commands until `Quit` or the command channel closes.
pub(crate) async fn run_controller(
    backend: Arc<dyn AnalyticsBackend>,
    timeout: Duration,
    event_tx: UnboundedSender<SessionEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut session = SessionState::default();

    // Per-run pieces live in separate slots so each select arm borrows only its own.
    let mut run_params: Option<QueryParams> = None;
    let mut cancel_token: Option<CancellationToken> = None;
    let mut run_handle: Option<RunHandle> = None;
    let mut milestone_rx: Option<UnboundedReceiver<Milestone>> = None;
    let mut deadline: Option<Instant> = None;
    let mut pending: Option<PendingCompletion> = None;

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    macro_rules! emit_progress {
        () => {
            let _ = event_tx.send(SessionEvent::Progress(session.snapshot(Instant::now())));
        };
    }

    // Fire the token (at most once per run) and forget the run. Returns whether anything was in flight.
    macro_rules! abort_run {
        () => {{
            let had_token = match cancel_token.take() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            };
            // The task observes the token and exits on its own; its result is no longer wanted.
            run_handle.take();
            milestone_rx.take();
            run_params.take();
            deadline.take();
            let had_pending = pending.take().is_some();
            let was_active = session.cancel();
            had_token || had_pending || was_active
        }};
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Submit(params)) => {
                        let now = Instant::now();
                        if let Err(e) = session.submit(&params, now) {
                            tracing::warn!(error = %e, "submit rejected");
                            let _ = event_tx.send(SessionEvent::Rejected(e));
                            continue;
                        }
                        tracing::info!(
                            products = params.product_ids.len(),
                            estimate_secs = session.estimated().as_secs(),
                            "query submitted"
                        );
                        let token = CancellationToken::new();
                        let (m_tx, m_rx) = mpsc::unbounded_channel::<Milestone>();
                        let engine = QueryEngine::new(backend.clone());
                        run_handle = Some(tokio::spawn(engine.run(params.clone(), m_tx, token.clone())));
                        cancel_token = Some(token);
                        milestone_rx = Some(m_rx);
                        deadline = Some(now + timeout);
                        run_params = Some(params);
                        pending = None;
                        ticker.reset();
                        emit_progress!();
                    }
                    Some(UiCommand::Cancel) => {
                        if abort_run!() {
                            tracing::info!("query cancelled by user");
                            let _ = event_tx.send(SessionEvent::Cancelled);
                            emit_progress!();
                        } else {
                            tracing::debug!("cancel ignored, nothing in flight");
                        }
                    }
                    Some(UiCommand::Clear) => {
                        if abort_run!() {
                            let _ = event_tx.send(SessionEvent::Cancelled);
                        }
                        session.clear();
                        emit_progress!();
                    }
                    Some(UiCommand::SyncSheet(rows)) => {
                        if rows.is_empty() {
                            let _ = event_tx.send(SessionEvent::Info(InfoEvent::Message(
                                "No data to sync".into(),
                            )));
                            continue;
                        }
                        let backend = backend.clone();
                        let tx = event_tx.clone();
                        let _ = event_tx.send(SessionEvent::Info(InfoEvent::Message(
                            "Updating Google Sheet…".into(),
                        )));
                        tokio::spawn(async move {
                            let info = match backend.update_sheet(&rows).await {
                                Ok(()) => {
                                    tracing::info!(rows = rows.len(), "sheet updated");
                                    InfoEvent::SheetSynced { rows: rows.len() }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "sheet update failed");
                                    InfoEvent::SheetSyncFailed(e.to_string())
                                }
                            };
                            let _ = tx.send(SessionEvent::Info(info));
                        });
                    }
                    Some(UiCommand::Quit) | None => {
                        let _ = abort_run!();
                        break;
                    }
                }
            }
            milestone = async {
                match milestone_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => futures::future::pending().await,
                }
            } => {
                match milestone {
                    Some(m) => {
                        if apply_milestone(&mut session, m) {
                            emit_progress!();
                        }
                    }
                    // Sender gone: the run finished; the join arm picks it up.
                    None => {
                        milestone_rx = None;
                    }
                }
            }
            // The handle stays in its slot until this arm wins, so completion is never lost.
            joined = async {
                match run_handle.as_mut() {
                    Some(h) => h.await,
                    None => futures::future::pending().await,
                }
            } => {
                run_handle = None;
                cancel_token = None;
                deadline = None;
                if let Some(rx) = milestone_rx.as_mut() {
                    while let Ok(m) = rx.try_recv() {
                        if apply_milestone(&mut session, m) {
                            emit_progress!();
                        }
                    }
                }
                milestone_rx = None;
                let params = run_params.take();

                match joined {
                    Ok(Ok(rows)) => {
                        if session.body_parsed() {
                            emit_progress!();
                        }
                        session.finalizing();
                        emit_progress!();
                        if let Some(params) = params {
                            pending = Some(PendingCompletion {
                                params,
                                rows,
                                at: Instant::now() + COMPLETION_PAUSE,
                            });
                        }
                    }
                    Ok(Err(QueryError::Cancelled)) => {
                        // Cancellation was already reported when the token fired.
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "query failed");
                        session.fail(&e);
                        let _ = event_tx.send(SessionEvent::Failed(e));
                        emit_progress!();
                    }
                    Err(e) => {
                        let e = QueryError::Transport(format!("query task failed: {e}"));
                        session.fail(&e);
                        let _ = event_tx.send(SessionEvent::Failed(e));
                        emit_progress!();
                    }
                }
            }
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => futures::future::pending().await,
                }
            } => {
                if abort_run!() {
                    tracing::warn!(timeout_secs = timeout.as_secs(), "query deadline expired");
                    let _ = event_tx.send(SessionEvent::Failed(QueryError::Timeout(timeout)));
                    emit_progress!();
                }
            }
            _ = async {
                match pending.as_ref() {
                    Some(p) => tokio::time::sleep_until(p.at).await,
                    None => futures::future::pending().await,
                }
            } => {
                if let Some(done) = pending.take() {
                    session.succeed(done.rows.len());
                    tracing::info!(rows = done.rows.len(), "query complete");
                    emit_progress!();
                    let _ = event_tx.send(SessionEvent::Completed {
                        params: done.params,
                        rows: done.rows,
                    });
                }
            }
            _ = ticker.tick() => {
                if session.is_active() {
                    session.tick(Instant::now());
                    emit_progress!();
                }
            }
        }
    }

    Ok(())
}

fn apply_milestone(session: &mut SessionState, m: Milestone) -> bool {
    match m {
        Milestone::HeadersReceived => session.headers_received(),
        Milestone::BodyParsed { .. } => session.body_parsed(),
    }
}
