mod export;
mod help;
mod state;

use crate::cli::{self, Cli};
use crate::error::QueryError;
use crate::model::{local_today, Phase, QueryConfig, SessionEvent};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Tabs},
    Terminal,
};
use state::{FormField, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const PAGE: usize = 10;

pub async fn run(args: Cli) -> Result<()> {
    let cfg = cli::build_config(&args);
    let backend = cli::build_backend(&cfg)?;

    // Unbounded channels keep the UI thread from ever waiting on the controller.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_cfg = cfg.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_args, ui_cfg, event_rx, cmd_tx));

    let res = orchestrator::run_controller(backend, cfg.timeout, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    args: Cli,
    cfg: QueryConfig,
    mut event_rx: UnboundedReceiver<SessionEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::new(local_today());
    let (products, start, end) = args.form_defaults();
    state.form.products = products;
    state.form.start_date = start;
    state.form.end_date = end;

    if args.query_on_launch && args.products.is_some() {
        submit(&mut state, &cmd_tx);
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            apply_event(&args, &cfg, &mut state, ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if handle_key(&cfg, &mut state, &cmd_tx, k) == KeyOutcome::Quit {
                    let _ = cmd_tx.send(UiCommand::Quit);
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

#[derive(Debug, PartialEq, Eq)]
enum KeyOutcome {
    Continue,
    Quit,
}

fn handle_key(
    cfg: &QueryConfig,
    state: &mut UiState,
    cmd_tx: &UnboundedSender<UiCommand>,
    k: KeyEvent,
) -> KeyOutcome {
    match (k.modifiers, k.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (KeyModifiers::CONTROL, KeyCode::Char('q')) => {
            return KeyOutcome::Quit;
        }
        (_, KeyCode::F(1)) => {
            state.tab = if state.tab == 1 { 0 } else { 1 };
        }
        (_, KeyCode::Esc) => {
            if state.tab == 1 {
                state.tab = 0;
            } else if state.is_busy() {
                state.info = "Cancelling…".into();
                let _ = cmd_tx.send(UiCommand::Cancel);
            }
        }
        (_, KeyCode::Enter) => submit(state, cmd_tx),
        (_, KeyCode::Tab) => state.form.focus = state.form.focus.next(),
        (_, KeyCode::BackTab) => state.form.focus = state.form.focus.prev(),
        (KeyModifiers::CONTROL, KeyCode::Char('l')) => {
            state.clear();
            let _ = cmd_tx.send(UiCommand::Clear);
        }
        (KeyModifiers::CONTROL, KeyCode::Char('e')) => match export::export_rows_csv(state) {
            Ok(p) => state.info = format!("Exported CSV: {}", p.display()),
            Err(e) => state.info = format!("Export CSV failed: {e:#}"),
        },
        (KeyModifiers::CONTROL, KeyCode::Char('o')) => {
            match export::export_report_json(state, cfg) {
                Ok(p) => state.info = format!("Exported JSON: {}", p.display()),
                Err(e) => state.info = format!("Export JSON failed: {e:#}"),
            }
        }
        (KeyModifiers::CONTROL, KeyCode::Char('y')) => match export::copy_rows_csv(state) {
            Ok(n) => state.info = format!("Copied {n} row(s) as CSV"),
            Err(e) => state.info = format!("Copy failed: {e:#}"),
        },
        (KeyModifiers::CONTROL, KeyCode::Char('s')) => {
            if state.rows.is_empty() {
                state.info = "No data to sync".into();
            } else {
                state.info = "Updating Google Sheet…".into();
                let _ = cmd_tx.send(UiCommand::SyncSheet(state.rows.clone()));
            }
        }
        (_, KeyCode::Down) => state.scroll_down(1),
        (_, KeyCode::Up) => state.scroll_up(1),
        (_, KeyCode::PageDown) => state.scroll_down(PAGE),
        (_, KeyCode::PageUp) => state.scroll_up(PAGE),
        (_, KeyCode::Backspace) => {
            if !state.is_busy() {
                state.form.backspace();
            }
        }
        (m, KeyCode::Char(c)) if !m.contains(KeyModifiers::CONTROL) => {
            // The form is locked while a query is running.
            if !state.is_busy() {
                state.form.push_char(c);
                state.form_error = None;
            }
        }
        _ => {}
    }
    KeyOutcome::Continue
}

fn submit(state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>) {
    if state.is_busy() {
        state.info = QueryError::Busy.to_string();
        return;
    }
    if let Some(params) = state.prepare_submit() {
        state.info = format!("Querying {} product(s)…", params.product_ids.len());
        let _ = cmd_tx.send(UiCommand::Submit(params));
    }
}

fn apply_event(args: &Cli, cfg: &QueryConfig, state: &mut UiState, ev: SessionEvent) {
    match ev {
        SessionEvent::Progress(snapshot) => {
            state.session = snapshot;
        }
        SessionEvent::Completed { params, rows } => {
            let processed =
                orchestrator::process_completion(cfg, &args.export_targets(), params, rows);
            let n = processed.report.rows.len();
            state.summary = processed.report.summary;
            state.last_params = Some(processed.report.query);
            state.rows = processed.report.rows;
            state.show_results = true;
            state.table_scroll = 0;
            state.info = match processed.export_messages.last() {
                Some(msg) => msg.clone(),
                None if n == 0 => "No sales found for the selected range".into(),
                None => format!("Loaded {n} row(s)"),
            };
        }
        SessionEvent::Failed(e) => {
            tracing::warn!(error = %e, "query failed");
            state.info = format!("Query failed: {e}");
        }
        SessionEvent::Cancelled => {
            state.info = "Query cancelled".into();
        }
        SessionEvent::Rejected(e) => match e {
            QueryError::Validation(msg) => state.form_error = Some(msg),
            other => state.info = other.to_string(),
        },
        SessionEvent::Info(info) => {
            state.info = info.to_message();
        }
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Query"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("product-sales"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_query(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn draw_query(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(6),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(3),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(area);

    draw_form(chunks[0], f, state);
    draw_progress(chunks[1], f, state);
    draw_summary(chunks[2], f, state);
    draw_table(chunks[3], f, state);

    let status = Paragraph::new(Line::from(vec![
        Span::styled(state.session.phase.label(), phase_style(state.session.phase)),
        Span::raw("  "),
        Span::raw(state.info.as_str()),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, chunks[4]);
}

fn draw_form(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let field = |label: &'static str, value: &str, which: FormField| {
        let focused = state.form.focus == which;
        let style = if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let cursor = if focused && !state.is_busy() { "▏" } else { "" };
        Line::from(vec![
            Span::styled(format!("{label:<12}"), style.add_modifier(Modifier::BOLD)),
            Span::styled(format!("{value}{cursor}"), style),
        ])
    };

    let mut lines = vec![
        field("Product IDs", &state.form.products, FormField::Products),
        field("Start date", &state.form.start_date, FormField::StartDate),
        field("End date", &state.form.end_date, FormField::EndDate),
    ];
    if let Some(err) = state.form_error.as_deref() {
        lines.push(Line::from(Span::styled(
            err.to_string(),
            Style::default().fg(Color::Red),
        )));
    }

    let title = if state.is_busy() {
        "Query (running, Esc to cancel)"
    } else {
        "Query (Enter to run, F1 for help)"
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_progress(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let s = &state.session;
    let label = if s.phase == Phase::Idle {
        s.status.clone()
    } else {
        format!(
            "{}%  {}  [{}s / ~{}s, {}/{} products]",
            s.progress,
            s.status,
            s.elapsed_secs,
            s.estimated_secs,
            s.processed_products,
            s.total_products
        )
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(phase_style(s.phase))
        .percent(u16::from(s.progress.min(100)))
        .label(label);
    f.render_widget(gauge, area);
}

fn draw_summary(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let s = &state.summary;
    let line = if state.show_results {
        Line::from(vec![
            Span::raw("Products: "),
            Span::styled(
                s.unique_products.to_string(),
                Style::default().fg(Color::Cyan),
            ),
            Span::raw("   Items sold: "),
            Span::styled(
                s.total_items_sold.to_string(),
                Style::default().fg(Color::Cyan),
            ),
            Span::raw("   Net sales: "),
            Span::styled(
                format!("{:.2}", s.total_sales),
                Style::default().fg(Color::Green),
            ),
            Span::raw("   Avg/item: "),
            Span::styled(
                format!("{:.2}", s.average_sale_per_item),
                Style::default().fg(Color::Green),
            ),
        ])
    } else {
        Line::from("-")
    };
    let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("Summary"));
    f.render_widget(p, area);
}

fn draw_table(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let title = format!("Results ({})", state.rows.len());
    let block = Block::default().borders(Borders::ALL).title(title);

    if !state.show_results {
        f.render_widget(Paragraph::new("No results yet").block(block), area);
        return;
    }
    if state.rows.is_empty() {
        f.render_widget(
            Paragraph::new("No sales found for the selected range").block(block),
            area,
        );
        return;
    }

    let header = Row::new(vec!["Product", "Variant", "SKU", "Items", "Net sales"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows = state.rows.iter().skip(state.table_scroll).map(|r| {
        Row::new(vec![
            Cell::from(r.product_title.clone()),
            Cell::from(r.variant_title.clone()),
            Cell::from(r.sku.clone().unwrap_or_default()),
            Cell::from(r.net_items_sold.to_string()),
            Cell::from(format!("{:.2}", r.net_sales)),
        ])
    });
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(35),
            Constraint::Percentage(25),
            Constraint::Percentage(16),
            Constraint::Percentage(10),
            Constraint::Percentage(14),
        ],
    )
    .header(header)
    .block(block);
    f.render_widget(table, area);
}

fn phase_style(phase: Phase) -> Style {
    match phase {
        Phase::Idle => Style::default().fg(Color::Gray),
        Phase::FetchingProducts | Phase::FetchingSales => Style::default().fg(Color::Cyan),
        Phase::Processing => Style::default().fg(Color::Yellow),
        Phase::Complete => Style::default().fg(Color::Green),
    }
}
