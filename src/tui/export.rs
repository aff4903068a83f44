use crate::export;
use crate::metrics;
use crate::model::{QueryConfig, QueryReport};
use anyhow::{bail, Context, Result};
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use super::state::UiState;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Export the current rows as CSV into the current directory.
/// Returns the absolute path of the exported file.
pub fn export_rows_csv(state: &UiState) -> Result<std::path::PathBuf> {
    if state.rows.is_empty() {
        bail!("No data to export");
    }
    let name = export::default_csv_name(time::OffsetDateTime::now_utc());
    let path = export::default_export_path(&name)?;
    export::export_csv(&path, &state.rows)?;
    Ok(path)
}

/// Export the current rows as a JSON report into the current directory.
pub fn export_report_json(state: &UiState, cfg: &QueryConfig) -> Result<std::path::PathBuf> {
    let Some(params) = state.last_params.clone() else {
        bail!("No data to export");
    };
    if state.rows.is_empty() {
        bail!("No data to export");
    }
    let now = time::OffsetDateTime::now_utc();
    let report = QueryReport {
        generated_at_utc: now
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        base_url: cfg.base_url.clone(),
        timeout: cfg.timeout,
        query: params,
        summary: metrics::summarize(&state.rows),
        rows: state.rows.clone(),
    };
    let path = export::default_export_path(&export::default_json_name(now))?;
    export::export_json(&path, &report)?;
    Ok(path)
}

/// Render the current rows as CSV and put the document on the clipboard.
pub fn copy_rows_csv(state: &UiState) -> Result<usize> {
    let doc = export::render_csv(&state.rows).context("No data to copy")?;
    copy_to_clipboard(&doc)?;
    Ok(state.rows.len())
}

/// Initialize the clipboard manager thread if not already initialized.
/// This creates a background thread that processes clipboard operations sequentially,
/// keeping each clipboard instance alive for a sufficient duration.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        // Clipboard managers on Linux read lazily; keep the owner alive briefly.
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Copy text to clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}
