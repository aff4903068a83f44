use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, text: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(text),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        key_line("Ctrl-C", 6, "Quit"),
        key_line("Enter", 7, "Run query"),
        key_line("Esc", 9, "Cancel running query"),
        key_line("Tab", 9, "Next form field (Shift-Tab: previous)"),
        key_line("Ctrl-L", 6, "Clear form and results"),
        key_line("F1", 10, "Toggle this help"),
        Line::from(""),
        Line::from("Results:"),
        key_line("↑/↓", 9, "Scroll table (PgUp/PgDn by page)"),
        key_line("Ctrl-E", 6, "Export CSV (analytics-data-<timestamp>.csv)"),
        key_line("Ctrl-O", 6, "Export JSON report"),
        key_line("Ctrl-Y", 6, "Copy CSV to clipboard"),
        key_line("Ctrl-S", 6, "Update Google Sheet"),
        Line::from(""),
        Line::from("Form:"),
        Line::from("  Product IDs are comma separated, numeric or gid://shopify/Product/<id>."),
        Line::from("  Dates are YYYY-MM-DD; the default range is the last 90 days."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
