use crate::error::QueryError;
use crate::model::{
    default_date_range, format_date, Phase, QueryParams, ResultRow, SalesSummary, SessionSnapshot,
};
use time::Date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormField {
    #[default]
    Products,
    StartDate,
    EndDate,
}

impl FormField {
    pub fn next(self) -> Self {
        match self {
            FormField::Products => FormField::StartDate,
            FormField::StartDate => FormField::EndDate,
            FormField::EndDate => FormField::Products,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            FormField::Products => FormField::EndDate,
            FormField::StartDate => FormField::Products,
            FormField::EndDate => FormField::StartDate,
        }
    }
}

/// Raw text of the query form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormState {
    pub products: String,
    pub start_date: String,
    pub end_date: String,
    pub focus: FormField,
}

impl FormState {
    /// Empty identifiers and the trailing date window ending on `today`.
    pub fn with_defaults(today: Date) -> Self {
        let (start, end) = default_date_range(today);
        Self {
            products: String::new(),
            start_date: format_date(start),
            end_date: format_date(end),
            focus: FormField::Products,
        }
    }

    pub fn focused_mut(&mut self) -> &mut String {
        match self.focus {
            FormField::Products => &mut self.products,
            FormField::StartDate => &mut self.start_date,
            FormField::EndDate => &mut self.end_date,
        }
    }

    pub fn push_char(&mut self, c: char) {
        self.focused_mut().push(c);
    }

    pub fn backspace(&mut self) {
        self.focused_mut().pop();
    }

    pub fn parse(&self) -> Result<QueryParams, QueryError> {
        QueryParams::parse(&self.products, &self.start_date, &self.end_date)
    }
}

pub struct UiState {
    pub tab: usize,
    pub today: Date,
    pub form: FormState,
    pub form_error: Option<String>,
    pub session: SessionSnapshot,
    pub rows: Vec<ResultRow>,
    pub summary: SalesSummary,
    pub last_params: Option<QueryParams>,
    pub show_results: bool,
    pub table_scroll: usize,
    pub info: String,
}

impl UiState {
    pub fn new(today: Date) -> Self {
        Self {
            tab: 0,
            today,
            form: FormState::with_defaults(today),
            form_error: None,
            session: idle_snapshot(),
            rows: Vec::new(),
            summary: SalesSummary::default(),
            last_params: None,
            show_results: false,
            table_scroll: 0,
            info: String::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.session.phase.is_active()
    }

    /// Validate the form for submission. On failure the message is kept for
    /// inline display and nothing should be sent.
    pub fn prepare_submit(&mut self) -> Option<QueryParams> {
        match self.form.parse() {
            Ok(params) => {
                self.form_error = None;
                self.reset_results();
                Some(params)
            }
            Err(e) => {
                self.form_error = Some(e.to_string());
                None
            }
        }
    }

    pub fn reset_results(&mut self) {
        self.rows.clear();
        self.summary = SalesSummary::default();
        self.last_params = None;
        self.show_results = false;
        self.table_scroll = 0;
    }

    /// Back to a fresh form and an empty result set.
    pub fn clear(&mut self) {
        self.form = FormState::with_defaults(self.today);
        self.form_error = None;
        self.session = idle_snapshot();
        self.reset_results();
        self.info = "Cleared".into();
    }

    pub fn scroll_down(&mut self, by: usize) {
        let max = self.rows.len().saturating_sub(1);
        self.table_scroll = (self.table_scroll + by).min(max);
    }

    pub fn scroll_up(&mut self, by: usize) {
        self.table_scroll = self.table_scroll.saturating_sub(by);
    }
}

fn idle_snapshot() -> SessionSnapshot {
    SessionSnapshot {
        phase: Phase::Idle,
        progress: 0,
        elapsed_secs: 0,
        estimated_secs: 0,
        total_products: 0,
        processed_products: 0,
        status: "Ready".into(),
    }
}
