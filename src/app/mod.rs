use std::io::Stdout;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{Clear as TermClear, ClearType};
use ratatui::backend::CrosstermBackend;
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Paragraph, Widget, Wrap};
use ratatui::Terminal;
use tracing::{debug, info, warn};

use crate::api::{
    CompletionClient, CompletionRequest, Tone, ToneSet, GENERIC_ERROR, MAX_PROMPT_CHARS,
};
use crate::clipboard::Clipboard;
use crate::config::{GenerationSettings, Knob};
use crate::pipeline::CompletionCard;
use crate::session::{CompletionSession, GenerationReport};
use crate::store::{Confirmation, PersistOutcome, HISTORY_DISPLAY_LIMIT};

const APP_NAME: &str = "adgenius";
const SPINNER_FRAMES: [&str; 8] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧"];
const CARD_DIVIDER: &str = "│ ";

mod input;
mod render;
mod runtime;
mod types;
mod ui;
mod worker;

pub(crate) use runtime::run_app;
use types::{default_palette, Mode, RequestId, ThemePalette, TranscriptEntry, WorkerEvent};

pub(crate) struct App {
    session: CompletionSession,
    client: Arc<CompletionClient>,
    clipboard: Box<dyn Clipboard>,
    theme: ThemePalette,

    settings: GenerationSettings,
    tones: ToneSet,
    knob: Knob,
    mode: Mode,

    input: String,
    cursor: usize,

    entries: Vec<TranscriptEntry>,
    /// Entries already written above the viewport.
    flushed_entries: usize,
    cards: Vec<CompletionCard>,
    selected_card: usize,
    error: Option<String>,
    last_summary: Option<String>,

    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    in_flight: Option<RequestId>,
    last_request_id: RequestId,
    run_started_at: Option<Instant>,
    spinner_idx: usize,

    should_quit: bool,
    last_status: String,
    /// Set after clearing history so the run loop wipes the scrollback too.
    needs_screen_clear: bool,
}

impl App {
    pub(crate) fn new(
        session: CompletionSession,
        client: CompletionClient,
        clipboard: Box<dyn Clipboard>,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut app = Self {
            session,
            client: Arc::new(client),
            clipboard,
            theme: default_palette(),
            settings: GenerationSettings::default(),
            tones: ToneSet::default(),
            knob: Knob::Temperature,
            mode: Mode::Normal,
            input: String::new(),
            cursor: 0,
            entries: Vec::new(),
            flushed_entries: 0,
            cards: Vec::new(),
            selected_card: 0,
            error: None,
            last_summary: None,
            events_tx,
            events_rx,
            in_flight: None,
            last_request_id: RequestId::default(),
            run_started_at: None,
            spinner_idx: 0,
            should_quit: false,
            last_status: "ready".to_string(),
            needs_screen_clear: false,
        };
        app.push_startup_banner();
        app.show_history();
        app
    }

    fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    fn theme_palette(&self) -> ThemePalette {
        self.theme
    }

    fn push_entry(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    fn push_system(&mut self, text: impl Into<String>) {
        self.push_entry(TranscriptEntry::System(text.into()));
    }

    fn push_startup_banner(&mut self) {
        let endpoint = self.client.endpoint().to_string();
        let plain = self.session.pipeline().is_plain();
        self.push_entry(TranscriptEntry::Banner { endpoint, plain });
    }

    /// Shows the newest saved results and makes them the copy targets.
    pub(super) fn show_history(&mut self) {
        let cards = self.session.history_cards();
        if cards.is_empty() {
            self.push_system("no saved results yet");
            self.cards.clear();
            self.selected_card = 0;
            return;
        }
        let total = self.session.history().len();
        self.push_entry(TranscriptEntry::Heading(format!(
            "recent results ({} of {})",
            cards.len(),
            total
        )));
        self.show_cards(cards);
    }

    fn show_report(&mut self, report: GenerationReport) {
        match report.persisted {
            PersistOutcome::Saved => {}
            PersistOutcome::Truncated { kept } => {
                self.push_system(format!("storage full: kept the {kept} newest results"))
            }
            PersistOutcome::Reset => self.push_system("storage full: saved history was reset"),
        }
        let summary = report.summary_line();
        self.push_entry(TranscriptEntry::Heading("results".to_string()));
        self.show_cards(report.cards);
        self.push_entry(TranscriptEntry::Summary(summary.clone()));
        self.last_summary = Some(summary);
        self.push_system(self.history_count_line());
    }

    fn history_count_line(&self) -> String {
        let total = self.session.history().len();
        let shown = total.min(HISTORY_DISPLAY_LIMIT);
        format!("history: {total} saved, newest {shown} listed with Ctrl+R")
    }

    fn show_cards(&mut self, cards: Vec<CompletionCard>) {
        for (idx, card) in cards.iter().enumerate() {
            self.push_entry(TranscriptEntry::Card {
                number: idx + 1,
                body: card.body.clone(),
            });
        }
        self.cards = cards;
        self.selected_card = 0;
    }

    fn select_card(&mut self, forward: bool) {
        if self.cards.is_empty() {
            return;
        }
        let len = self.cards.len();
        self.selected_card = if forward {
            (self.selected_card + 1) % len
        } else {
            (self.selected_card + len - 1) % len
        };
    }

    fn copy_selected_card(&mut self) {
        let now = Instant::now();
        let Some(card) = self.cards.get_mut(self.selected_card) else {
            self.last_status = "nothing to copy".to_string();
            return;
        };
        match card.copy_original(self.clipboard.as_mut(), now) {
            Ok(()) => {
                self.last_status = format!("copied result #{}", self.selected_card + 1);
            }
            Err(err) => {
                warn!(%err, "copy failed");
                self.last_status = "copy failed".to_string();
            }
        }
    }

    fn copy_confirming(&self, now: Instant) -> bool {
        self.cards.iter().any(|card| card.copy.is_confirming(now))
    }

    fn resolve_clear(&mut self, confirmation: Confirmation) {
        self.mode = Mode::Normal;
        if !self.session.clear_history(confirmation) {
            self.last_status = "history kept".to_string();
            return;
        }
        self.cards.clear();
        self.selected_card = 0;
        self.last_summary = None;
        self.entries.clear();
        self.flushed_entries = 0;
        self.needs_screen_clear = true;
        self.push_startup_banner();
        self.push_system("history cleared");
        self.last_status = "ready".to_string();
    }
}
