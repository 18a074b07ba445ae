use std::collections::BTreeSet;
use std::sync::Arc;

use sutta_core::{
    BatchOutcome, Segment, SegmentId, SegmentOutcome, StoreState, TranslateEvent,
    TranslationStore,
};

use crate::action::Action;
use crate::model::SegmentStatus;
use crate::theme::Theme;
use crate::tui_event::BackendEvent;

/// Which screen is currently displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Segments,
    Detail(SegmentId),
}

/// Work the main loop hands to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RunBatch(Vec<SegmentId>),
    Cancel,
    TranslateSingle(SegmentId),
}

/// Main application state.
pub struct App {
    pub screen: Screen,
    store: Arc<TranslationStore>,
    /// Latest store snapshot; refreshed whenever the store changes.
    pub state: StoreState,
    pub cursor: usize,
    pub tick: usize,
    pub theme: Theme,
    pub should_quit: bool,
    pub show_help: bool,
    pub detail_scroll: u16,
    /// Height of the visible table area (set on resize, used for page up/down).
    pub visible_rows: usize,
    /// Segment of the single-segment translation in flight.
    pub single: Option<SegmentId>,
    pub failed: BTreeSet<SegmentId>,
    /// Local message; shadows the store notice until the next store change.
    pub status: Option<String>,
}

impl App {
    pub fn new(store: Arc<TranslationStore>) -> Self {
        let state = store.snapshot();
        Self {
            screen: Screen::Segments,
            store,
            state,
            cursor: 0,
            tick: 0,
            theme: Theme::saffron(),
            should_quit: false,
            show_help: false,
            detail_scroll: 0,
            visible_rows: 20,
            single: None,
            failed: BTreeSet::new(),
            status: None,
        }
    }

    /// Pull a fresh snapshot from the store.
    pub fn refresh(&mut self) {
        let state = self.store.snapshot();
        if state.notice() != self.state.notice() {
            self.status = None;
        }
        self.state = state;
        let max = self.state.segments().len().saturating_sub(1);
        self.cursor = self.cursor.min(max);
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        self.state.segments().get(self.cursor)
    }

    pub fn status_of(&self, segment: &Segment) -> SegmentStatus {
        SegmentStatus::of(&self.state, segment, self.failed.contains(&segment.id))
    }

    pub fn max_selection(&self) -> usize {
        self.store.max_selection()
    }

    /// The message for the status line: local status first, then the store notice.
    pub fn message(&self) -> Option<&str> {
        self.status.as_deref().or(self.state.notice())
    }

    /// Process a user action and update state. Returns work for the backend.
    pub fn update(&mut self, action: Action) -> Option<Command> {
        // When help overlay is shown, only allow a few actions through
        if self.show_help {
            match action {
                Action::Quit => self.should_quit = true,
                Action::ToggleHelp | Action::NavigateBack => self.show_help = false,
                Action::Tick => self.tick = self.tick.wrapping_add(1),
                Action::Resize(_w, h) => self.visible_rows = (h as usize).saturating_sub(6),
                _ => {} // swallow everything else
            }
            return None;
        }

        let len = self.state.segments().len();
        match action {
            Action::Quit => self.should_quit = true,
            Action::ToggleHelp => self.show_help = true,
            Action::NavigateBack => self.screen = Screen::Segments,
            Action::DrillIn => {
                let target = match (&self.screen, self.current_segment()) {
                    (Screen::Segments, Some(segment)) => Some(segment.id),
                    _ => None,
                };
                if let Some(id) = target {
                    self.screen = Screen::Detail(id);
                    self.detail_scroll = 0;
                }
            }
            Action::MoveDown => match self.screen {
                Screen::Segments => {
                    if self.cursor + 1 < len {
                        self.cursor += 1;
                    }
                }
                Screen::Detail(_) => self.detail_scroll = self.detail_scroll.saturating_add(1),
            },
            Action::MoveUp => match self.screen {
                Screen::Segments => self.cursor = self.cursor.saturating_sub(1),
                Screen::Detail(_) => self.detail_scroll = self.detail_scroll.saturating_sub(1),
            },
            Action::PageDown => {
                let page = self.visible_rows.max(1);
                match self.screen {
                    Screen::Segments => {
                        self.cursor = (self.cursor + page).min(len.saturating_sub(1));
                    }
                    Screen::Detail(_) => {
                        self.detail_scroll = self.detail_scroll.saturating_add(page as u16);
                    }
                }
            }
            Action::PageUp => {
                let page = self.visible_rows.max(1);
                match self.screen {
                    Screen::Segments => self.cursor = self.cursor.saturating_sub(page),
                    Screen::Detail(_) => {
                        self.detail_scroll = self.detail_scroll.saturating_sub(page as u16);
                    }
                }
            }
            Action::GoTop => match self.screen {
                Screen::Segments => self.cursor = 0,
                Screen::Detail(_) => self.detail_scroll = 0,
            },
            Action::GoBottom => match self.screen {
                Screen::Segments => self.cursor = len.saturating_sub(1),
                Screen::Detail(_) => self.detail_scroll = u16::MAX, // clamped by Paragraph rendering
            },
            Action::ToggleSelect => self.toggle_selection(),
            Action::ClearSelection => {
                self.store.clear_selection();
                self.refresh();
            }
            Action::RunBatch => return self.run_batch(),
            Action::CancelBatch => {
                if self.state.batch_phase().is_busy() || self.single.is_some() {
                    return Some(Command::Cancel);
                }
            }
            Action::TranslateSingle => return self.translate_single(),
            Action::Tick => self.tick = self.tick.wrapping_add(1),
            Action::Resize(_w, h) => {
                // Rough estimate: total height minus header/footer/borders
                self.visible_rows = (h as usize).saturating_sub(6);
            }
            Action::None => {}
        }
        None
    }

    fn toggle_selection(&mut self) {
        let id = match (&self.screen, self.current_segment()) {
            (Screen::Segments, Some(segment)) => segment.id,
            _ => return,
        };
        let was_selected = self.state.is_selected(id);
        let selected = self.store.toggle_selection(id);
        self.refresh();
        if !was_selected && !selected {
            self.status = Some(format!(
                "Selection is limited to {} segments",
                self.store.max_selection()
            ));
        }
    }

    fn run_batch(&mut self) -> Option<Command> {
        if self.state.batch_phase().is_busy() {
            self.status = Some("A batch is already running".to_string());
            return None;
        }
        let selection: Vec<SegmentId> = self.state.selection().iter().copied().collect();
        if selection.is_empty() {
            self.status = Some("Select segments with space first".to_string());
            return None;
        }
        Some(Command::RunBatch(selection))
    }

    fn translate_single(&mut self) -> Option<Command> {
        let id = match &self.screen {
            Screen::Detail(id) => *id,
            Screen::Segments => self.current_segment()?.id,
        };
        if self.single.is_some() || self.state.is_translating(id) {
            self.status = Some(format!("Segment {id} is already being translated"));
            return None;
        }
        self.single = Some(id);
        self.failed.remove(&id);
        self.status = None;
        Some(Command::TranslateSingle(id))
    }

    /// Process a backend event and update local state.
    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Segment { id, event } => {
                if let TranslateEvent::Error(message) = event {
                    self.status = Some(format!("Segment {id}: {message}"));
                }
            }
            BackendEvent::SegmentFinished { id, outcome } => {
                if self.single == Some(id) {
                    self.single = None;
                }
                match outcome {
                    SegmentOutcome::Translated => {
                        self.failed.remove(&id);
                    }
                    SegmentOutcome::Failed(message) => {
                        self.failed.insert(id);
                        self.status = Some(format!("Segment {id}: {message}"));
                    }
                    SegmentOutcome::Cancelled => {
                        self.status = Some(format!("Segment {id}: cancelled"));
                    }
                    SegmentOutcome::NoResult => {
                        self.status = Some(format!("Segment {id}: no translation returned"));
                    }
                }
            }
            BackendEvent::BatchFinished(outcome) => match outcome {
                BatchOutcome::Skipped => {
                    self.status = Some("Nothing to translate".to_string());
                }
                BatchOutcome::Rejected => {
                    self.status = Some("A batch is already running".to_string());
                }
                // The summary arrives as the store notice
                BatchOutcome::Settled(_) => self.status = None,
            },
        }
    }

    /// Render the current screen.
    pub fn view(&self, f: &mut ratatui::Frame) {
        match &self.screen {
            Screen::Segments => crate::view::segments::render(f, self),
            Screen::Detail(id) => crate::view::detail::render(f, self, *id),
        }

        if self.show_help {
            crate::view::help::render(f, self);
        }
    }
}
