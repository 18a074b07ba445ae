use ratatui::style::{Color, Modifier, Style};

use sutta_core::BatchPhase;

use crate::model::SegmentStatus;

/// Color theme for the TUI.
pub struct Theme {
    pub translated: Color,
    pub failed: Color,
    pub pending: Color,
    pub selected: Color,

    pub header_fg: Color,
    pub header_bg: Color,
    pub border: Color,
    pub text: Color,
    pub dim: Color,
    pub highlight_bg: Color,
    pub active: Color,
    pub spinner: Color,
    pub footer_fg: Color,
    pub footer_bg: Color,
}

impl Theme {
    /// Saffron on dark, for long reading sessions.
    pub fn saffron() -> Self {
        Self {
            translated: Color::Green,
            failed: Color::Red,
            pending: Color::DarkGray,
            selected: Color::Yellow,

            header_fg: Color::Black,
            header_bg: Color::Rgb(230, 150, 40),
            border: Color::DarkGray,
            text: Color::White,
            dim: Color::DarkGray,
            highlight_bg: Color::Rgb(50, 40, 20),
            active: Color::Cyan,
            spinner: Color::Cyan,
            footer_fg: Color::DarkGray,
            footer_bg: Color::Reset,
        }
    }

    pub fn status_style(&self, status: SegmentStatus) -> Style {
        match status {
            SegmentStatus::Pending => Style::default().fg(self.pending),
            SegmentStatus::Translating => {
                Style::default().fg(self.spinner).add_modifier(Modifier::BOLD)
            }
            SegmentStatus::Translated => Style::default().fg(self.translated),
            SegmentStatus::Failed => Style::default().fg(self.failed),
        }
    }

    pub fn phase_color(&self, phase: BatchPhase) -> Color {
        match phase {
            BatchPhase::Idle => self.dim,
            BatchPhase::Running => self.active,
            BatchPhase::Cancelling => self.selected,
            BatchPhase::Settled => self.translated,
        }
    }

    pub fn header_style(&self) -> Style {
        Style::default().fg(self.header_fg).bg(self.header_bg).add_modifier(Modifier::BOLD)
    }

    pub fn highlight_style(&self) -> Style {
        Style::default().bg(self.highlight_bg).add_modifier(Modifier::BOLD)
    }

    pub fn border_style(&self) -> Style {
        Style::default().fg(self.border)
    }

    pub fn footer_style(&self) -> Style {
        Style::default().fg(self.footer_fg).bg(self.footer_bg)
    }
}
