use std::io::Write;

use owo_colors::OwoColorize;
use sutta_core::{BatchSummary, Translation};

/// Terminal printer that honors `--no-color`.
pub struct Output {
    color: bool,
}

impl Output {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn heading(&self, text: &str) {
        if self.color {
            println!("{}", text.bold());
        } else {
            println!("{text}");
        }
    }

    pub fn note(&self, text: &str) {
        if self.color {
            println!("{}", text.dimmed());
        } else {
            println!("{text}");
        }
    }

    pub fn warn(&self, text: &str) {
        if self.color {
            eprintln!("{}", text.yellow());
        } else {
            eprintln!("{text}");
        }
    }

    pub fn error(&self, text: &str) {
        if self.color {
            eprintln!("{}", text.red().bold());
        } else {
            eprintln!("{text}");
        }
    }

    pub fn summary(&self, summary: &BatchSummary) {
        let text = summary.to_string();
        if !self.color {
            println!("{text}");
        } else if summary.cancelled {
            println!("{}", text.yellow().bold());
        } else if summary.failed > 0 {
            println!("{}", text.red().bold());
        } else {
            println!("{}", text.green().bold());
        }
    }

    /// Print the new tail of a growing token stream.
    pub fn stream_delta(&self, accumulated: &str, printed: &mut usize) {
        let Some(delta) = accumulated.get(*printed..) else {
            return;
        };
        print!("{delta}");
        let _ = std::io::stdout().flush();
        *printed = accumulated.len();
    }

    pub fn translation(&self, translation: &Translation) {
        for sentence in &translation.sentences {
            if self.color {
                println!("  {}", sentence.original.dimmed());
                println!("  {}", sentence.translation.green());
            } else {
                println!("  {}", sentence.original);
                println!("  {}", sentence.translation);
            }
            if let Some(notes) = sentence.notes.as_deref().filter(|n| !n.is_empty()) {
                println!("    [{notes}]");
            }
        }
        if let Some(summary) = translation.summary.as_deref().filter(|s| !s.is_empty()) {
            println!();
            self.note(summary);
        }
    }
}
