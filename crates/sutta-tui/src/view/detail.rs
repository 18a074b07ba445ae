use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

use sutta_core::SegmentId;

use crate::app::App;
use crate::theme::Theme;
use crate::view::spinner_char;

/// Render one segment: source text, then its translation or the live preview.
pub fn render(f: &mut Frame, app: &App, id: SegmentId) {
    let theme = &app.theme;
    let area = f.area();

    let chunks = Layout::vertical([
        Constraint::Length(1), // breadcrumb
        Constraint::Min(5),   // scrollable content
        Constraint::Length(1), // footer
    ])
    .split(area);

    let doc_name = app
        .state
        .title()
        .or(app.state.document_id())
        .unwrap_or_default();
    let breadcrumb = Line::from(vec![
        Span::styled(" SUTTA STUDIO ", theme.header_style()),
        Span::styled(" > ", Style::default().fg(theme.dim)),
        Span::styled(
            doc_name,
            Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
        ),
        Span::styled(" > ", Style::default().fg(theme.dim)),
        Span::styled(format!("Segment {id}"), Style::default().fg(theme.text)),
    ]);
    f.render_widget(Paragraph::new(breadcrumb), chunks[0]);

    let mut lines: Vec<Line> = Vec::new();
    match app.state.segment(id) {
        None => lines.push(Line::from(Span::styled(
            "  Segment not found in this document",
            Style::default().fg(theme.failed),
        ))),
        Some(segment) => {
            section_header(&mut lines, "SOURCE", theme);
            lines.push(Line::from(format!("  {}", segment.text)));
            lines.push(Line::from(""));

            let status = app.status_of(segment);
            let preview = app
                .state
                .preview()
                .filter(|p| p.segment_id == id && !p.text.is_empty());

            if let Some(translation) = &segment.translation {
                section_header(&mut lines, "TRANSLATION", theme);
                for sentence in &translation.sentences {
                    lines.push(Line::from(Span::styled(
                        format!("  {}", sentence.original),
                        Style::default().fg(theme.dim),
                    )));
                    lines.push(Line::from(Span::styled(
                        format!("  {}", sentence.translation),
                        Style::default().fg(theme.translated),
                    )));
                    if let Some(notes) = sentence.notes.as_deref().filter(|n| !n.is_empty()) {
                        lines.push(Line::from(Span::styled(
                            format!("    {notes}"),
                            Style::default().fg(theme.dim).add_modifier(Modifier::ITALIC),
                        )));
                    }
                    lines.push(Line::from(""));
                }
                if let Some(summary) = translation.summary.as_deref().filter(|s| !s.is_empty()) {
                    section_header(&mut lines, "SUMMARY", theme);
                    lines.push(Line::from(format!("  {summary}")));
                }
            } else if let Some(preview) = preview {
                let title = if status.is_active() {
                    format!("STREAMING {}", spinner_char(app.tick))
                } else {
                    "STREAMED OUTPUT".to_string()
                };
                section_header(&mut lines, &title, theme);
                for text_line in preview.text.lines() {
                    lines.push(Line::from(format!("  {text_line}")));
                }
            } else {
                lines.push(Line::from(Span::styled(
                    format!("  {}", status.label()),
                    theme.status_style(status),
                )));
            }
        }
    }

    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(theme.border_style()),
        )
        .wrap(Wrap { trim: false })
        .scroll((app.detail_scroll, 0));
    f.render_widget(paragraph, chunks[1]);

    let footer = Line::from(Span::styled(
        " Esc:back  j/k:scroll  T:translate  x:cancel  ?:help  q:quit",
        theme.footer_style(),
    ));
    f.render_widget(Paragraph::new(footer), chunks[2]);
}

fn section_header(lines: &mut Vec<Line>, title: &str, theme: &Theme) {
    lines.push(Line::from(Span::styled(
        format!("  {title}"),
        Style::default()
            .fg(theme.active)
            .add_modifier(Modifier::BOLD),
    )));
}
