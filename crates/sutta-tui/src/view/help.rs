use ratatui::layout::{Constraint, Flex, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use ratatui::Frame;

use crate::app::App;
use crate::model::SegmentStatus;

/// Key bindings, grouped by what they act on.
const BINDINGS: &[(&str, &[(&str, &str)])] = &[
    (
        "Segments",
        &[
            ("j k ↑ ↓", "move"),
            ("PgUp PgDn", "page"),
            ("g G", "first / last"),
            ("Enter", "source and translation"),
            ("Esc", "back"),
        ],
    ),
    (
        "Translate",
        &[
            ("Space", "select for the batch"),
            ("c", "clear selection"),
            ("t", "translate selection"),
            ("T", "stream this segment"),
            ("x", "cancel"),
        ],
    ),
    ("", &[("?", "close help"), ("q Ctrl+c", "quit")]),
];

const LEGEND: [(SegmentStatus, &str); 4] = [
    (SegmentStatus::Pending, "untranslated"),
    (SegmentStatus::Translating, "in flight"),
    (SegmentStatus::Translated, "translated"),
    (SegmentStatus::Failed, "last attempt failed"),
];

/// Key bindings, a status legend and the selection rules, as a popup.
pub fn render(f: &mut Frame, app: &App) {
    let theme = &app.theme;
    let key_rows: usize = BINDINGS.iter().map(|(_, keys)| keys.len() + 1).sum();
    let popup = centered_rect(56, key_rows as u16 + 7, f.area());
    f.render_widget(Clear, popup);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.active))
        .title(" Help ");
    let inner = block.inner(popup);
    f.render_widget(block, popup);

    let [keys_area, legend_area, rules_area] = Layout::vertical([
        Constraint::Length(key_rows as u16),
        Constraint::Length(2),
        Constraint::Min(2),
    ])
    .areas(inner);

    let mut rows = Vec::with_capacity(key_rows);
    for (group, keys) in BINDINGS {
        rows.push(Row::new([Cell::from(*group).style(
            Style::default().fg(theme.active).add_modifier(Modifier::BOLD),
        )]));
        rows.extend(keys.iter().map(|(key, what)| {
            Row::new([
                Cell::from(format!("  {key}")).style(Style::default().fg(theme.text)),
                Cell::from(*what).style(Style::default().fg(theme.dim)),
            ])
        }));
    }
    let table = Table::new(rows, [Constraint::Length(14), Constraint::Min(10)]);
    f.render_widget(table, keys_area);

    let mut legend = vec![Span::raw(" ")];
    for (status, name) in LEGEND {
        legend.push(Span::styled(name, theme.status_style(status)));
        legend.push(Span::raw("  "));
    }
    f.render_widget(
        Paragraph::new(vec![Line::from(""), Line::from(legend)]),
        legend_area,
    );

    let trigger = if app.state.batch_phase().is_busy() {
        "A batch is running; t is disabled until it settles."
    } else {
        "Translated segments are skipped by t."
    };
    let rules = vec![
        Line::from(Span::styled(
            format!(" Up to {} segments per batch.", app.max_selection()),
            Style::default().fg(theme.dim),
        )),
        Line::from(Span::styled(
            format!(" {trigger}"),
            Style::default().fg(theme.dim),
        )),
    ];
    f.render_widget(Paragraph::new(rules), rules_area);
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let [row] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    let [rect] = Layout::horizontal([Constraint::Length(width)])
        .flex(Flex::Center)
        .areas(row);
    rect
}
