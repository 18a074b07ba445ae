use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, TableState};
use ratatui::Frame;

use crate::app::App;
use crate::view::{spinner_char, truncate};

/// Render the segment table with the batch bar underneath.
pub fn render(f: &mut Frame, app: &App) {
    let area = f.area();
    let busy = app.state.batch_phase().is_busy();

    let chunks = Layout::vertical([
        Constraint::Length(1),                        // header
        Constraint::Min(5),                           // table
        Constraint::Length(if busy { 1 } else { 0 }), // batch gauge
        Constraint::Length(1),                        // status line
        Constraint::Length(1),                        // footer
    ])
    .split(area);

    render_header(f, chunks[0], app);
    render_table(f, chunks[1], app);
    if busy {
        render_gauge(f, chunks[2], app);
    }
    render_status(f, chunks[3], app);
    render_footer(f, chunks[4], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.theme;
    let title = app
        .state
        .title()
        .or(app.state.document_id())
        .unwrap_or("no document");
    let header = Paragraph::new(Line::from(vec![
        Span::styled(" SUTTA STUDIO ", theme.header_style()),
        Span::styled(
            format!(" {title}"),
            Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
        ),
    ]));
    f.render_widget(header, area);
}

fn render_table(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.theme;
    let header = Row::new(["", "#", "Status", "Text"].iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(theme.text).add_modifier(Modifier::BOLD))
    }))
    .height(1);

    let text_width = (area.width as usize).saturating_sub(26);
    let rows: Vec<Row> = app
        .state
        .segments()
        .iter()
        .map(|segment| {
            let status = app.status_of(segment);
            let mark = if app.state.is_selected(segment.id) {
                Cell::from("●").style(Style::default().fg(theme.selected))
            } else {
                Cell::from(" ")
            };
            let label = if status.is_active() {
                format!("{} {}", spinner_char(app.tick), status.label())
            } else {
                status.label().to_string()
            };
            let text = match &segment.translation {
                Some(translation) if !translation.plain_text().is_empty() => {
                    translation.plain_text()
                }
                _ => segment.text.clone(),
            };
            Row::new(vec![
                mark,
                Cell::from(segment.id.to_string()),
                Cell::from(label).style(theme.status_style(status)),
                Cell::from(truncate(&text, text_width)),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(2),
        Constraint::Length(5),
        Constraint::Length(16),
        Constraint::Min(10),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(theme.border_style())
                .title(format!(
                    " Selected {}/{} ",
                    app.state.selection().len(),
                    app.max_selection()
                )),
        )
        .row_highlight_style(theme.highlight_style());

    let mut state = TableState::default();
    state.select(Some(app.cursor));
    f.render_stateful_widget(table, area, &mut state);
}

fn render_gauge(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.theme;
    let progress = app.state.batch_progress();
    let ratio = if progress.total == 0 {
        0.0
    } else {
        (progress.completed as f64 / progress.total as f64).clamp(0.0, 1.0)
    };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(theme.phase_color(app.state.batch_phase())))
        .ratio(ratio)
        .label(format!(
            "{} {}/{} ({} ok, {} failed)",
            app.state.batch_phase().label(),
            progress.completed,
            progress.total,
            progress.succeeded,
            progress.failed
        ));
    f.render_widget(gauge, area);
}

fn render_status(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.theme;
    let line = match app.message() {
        Some(message) => Line::from(Span::styled(
            format!(" {message}"),
            Style::default().fg(theme.active),
        )),
        None => Line::from(""),
    };
    f.render_widget(Paragraph::new(line), area);
}

fn render_footer(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.theme;
    let total = app.state.segments().len();
    let done = app.state.translated_count();

    let footer = Line::from(vec![
        Span::styled(
            format!(" {done}/{total} translated "),
            Style::default().fg(theme.text),
        ),
        Span::styled(
            " | space:select  t:batch  T:single  x:cancel  Enter:open  ?:help  q:quit",
            theme.footer_style(),
        ),
    ]);

    f.render_widget(Paragraph::new(footer), area);
}
