//! Rendering functions for the viewer layout.
//!
//! The layout consists of four vertically stacked areas:
//!
//! 1. **Header** (1 line) -- worker phase, pending count and connection health.
//! 2. **Body** -- the timeline on the left and the log tail on the right.
//! 3. **Input** (3 lines) -- bordered text input field.
//! 4. **Footer** (1 line) -- last control feedback and key hints.

use std::rc::Rc;

use mailroom_store::{Direction as Flow, MessageKind, TimelineItem};
use mailroom_sync::{ControlFeedback, Health, SyncSource};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Position, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::TuiApp;

const KEY_HINTS: &str =
    " ^R retrigger  ^T test  ^S stop  ^L clear log  ^E follow  Esc quit ";

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

struct Areas {
    header: Rect,
    timeline: Rect,
    log: Rect,
    input: Rect,
    footer: Rect,
}

fn areas(area: Rect) -> Areas {
    let rows: Rc<[Rect]> = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(3),    // body
            Constraint::Length(3), // input
            Constraint::Length(1), // footer
        ])
        .split(area);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[1]);
    Areas {
        header: rows[0],
        timeline: body[0],
        log: body[1],
        input: rows[2],
        footer: rows[3],
    }
}

/// Number of log lines visible in a terminal of the given size.
pub fn log_height(area: Rect) -> usize {
    usize::from(areas(area).log.height.saturating_sub(2))
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Draw the entire frame.
pub fn draw<S: SyncSource>(frame: &mut Frame, app: &TuiApp<S>) {
    let areas = areas(frame.area());
    draw_header(frame, app, areas.header);
    draw_timeline(frame, app, areas.timeline);
    draw_log(frame, app, areas.log);
    draw_input(frame, app, areas.input);
    draw_footer(frame, app, areas.footer);
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn draw_header<S: SyncSource>(frame: &mut Frame, app: &TuiApp<S>, area: Rect) {
    let client = app.client();
    let mut spans = vec![Span::styled(
        " Mailroom ",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )];

    match client.status() {
        Some(status) => {
            let phase_style = match status.worker_phase.as_str() {
                "active" => Style::default().fg(Color::Yellow),
                "stale" => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                _ => Style::default().fg(Color::Green),
            };
            spans.push(Span::raw("| worker: "));
            spans.push(Span::styled(status.worker_phase.clone(), phase_style));
            if let Some(id) = status.working.message_id {
                spans.push(Span::raw(format!(" #{id}")));
            }
            if let Some(reason) = &status.stale {
                spans.push(Span::styled(
                    format!(" ({reason})"),
                    Style::default().fg(Color::Red),
                ));
            }
            spans.push(Span::raw(format!(" | pending: {} ", status.pending_count)));
            if status.executor_running {
                spans.push(Span::raw("| executor running "));
            }
        }
        None => spans.push(Span::raw("| connecting... ")),
    }

    if let Health::Degraded {
        consecutive_failures,
        last_error,
    } = client.health()
    {
        spans.push(Span::styled(
            format!("| offline x{consecutive_failures}: {last_error} "),
            Style::default().fg(Color::Red),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

fn item_lines(item: &TimelineItem) -> Vec<Line<'static>> {
    let (prefix, style) = match item.direction {
        Flow::In => (format!("[in #{}] ", item.id), Style::default().fg(Color::Cyan)),
        Flow::Out => (
            format!("[out #{}] ", item.id),
            Style::default().fg(Color::Green),
        ),
    };
    let marker = match item.processed {
        Some(true) => " ✓",
        Some(false) => " …",
        None => "",
    };
    let body = match item.kind {
        MessageKind::Text => item.display_text().to_owned(),
        kind => {
            let path = item.file_path.as_deref().unwrap_or_default();
            match item.caption.as_deref() {
                Some(caption) => format!("[{}] {path}  {caption}", kind.as_str()),
                None => format!("[{}] {path}", kind.as_str()),
            }
        }
    };

    let indent = " ".repeat(prefix.chars().count());
    let mut lines = Vec::new();
    for (i, text) in body.split('\n').enumerate() {
        let lead = if i == 0 {
            Span::styled(prefix.clone(), style.add_modifier(Modifier::BOLD))
        } else {
            Span::raw(indent.clone())
        };
        lines.push(Line::from(vec![lead, Span::styled(text.to_owned(), style)]));
    }
    if let Some(last) = lines.last_mut() {
        last.push_span(Span::styled(marker, Style::default().fg(Color::DarkGray)));
    }
    lines
}

fn draw_timeline<S: SyncSource>(frame: &mut Frame, app: &TuiApp<S>, area: Rect) {
    let mut lines: Vec<Line<'_>> = Vec::new();
    for item in app.client().timeline() {
        lines.extend(item_lines(item));
    }

    // Show the bottom by default, with the ability to scroll up.
    let total_lines = u16::try_from(lines.len()).unwrap_or(u16::MAX);
    let visible_height = area.height.saturating_sub(2);
    let max_scroll = total_lines.saturating_sub(visible_height);
    let effective_scroll = max_scroll.saturating_sub(app.chat_scroll());

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Timeline ")
        .border_style(Style::default().fg(Color::DarkGray));
    let widget = Paragraph::new(lines)
        .block(block)
        .scroll((effective_scroll, 0));
    frame.render_widget(widget, area);
}

// ---------------------------------------------------------------------------
// Log tail
// ---------------------------------------------------------------------------

fn draw_log<S: SyncSource>(frame: &mut Frame, app: &TuiApp<S>, area: Rect) {
    let client = app.client();
    let log = client.log().lines();
    let range = client.viewport().visible(log.len());
    let following = client.viewport().is_near_bottom(log.len());

    let lines: Vec<Line<'_>> = log[range.clone()]
        .iter()
        .map(|l| Line::from(l.as_str()))
        .collect();

    let title = if following || log.is_empty() {
        format!(" Log ({}) ", log.len())
    } else {
        format!(" Log ({}-{} of {}) ", range.start + 1, range.end, log.len())
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(Color::DarkGray));
    let widget = Paragraph::new(lines)
        .block(block)
        .style(Style::default().fg(Color::Gray));
    frame.render_widget(widget, area);
}

// ---------------------------------------------------------------------------
// Input and footer
// ---------------------------------------------------------------------------

fn draw_input<S: SyncSource>(frame: &mut Frame, app: &TuiApp<S>, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Message ")
        .border_style(Style::default().fg(Color::Cyan));
    let widget = Paragraph::new(app.input())
        .block(block)
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(Color::White));
    frame.render_widget(widget, area);

    // +1 for the border offset on each axis.
    let cursor = u16::try_from(app.cursor_pos()).unwrap_or(u16::MAX);
    let cursor_x = area.x.saturating_add(1).saturating_add(cursor);
    frame.set_cursor_position(Position::new(cursor_x, area.y + 1));
}

fn draw_footer<S: SyncSource>(frame: &mut Frame, app: &TuiApp<S>, area: Rect) {
    let feedback = match app.client().feedback() {
        Some(fb @ ControlFeedback::Done { .. }) => {
            Span::styled(format!(" {} ", fb.summary()), Style::default().fg(Color::Green))
        }
        Some(fb @ ControlFeedback::Fail { .. }) => {
            Span::styled(format!(" {} ", fb.summary()), Style::default().fg(Color::Red))
        }
        None => Span::raw(""),
    };
    let footer = Line::from(vec![
        feedback,
        Span::styled(KEY_HINTS, Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(footer), area);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
