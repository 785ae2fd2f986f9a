use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

use kartlink::{MAX_PLAYERS, SessionEvent, SessionPhase};

use crate::node::PeerView;

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

pub struct TuiState {
    logs: VecDeque<(LogLevel, String)>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            logs: VecDeque::with_capacity(MAX_LOG_LINES),
        }
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn log_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::IdCollision { .. } | SessionEvent::SendFailed { .. } => {
                self.log_warn(event.to_string())
            }
            _ => self.log_info(event.to_string()),
        }
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back((level, message));
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, view: &PeerView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(MAX_PLAYERS as u16 + 2),
            Constraint::Length(6),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], view);
    render_status(frame, chunks[1], view);
    render_players(frame, chunks[2], view);
    render_network(frame, chunks[3], view);
    render_log(frame, chunks[4], state);
    render_help(frame, chunks[5]);
}

fn phase_color(phase: SessionPhase) -> Color {
    match phase {
        SessionPhase::Discovery => Color::Gray,
        SessionPhase::LobbyWait => Color::Cyan,
        SessionPhase::Countdown => Color::Yellow,
        SessionPhase::RaceActive => Color::Green,
        SessionPhase::Teardown => Color::Red,
    }
}

fn render_header(frame: &mut Frame, area: Rect, view: &PeerView) {
    let title = format!(" kartlink peer {} ", view.local);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let mut spans = vec![
        Span::styled("Phase: ", Style::default().fg(Color::Gray)),
        Span::styled(
            format!("{:?}", view.phase),
            Style::default()
                .fg(phase_color(view.phase))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("  |  Tick: {}", view.tick)),
    ];
    if let Some(seconds) = view.countdown_seconds {
        spans.push(Span::styled(
            format!("  |  Starting in {}", seconds),
            Style::default().fg(Color::Yellow),
        ));
    }
    if view.phase == SessionPhase::RaceActive {
        spans.push(Span::raw(format!(
            "  |  Lap {}  |  Items spawned: {}",
            view.lap, view.items_spawned
        )));
    }

    let paragraph = Paragraph::new(Line::from(spans)).block(block);
    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, view: &PeerView) {
    let block = Block::default()
        .title(" Ready ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let connected = view.players.iter().filter(|p| p.connected).count();
    let ready = view.players.iter().filter(|p| p.connected && p.ready).count();
    let ratio = if connected == 0 {
        0.0
    } else {
        ready as f64 / connected as f64
    };

    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} ready", ready, connected));

    frame.render_widget(gauge, area);
}

fn render_players(frame: &mut Frame, area: Rect, view: &PeerView) {
    let block = Block::default()
        .title(" Players ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let lines: Vec<Line> = view
        .players
        .iter()
        .map(|record| {
            let (status, color) = match (record.connected, record.ready) {
                (false, _) => ("gone", Color::DarkGray),
                (true, true) => ("ready", Color::Green),
                (true, false) => ("waiting", Color::White),
            };
            let marker = if record.id == view.local { "*" } else { " " };
            let awaiting = view.diagnostics.window_occupancy[record.id.index()];
            Line::from(vec![
                Span::raw(format!("{}{} ", marker, record.id)),
                Span::styled(format!("{:<8}", status), Style::default().fg(color)),
                Span::styled(
                    format!("{:<22} seen@{:<8} unacked {}", record.addr, record.last_seen, awaiting),
                    Style::default().fg(Color::Gray),
                ),
            ])
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_network(frame: &mut Frame, area: Rect, view: &PeerView) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let d = &view.diagnostics;
    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Gray));
    let lines = vec![
        Line::from(vec![
            label("Sends: "),
            Span::raw(format!(
                "{} ok / {} failed / {} dropped",
                d.transport.sends_ok, d.transport.sends_failed, d.transport.sends_dropped
            )),
        ]),
        Line::from(vec![
            label("Receives: "),
            Span::raw(format!(
                "{} ok / {} own filtered / {} malformed",
                d.transport.receives_ok, d.transport.receives_filtered, d.malformed
            )),
        ]),
        Line::from(vec![
            label("Reliable: "),
            Span::raw(format!(
                "{} sent / {} retransmitted / {} duplicates",
                d.reliable.sent, d.reliable.retransmitted, d.reliable.duplicates
            )),
        ]),
        Line::from(vec![
            label("Race: "),
            Span::raw(format!(
                "{} states out / {} in / {} items in",
                d.race.sent, d.race.received, d.items.received
            )),
            Span::styled(
                format!("  collisions {}", d.collisions),
                Style::default().fg(if d.collisions > 0 {
                    Color::Red
                } else {
                    Color::Gray
                }),
            ),
        ]),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .logs
        .iter()
        .skip(state.logs.len().saturating_sub(visible))
        .map(|(level, message)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::styled(message.as_str(), Style::default().fg(color))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("'r' toggle ready  |  'q' or ESC leave")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}
