use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

use anyhow::Result;
use camwatch_types::events::{EventPayload, ViewerEvent};
use crossterm::{
    event::{self, Event as CEvent, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Terminal,
};
use tokio::sync::mpsc::UnboundedSender;

const MAX_LOG_ENTRIES: usize = 120;

pub enum UiMessage {
    Status(String),
    Event(ViewerEvent),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    Pause,
    Resume,
    Refresh,
    Quit,
}

pub fn run(
    receiver: Receiver<UiMessage>,
    actions: UnboundedSender<UiAction>,
    summary: String,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(&mut terminal, receiver, &actions, summary.as_str());
    let _ = actions.send(UiAction::Quit);

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    res
}

fn key_action(code: KeyCode) -> Option<UiAction> {
    match code {
        KeyCode::Char('p') => Some(UiAction::Pause),
        KeyCode::Char(' ') | KeyCode::Char('l') => Some(UiAction::Resume),
        KeyCode::Char('r') => Some(UiAction::Refresh),
        KeyCode::Char('q') | KeyCode::Esc => Some(UiAction::Quit),
        _ => None,
    }
}

fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    actions: &UnboundedSender<UiAction>,
    summary: &str,
) -> Result<()> {
    let mut logs: VecDeque<String> = VecDeque::with_capacity(MAX_LOG_ENTRIES);
    let mut last_status = String::from("Loading...");

    loop {
        loop {
            match receiver.try_recv() {
                Ok(UiMessage::Status(status)) => last_status = status,
                Ok(UiMessage::Event(event)) => {
                    if logs.len() == MAX_LOG_ENTRIES {
                        logs.pop_front();
                    }
                    logs.push_back(format_event(&event));
                }
                Ok(UiMessage::Shutdown) | Err(TryRecvError::Disconnected) => return Ok(()),
                Err(TryRecvError::Empty) => break,
            }
        }

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
                .split(f.size());

            let status_style = if last_status.starts_with("Error") {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            let header = Paragraph::new(Line::from(vec![
                Span::styled(
                    "camwatch",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw("  "),
                Span::styled(last_status.clone(), status_style),
                Span::raw("  "),
                Span::styled(summary, Style::default().fg(Color::Magenta)),
                Span::raw("  "),
                Span::styled("p", Style::default().fg(Color::Yellow)),
                Span::raw(" pause "),
                Span::styled("space", Style::default().fg(Color::Yellow)),
                Span::raw(" resume "),
                Span::styled("r", Style::default().fg(Color::Yellow)),
                Span::raw(" retry "),
                Span::styled("q", Style::default().fg(Color::Yellow)),
                Span::raw(" quit"),
            ]))
            .block(Block::default().borders(Borders::ALL).title("Viewer"));
            f.render_widget(header, chunks[0]);

            let items: Vec<ListItem> = logs
                .iter()
                .rev()
                .map(|entry| ListItem::new(entry.clone()))
                .collect();

            let list = List::new(items)
                .block(Block::default().borders(Borders::ALL).title("Recent events"))
                .highlight_style(Style::default().fg(Color::Yellow));

            f.render_widget(list, chunks[1]);
        })?;

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                match key_action(key.code) {
                    Some(UiAction::Quit) => break,
                    Some(action) => {
                        if actions.send(action).is_err() {
                            break;
                        }
                    }
                    None => {}
                }
            }
        }
    }

    Ok(())
}

pub fn format_event(event: &ViewerEvent) -> String {
    let timestamp = event.timestamp.format("%H:%M:%S%.3f");
    match &event.payload {
        EventPayload::Mounted { url } => format!("[{}] Mounted {} ({})", timestamp, event.camera, url),
        EventPayload::StateChanged { from, to } => format!(
            "[{}] {} -> {}",
            timestamp,
            from.label(),
            to.label()
        ),
        EventPayload::FramePresented {
            token,
            width,
            height,
        } => format!("[{}] First frame {} ({}x{})", timestamp, token, width, height),
        EventPayload::LoadFailed {
            token,
            consecutive,
            message,
        } => format!(
            "[{}] Load {} failed ({} in a row): {}",
            timestamp, token, consecutive, message
        ),
        EventPayload::Paused { origin } => format!("[{}] Paused, frozen from {:?}", timestamp, origin),
        EventPayload::Resumed { token } => format!("[{}] Resumed at {}", timestamp, token),
        EventPayload::Refreshed => format!("[{}] Refreshed", timestamp),
        EventPayload::SourceChanged { url, status } => {
            format!("[{}] Source {} [{}]", timestamp, url, status)
        }
        EventPayload::Unmounted { metrics } => format!(
            "[{}] Unmounted after {} requests, {} frames",
            timestamp, metrics.requests_issued, metrics.frames_presented
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_viewer_actions() {
        assert_eq!(key_action(KeyCode::Char('p')), Some(UiAction::Pause));
        assert_eq!(key_action(KeyCode::Char(' ')), Some(UiAction::Resume));
        assert_eq!(key_action(KeyCode::Char('r')), Some(UiAction::Refresh));
        assert_eq!(key_action(KeyCode::Esc), Some(UiAction::Quit));
        assert_eq!(key_action(KeyCode::Char('x')), None);
    }

    #[test]
    fn failure_lines_carry_the_count() {
        let event = ViewerEvent::new(
            "cam-1",
            EventPayload::LoadFailed {
                token: camwatch_types::playback::RequestToken(42),
                consecutive: 2,
                message: "timeout".into(),
            },
        );
        let line = format_event(&event);
        assert!(line.contains("Load 42 failed (2 in a row): timeout"));
    }
}
