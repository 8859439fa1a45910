//! Live two-pane terminal view over the display buffers.
//!
//! Runs on its own thread so a blocked model call never freezes scrolling.
//! Redraws are driven by the buffer generation counter, so a burst of appends
//! between two polls costs a single frame.

use super::{Channel, Shared};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const PAGE: u16 = 10;

pub(crate) struct TerminalView {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TerminalView {
    pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(err);
        }
        let terminal = match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => terminal,
            Err(err) => {
                restore_terminal();
                return Err(err);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("mender-view".to_string())
            .spawn(move || run(terminal, shared, thread_stop))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        self.stop();
    }
}

fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen);
}

/// Scroll state for one pane. `None` follows the tail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PaneScroll {
    offset: Option<u16>,
}

impl PaneScroll {
    fn up(&mut self, by: u16, total: u16, height: u16) {
        let current = self.position(total, height);
        self.offset = Some(current.saturating_sub(by));
    }

    fn down(&mut self, by: u16, total: u16, height: u16) {
        let current = self.position(total, height);
        let next = current.saturating_add(by);
        self.offset = if next >= max_offset(total, height) {
            None
        } else {
            Some(next)
        };
    }

    pub(crate) fn position(&self, total: u16, height: u16) -> u16 {
        let max = max_offset(total, height);
        self.offset.map(|o| o.min(max)).unwrap_or(max)
    }
}

fn max_offset(total: u16, height: u16) -> u16 {
    total.saturating_sub(height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ViewState {
    focus: Channel,
    output: PaneScroll,
    reasoning: PaneScroll,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            focus: Channel::Output,
            output: PaneScroll::default(),
            reasoning: PaneScroll::default(),
        }
    }
}

impl ViewState {
    fn focused_mut(&mut self) -> &mut PaneScroll {
        match self.focus {
            Channel::Output => &mut self.output,
            Channel::Reasoning => &mut self.reasoning,
        }
    }
}

enum KeyAction {
    Redraw,
    Quit,
    Ignore,
}

fn run(mut terminal: Terminal<CrosstermBackend<Stdout>>, shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    let mut state = ViewState::default();
    let mut last_generation = None;
    let mut dirty = true;
    // Pane heights from the last frame, needed to turn key presses into offsets.
    let mut heights = (0u16, 0u16);

    while !stop.load(Ordering::SeqCst) {
        let generation = shared.generation();
        if dirty || last_generation != Some(generation) {
            let (output, reasoning) = shared.snapshot();
            let drawn = terminal.draw(|frame| {
                heights = render(frame, &output, &reasoning, &state);
            });
            if drawn.is_err() {
                break;
            }
            last_generation = Some(generation);
            dirty = false;
        }

        if !event::poll(POLL_INTERVAL).unwrap_or(false) {
            continue;
        }
        let Ok(Event::Key(key)) = event::read() else {
            continue;
        };
        let (output, reasoning) = shared.snapshot();
        let totals = (line_count(&output), line_count(&reasoning));
        match handle_key(key, &mut state, totals, heights) {
            KeyAction::Redraw => dirty = true,
            KeyAction::Quit => {
                drop(terminal);
                restore_terminal();
                eprintln!("  Interrupted.");
                std::process::exit(130);
            }
            KeyAction::Ignore => {}
        }
    }

    let _ = terminal.show_cursor();
    restore_terminal();
}

fn handle_key(
    key: KeyEvent,
    state: &mut ViewState,
    totals: (u16, u16),
    heights: (u16, u16),
) -> KeyAction {
    if key.kind != KeyEventKind::Press {
        return KeyAction::Ignore;
    }
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return KeyAction::Quit;
    }

    let (total, height) = match state.focus {
        Channel::Output => (totals.0, heights.0),
        Channel::Reasoning => (totals.1, heights.1),
    };
    match key.code {
        KeyCode::Char('q') => return KeyAction::Quit,
        KeyCode::Tab | KeyCode::BackTab => {
            state.focus = match state.focus {
                Channel::Output => Channel::Reasoning,
                Channel::Reasoning => Channel::Output,
            };
        }
        KeyCode::Up | KeyCode::Char('k') => state.focused_mut().up(1, total, height),
        KeyCode::Down | KeyCode::Char('j') => state.focused_mut().down(1, total, height),
        KeyCode::PageUp => state.focused_mut().up(PAGE, total, height),
        KeyCode::PageDown => state.focused_mut().down(PAGE, total, height),
        KeyCode::Home | KeyCode::Char('g') => state.focused_mut().offset = Some(0),
        KeyCode::End | KeyCode::Char('G') => state.focused_mut().offset = None,
        _ => return KeyAction::Ignore,
    }
    KeyAction::Redraw
}

fn line_count(text: &str) -> u16 {
    text.lines().count().min(u16::MAX as usize) as u16
}

/// Draw both panes; returns their inner heights (output, reasoning).
pub(crate) fn render(
    frame: &mut Frame,
    output: &str,
    reasoning: &str,
    state: &ViewState,
) -> (u16, u16) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(60),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let output_height = render_pane(frame, rows[0], Channel::Output, output, state.output, state.focus);
    let reasoning_height = render_pane(
        frame,
        rows[1],
        Channel::Reasoning,
        reasoning,
        state.reasoning,
        state.focus,
    );

    let footer = Paragraph::new(" tab switch pane · ↑↓/PgUp/PgDn scroll · End follow · q quit")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, rows[2]);

    (output_height, reasoning_height)
}

fn render_pane(
    frame: &mut Frame,
    area: Rect,
    channel: Channel,
    text: &str,
    scroll: PaneScroll,
    focus: Channel,
) -> u16 {
    let border_style = if channel == focus {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", channel.title()))
        .border_style(border_style);

    let height = area.height.saturating_sub(2);
    let position = scroll.position(line_count(text), height);
    let body_style = match channel {
        Channel::Output => Style::default(),
        Channel::Reasoning => Style::default().fg(Color::Gray),
    };
    let paragraph = Paragraph::new(text)
        .style(body_style)
        .block(block)
        .scroll((position, 0));
    frame.render_widget(paragraph, area);
    height
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    #[test]
    fn test_tail_follow_until_scrolled() {
        let mut scroll = PaneScroll::default();
        assert_eq!(scroll.position(100, 10), 90);

        scroll.up(5, 100, 10);
        assert_eq!(scroll.position(100, 10), 85);
        // New output arrives; a scrolled pane stays put.
        assert_eq!(scroll.position(200, 10), 85);

        scroll.down(200, 200, 10);
        assert_eq!(scroll, PaneScroll::default());
        assert_eq!(scroll.position(300, 10), 290);
    }

    #[test]
    fn test_short_text_never_scrolls() {
        let mut scroll = PaneScroll::default();
        scroll.up(3, 4, 10);
        assert_eq!(scroll.position(4, 10), 0);
    }

    #[test]
    fn test_tab_switches_focus_and_scroll_targets_it() {
        let mut state = ViewState::default();
        let tab = KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE);
        assert!(matches!(
            handle_key(tab, &mut state, (50, 50), (10, 10)),
            KeyAction::Redraw
        ));
        assert_eq!(state.focus, Channel::Reasoning);

        let up = KeyEvent::new(KeyCode::Up, KeyModifiers::NONE);
        handle_key(up, &mut state, (50, 50), (10, 10));
        assert_eq!(state.reasoning.position(50, 10), 39);
        assert_eq!(state.output, PaneScroll::default());
    }

    #[test]
    fn test_ctrl_c_quits() {
        let mut state = ViewState::default();
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(matches!(
            handle_key(key, &mut state, (0, 0), (0, 0)),
            KeyAction::Quit
        ));
    }

    #[test]
    fn test_render_shows_both_panes() {
        let backend = TestBackend::new(60, 20);
        let mut terminal = Terminal::new(backend).unwrap();
        let state = ViewState::default();
        terminal
            .draw(|frame| {
                render(frame, "test result: FAILED", "maybe the index is off", &state);
            })
            .unwrap();

        let buffer = terminal.backend().buffer();
        let rendered: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(rendered.contains("Output"));
        assert!(rendered.contains("Reasoning"));
        assert!(rendered.contains("test result: FAILED"));
        assert!(rendered.contains("maybe the index is off"));
    }
}
