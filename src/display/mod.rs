//! Display sink
//!
//! Two append-only text streams, "output" and "reasoning", shared by every
//! stage that reports progress. A terminal view may be attached to mirror
//! both streams live; without one, appended text is echoed to stderr.
//!
//! Lifecycle is explicit: construct, clone the handle into whatever needs it,
//! and call [`Display::dispose`] before printing anything else to the terminal.

mod view;

use crossterm::style::{style, Color, Stylize};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use view::TerminalView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Output,
    Reasoning,
}

impl Channel {
    pub fn title(&self) -> &'static str {
        match self {
            Channel::Output => "Output",
            Channel::Reasoning => "Reasoning",
        }
    }
}

#[derive(Debug, Default)]
struct Buffers {
    output: String,
    reasoning: String,
    /// Bumped on every append; the view redraws when it changes.
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Echo {
    Stderr,
    Off,
}

struct Shared {
    buffers: Mutex<Buffers>,
    echo: Echo,
    disposed: AtomicBool,
}

impl Shared {
    fn buffers(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn generation(&self) -> u64 {
        self.buffers().generation
    }

    fn snapshot(&self) -> (String, String) {
        let buffers = self.buffers();
        (buffers.output.clone(), buffers.reasoning.clone())
    }
}

/// Cheaply clonable handle to the shared display state.
#[derive(Clone)]
pub struct Display {
    shared: Arc<Shared>,
    view: Arc<Mutex<Option<TerminalView>>>,
}

impl Display {
    fn build(echo: Echo) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffers: Mutex::new(Buffers::default()),
                echo,
                disposed: AtomicBool::new(false),
            }),
            view: Arc::new(Mutex::new(None)),
        }
    }

    /// Buffers only, echoing each append to stderr.
    pub fn headless() -> Self {
        Self::build(Echo::Stderr)
    }

    /// Buffers only, no echo. Used where nothing should reach the terminal.
    pub fn silent() -> Self {
        Self::build(Echo::Off)
    }

    /// Take over the terminal with a live two-pane view.
    pub fn with_terminal() -> io::Result<Self> {
        let display = Self::build(Echo::Off);
        let view = TerminalView::spawn(display.shared.clone())?;
        *display.view_slot() = Some(view);
        Ok(display)
    }

    fn view_slot(&self) -> MutexGuard<'_, Option<TerminalView>> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn has_terminal(&self) -> bool {
        self.view_slot().is_some()
    }

    /// Append text to one stream. Never rewrites earlier text.
    pub fn append(&self, channel: Channel, text: &str) {
        if text.is_empty() || self.shared.disposed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut buffers = self.shared.buffers();
            match channel {
                Channel::Output => buffers.output.push_str(text),
                Channel::Reasoning => buffers.reasoning.push_str(text),
            }
            buffers.generation = buffers.generation.wrapping_add(1);
        }

        if self.shared.echo == Echo::Stderr {
            let mut stderr = io::stderr().lock();
            let _ = match channel {
                Channel::Output => write!(stderr, "{}", text),
                Channel::Reasoning => write!(stderr, "{}", style(text).with(Color::DarkGrey)),
            };
            let _ = stderr.flush();
        }
    }

    pub fn output(&self, text: &str) {
        self.append(Channel::Output, text);
    }

    pub fn reasoning(&self, text: &str) {
        self.append(Channel::Reasoning, text);
    }

    /// Append a full line to the output stream.
    pub fn line(&self, text: &str) {
        self.append(Channel::Output, &format!("{}\n", text));
    }

    pub fn snapshot(&self, channel: Channel) -> String {
        let buffers = self.shared.buffers();
        match channel {
            Channel::Output => buffers.output.clone(),
            Channel::Reasoning => buffers.reasoning.clone(),
        }
    }

    /// Stop the terminal view (restoring the terminal) and ignore further appends.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        if let Some(mut view) = self.view_slot().take() {
            view.stop();
        }
    }
}
