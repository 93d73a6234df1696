//! Viewer state and input handling.
//!
//! [`TuiApp`] owns the [`SyncClient`] plus the input line. Key handling is
//! synchronous and returns an [`AppAction`]; anything that needs the network
//! is carried out afterwards by [`TuiApp::apply`] so a tick and a control
//! action never run at the same time.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use mailroom_sync::{ControlAction, LogBuffer, PollReport, SyncClient, SyncSource};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the event loop should do after a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Nothing beyond a redraw.
    Continue,
    /// Exit the viewer.
    Quit,
    /// Run a control action.
    Control(ControlAction),
    /// Post the typed text as a new message.
    Send(String),
}

/// Lines moved by PageUp / PageDown.
const PAGE: usize = 10;

// ---------------------------------------------------------------------------
// TuiApp
// ---------------------------------------------------------------------------

pub struct TuiApp<S> {
    client: SyncClient<S>,
    /// Current text in the input field.
    input: String,
    /// Cursor position in characters.
    cursor_pos: usize,
    /// Lines scrolled up from the bottom of the timeline pane.
    chat_scroll: u16,
    poll_interval: Duration,
    last_poll: Option<Instant>,
    /// Something visible changed since the last frame.
    dirty: bool,
}

impl<S: SyncSource> TuiApp<S> {
    pub fn new(source: S, poll_interval: Duration, log_max_lines: usize) -> Self {
        Self {
            client: SyncClient::with_log_buffer(source, LogBuffer::new(log_max_lines)),
            input: String::new(),
            cursor_pos: 0,
            chat_scroll: 0,
            poll_interval,
            last_poll: None,
            dirty: true,
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn client(&self) -> &SyncClient<S> {
        &self.client
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn cursor_pos(&self) -> usize {
        self.cursor_pos
    }

    pub fn chat_scroll(&self) -> u16 {
        self.chat_scroll
    }

    /// Tell the sync client how many log lines fit on screen.
    pub fn set_log_height(&mut self, height: usize) {
        if height != self.client.viewport().height() {
            self.client.set_log_height(height);
            self.dirty = true;
        }
    }

    /// Force the next frame, e.g. after a terminal resize.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a frame is due, clearing the flag.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    // -- Key handling -------------------------------------------------------

    /// Handle a key event and return the action the event loop should take.
    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        self.dirty = true;
        if key.code == KeyCode::Esc {
            return AppAction::Quit;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') | KeyCode::Char('q') => AppAction::Quit,
                KeyCode::Char('r') => AppAction::Control(ControlAction::Retrigger),
                KeyCode::Char('t') => {
                    let text = self.take_input();
                    AppAction::Control(ControlAction::TestMessage(text))
                }
                KeyCode::Char('s') => AppAction::Control(ControlAction::StopWorker),
                KeyCode::Char('l') => AppAction::Control(ControlAction::ClearLog),
                KeyCode::Char('e') => {
                    let total = self.client.log().len();
                    self.client.viewport_mut().scroll_to_bottom(total);
                    AppAction::Continue
                }
                KeyCode::Up => {
                    self.chat_scroll = self.chat_scroll.saturating_add(1);
                    AppAction::Continue
                }
                KeyCode::Down => {
                    self.chat_scroll = self.chat_scroll.saturating_sub(1);
                    AppAction::Continue
                }
                _ => AppAction::Continue,
            };
        }

        let total = self.client.log().len();
        match key.code {
            KeyCode::Enter => {
                if let Some(text) = self.take_input() {
                    self.chat_scroll = 0;
                    return AppAction::Send(text);
                }
            }
            KeyCode::Char(c) => {
                let at = self.byte_index();
                self.input.insert(at, c);
                self.cursor_pos += 1;
            }
            KeyCode::Backspace => {
                if self.cursor_pos > 0 {
                    self.cursor_pos -= 1;
                    let at = self.byte_index();
                    self.input.remove(at);
                }
            }
            KeyCode::Delete => {
                if self.cursor_pos < self.input.chars().count() {
                    let at = self.byte_index();
                    self.input.remove(at);
                }
            }
            KeyCode::Left => {
                self.cursor_pos = self.cursor_pos.saturating_sub(1);
            }
            KeyCode::Right => {
                if self.cursor_pos < self.input.chars().count() {
                    self.cursor_pos += 1;
                }
            }
            KeyCode::Home => self.cursor_pos = 0,
            KeyCode::End => self.cursor_pos = self.input.chars().count(),
            KeyCode::Up => self.client.viewport_mut().scroll_up(1),
            KeyCode::Down => self.client.viewport_mut().scroll_down(1, total),
            KeyCode::PageUp => self.client.viewport_mut().scroll_up(PAGE),
            KeyCode::PageDown => self.client.viewport_mut().scroll_down(PAGE, total),
            _ => {}
        }

        AppAction::Continue
    }

    /// Clear the input line, returning its trimmed text if non-empty.
    fn take_input(&mut self) -> Option<String> {
        let text = self.input.trim().to_owned();
        self.input.clear();
        self.cursor_pos = 0;
        (!text.is_empty()).then_some(text)
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_pos)
            .map_or(self.input.len(), |(i, _)| i)
    }

    // -- Network ------------------------------------------------------------

    /// Carry out an action returned by [`handle_key`](Self::handle_key).
    pub async fn apply(&mut self, action: AppAction) -> Option<PollReport> {
        match action {
            AppAction::Control(action) => {
                tracing::debug!(action = action.label(), "control action");
                let report = self.client.control(action).await;
                self.last_poll = Some(Instant::now());
                // Feedback changed even when the re-poll did not.
                self.dirty = true;
                Some(report)
            }
            AppAction::Send(text) => {
                let report = self.client.send_message(&text).await;
                self.last_poll = Some(Instant::now());
                self.dirty = true;
                Some(report)
            }
            AppAction::Continue | AppAction::Quit => None,
        }
    }

    /// Poll if the interval has elapsed since the last poll.
    pub async fn tick(&mut self) -> Option<PollReport> {
        let due = self
            .last_poll
            .is_none_or(|at| at.elapsed() >= self.poll_interval);
        if !due {
            return None;
        }
        let report = self.client.poll_once().await;
        self.last_poll = Some(Instant::now());
        for error in &report.errors {
            tracing::debug!(%error, "poll failed");
        }
        self.dirty |= report.needs_redraw();
        Some(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
