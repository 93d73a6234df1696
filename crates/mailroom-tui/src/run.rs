//! Main event loop for the terminal viewer.
//!
//! Sets up the terminal in raw mode with an alternate screen, runs the
//! draw-and-poll loop, and restores the terminal on exit.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use mailroom_sync::{HttpSource, SyncSource};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;

use crate::TuiConfig;
use crate::app::{AppAction, TuiApp};
use crate::error::Result;
use crate::ui;

/// How long to wait for a key before checking whether a poll is due.
const INPUT_POLL: Duration = Duration::from_millis(50);

/// Run the viewer against the server at `config.server_url`.
///
/// This function takes ownership of the terminal for the duration of the
/// session. It enables raw mode and switches to an alternate screen buffer
/// so the user's existing terminal content is preserved.
///
/// # Errors
///
/// Returns a [`TuiError`](crate::error::TuiError) if terminal setup or
/// drawing fails. Server errors never end the session; they show up as a
/// degraded header instead.
pub async fn run_tui(config: TuiConfig) -> Result<()> {
    let source = HttpSource::new(&config.server_url);
    let mut app = TuiApp::new(source, config.poll_interval, config.log_max_lines);

    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    tracing::info!(server = %config.server_url, "viewer started");

    let result = event_loop(&mut terminal, &mut app).await;

    // Restore the terminal regardless of whether the loop succeeded.
    crossterm::terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    tracing::info!("viewer stopped");

    result
}

/// The inner event loop, separated so terminal cleanup always runs.
///
/// Polls and control actions are awaited inline, so at most one request to
/// the server is in flight at any time. A frame is drawn only after input,
/// a resize, or a poll that changed something.
async fn event_loop<S: SyncSource>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut TuiApp<S>,
) -> Result<()> {
    loop {
        let size = terminal.size()?;
        app.set_log_height(ui::log_height(Rect::new(0, 0, size.width, size.height)));
        if app.take_redraw() {
            terminal.draw(|frame| ui::draw(frame, app))?;
        }

        if event::poll(INPUT_POLL)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match app.handle_key(key) {
                    AppAction::Quit => break,
                    AppAction::Continue => {}
                    action => {
                        app.apply(action).await;
                        continue;
                    }
                },
                Event::Resize(..) => app.mark_dirty(),
                _ => {}
            }
        }

        app.tick().await;
    }

    Ok(())
}
