mod app;
mod audio;
mod clock;
mod config;
mod drums;
mod effects;
mod engine;
mod error;
mod metronome;
mod mixer;
mod sample;
mod scheduler;
mod sequence;
mod transport;
mod ui;
mod voice;

use anyhow::{Context, Result};
use app::{App, AppMode};
use config::Config;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
        KeyboardEnhancementFlags, KeyModifiers, MouseButton, MouseEventKind,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{
        disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use std::{io, path::PathBuf, sync::Mutex, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    let config = Config::load_or_default(&Config::default_path());
    init_logging(&config)?;

    let sample_path = std::env::args_os().nth(1).map(PathBuf::from).or_else(|| config.sample.clone());
    let mut app = App::new(config, None);
    if let Some(path) = sample_path {
        match sample::load_wav(&path) {
            Ok(buf) => {
                info!(path = %path.display(), seconds = buf.duration(), "sample loaded");
                app.status_msg = format!("Loaded {}  ({:.2}s)", path.display(), buf.duration());
                app.sample = Some(buf);
            }
            Err(e) => {
                warn!("{e}");
                app.status_msg = format!("{e}");
            }
        }
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();

    let enhanced = supports_keyboard_enhancement().unwrap_or(false);
    if enhanced {
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                    | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES))?;
    } else {
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    }

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let result = run(&mut terminal, &mut app, enhanced);

    disable_raw_mode()?;
    if enhanced {
        execute!(terminal.backend_mut(),
            PopKeyboardEnhancementFlags, LeaveAlternateScreen, DisableMouseCapture)?;
    } else {
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    }
    terminal.show_cursor()?;
    if let Err(e) = result { eprintln!("Error: {:?}", e); }
    Ok(())
}

/// The terminal belongs to the UI, so logs go to a file.
fn init_logging(config: &Config) -> Result<()> {
    let file = std::fs::File::create(&config.log_file)
        .with_context(|| format!("cannot create log file {}", config.log_file.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App, enhanced: bool) -> Result<()> {
    loop {
        if !enhanced { app.tick_fallback_release(); }
        app.tick();
        terminal.draw(|f| ui::draw(f, app, enhanced))?;

        let timeout = app.next_wake().map_or(FRAME, |d| d.min(FRAME));
        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) => {
                    // ── Key release (enhanced mode only) ──────────────────
                    if key.kind == KeyEventKind::Release {
                        if let KeyCode::Char(c) = key.code { app.key_release(c); }
                        continue;
                    }

                    // ── Key repeat ────────────────────────────────────────
                    if key.kind == KeyEventKind::Repeat {
                        match key.code {
                            KeyCode::PageUp   => app.bpm_up(),
                            KeyCode::PageDown => app.bpm_down(),

                            KeyCode::Up    if app.mode == AppMode::Drums => app.drum_track_up(),
                            KeyCode::Down  if app.mode == AppMode::Drums => app.drum_track_down(),
                            KeyCode::Left  if app.mode == AppMode::Drums => app.drum_step_left(),
                            KeyCode::Right if app.mode == AppMode::Drums => app.drum_step_right(),
                            KeyCode::Char('=') if app.mode == AppMode::Drums => app.drum_vol_up(),
                            KeyCode::Char('-') if app.mode == AppMode::Drums => app.drum_vol_down(),

                            KeyCode::Up   => app.nudge_boundary_later(),
                            KeyCode::Down => app.nudge_boundary_earlier(),

                            _ => {
                                if let KeyCode::Char(c) = key.code {
                                    if app.mode == AppMode::Pads && !enhanced { app.key_press_fallback(c); }
                                }
                            }
                        }
                        continue;
                    }

                    // ── Key press ─────────────────────────────────────────
                    match key.code {
                        KeyCode::Esc => break,
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,

                        // Global transport
                        KeyCode::Tab       => app.toggle_mode(),
                        KeyCode::Char(' ') => app.toggle_play(),
                        KeyCode::Enter     => app.record(),
                        KeyCode::PageUp    => app.bpm_up(),
                        KeyCode::PageDown  => app.bpm_down(),
                        KeyCode::F(1)      => app.toggle_metronome(),
                        KeyCode::F(2)      => app.cycle_swing(),
                        KeyCode::F(3)      => app.toggle_resolution(),
                        KeyCode::F(4)      => app.cycle_bars(),
                        KeyCode::F(5)      => app.cycle_bank(),
                        KeyCode::F(6)      => app.toggle_repeat_latch(),
                        KeyCode::F(9)      => app.reset(),
                        KeyCode::F(12)     => app.teardown(),
                        KeyCode::Backspace => app.clear_sequence(),

                        // ── Drums focus ───────────────────────────────────
                        KeyCode::Up    if app.mode == AppMode::Drums => app.drum_track_up(),
                        KeyCode::Down  if app.mode == AppMode::Drums => app.drum_track_down(),
                        KeyCode::Left  if app.mode == AppMode::Drums => app.drum_step_left(),
                        KeyCode::Right if app.mode == AppMode::Drums => app.drum_step_right(),
                        KeyCode::Char('x')  if app.mode == AppMode::Drums => app.drum_toggle_step(),
                        KeyCode::Char('\\') if app.mode == AppMode::Drums => app.drum_toggle_mute(),
                        KeyCode::Char('=')  if app.mode == AppMode::Drums => app.drum_vol_up(),
                        KeyCode::Char('-')  if app.mode == AppMode::Drums => app.drum_vol_down(),
                        KeyCode::Char(']')  if app.mode == AppMode::Drums => app.drum_pitch_up(),
                        KeyCode::Char('[')  if app.mode == AppMode::Drums => app.drum_pitch_down(),
                        KeyCode::Char('p')  if app.mode == AppMode::Drums => app.drum_preview(),

                        // ── Pads focus ────────────────────────────────────
                        KeyCode::Left  => app.boundary_left(),
                        KeyCode::Right => app.boundary_right(),
                        KeyCode::Up    => app.nudge_boundary_later(),
                        KeyCode::Down  => app.nudge_boundary_earlier(),
                        KeyCode::Char('=') if app.mode == AppMode::Pads => app.pitch_up(),
                        KeyCode::Char('-') if app.mode == AppMode::Pads => app.pitch_down(),
                        KeyCode::Char(c) if app.mode == AppMode::Pads => {
                            if enhanced { app.key_press(c); } else { app.key_press_fallback(c); }
                        }

                        _ => {}
                    }
                }
                Event::Mouse(m) => match m.kind {
                    MouseEventKind::Down(MouseButton::Left) => {
                        let size = terminal.size()?;
                        let grid = ui::pad_grid_area(Rect::new(0, 0, size.width, size.height));
                        if let Some(pad) = ui::pad_at(grid, m.column, m.row) { app.pointer_down(pad); }
                    }
                    MouseEventKind::Up(MouseButton::Left) => app.pointer_up(),
                    _ => {}
                },
                Event::FocusLost => { app.release_all(); }
                _ => {}
            }
        }
    }

    app.release_all();
    app.teardown();
    Ok(())
}
