use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::{pad_key, App, AppMode};
use crate::clock::STEPS_PER_BEAT;
use crate::drums::DrumKind;
use crate::engine::Engine;
use crate::sequence::{Slot, NUM_SLICES};
use crate::transport::TransportMode;

const PAD_W: u16 = 9;
const PAD_H: u16 = 3;
const PADS_PER_ROW: u16 = 4;

// ── Layout ────────────────────────────────────────────────────────────────────

struct Areas {
    title: Rect,
    transport: Rect,
    pads: Rect,
    wave: Rect,
    sequence: Rect,
    drums: Rect,
    status: Rect,
    help: Rect,
}

fn layout(area: Rect) -> Areas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                   // title
            Constraint::Length(3),                   // transport
            Constraint::Length(PAD_H * 4 + 2),       // pads + waveform
            Constraint::Length(10),                  // sequence
            Constraint::Length(7),                   // drums
            Constraint::Length(3),                   // status
            Constraint::Min(0),                      // help
        ])
        .split(area);
    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(PAD_W * PADS_PER_ROW + 2), Constraint::Min(0)])
        .split(rows[2]);
    Areas {
        title: rows[0],
        transport: rows[1],
        pads: middle[0],
        wave: middle[1],
        sequence: rows[3],
        drums: rows[4],
        status: rows[5],
        help: rows[6],
    }
}

/// Where the pad grid lands for a terminal of this size.
pub fn pad_grid_area(size: Rect) -> Rect {
    layout(size).pads
}

/// Pad under a mouse position, if any.
pub fn pad_at(grid: Rect, column: u16, row: u16) -> Option<usize> {
    let inner = Block::default().borders(Borders::ALL).inner(grid);
    if column < inner.x || row < inner.y {
        return None;
    }
    let cx = (column - inner.x) / PAD_W;
    let cy = (row - inner.y) / PAD_H;
    if cx >= PADS_PER_ROW || cy >= PADS_PER_ROW {
        return None;
    }
    Some((cy * PADS_PER_ROW + cx) as usize)
}

// ── Top-level routing ─────────────────────────────────────────────────────────

pub fn draw(f: &mut Frame, app: &App, enhanced: bool) {
    let full = f.area();
    let a = layout(full);
    draw_title(f, a.title, enhanced, app);

    match app.engine_ref() {
        Some(engine) => {
            draw_transport(f, a.transport, app, engine);
            draw_pads(f, a.pads, app, engine);
            draw_waveform(f, a.wave, app, engine);
            draw_sequence(f, a.sequence, app, engine);
            draw_drums(f, a.drums, app, engine);
        }
        None => draw_idle(f, Rect { height: a.drums.bottom() - a.transport.y, ..a.transport }),
    }
    draw_status(f, a.status, app);
    draw_help(f, a.help, app);

    if let Some(remaining) = app.count_in {
        draw_count_in(f, full, remaining);
    }
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

// ── Title bar ─────────────────────────────────────────────────────────────────

fn draw_title(f: &mut Frame, area: Rect, enhanced: bool, app: &App) {
    let focus_label = match app.mode {
        AppMode::Pads  => "Pads",
        AppMode::Drums => "Drums",
    };
    let kb_mode = if enhanced { "enhanced" } else { "fallback" };
    let text = format!("  SliceBeat  ─  Focus: {focus_label}  ─  [{kb_mode}]  ─  Tab: switch focus");
    let color = if enhanced { Color::Cyan } else { Color::Yellow };
    f.render_widget(
        Paragraph::new(text)
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn draw_idle(f: &mut Frame, area: Rect) {
    f.render_widget(
        Paragraph::new("\n\nAudio starts on the first key press or click.")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::ALL)),
        area,
    );
}

// ── Transport bar ─────────────────────────────────────────────────────────────

fn draw_transport(f: &mut Frame, area: Rect, app: &App, engine: &Engine) {
    let t = engine.transport();
    let (mode_str, mode_color) = match t.mode {
        TransportMode::Stopped                      => ("■ STOPPED", Color::DarkGray),
        TransportMode::CountingIn                   => ("… COUNT-IN", Color::Yellow),
        TransportMode::Playing { recording: false } => ("▶ PLAYING", Color::Green),
        TransportMode::Playing { recording: true }  => ("● REC", Color::Red),
    };
    let beat = match app.beat.lit() {
        Some(true)  => Span::styled(" ◉ ", Style::default().fg(Color::Black).bg(Color::Yellow)),
        Some(false) => Span::styled(" ○ ", Style::default().fg(Color::Black).bg(Color::DarkGray)),
        None        => Span::raw("   "),
    };
    let k = Style::default().fg(Color::DarkGray);
    let v = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let repeat = engine.note_repeat();
    let repeat_str = if repeat.latched { "LATCH" } else if repeat.momentary { "HOLD" } else { "off" };

    let line = Line::from(vec![
        Span::styled(mode_str, Style::default().fg(mode_color).add_modifier(Modifier::BOLD)),
        Span::raw(" "),
        beat,
        Span::raw("  "),
        Span::styled("BPM: ", k), Span::styled(format!("{:.0}", t.bpm), v),
        Span::raw("  "),
        Span::styled("Swing: ", k), Span::styled(format!("{}%", t.swing.percent()), v),
        Span::raw("  "),
        Span::styled("Quant: ", k), Span::styled(t.resolution.label(), v),
        Span::raw("  "),
        Span::styled("Loop: ", k),
        Span::styled(format!("{}×{}/4  {:.2}s", engine.bars(), engine.beats_per_bar(), engine.loop_duration()), v),
        Span::raw("  "),
        Span::styled("Click: ", k), Span::styled(if engine.metronome() { "on" } else { "off" }, v),
        Span::raw("  "),
        Span::styled("Repeat: ", k), Span::styled(repeat_str, v),
        Span::raw("  "),
        Span::styled("Pitch: ", k), Span::styled(format!("{:+}", engine.pitch()), v),
    ]);
    f.render_widget(Paragraph::new(line).block(Block::default().borders(Borders::ALL)), area);
}

// ── Pads ──────────────────────────────────────────────────────────────────────

fn draw_pads(f: &mut Frame, area: Rect, app: &App, engine: &Engine) {
    let focused = app.mode == AppMode::Pads;
    let title = if focused { " ► Pads " } else { " Pads " };
    let block = Block::default().title(title).borders(Borders::ALL).border_style(focus_style(focused));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let sounding = engine.sounding_slice();
    let mut lines: Vec<Line> = Vec::new();
    for row in 0..PADS_PER_ROW as usize {
        let pads = (0..PADS_PER_ROW as usize).map(|c| row * PADS_PER_ROW as usize + c);
        let styles: Vec<Style> = pads.clone().map(|pad| {
            if engine.held().contains(pad) {
                Style::default().fg(Color::Black).bg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if sounding == Some(pad) {
                Style::default().fg(Color::Black).bg(Color::Green)
            } else {
                Style::default().fg(Color::White).bg(Color::DarkGray)
            }
        }).collect();

        let mut top = Vec::new();
        let mut mid = Vec::new();
        let mut bot = Vec::new();
        for (pad, sty) in pads.zip(&styles) {
            top.push(Span::styled(format!("{:<8}", format!(" {:>2}", pad + 1)), *sty));
            mid.push(Span::styled(format!("{:^8}", pad_key(pad).to_ascii_uppercase()), *sty));
            bot.push(Span::styled(" ".repeat(8), *sty));
            for v in [&mut top, &mut mid, &mut bot] {
                v.push(Span::raw(" "));
            }
        }
        lines.push(Line::from(top));
        lines.push(Line::from(mid));
        lines.push(Line::from(bot));
    }
    f.render_widget(Paragraph::new(lines), inner);
}

// ── Waveform + slices ─────────────────────────────────────────────────────────

fn draw_waveform(f: &mut Frame, area: Rect, app: &App, engine: &Engine) {
    let block = Block::default()
        .title(" Sample — [←→] boundary  [↑↓] nudge ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let (Some(sample), Some(slices)) = (engine.sample(), engine.slices()) else {
        f.render_widget(
            Paragraph::new("No sample loaded.  Pass a WAV path on the command line.")
                .style(Style::default().fg(Color::DarkGray)),
            inner,
        );
        return;
    };
    let w = inner.width as usize;
    let h = inner.height.saturating_sub(1) as usize;
    if w == 0 || h == 0 { return; }

    let duration = sample.duration().max(f64::EPSILON);
    let col_of = |t: f64| (((t / duration) * w as f64) as usize).min(w - 1);
    let slice_of_col = |c: usize| {
        let t = (c as f64 + 0.5) / w as f64 * duration;
        slices.iter().position(|s| t >= s.start && t < s.end)
    };
    let sounding = engine.sounding_slice();

    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let peaks = sample.overview(w);
    let mut lines: Vec<Line> = Vec::with_capacity(h + 1);
    for row in 0..h {
        let spans: Vec<Span> = peaks.iter().enumerate().map(|(c, p)| {
            // Eighths of a cell, counted from the bottom row.
            let fill = (p.clamp(0.0, 1.0) * (h * 8) as f32) as usize;
            let from_bottom = h - 1 - row;
            let ch = match fill.saturating_sub(from_bottom * 8) {
                0 => ' ',
                n if n >= 8 => '█',
                n => LEVELS[n - 1],
            };
            let color = match slice_of_col(c) {
                Some(i) if Some(i) == sounding => Color::Green,
                Some(i) if i % 2 == 0          => Color::Cyan,
                _                              => Color::Blue,
            };
            Span::styled(ch.to_string(), Style::default().fg(color))
        }).collect();
        lines.push(Line::from(spans));
    }

    let mut markers = vec![Span::raw(" "); w];
    for (i, s) in slices.iter().enumerate().take(NUM_SLICES - 1) {
        let c = col_of(s.end);
        let sty = if i == app.slice_boundary {
            Style::default().fg(Color::Black).bg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        markers[c] = Span::styled("┃", sty);
    }
    lines.push(Line::from(markers));
    f.render_widget(Paragraph::new(lines), inner);
}

// ── Sequence ──────────────────────────────────────────────────────────────────

fn draw_sequence(f: &mut Frame, area: Rect, app: &App, engine: &Engine) {
    let block = Block::default()
        .title(format!(" Sequence ({} steps) ", engine.sequence().len()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let per_bar = engine.beats_per_bar() * STEPS_PER_BEAT;
    let playhead = app.playhead.step;
    let flashed = app.recorded_lit();
    let progress = (engine.loop_progress() * 100.0).round() as u32;

    let mut lines: Vec<Line> = Vec::new();
    for (bar, slots) in engine.sequence().slots().chunks(per_bar.max(1)).enumerate() {
        let mut row = vec![Span::styled(format!("{:>2} │", bar + 1), Style::default().fg(Color::DarkGray))];
        for (i, slot) in slots.iter().enumerate() {
            let step = bar * per_bar + i;
            if i > 0 && i % STEPS_PER_BEAT == 0 {
                row.push(Span::styled("┆", Style::default().fg(Color::DarkGray)));
            }
            let ch = match slot {
                Slot::Empty    => "·".to_string(),
                Slot::Slice(s) => format!("{s:X}"),
            };
            let sty = if playhead == Some(step) {
                Style::default().fg(Color::Black).bg(Color::Green).add_modifier(Modifier::BOLD)
            } else if flashed == Some(step) {
                Style::default().fg(Color::Black).bg(Color::Red)
            } else if *slot != Slot::Empty {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            row.push(Span::styled(ch, sty));
        }
        if bar == 0 {
            row.push(Span::styled(format!("   {progress:>3}%"), Style::default().fg(Color::DarkGray)));
        }
        lines.push(Line::from(row));
    }
    f.render_widget(Paragraph::new(lines), inner);
}

// ── Drum machine ──────────────────────────────────────────────────────────────

fn drum_color(kind: DrumKind) -> Color {
    match kind {
        DrumKind::Kick   => Color::Red,
        DrumKind::Snare  => Color::Yellow,
        DrumKind::Hihat  => Color::Cyan,
        DrumKind::Cymbal => Color::Magenta,
    }
}

fn draw_drums(f: &mut Frame, area: Rect, app: &App, engine: &Engine) {
    let focused = app.mode == AppMode::Drums;
    let kit = engine.drums();
    let title = if focused {
        format!(" ► Drums: {} — [↑↓←→] Move  [x] Toggle  [\\] Mute  [-=] Vol  [[]] Pitch  [p] Preview ", kit.bank().name)
    } else {
        format!(" Drums: {} ", kit.bank().name)
    };

    // The drum pattern moves one column per sixteenth.
    let column = app.playhead.step.map(|s| (s / 2) % crate::drums::PATTERN_STEPS);

    let mut lines: Vec<Line> = Vec::new();
    for (ti, track) in kit.tracks.iter().enumerate() {
        let is_selected = ti == app.drum_track;
        let track_color = drum_color(track.kind);
        let name_style = if track.muted {
            Style::default().fg(Color::DarkGray)
        } else if is_selected {
            Style::default().fg(track_color).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(track_color)
        };
        let vol_style = if is_selected && focused {
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        let mut row: Vec<Span> = vec![
            Span::styled(format!(" {:6}", track.kind.name()), name_style),
            Span::styled(format!("[{}]", if track.muted { 'M' } else { '·' }), Style::default().fg(Color::DarkGray)),
            Span::styled(format!("{:3}% {:+3}", (track.volume * 100.0).round() as u32, track.pitch), vol_style),
            Span::styled(" │", Style::default().fg(Color::DarkGray)),
        ];
        for (i, on) in track.steps.iter().enumerate() {
            let is_ph = column == Some(i);
            let is_cu = focused && is_selected && i == app.drum_step;
            let sty = if is_ph && is_cu {
                Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else if is_ph {
                Style::default().fg(Color::Black).bg(Color::Green)
            } else if is_cu {
                Style::default().fg(Color::Black).bg(Color::Yellow)
            } else if *on && !track.muted {
                Style::default().fg(track_color).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            if i > 0 && i % 4 == 0 {
                row.push(Span::styled("┆", Style::default().fg(Color::DarkGray)));
            }
            row.push(Span::styled(if *on { "█ " } else { "· " }, sty));
        }
        lines.push(Line::from(row));
    }

    f.render_widget(
        Paragraph::new(lines).block(
            Block::default().title(title).borders(Borders::ALL).border_style(focus_style(focused)),
        ),
        area,
    );
}

// ── Status ────────────────────────────────────────────────────────────────────

fn draw_status(f: &mut Frame, area: Rect, app: &App) {
    f.render_widget(
        Paragraph::new(Span::styled(&app.status_msg, Style::default().fg(Color::Yellow)))
            .block(Block::default().title(" Status ").borders(Borders::ALL))
            .wrap(Wrap { trim: false }),
        area,
    );
}

// ── Count-in overlay ──────────────────────────────────────────────────────────

fn draw_count_in(f: &mut Frame, area: Rect, remaining: usize) {
    let w = 20.min(area.width);
    let h = 5.min(area.height);
    let popup = Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    };
    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(format!("\n{remaining}"))
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
            .block(Block::default().title(" Count-in ").borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))),
        popup,
    );
}

// ── Help ──────────────────────────────────────────────────────────────────────

fn draw_help(f: &mut Frame, area: Rect, app: &App) {
    let w = Style::default().fg(Color::White);
    let d = Style::default().fg(Color::DarkGray);

    let global = Line::from(vec![
        Span::styled("[Space] ",   w), Span::raw("Play/Stop  │  "),
        Span::styled("[Enter] ",   w), Span::raw("Record  │  "),
        Span::styled("[PgUp/Dn] ", w), Span::raw("BPM  │  "),
        Span::styled("[F1] ",      w), Span::raw("Click  "),
        Span::styled("[F2] ",      w), Span::raw("Swing  "),
        Span::styled("[F3] ",      w), Span::raw("Quantize  "),
        Span::styled("[F4] ",      w), Span::raw("Bars  "),
        Span::styled("[F5] ",      w), Span::raw("Bank  "),
        Span::styled("[F6] ",      w), Span::raw("Repeat latch  │  "),
        Span::styled("[Bksp] ",    w), Span::raw("Clear  "),
        Span::styled("[F9] ",      w), Span::raw("Reset  "),
        Span::styled("[F12] ",     w), Span::raw("Close audio  "),
        Span::styled("[Esc] ",     w), Span::raw("Quit"),
    ]);

    let focus_line = match app.mode {
        AppMode::Pads => Line::from(vec![
            Span::styled("Pads: ", d),
            Span::raw("1234 / QWER / ASDF / ZXCV or click  │  "),
            Span::styled("[N] ",  w), Span::raw("Hold for note repeat  │  "),
            Span::styled("[-=] ", w), Span::raw("Pitch"),
        ]),
        AppMode::Drums => Line::from(vec![
            Span::styled("Drums: ", d),
            Span::raw("pattern runs in 16ths alongside the sequence  │  "),
            Span::styled("[p] ", w), Span::raw("Preview track"),
        ]),
    };

    f.render_widget(
        Paragraph::new(vec![global, focus_line])
            .block(Block::default().title(" Help ").borders(Borders::ALL))
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true }),
        area,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_hit_testing() {
        let grid = Rect { x: 0, y: 6, width: PAD_W * 4 + 2, height: PAD_H * 4 + 2 };
        assert_eq!(pad_at(grid, 1, 7), Some(0));
        assert_eq!(pad_at(grid, 1 + PAD_W * 3, 7), Some(3));
        assert_eq!(pad_at(grid, 1 + PAD_W, 7 + PAD_H * 3 + 2), Some(13));
        assert_eq!(pad_at(grid, 0, 7), None);
        assert_eq!(pad_at(grid, 1, 7 + PAD_H * 4), None);
    }

    #[test]
    fn pad_grid_sits_below_the_transport_bar() {
        let grid = pad_grid_area(Rect { x: 0, y: 0, width: 120, height: 60 });
        assert_eq!(grid.y, 6);
        assert_eq!(grid.width, PAD_W * 4 + 2);
    }
}
