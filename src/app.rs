use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{info, warn};

use crate::audio::AudioEngine;
use crate::config::Config;
use crate::drums::PATTERN_STEPS;
use crate::engine::{Engine, EngineEvent, InputSource, MAX_BARS};
use crate::mixer::Mixer;
use crate::sample::SampleBuffer;
use crate::sequence::{Slice, NUM_SLICES};
use crate::transport::TransportMode;

const FALLBACK_RELEASE_THRESHOLD: Duration = Duration::from_millis(600);
const FLASH: Duration = Duration::from_millis(120);
const EVENT_CAPACITY: usize = 1024;
const NUDGE_SECS: f64 = 0.01;

/// Momentary note-repeat key in pad focus.
pub const REPEAT_KEY: char = 'n';

// ── Key → pad mapping ─────────────────────────────────────────────────────────

/// Four rows of four, top-left is pad 0.
pub fn key_to_pad(key: char) -> Option<usize> {
    const ROWS: [[char; 4]; 4] = [
        ['1', '2', '3', '4'],
        ['q', 'w', 'e', 'r'],
        ['a', 's', 'd', 'f'],
        ['z', 'x', 'c', 'v'],
    ];
    let key = key.to_ascii_lowercase();
    ROWS.iter()
        .flatten()
        .position(|&k| k == key)
}

pub fn pad_key(pad: usize) -> char {
    "1234qwerasdfzxcv".chars().nth(pad).unwrap_or(' ')
}

// ── App mode ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// Play and record the sixteen slice pads.
    Pads,
    /// Edit the drum pattern.
    Drums,
}

// ── Playhead ──────────────────────────────────────────────────────────────────

/// Step notifications arrive up to one look-ahead window early.  They wait
/// here until the audio clock reaches them.
#[derive(Debug, Default)]
pub struct Playhead {
    queue: VecDeque<(usize, f64)>,
    pub step: Option<usize>,
}

impl Playhead {
    pub fn push(&mut self, step: usize, time: f64) {
        self.queue.push_back((step, time));
    }

    pub fn advance(&mut self, audio_now: f64) {
        while let Some(&(step, time)) = self.queue.front() {
            if time > audio_now {
                break;
            }
            self.step = Some(step);
            self.queue.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.step = None;
    }
}

/// Beat notifications, held back like steps.  The lamp lights when the audio
/// clock reaches the beat and stays lit for a short flash.
#[derive(Debug, Default)]
pub struct BeatLamp {
    queue: VecDeque<(bool, f64)>,
    lit: Option<(bool, Instant)>,
}

impl BeatLamp {
    pub fn push(&mut self, accent: bool, time: f64) {
        self.queue.push_back((accent, time));
    }

    pub fn advance(&mut self, audio_now: f64) {
        while let Some(&(accent, time)) = self.queue.front() {
            if time > audio_now {
                break;
            }
            self.lit = Some((accent, Instant::now()));
            self.queue.pop_front();
        }
    }

    /// `Some(accent)` while flashing.
    pub fn lit(&self) -> Option<bool> {
        self.lit.filter(|(_, t)| t.elapsed() < FLASH).map(|(accent, _)| accent)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.lit = None;
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// An engine plus the audio stream feeding it.  Created on the first gesture
/// and dropped on teardown.
pub struct Session {
    pub engine: Engine,
    events: Receiver<EngineEvent>,
    _audio: Option<AudioEngine>,
}

impl Session {
    fn open(config: &Config, sample: Option<&SampleBuffer>) -> anyhow::Result<Self> {
        let audio = AudioEngine::start()?;
        let mixer = Arc::clone(&audio.mixer);
        Ok(Self::with_mixer(mixer, Some(audio), config, sample))
    }

    pub fn with_mixer(
        mixer: Arc<Mutex<Mixer>>,
        audio: Option<AudioEngine>,
        config: &Config,
        sample: Option<&SampleBuffer>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let mut engine = Engine::new(mixer, tx);
        config.apply(&mut engine);
        if let Some(buf) = sample {
            engine.load_sample(buf.clone());
        }
        Self { engine, events: rx, _audio: audio }
    }
}

// ── App state ─────────────────────────────────────────────────────────────────

pub struct App {
    pub config: Config,
    pub sample: Option<SampleBuffer>,
    pub session: Option<Session>,
    started: Instant,

    pub mode: AppMode,
    pub pressed_keys: HashSet<char>,
    key_last_seen: HashMap<char, Instant>,
    pointer_pad: Option<usize>,

    pub playhead: Playhead,
    pub beat: BeatLamp,
    pub last_recorded: Option<(usize, Instant)>,
    pub count_in: Option<usize>,

    // Drum grid cursor
    pub drum_track: usize,
    pub drum_step: usize,

    /// Boundary between slice `n` and `n + 1`.
    pub slice_boundary: usize,

    pub status_msg: String,
}

impl App {
    pub fn new(config: Config, sample: Option<SampleBuffer>) -> Self {
        Self {
            config,
            sample,
            session: None,
            started: Instant::now(),
            mode: AppMode::Pads,
            pressed_keys: HashSet::new(),
            key_last_seen: HashMap::new(),
            pointer_pad: None,
            playhead: Playhead::default(),
            beat: BeatLamp::default(),
            last_recorded: None,
            count_in: None,
            drum_track: 0,
            drum_step: 0,
            slice_boundary: 0,
            status_msg: "Press a key to start audio".to_string(),
        }
    }

    /// The engine, opening the audio session first if there is none.
    fn engine(&mut self) -> Option<&mut Engine> {
        if self.session.is_none() {
            match Session::open(&self.config, self.sample.as_ref()) {
                Ok(s) => {
                    info!("session opened");
                    self.status_msg = "Audio running".to_string();
                    self.session = Some(s);
                }
                Err(e) => {
                    warn!("could not open audio: {e:#}");
                    self.status_msg = format!("Audio error: {e}");
                    return None;
                }
            }
        }
        self.session.as_mut().map(|s| &mut s.engine)
    }

    /// Read-only view for drawing.  Never opens a session.
    pub fn engine_ref(&self) -> Option<&Engine> {
        self.session.as_ref().map(|s| &s.engine)
    }

    /// Time until the engine next needs pumping.
    pub fn next_wake(&self) -> Option<Duration> {
        self.engine_ref().and_then(|e| e.next_wake())
    }

    // ── Frame tick ────────────────────────────────────────────────────────

    /// Pump engine timers and fold notifications into display state.
    pub fn tick(&mut self) {
        let wall = self.started.elapsed();
        let Some(session) = self.session.as_mut() else { return };
        session.engine.pump(wall);

        for ev in session.events.try_iter() {
            match ev {
                EngineEvent::Step { step, time } => self.playhead.push(step, time),
                EngineEvent::Beat { accent, time, .. } => self.beat.push(accent, time),
                EngineEvent::Recorded { step, .. } => self.last_recorded = Some((step, Instant::now())),
                EngineEvent::CountIn { remaining, .. } => self.count_in = Some(remaining),
                EngineEvent::Transport(mode) => {
                    if mode != TransportMode::CountingIn {
                        self.count_in = None;
                    }
                    if mode == TransportMode::Stopped {
                        self.playhead.clear();
                        self.beat.clear();
                    }
                }
            }
        }
        let now = session.engine.audio_now();
        self.playhead.advance(now);
        self.beat.advance(now);
    }

    pub fn recorded_lit(&self) -> Option<usize> {
        self.last_recorded.filter(|(_, t)| t.elapsed() < FLASH * 2).map(|(s, _)| s)
    }

    // ── Pads: keyboard ────────────────────────────────────────────────────

    pub fn key_press(&mut self, key: char) {
        if self.pressed_keys.contains(&key) { return; }
        self.pressed_keys.insert(key);
        if key == REPEAT_KEY {
            if let Some(e) = self.engine() { e.set_note_repeat_momentary(true); }
            return;
        }
        if let Some(pad) = key_to_pad(key) {
            if let Some(e) = self.engine() { e.pad_down(InputSource::Key, pad); }
        }
    }

    pub fn key_release(&mut self, key: char) {
        if !self.pressed_keys.remove(&key) { return; }
        let Some(session) = self.session.as_mut() else { return };
        if key == REPEAT_KEY {
            session.engine.set_note_repeat_momentary(false);
        } else if let Some(pad) = key_to_pad(key) {
            session.engine.pad_up(InputSource::Key, pad);
        }
    }

    /// Without key-release reporting a held key shows up as repeated presses.
    pub fn key_press_fallback(&mut self, key: char) {
        self.key_last_seen.insert(key, Instant::now());
        self.key_press(key);
    }

    pub fn tick_fallback_release(&mut self) {
        let now = Instant::now();
        let stale: Vec<char> = self.pressed_keys.iter().copied()
            .filter(|k| {
                self.key_last_seen.get(k)
                    .map(|t| now.duration_since(*t) >= FALLBACK_RELEASE_THRESHOLD)
                    .unwrap_or(true)
            })
            .collect();
        for k in stale { self.key_last_seen.remove(&k); self.key_release(k); }
    }

    pub fn release_all(&mut self) {
        let keys: Vec<char> = self.pressed_keys.iter().copied().collect();
        for k in keys { self.key_release(k); }
        self.key_last_seen.clear();
        self.pointer_pad = None;
        if let Some(s) = self.session.as_mut() {
            s.engine.release_all_pads();
        }
    }

    // ── Pads: pointer ─────────────────────────────────────────────────────

    pub fn pointer_down(&mut self, pad: usize) {
        self.pointer_up();
        self.pointer_pad = Some(pad);
        if let Some(e) = self.engine() { e.pad_down(InputSource::Pointer, pad); }
    }

    pub fn pointer_up(&mut self) {
        let Some(pad) = self.pointer_pad.take() else { return };
        if let Some(s) = self.session.as_mut() {
            s.engine.pad_up(InputSource::Pointer, pad);
        }
    }

    // ── Transport ─────────────────────────────────────────────────────────

    pub fn toggle_play(&mut self) {
        let Some(e) = self.engine() else { return };
        e.toggle_play();
        let msg = if e.transport().playing() { "Playing" } else { "Stopped" };
        self.status_msg = msg.to_string();
    }

    pub fn record(&mut self) {
        let Some(e) = self.engine() else { return };
        e.record();
        let msg = match e.transport().mode {
            TransportMode::CountingIn                 => "Count-in...",
            TransportMode::Playing { recording: true }  => "Recording",
            TransportMode::Playing { recording: false } => "Playing",
            TransportMode::Stopped                    => "Stopped",
        };
        self.status_msg = msg.to_string();
    }

    pub fn bpm_up(&mut self) { self.nudge_bpm(5.0); }
    pub fn bpm_down(&mut self) { self.nudge_bpm(-5.0); }

    fn nudge_bpm(&mut self, delta: f64) {
        let Some(e) = self.engine() else { return };
        let bpm = e.transport().bpm + delta;
        e.set_bpm(bpm);
        self.status_msg = format!("BPM: {:.0}", e.transport().bpm);
    }

    pub fn toggle_metronome(&mut self) {
        let Some(e) = self.engine() else { return };
        let on = !e.metronome();
        e.set_metronome(on);
        self.status_msg = format!("Metronome: {}", if on { "ON" } else { "OFF" });
    }

    pub fn cycle_swing(&mut self) {
        let Some(e) = self.engine() else { return };
        let swing = e.transport().swing.next();
        e.set_swing(swing);
        self.status_msg = format!("Swing: {}%", swing.percent());
    }

    pub fn toggle_resolution(&mut self) {
        let Some(e) = self.engine() else { return };
        let res = e.transport().resolution.toggle();
        e.set_resolution(res);
        self.status_msg = format!("Quantize: {}", res.label());
    }

    pub fn cycle_bars(&mut self) {
        let Some(e) = self.engine() else { return };
        let bars = e.bars() % MAX_BARS + 1;
        e.set_bars(bars);
        self.status_msg = format!("Bars: {bars}");
    }

    pub fn cycle_bank(&mut self) {
        let Some(e) = self.engine() else { return };
        let next = e.drums().bank_index() + 1;
        e.set_drum_bank(next);
        self.status_msg = format!("Bank: {}", e.drums().bank().name);
    }

    pub fn toggle_repeat_latch(&mut self) {
        let Some(e) = self.engine() else { return };
        let on = !e.note_repeat().latched;
        e.set_note_repeat_latched(on);
        self.status_msg = format!("Note repeat: {}", if on { "LATCHED" } else { "OFF" });
    }

    pub fn clear_sequence(&mut self) {
        let Some(e) = self.engine() else { return };
        e.clear_sequence();
        self.status_msg = "Sequence cleared".to_string();
    }

    pub fn pitch_up(&mut self) { self.nudge_pitch(1); }
    pub fn pitch_down(&mut self) { self.nudge_pitch(-1); }

    fn nudge_pitch(&mut self, delta: i32) {
        let Some(e) = self.engine() else { return };
        let p = e.pitch() + delta;
        e.set_pitch(p);
        self.status_msg = format!("Pitch: {:+} st", e.pitch());
    }

    /// Stop, clear the sequence and held state, keep the session open.
    pub fn reset(&mut self) {
        let Some(e) = self.engine() else { return };
        e.reset();
        self.playhead.clear();
        self.beat.clear();
        self.count_in = None;
        self.status_msg = "Reset".to_string();
    }

    /// Close the audio session.  Settings carry over to the next one.
    pub fn teardown(&mut self) {
        let Some(session) = self.session.take() else { return };
        let e = &session.engine;
        let t = e.transport();
        self.config.bpm = t.bpm;
        self.config.swing = t.swing;
        self.config.resolution = t.resolution;
        self.config.bars = e.bars();
        self.config.metronome = e.metronome();
        self.config.drum_bank = e.drums().bank_index();
        self.config.pitch_semitones = e.pitch();
        self.config.beats_per_bar = e.beats_per_bar();
        self.config.master_gain = e.master_gain();
        self.pressed_keys.clear();
        self.key_last_seen.clear();
        self.pointer_pad = None;
        self.playhead.clear();
        self.beat.clear();
        self.count_in = None;
        info!("session closed");
        self.status_msg = "Audio closed".to_string();
    }

    // ── Slice boundaries ──────────────────────────────────────────────────

    pub fn boundary_left(&mut self) {
        self.slice_boundary = if self.slice_boundary == 0 { NUM_SLICES - 2 } else { self.slice_boundary - 1 };
    }

    pub fn boundary_right(&mut self) {
        self.slice_boundary = (self.slice_boundary + 1) % (NUM_SLICES - 1);
    }

    pub fn nudge_boundary_later(&mut self) { self.nudge_boundary(NUDGE_SECS); }
    pub fn nudge_boundary_earlier(&mut self) { self.nudge_boundary(-NUDGE_SECS); }

    fn nudge_boundary(&mut self, delta: f64) {
        let index = self.slice_boundary;
        let Some(e) = self.engine() else { return };
        let Some(mut slices) = e.slices().cloned() else {
            self.status_msg = "No sample loaded".to_string();
            return;
        };
        slices.nudge_boundary(index, delta);
        let list: Vec<Slice> = slices.iter().copied().collect();
        let at = list[index].end;
        self.status_msg = match e.set_slices(list) {
            Ok(()) => format!("Slice {}|{} at {:.3}s", index + 1, index + 2, at),
            Err(err) => format!("Slice edit rejected: {err}"),
        };
    }

    // ── Focus ─────────────────────────────────────────────────────────────

    pub fn toggle_mode(&mut self) {
        self.release_all();
        self.mode = match self.mode {
            AppMode::Pads  => AppMode::Drums,
            AppMode::Drums => AppMode::Pads,
        };
        self.status_msg = match self.mode {
            AppMode::Pads  => "Focus: Pads".to_string(),
            AppMode::Drums => "Focus: Drums".to_string(),
        };
    }

    // ── Drum grid ─────────────────────────────────────────────────────────

    pub fn drum_track_up(&mut self) {
        let n = self.engine_ref().map_or(4, |e| e.drums().tracks.len());
        self.drum_track = if self.drum_track == 0 { n - 1 } else { self.drum_track - 1 };
    }

    pub fn drum_track_down(&mut self) {
        let n = self.engine_ref().map_or(4, |e| e.drums().tracks.len());
        self.drum_track = (self.drum_track + 1) % n;
    }

    pub fn drum_step_left(&mut self) {
        self.drum_step = if self.drum_step == 0 { PATTERN_STEPS - 1 } else { self.drum_step - 1 };
    }

    pub fn drum_step_right(&mut self) {
        self.drum_step = (self.drum_step + 1) % PATTERN_STEPS;
    }

    pub fn drum_toggle_step(&mut self) {
        let (track, step) = (self.drum_track, self.drum_step);
        if let Some(e) = self.engine() { e.toggle_drum_step(track, step); }
    }

    pub fn drum_toggle_mute(&mut self) {
        let track = self.drum_track;
        let Some(e) = self.engine() else { return };
        e.toggle_drum_mute(track);
        let t = &e.drums().tracks[track];
        self.status_msg = format!("{} {}", t.kind.name(), if t.muted { "muted" } else { "unmuted" });
    }

    pub fn drum_vol_up(&mut self) { self.nudge_drum_volume(0.05); }
    pub fn drum_vol_down(&mut self) { self.nudge_drum_volume(-0.05); }

    fn nudge_drum_volume(&mut self, delta: f32) {
        let track = self.drum_track;
        let Some(e) = self.engine() else { return };
        let vol = e.drums().tracks[track].volume + delta;
        e.set_drum_volume(track, vol);
        let t = &e.drums().tracks[track];
        self.status_msg = format!("{} vol: {}%", t.kind.name(), (t.volume * 100.0).round() as u32);
    }

    pub fn drum_pitch_up(&mut self) { self.nudge_drum_pitch(1); }
    pub fn drum_pitch_down(&mut self) { self.nudge_drum_pitch(-1); }

    fn nudge_drum_pitch(&mut self, delta: i32) {
        let track = self.drum_track;
        let Some(e) = self.engine() else { return };
        let p = e.drums().tracks[track].pitch + delta;
        e.set_drum_pitch(track, p);
        let t = &e.drums().tracks[track];
        self.status_msg = format!("{} pitch: {:+} st", t.kind.name(), t.pitch);
    }

    pub fn drum_preview(&mut self) {
        let track = self.drum_track;
        if let Some(e) = self.engine() { e.preview_drum(track); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_with_session() -> (App, Arc<Mutex<Mixer>>) {
        let mixer = Arc::new(Mutex::new(Mixer::new(1000.0)));
        let sample = SampleBuffer::new(vec![0.25; 1600], 1000);
        let mut app = App::new(Config::default(), Some(sample));
        app.session = Some(Session::with_mixer(
            Arc::clone(&mixer),
            None,
            &app.config,
            app.sample.as_ref(),
        ));
        (app, mixer)
    }

    #[test]
    fn pad_keys_cover_sixteen_pads() {
        let pads: Vec<usize> = "1234qwerasdfzxcv".chars().filter_map(key_to_pad).collect();
        assert_eq!(pads, (0..16).collect::<Vec<_>>());
        assert_eq!(key_to_pad('Q'), Some(4));
        assert_eq!(key_to_pad('m'), None);
        assert_eq!(pad_key(15), 'v');
    }

    #[test]
    fn playhead_waits_for_the_audio_clock() {
        let mut p = Playhead::default();
        p.push(0, 0.0);
        p.push(1, 0.1);
        p.push(2, 0.2);
        p.advance(0.15);
        assert_eq!(p.step, Some(1));
        p.advance(0.19);
        assert_eq!(p.step, Some(1));
        p.advance(0.2);
        assert_eq!(p.step, Some(2));
        p.clear();
        assert_eq!(p.step, None);
    }

    #[test]
    fn beat_lamp_lights_when_the_beat_sounds() {
        let mut lamp = BeatLamp::default();
        lamp.push(true, 0.5);
        lamp.push(false, 1.0);
        lamp.advance(0.45);
        assert_eq!(lamp.lit(), None);
        lamp.advance(0.5);
        assert_eq!(lamp.lit(), Some(true));
        lamp.advance(0.99);
        assert_eq!(lamp.lit(), Some(true));
        lamp.advance(1.0);
        assert_eq!(lamp.lit(), Some(false));
        lamp.push(true, 1.5);
        lamp.clear();
        lamp.advance(2.0);
        assert_eq!(lamp.lit(), None);
    }

    #[test]
    fn key_and_pointer_holds_are_tracked_separately() {
        let (mut app, _mixer) = app_with_session();
        app.key_press('w');
        app.pointer_down(1);
        let held = app.engine_ref().unwrap().held().snapshot();
        assert_eq!(held, vec![1]);
        app.pointer_up();
        assert!(app.engine_ref().unwrap().held().contains(1));
        app.key_release('w');
        assert!(app.engine_ref().unwrap().held().is_empty());
    }

    #[test]
    fn repeat_key_is_momentary() {
        let (mut app, _mixer) = app_with_session();
        app.key_press(REPEAT_KEY);
        assert!(app.engine_ref().unwrap().note_repeat().momentary);
        app.key_release(REPEAT_KEY);
        assert!(!app.engine_ref().unwrap().note_repeat().active());
    }

    #[test]
    fn nudging_a_boundary_updates_the_engine_slices() {
        let (mut app, _mixer) = app_with_session();
        app.boundary_right();
        app.nudge_boundary_later();
        let slices = app.engine_ref().unwrap().slices().unwrap();
        assert!((slices.get(1).unwrap().end - 0.21).abs() < 1e-9);
        assert_eq!(slices.get(1).unwrap().end, slices.get(2).unwrap().start);
        app.boundary_left();
        app.boundary_left();
        assert_eq!(app.slice_boundary, NUM_SLICES - 2);
    }

    #[test]
    fn teardown_keeps_settings_for_the_next_session() {
        let (mut app, _mixer) = app_with_session();
        app.bpm_up();
        app.cycle_bars();
        let e = app.engine().unwrap();
        e.set_beats_per_bar(3);
        e.set_master_gain(0.5);
        app.teardown();
        assert!(app.session.is_none());
        assert_eq!(app.config.bpm, 95.0);
        assert_eq!(app.config.bars, 5);
        assert_eq!(app.config.beats_per_bar, 3);
        assert_eq!(app.config.master_gain, 0.5);
    }
}
