//! The engine context: transport, step dispatch, recording, note repeat and
//! count-in.
//!
//! Everything here runs on the control thread and is driven by [`Engine::pump`].
//! Audio is never started "now": every sound is handed to the [`Mixer`] with
//! the audio-clock time it must start at.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::clock::{self, Swing, STEPS_PER_BEAT};
use crate::drums::{DrumKit, MAX_PITCH, MIN_PITCH, PATTERN_STEPS};
use crate::error::SliceError;
use crate::mixer::{Cue, Mixer};
use crate::sample::SampleBuffer;
use crate::scheduler::{self, TimerHandle, TimerKind, Timers, WAKE_INTERVAL};
use crate::sequence::{self, Resolution, Sequence, Slice, Slices, Slot, NUM_SLICES};
use crate::transport::{TransportMode, TransportState};

pub const COUNT_IN_BEATS: usize = 4;
pub const MIN_BARS: usize = 1;
pub const MAX_BARS: usize = 8;

/// Notifications for the front end.  Sent with `try_send`; a full channel
/// drops them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EngineEvent {
    Step { step: usize, time: f64 },
    Beat { beat: usize, accent: bool, time: f64 },
    Recorded { step: usize, slice: usize },
    CountIn { remaining: usize, time: f64 },
    Transport(TransportMode),
}

// ── Held pads ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSource {
    Pointer,
    Key,
}

/// Pads held by each input source.  The two sets are only combined when read,
/// so releasing a pad on one source never releases it on the other.
#[derive(Clone, Debug, Default)]
pub struct HeldPads {
    pointer: BTreeSet<usize>,
    keys: BTreeSet<usize>,
}

impl HeldPads {
    fn set(&mut self, source: InputSource) -> &mut BTreeSet<usize> {
        match source {
            InputSource::Pointer => &mut self.pointer,
            InputSource::Key     => &mut self.keys,
        }
    }

    pub fn press(&mut self, source: InputSource, pad: usize) {
        self.set(source).insert(pad);
    }

    pub fn release(&mut self, source: InputSource, pad: usize) {
        self.set(source).remove(&pad);
    }

    pub fn clear(&mut self) {
        self.pointer.clear();
        self.keys.clear();
    }

    pub fn contains(&self, pad: usize) -> bool {
        self.pointer.contains(&pad) || self.keys.contains(&pad)
    }

    pub fn is_empty(&self) -> bool {
        self.pointer.is_empty() && self.keys.is_empty()
    }

    /// Ascending union of both sources.
    pub fn snapshot(&self) -> Vec<usize> {
        self.pointer.union(&self.keys).copied().collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoteRepeat {
    pub latched: bool,
    pub momentary: bool,
}

impl NoteRepeat {
    pub fn active(&self) -> bool {
        self.latched || self.momentary
    }
}

#[derive(Debug)]
struct CountIn {
    start: f64,
    beat_secs: f64,
    next_tick: usize,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    mixer: Arc<Mutex<Mixer>>,
    events: Sender<EngineEvent>,

    transport: TransportState,
    bars: usize,
    beats_per_bar: usize,
    sequence: Sequence,
    drums: DrumKit,

    sample: Option<Arc<SampleBuffer>>,
    slices: Option<Slices>,
    pitch: i32,

    held: HeldPads,
    repeat: NoteRepeat,
    metronome: bool,

    timers: Timers,
    scheduler_timer: Option<TimerHandle>,
    count_in_timer: Option<TimerHandle>,
    count_in: Option<CountIn>,
}

impl Engine {
    pub fn new(mixer: Arc<Mutex<Mixer>>, events: Sender<EngineEvent>) -> Self {
        let bars = 4;
        let beats_per_bar = 4;
        Self {
            mixer,
            events,
            transport: TransportState::new(90.0, Swing::Straight, Resolution::ThirtySecond),
            bars,
            beats_per_bar,
            sequence: Sequence::new(bars, beats_per_bar),
            drums: DrumKit::new(),
            sample: None,
            slices: None,
            pitch: 0,
            held: HeldPads::default(),
            repeat: NoteRepeat::default(),
            metronome: true,
            timers: Timers::new(),
            scheduler_timer: None,
            count_in_timer: None,
            count_in: None,
        }
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.try_send(event);
    }

    fn schedule_cues(&self, cues: Vec<(f64, Cue)>) {
        if cues.is_empty() {
            return;
        }
        let mut mixer = self.mixer();
        for (time, cue) in cues {
            mixer.schedule(time, cue);
        }
    }

    pub fn audio_now(&self) -> f64 {
        self.mixer().now()
    }

    /// Slice the voice manager is currently playing.
    pub fn sounding_slice(&self) -> Option<usize> {
        self.mixer().active_slice()
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn transport(&self) -> &TransportState { &self.transport }
    pub fn sequence(&self) -> &Sequence { &self.sequence }
    pub fn drums(&self) -> &DrumKit { &self.drums }
    pub fn held(&self) -> &HeldPads { &self.held }
    pub fn note_repeat(&self) -> NoteRepeat { self.repeat }
    pub fn metronome(&self) -> bool { self.metronome }
    pub fn pitch(&self) -> i32 { self.pitch }
    pub fn bars(&self) -> usize { self.bars }
    pub fn beats_per_bar(&self) -> usize { self.beats_per_bar }
    pub fn sample(&self) -> Option<&Arc<SampleBuffer>> { self.sample.as_ref() }
    pub fn slices(&self) -> Option<&Slices> { self.slices.as_ref() }

    pub fn loop_duration(&self) -> f64 {
        clock::loop_duration(self.transport.bpm, self.beats_per_bar, self.bars)
    }

    /// Fraction of the current loop pass that has sounded, in `[0, 1)`.
    pub fn loop_progress(&self) -> f64 {
        if !self.transport.playing() {
            return 0.0;
        }
        let elapsed = self.audio_now() - self.transport.loop_start_time;
        (elapsed / self.loop_duration()).rem_euclid(1.0)
    }

    /// Wall time until the next timer is due.
    pub fn next_wake(&self) -> Option<Duration> {
        self.timers.next_due()
    }

    // ── Timer pump ────────────────────────────────────────────────────────

    /// Run every timer due at wall time `now`.
    pub fn pump(&mut self, now: Duration) {
        self.timers.advance(now);
        while let Some((handle, kind)) = self.timers.pop_due() {
            match kind {
                TimerKind::Scheduler if self.scheduler_timer == Some(handle) => {
                    self.scheduler_timer = None;
                    if self.transport.playing() {
                        self.run_scheduler();
                    }
                }
                TimerKind::CountIn if self.count_in_timer == Some(handle) => {
                    self.count_in_timer = None;
                    if self.transport.counting_in() {
                        self.run_count_in();
                    }
                }
                _ => {}
            }
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(h) = self.scheduler_timer.take() {
            self.timers.cancel(h);
        }
        if let Some(h) = self.count_in_timer.take() {
            self.timers.cancel(h);
        }
    }

    // ── Look-ahead scheduler + step dispatch ──────────────────────────────

    fn run_scheduler(&mut self) {
        let horizon = self.audio_now() + scheduler::schedule_ahead_secs();
        let mut cues = Vec::new();
        while self.transport.next_step_time < horizon {
            let step = self.transport.current_step;
            let time = self.transport.next_step_time;
            self.dispatch(step, time, &mut cues);
            self.transport.advance(self.sequence.len());
        }
        self.schedule_cues(cues);
        self.scheduler_timer = Some(self.timers.schedule_after(WAKE_INTERVAL, TimerKind::Scheduler));
    }

    fn dispatch(&mut self, step: usize, time: f64, cues: &mut Vec<(f64, Cue)>) {
        self.emit(EngineEvent::Step { step, time });

        if let Slot::Slice(index) = self.sequence.get(step) {
            if let Some(cue) = self.slice_cue(index) {
                cues.push((time, cue));
            }
        }

        if step % 2 == 0 {
            let column = (step / 2) % PATTERN_STEPS;
            cues.extend(self.drums.hits_at(column).map(|hit| (time, Cue::Drum(hit))));
        }

        if step % STEPS_PER_BEAT == 0 {
            let beat = step / STEPS_PER_BEAT;
            let accent = beat % self.beats_per_bar == 0;
            if self.metronome {
                cues.push((time, Cue::Click { accent }));
            }
            self.emit(EngineEvent::Beat { beat, accent, time });
        }

        // Repeats sound on every step; the quantize grid only limits where
        // they are written.
        if self.repeat.active() {
            let writable = self.transport.recording() && self.transport.resolution.accepts(step);
            for pad in self.held.snapshot() {
                if let Some(cue) = self.slice_cue(pad) {
                    cues.push((time, cue));
                    if writable {
                        self.write_step(step, pad);
                    }
                }
            }
        }
    }

    fn slice_cue(&self, index: usize) -> Option<Cue> {
        let buffer = self.sample.as_ref()?;
        let slice = self.slices.as_ref()?.get(index)?;
        Some(Cue::Slice {
            buffer: Arc::clone(buffer),
            index,
            start: slice.start,
            end: slice.end,
            rate: 2f64.powf(self.pitch as f64 / 12.0),
        })
    }

    fn write_step(&mut self, step: usize, slice: usize) {
        self.sequence.set(step, slice);
        self.emit(EngineEvent::Recorded { step, slice });
    }

    // ── Transport ─────────────────────────────────────────────────────────

    pub fn play(&mut self) {
        if self.transport.playing() || self.transport.counting_in() {
            return;
        }
        let now = self.audio_now();
        self.transport.start(now, false);
        info!(bpm = self.transport.bpm, at = now, "playback started");
        self.emit(EngineEvent::Transport(self.transport.mode));
        self.run_scheduler();
    }

    pub fn stop(&mut self) {
        if self.transport.mode == TransportMode::Stopped {
            return;
        }
        self.cancel_timers();
        self.count_in = None;
        self.transport.stop();
        self.mixer().stop_slices();
        self.held.clear();
        self.repeat.momentary = false;
        info!("transport stopped");
        self.emit(EngineEvent::Transport(self.transport.mode));
    }

    pub fn toggle_play(&mut self) {
        if self.transport.mode == TransportMode::Stopped {
            self.play();
        } else {
            self.stop();
        }
    }

    /// Arm or disarm recording.  While playing this toggles overdub; while
    /// stopped it starts the count-in; during the count-in it cancels.
    pub fn record(&mut self) {
        match self.transport.mode {
            TransportMode::Playing { recording } => {
                self.transport.mode = TransportMode::Playing { recording: !recording };
                info!(recording = !recording, "overdub toggled");
                self.emit(EngineEvent::Transport(self.transport.mode));
            }
            TransportMode::CountingIn => self.stop(),
            TransportMode::Stopped => self.start_count_in(),
        }
    }

    fn start_count_in(&mut self) {
        let start = self.audio_now();
        self.count_in = Some(CountIn {
            start,
            beat_secs: clock::seconds_per_beat(self.transport.bpm),
            next_tick: 0,
        });
        self.transport.mode = TransportMode::CountingIn;
        info!(at = start, "count-in started");
        self.emit(EngineEvent::Transport(self.transport.mode));
        self.run_count_in();
    }

    fn run_count_in(&mut self) {
        let horizon = self.audio_now() + scheduler::schedule_ahead_secs();
        let Some(ci) = self.count_in.as_mut() else { return };

        let mut cues = Vec::new();
        let mut ticks = Vec::new();
        while ci.next_tick < COUNT_IN_BEATS {
            let time = ci.start + ci.next_tick as f64 * ci.beat_secs;
            if time >= horizon {
                break;
            }
            cues.push((time, Cue::Click { accent: ci.next_tick == 0 }));
            ticks.push(EngineEvent::CountIn { remaining: COUNT_IN_BEATS - ci.next_tick, time });
            ci.next_tick += 1;
        }
        let handoff = ci.start + COUNT_IN_BEATS as f64 * ci.beat_secs;
        let done = ci.next_tick == COUNT_IN_BEATS && handoff < horizon;

        self.schedule_cues(cues);
        for t in ticks {
            self.emit(t);
        }

        if done {
            // Step 0 lands exactly one beat after the last tick.
            self.count_in = None;
            self.transport.start(handoff, true);
            info!(at = handoff, "count-in finished, recording");
            self.emit(EngineEvent::Transport(self.transport.mode));
            self.run_scheduler();
        } else {
            self.count_in_timer = Some(self.timers.schedule_after(WAKE_INTERVAL, TimerKind::CountIn));
        }
    }

    // ── Pads ──────────────────────────────────────────────────────────────

    /// A pad was pressed.  It sounds now and, while recording, is written to
    /// the quantized step.  Without a sample this does nothing.
    pub fn pad_down(&mut self, source: InputSource, pad: usize) {
        if pad >= NUM_SLICES {
            return;
        }
        self.held.press(source, pad);
        let Some(cue) = self.slice_cue(pad) else { return };
        let now = {
            let mut mixer = self.mixer();
            let now = mixer.now();
            mixer.schedule(now, cue);
            now
        };
        if self.transport.recording() {
            let elapsed = now - self.transport.loop_start_time;
            let step = sequence::quantize(
                elapsed,
                self.transport.bpm,
                self.transport.resolution,
                self.sequence.len(),
            );
            debug!(pad, step, elapsed, "recorded");
            self.write_step(step, pad);
        }
    }

    pub fn pad_up(&mut self, source: InputSource, pad: usize) {
        self.held.release(source, pad);
    }

    pub fn release_all_pads(&mut self) {
        self.held.clear();
    }

    pub fn set_note_repeat_latched(&mut self, on: bool) {
        self.repeat.latched = on;
    }

    pub fn set_note_repeat_momentary(&mut self, on: bool) {
        self.repeat.momentary = on;
    }

    // ── Parameters ────────────────────────────────────────────────────────

    pub fn set_bpm(&mut self, bpm: f64) {
        self.transport.set_bpm(bpm);
    }

    pub fn set_swing(&mut self, swing: Swing) {
        self.transport.swing = swing;
    }

    pub fn set_resolution(&mut self, resolution: Resolution) {
        self.transport.resolution = resolution;
    }

    pub fn set_pitch(&mut self, semitones: i32) {
        self.pitch = semitones.clamp(MIN_PITCH, MAX_PITCH);
    }

    pub fn set_metronome(&mut self, on: bool) {
        self.metronome = on;
    }

    pub fn master_gain(&self) -> f32 {
        self.mixer().master_gain()
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.mixer().set_master_gain(gain);
    }

    pub fn set_bars(&mut self, bars: usize) {
        self.bars = bars.clamp(MIN_BARS, MAX_BARS);
        self.resize_sequence();
    }

    pub fn set_beats_per_bar(&mut self, beats: usize) {
        self.beats_per_bar = beats.clamp(1, 16);
        self.resize_sequence();
    }

    fn resize_sequence(&mut self) {
        self.sequence.resize(self.bars, self.beats_per_bar);
        if self.transport.current_step >= self.sequence.len() {
            self.transport.current_step = 0;
            self.transport.loop_start_time = self.transport.next_step_time;
        }
    }

    pub fn set_drum_bank(&mut self, index: usize) {
        self.drums.set_bank(index);
    }

    pub fn set_drum_volume(&mut self, track: usize, volume: f32) {
        self.drums.set_volume(track, volume);
    }

    pub fn set_drum_pitch(&mut self, track: usize, semitones: i32) {
        self.drums.set_pitch(track, semitones);
    }

    pub fn toggle_drum_step(&mut self, track: usize, column: usize) {
        self.drums.toggle_step(track, column);
    }

    pub fn toggle_drum_mute(&mut self, track: usize) {
        self.drums.toggle_mute(track);
    }

    /// Fire one drum hit now.  Muted tracks stay silent.
    pub fn preview_drum(&mut self, track: usize) {
        if self.drums.tracks.get(track).map_or(true, |t| t.muted) {
            return;
        }
        if let Some(hit) = self.drums.hit(track) {
            let mut mixer = self.mixer();
            let now = mixer.now();
            mixer.schedule(now, Cue::Drum(hit));
        }
    }

    pub fn clear_sequence(&mut self) {
        self.sequence.clear();
    }

    // ── Sample + slices ───────────────────────────────────────────────────

    /// Swap in a new sample, cut into sixteen even slices.
    pub fn load_sample(&mut self, buffer: SampleBuffer) {
        info!(secs = buffer.duration(), rate = buffer.sample_rate(), "sample loaded");
        self.slices = Some(Slices::even(buffer.duration()));
        self.sample = Some(Arc::new(buffer));
        self.mixer().stop_slices();
    }

    /// Replace the slice boundaries.  Takes effect from the next trigger.
    pub fn set_slices(&mut self, slices: Vec<Slice>) -> Result<(), SliceError> {
        let slices = Slices::try_from(slices)?;
        if let Some(buffer) = &self.sample {
            if let Some(index) = slices.first_past(buffer.duration()) {
                return Err(SliceError::OutOfBuffer { index });
            }
        }
        self.slices = Some(slices);
        Ok(())
    }

    /// Stop and return to an empty session.  Sample, drums and tempo are kept.
    pub fn reset(&mut self) {
        self.stop();
        self.timers.cancel_all();
        self.sequence.clear();
        self.held.clear();
        self.repeat = NoteRepeat::default();
        self.mixer().reset();
        info!("engine reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};

    const SR: f32 = 1000.0;

    struct Rig {
        engine: Engine,
        mixer: Arc<Mutex<Mixer>>,
        events: Receiver<EngineEvent>,
        wall: Duration,
    }

    impl Rig {
        fn new() -> Self {
            let mixer = Arc::new(Mutex::new(Mixer::new(SR)));
            let (tx, rx) = unbounded();
            let mut engine = Engine::new(Arc::clone(&mixer), tx);
            engine.set_bpm(120.0);
            engine.set_metronome(false);
            Self { engine, mixer, events: rx, wall: Duration::ZERO }
        }

        fn with_sample() -> Self {
            let mut rig = Self::new();
            // 1.6 s of silence-free audio: slices are 0.1 s long.
            rig.engine.load_sample(SampleBuffer::new(vec![0.5; 1600], 1000));
            rig
        }

        /// Advance audio and wall time together, pumping every millisecond.
        fn run_ms(&mut self, ms: u64) {
            for _ in 0..ms {
                {
                    let mut m = self.mixer.lock().unwrap();
                    m.generate_sample();
                }
                self.wall += Duration::from_millis(1);
                self.engine.pump(self.wall);
            }
        }

        fn drain(&self) -> Vec<EngineEvent> {
            self.events.try_iter().collect()
        }

        fn steps(&self) -> Vec<(usize, f64)> {
            self.drain()
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::Step { step, time } => Some((step, time)),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn play_schedules_only_inside_the_horizon() {
        let mut rig = Rig::new();
        rig.engine.play();
        // 32nd = 62.5 ms at 120 bpm; horizon is 100 ms.
        assert_eq!(rig.steps(), vec![(0, 0.0), (1, 0.0625)]);
        // The wake at 25 ms sees nothing new; the one at 50 ms reaches step 2.
        rig.run_ms(55);
        assert_eq!(rig.steps(), vec![(2, 0.125)]);
        assert_eq!(rig.engine.next_wake(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn step_times_increase_and_wrap_into_range() {
        let mut rig = Rig::new();
        rig.engine.set_bars(1);
        rig.engine.set_swing(Swing::Heavy);
        rig.engine.play();
        rig.run_ms(4500);
        let steps = rig.steps();
        assert!(steps.len() > 64);
        for w in steps.windows(2) {
            assert!(w[1].1 > w[0].1);
            assert_eq!(w[1].0, (w[0].0 + 1) % 32);
        }
        assert!(steps.iter().all(|(s, _)| *s < 32));
        // Loop origin re-pinned on each wrap: one bar at 120 bpm is 2 s.
        let t = rig.engine.transport();
        assert!((t.loop_start_time - 4.0).abs() < 1e-9);
    }

    #[test]
    fn resolution_change_while_playing_leaves_the_clock_alone() {
        let mut rig = Rig::new();
        rig.engine.set_bars(1);
        rig.engine.play();
        rig.run_ms(700);
        let loop_len = rig.engine.loop_duration();
        let origin = rig.engine.transport().loop_start_time;
        rig.engine.set_resolution(Resolution::Sixteenth);
        rig.drain();
        rig.run_ms(1500);
        rig.engine.set_resolution(Resolution::ThirtySecond);
        rig.run_ms(500);
        let steps = rig.steps();
        assert!(steps.len() > 30);
        for w in steps.windows(2) {
            assert!((w[1].1 - w[0].1 - 0.0625).abs() < 1e-9);
        }
        // Every step stays on the straight grid from the first play.
        for (step, time) in &steps {
            let k = (time / 0.0625).round();
            assert!((time - k * 0.0625).abs() < 1e-9);
            assert_eq!(*step, k as usize % 32);
        }
        assert_eq!(rig.engine.loop_duration(), loop_len);
        assert!((loop_len - 2.0).abs() < 1e-9);
        assert!((rig.engine.transport().loop_start_time - (origin + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn play_while_playing_and_stop_while_stopped_are_no_ops() {
        let mut rig = Rig::new();
        rig.engine.stop();
        rig.engine.play();
        rig.run_ms(50);
        let origin = rig.engine.transport().loop_start_time;
        rig.engine.play();
        assert_eq!(rig.engine.transport().loop_start_time, origin);
        let transports = rig
            .drain()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Transport(_)))
            .count();
        assert_eq!(transports, 1);
    }

    #[test]
    fn stop_cancels_the_scheduler_and_clears_held_pads() {
        let mut rig = Rig::with_sample();
        rig.engine.play();
        rig.engine.set_note_repeat_momentary(true);
        rig.engine.pad_down(InputSource::Key, 3);
        rig.run_ms(100);
        rig.engine.stop();
        rig.drain();
        assert_eq!(rig.engine.next_wake(), None);
        assert!(rig.engine.held().is_empty());
        assert!(!rig.engine.note_repeat().active());
        rig.run_ms(200);
        assert!(rig.steps().is_empty());
        assert_eq!(rig.mixer.lock().unwrap().active_slice(), None);
    }

    #[test]
    fn count_in_ticks_four_times_then_records_from_the_next_beat() {
        let mut rig = Rig::new();
        rig.run_ms(10);
        rig.engine.record();
        assert!(rig.engine.transport().counting_in());
        rig.run_ms(2100);

        let events = rig.drain();
        let ticks: Vec<(usize, f64)> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::CountIn { remaining, time } => Some((*remaining, *time)),
                _ => None,
            })
            .collect();
        let t0 = 0.01;
        assert_eq!(ticks.len(), 4);
        for (k, (remaining, time)) in ticks.iter().enumerate() {
            assert_eq!(*remaining, 4 - k);
            assert!((time - (t0 + k as f64 * 0.5)).abs() < 1e-9);
        }

        let t = rig.engine.transport();
        assert!(t.recording());
        let handoff = t0 + 4.0 * 0.5;
        assert!((t.loop_start_time - handoff).abs() < 1e-9);
        let first = events.iter().find_map(|e| match e {
            EngineEvent::Step { step, time } => Some((*step, *time)),
            _ => None,
        });
        assert_eq!(first.map(|(s, _)| s), Some(0));
        assert!((first.unwrap().1 - handoff).abs() < 1e-9);
    }

    #[test]
    fn record_while_playing_overdubs_without_count_in() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.run_ms(100);
        rig.engine.record();
        assert!(rig.engine.transport().recording());
        rig.run_ms(600);
        assert!(!rig.drain().iter().any(|e| matches!(e, EngineEvent::CountIn { .. })));
        rig.engine.record();
        assert!(rig.engine.transport().playing() && !rig.engine.transport().recording());
    }

    #[test]
    fn record_during_count_in_cancels_it() {
        let mut rig = Rig::new();
        rig.engine.record();
        rig.run_ms(300);
        rig.engine.record();
        assert_eq!(rig.engine.transport().mode, TransportMode::Stopped);
        assert_eq!(rig.engine.next_wake(), None);
    }

    #[test]
    fn pads_are_recorded_to_the_quantized_step() {
        let mut rig = Rig::with_sample();
        rig.engine.play();
        rig.engine.record();
        rig.run_ms(300);
        // 300 ms / 62.5 ms = 4.8 steps.
        rig.engine.pad_down(InputSource::Pointer, 5);
        assert_eq!(rig.engine.sequence().get(5), Slot::Slice(5));

        rig.engine.set_resolution(Resolution::Sixteenth);
        rig.engine.pad_down(InputSource::Key, 6);
        assert_eq!(rig.engine.sequence().get(4), Slot::Slice(6));
        assert!(rig
            .drain()
            .contains(&EngineEvent::Recorded { step: 4, slice: 6 }));
    }

    #[test]
    fn pads_without_a_sample_do_nothing() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.engine.record();
        rig.run_ms(100);
        rig.engine.pad_down(InputSource::Key, 2);
        rig.engine.pad_down(InputSource::Key, 99);
        assert!(rig.engine.sequence().slots().iter().all(|s| *s == Slot::Empty));
        assert_eq!(rig.mixer.lock().unwrap().pending(), 0);
    }

    #[test]
    fn recorded_slots_play_back_on_the_next_pass() {
        let mut rig = Rig::with_sample();
        rig.engine.set_bars(1);
        rig.engine.play();
        rig.engine.record();
        rig.run_ms(300);
        rig.engine.pad_down(InputSource::Key, 3);
        rig.engine.pad_up(InputSource::Key, 3);
        rig.engine.record();
        rig.run_ms(300);
        assert_eq!(rig.mixer.lock().unwrap().active_slice(), None);
        // Step 5 of the second pass sounds at 2.3125 s.
        rig.run_ms(2000 - 600 + 320);
        assert_eq!(rig.mixer.lock().unwrap().active_slice(), Some(3));
    }

    #[test]
    fn note_repeat_writes_the_highest_held_pad() {
        let mut rig = Rig::with_sample();
        rig.engine.play();
        rig.engine.record();
        rig.engine.set_note_repeat_latched(true);
        rig.engine.pad_down(InputSource::Pointer, 2);
        rig.engine.pad_down(InputSource::Key, 9);
        rig.drain();
        rig.run_ms(500);
        let steps = rig.steps();
        assert!(!steps.is_empty());
        for (step, _) in steps {
            assert_eq!(rig.engine.sequence().get(step), Slot::Slice(9));
        }
        // Releasing on one source keeps the other's hold.
        rig.engine.pad_down(InputSource::Key, 2);
        rig.engine.pad_up(InputSource::Pointer, 2);
        assert!(rig.engine.held().contains(2));
    }

    #[test]
    fn note_repeat_sounds_every_step_but_records_on_the_coarse_grid() {
        let mut rig = Rig::with_sample();
        rig.engine.set_resolution(Resolution::Sixteenth);
        rig.engine.set_note_repeat_latched(true);
        rig.engine.pad_down(InputSource::Key, 1);
        rig.engine.play();
        // The press itself plus a retrigger on steps 0 and 1.
        assert_eq!(rig.mixer.lock().unwrap().pending(), 3);
        rig.engine.record();
        rig.run_ms(1000);
        // Steps 0 and 1 were dispatched before recording was armed.
        let slots = rig.engine.sequence().slots();
        assert!(slots[2..17].iter().step_by(2).all(|s| *s == Slot::Slice(1)));
        assert!(slots.iter().skip(1).step_by(2).all(|s| *s == Slot::Empty));
    }

    #[test]
    fn beats_are_accented_on_the_downbeat() {
        let mut rig = Rig::new();
        rig.engine.set_metronome(true);
        rig.engine.play();
        rig.run_ms(2100);
        let beats: Vec<(usize, bool)> = rig
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Beat { beat, accent, .. } => Some((beat, accent)),
                _ => None,
            })
            .collect();
        assert_eq!(&beats[..5], &[(0, true), (1, false), (2, false), (3, false), (4, true)]);
    }

    #[test]
    fn drum_pattern_fires_on_its_column_and_respects_mute() {
        let mut rig = Rig::new();
        rig.engine.toggle_drum_step(0, 0);
        rig.engine.play();
        assert_eq!(rig.mixer.lock().unwrap().pending(), 1);
        rig.engine.stop();

        let mut rig = Rig::new();
        rig.engine.toggle_drum_step(0, 0);
        rig.engine.toggle_drum_mute(0);
        rig.engine.play();
        assert_eq!(rig.mixer.lock().unwrap().pending(), 0);
        rig.engine.preview_drum(0);
        assert_eq!(rig.mixer.lock().unwrap().pending(), 0);
        rig.engine.preview_drum(1);
        assert_eq!(rig.mixer.lock().unwrap().pending(), 1);
    }

    #[test]
    fn clearing_leaves_drums_and_transport_alone() {
        let mut rig = Rig::with_sample();
        rig.engine.toggle_drum_step(1, 3);
        rig.engine.play();
        rig.engine.record();
        rig.run_ms(200);
        rig.engine.pad_down(InputSource::Key, 0);
        let step = rig.engine.transport().current_step;
        rig.engine.clear_sequence();
        assert!(rig.engine.sequence().slots().iter().all(|s| *s == Slot::Empty));
        assert!(rig.engine.drums().tracks[1].steps[3]);
        assert!(rig.engine.transport().recording());
        assert_eq!(rig.engine.transport().current_step, step);
    }

    #[test]
    fn bars_resize_the_sequence_and_wrap_the_position() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.run_ms(3000);
        assert!(rig.engine.transport().current_step >= 32);
        rig.engine.set_bars(1);
        assert_eq!(rig.engine.sequence().len(), 32);
        assert_eq!(rig.engine.transport().current_step, 0);
        rig.engine.set_bars(0);
        assert_eq!(rig.engine.bars(), MIN_BARS);
        rig.engine.set_bars(20);
        assert_eq!(rig.engine.sequence().len(), MAX_BARS * 4 * 8);
    }

    #[test]
    fn parameters_are_clamped() {
        let mut rig = Rig::new();
        rig.engine.set_bpm(2.0);
        assert_eq!(rig.engine.transport().bpm, clock::MIN_BPM);
        rig.engine.set_pitch(-30);
        assert_eq!(rig.engine.pitch(), MIN_PITCH);
        rig.engine.set_drum_bank(7);
        assert_eq!(rig.engine.drums().bank_index(), 1);
    }

    #[test]
    fn slice_updates_are_validated() {
        let mut rig = Rig::with_sample();
        let mut slices: Vec<Slice> = Slices::even(1.6).iter().copied().collect();
        slices[15].end = 5.0;
        assert_eq!(
            rig.engine.set_slices(slices.clone()),
            Err(SliceError::OutOfBuffer { index: 15 })
        );
        slices[15].end = 1.6;
        slices[3].end = 0.35;
        slices[4].start = 0.35;
        assert_eq!(rig.engine.set_slices(slices), Ok(()));
        assert_eq!(rig.engine.slices().and_then(|s| s.get(3)).map(|s| s.end), Some(0.35));
    }

    #[test]
    fn reset_returns_to_an_empty_stopped_session() {
        let mut rig = Rig::with_sample();
        rig.engine.play();
        rig.engine.record();
        rig.engine.set_note_repeat_latched(true);
        rig.engine.pad_down(InputSource::Key, 4);
        rig.run_ms(200);
        rig.engine.reset();
        assert_eq!(rig.engine.transport().mode, TransportMode::Stopped);
        assert!(rig.engine.sequence().slots().iter().all(|s| *s == Slot::Empty));
        assert!(!rig.engine.note_repeat().active());
        assert!(rig.engine.sample().is_some());
        assert_eq!(rig.mixer.lock().unwrap().pending(), 0);
    }
}
