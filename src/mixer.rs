use std::collections::VecDeque;
use std::sync::Arc;

use crate::drums::{DrumHit, DrumVoice};
use crate::effects::{AudioEffect, Limiter};
use crate::metronome::ClickVoice;
use crate::sample::SampleBuffer;
use crate::voice::{SampleVoice, VoiceManager};

/// Something to start at an exact audio time.
#[derive(Clone, Debug)]
pub enum Cue {
    Slice {
        buffer: Arc<SampleBuffer>,
        index: usize,
        /// Seconds into the buffer.
        start: f64,
        end: f64,
        /// Pitch ratio, `2^(semitones/12)`.
        rate: f64,
    },
    Drum(DrumHit),
    Click { accent: bool },
}

#[derive(Debug)]
struct Scheduled {
    frame: u64,
    cue: Cue,
}

/// Audio-thread side of the engine.
///
/// The sample counter is the audio clock every other component schedules
/// against.  Cues wait in a frame-ordered queue and start on the exact frame
/// they were scheduled for, however late the control side decided on them.
pub struct Mixer {
    pub sample_rate: f32,
    clock: u64,
    queue: VecDeque<Scheduled>,

    voices: VoiceManager,
    drums: Vec<DrumVoice>,
    clicks: Vec<ClickVoice>,

    master_gain: f32,
    limiter: Limiter,
}

impl Mixer {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            clock: 0,
            queue: VecDeque::with_capacity(64),
            voices: VoiceManager::new(),
            drums: Vec::with_capacity(32),
            clicks: Vec::with_capacity(4),
            master_gain: 0.8,
            limiter: Limiter::new(sample_rate),
        }
    }

    /// Current audio time in seconds.
    pub fn now(&self) -> f64 {
        self.clock as f64 / self.sample_rate as f64
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 0.0 };
    }

    /// Queue `cue` to start at audio time `time`.  Times already in the past
    /// start on the next rendered frame.  Cues sharing a frame start in the
    /// order they were scheduled.
    pub fn schedule(&mut self, time: f64, cue: Cue) {
        let frame = if time.is_finite() {
            ((time * self.sample_rate as f64).round().max(0.0) as u64).max(self.clock)
        } else {
            self.clock
        };
        let idx = self.queue.partition_point(|s| s.frame <= frame);
        self.queue.insert(idx, Scheduled { frame, cue });
    }

    /// Drop queued slice cues and fade out the sounding slice.  Drums and
    /// clicks already queued or playing are left to finish.
    pub fn stop_slices(&mut self) {
        self.queue.retain(|s| !matches!(s.cue, Cue::Slice { .. }));
        self.voices.stop();
    }

    /// Silence everything and forget every pending cue.  The clock keeps running.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.voices = VoiceManager::new();
        self.drums.clear();
        self.clicks.clear();
        self.limiter.reset();
    }

    pub fn active_slice(&self) -> Option<usize> {
        self.voices.active_slice()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn start(&mut self, s: Scheduled) {
        let sr = self.sample_rate;
        match s.cue {
            Cue::Slice { buffer, index, start, end, rate } => {
                self.voices.start(SampleVoice::new(buffer, index, start, end, rate, sr));
            }
            Cue::Drum(hit) => self.drums.push(DrumVoice::new(hit, sr)),
            Cue::Click { accent } => self.clicks.push(ClickVoice::new(accent, sr)),
        }
    }

    pub fn generate_sample(&mut self) -> f32 {
        while self.queue.front().is_some_and(|s| s.frame <= self.clock) {
            if let Some(s) = self.queue.pop_front() {
                self.start(s);
            }
        }
        self.clock += 1;

        // ── Master bus: slices + drums through gain and limiter ──────────
        let mut bus = self.voices.next_sample();
        for d in &mut self.drums {
            bus += d.next_sample();
        }
        self.drums.retain(|d| !d.is_finished());
        let bus = self.limiter.process(bus * self.master_gain);

        // ── Metronome: routed around the limiter ─────────────────────────
        let mut click = 0.0f32;
        for c in &mut self.clicks {
            click += c.next_sample();
        }
        self.clicks.retain(|c| !c.is_finished());

        (bus + click).clamp(-1.0, 1.0)
    }

    /// Fill a mono buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        for s in out.iter_mut() {
            *s = self.generate_sample();
        }
    }

    /// Render and discard frames until the clock reaches `time`.
    #[cfg(test)]
    pub fn run_until(&mut self, time: f64) {
        let target = (time * self.sample_rate as f64).round() as u64;
        while self.clock < target {
            self.generate_sample();
        }
    }
}
