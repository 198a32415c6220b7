use std::sync::Arc;

use crate::sample::SampleBuffer;

/// Linear fade applied when a voice is cut by the mute group.
pub const FADE_SECS: f32 = 0.005;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    Playing,
    Fading,
    Finished,
}

/// One playing slice.  Reads `[start, end)` of the shared buffer at `rate`
/// buffer frames per output sample.
#[derive(Clone, Debug)]
pub struct SampleVoice {
    buffer: Arc<SampleBuffer>,
    pub slice_index: usize,
    pos: f64,
    end: f64,
    rate: f64,
    gain: f32,
    fade_step: f32,
    state: VoiceState,
}

impl SampleVoice {
    /// `start`/`end` are seconds into the buffer; `playback_rate` is the pitch
    /// ratio (`2^(semitones/12)`).  The buffer/output rate mismatch is folded
    /// into the read increment.
    pub fn new(
        buffer: Arc<SampleBuffer>,
        slice_index: usize,
        start: f64,
        end: f64,
        playback_rate: f64,
        output_rate: f32,
    ) -> Self {
        let src_rate = buffer.sample_rate() as f64;
        let limit = buffer.len() as f64;
        let pos = (start.max(0.0) * src_rate).min(limit);
        let end = (end.max(0.0) * src_rate).min(limit);
        let rate = playback_rate.max(1e-3) * src_rate / output_rate.max(1.0) as f64;
        Self {
            buffer,
            slice_index,
            pos,
            end,
            rate,
            gain: 1.0,
            fade_step: 1.0 / (FADE_SECS * output_rate.max(1.0)),
            state: if pos < end { VoiceState::Playing } else { VoiceState::Finished },
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == VoiceState::Finished
    }

    /// Begin the short fade-out.  Already fading or finished voices are left alone.
    pub fn fade_out(&mut self) {
        if self.state == VoiceState::Playing {
            self.state = VoiceState::Fading;
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        if self.state == VoiceState::Finished {
            return 0.0;
        }
        if self.pos >= self.end {
            self.state = VoiceState::Finished;
            return 0.0;
        }
        let s = self.buffer.read(self.pos) * self.gain;
        self.pos += self.rate;
        if self.state == VoiceState::Fading {
            self.gain -= self.fade_step;
            if self.gain <= 0.0 {
                self.gain = 0.0;
                self.state = VoiceState::Finished;
            }
        }
        s
    }
}

// ── Mute group ────────────────────────────────────────────────────────────────

/// At most one slice voice is active.  Starting a new one moves the previous
/// one into `releasing`, where it fades out and is dropped.
#[derive(Debug, Default)]
pub struct VoiceManager {
    active: Option<SampleVoice>,
    releasing: Vec<SampleVoice>,
}

impl VoiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, voice: SampleVoice) {
        self.stop();
        self.active = Some(voice);
    }

    /// Fade out the active voice.  Stopping nothing, or a voice that already
    /// finished, is fine.
    pub fn stop(&mut self) {
        if let Some(mut old) = self.active.take() {
            if !old.is_finished() {
                old.fade_out();
                self.releasing.push(old);
            }
        }
    }

    pub fn active_slice(&self) -> Option<usize> {
        self.active.as_ref().map(|v| v.slice_index)
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.releasing.is_empty()
    }

    pub fn next_sample(&mut self) -> f32 {
        let mut mix = 0.0;
        if let Some(v) = self.active.as_mut() {
            mix += v.next_sample();
        }
        for v in &mut self.releasing {
            mix += v.next_sample();
        }
        self.releasing.retain(|v| !v.is_finished());
        // Natural completion clears the active slot.
        if self.active.as_ref().is_some_and(|v| v.is_finished()) {
            self.active = None;
        }
        mix
    }
}
