use crate::clock::{self, Swing};
use crate::sequence::Resolution;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    Stopped,
    CountingIn,
    Playing { recording: bool },
}

/// Playback position and tempo.  Every time field is on the audio clock.
#[derive(Clone, Debug)]
pub struct TransportState {
    pub bpm: f64,
    pub swing: Swing,
    pub resolution: Resolution,
    pub mode: TransportMode,
    pub current_step: usize,
    /// Audio time at which `current_step` sounds.
    pub next_step_time: f64,
    /// Audio time of step 0 of the current loop pass.
    pub loop_start_time: f64,
}

impl TransportState {
    pub fn new(bpm: f64, swing: Swing, resolution: Resolution) -> Self {
        Self {
            bpm: clock::clamp_bpm(bpm),
            swing,
            resolution,
            mode: TransportMode::Stopped,
            current_step: 0,
            next_step_time: 0.0,
            loop_start_time: 0.0,
        }
    }

    pub fn playing(&self) -> bool {
        matches!(self.mode, TransportMode::Playing { .. })
    }

    pub fn recording(&self) -> bool {
        matches!(self.mode, TransportMode::Playing { recording: true })
    }

    pub fn counting_in(&self) -> bool {
        self.mode == TransportMode::CountingIn
    }

    /// Start playback with step 0 sounding at `at`.
    pub fn start(&mut self, at: f64, recording: bool) {
        self.mode = TransportMode::Playing { recording };
        self.current_step = 0;
        self.next_step_time = at;
        self.loop_start_time = at;
    }

    pub fn stop(&mut self) {
        self.mode = TransportMode::Stopped;
        self.current_step = 0;
    }

    /// Move to the next step.  On wrap the loop origin is re-pinned to the time
    /// the new step 0 sounds.
    pub fn advance(&mut self, total_steps: usize) {
        self.next_step_time += clock::step_interval(self.current_step, self.bpm, self.swing);
        self.current_step += 1;
        if self.current_step >= total_steps.max(1) {
            self.current_step = 0;
            self.loop_start_time = self.next_step_time;
        }
    }

    /// Change tempo.  While playing, the loop origin is moved so that the
    /// upcoming step keeps its straight-grid position under the new tempo.
    /// A step inside a swung 16th is re-offset by the new swing delay.
    pub fn set_bpm(&mut self, bpm: f64) {
        let old_bpm = self.bpm;
        self.bpm = clock::clamp_bpm(bpm);
        if !self.playing() {
            return;
        }
        let swung = (self.current_step / 2) % 2 == 1;
        let straight = if swung {
            self.next_step_time - clock::swing_delay(old_bpm, self.swing)
        } else {
            self.next_step_time
        };
        self.loop_start_time = straight - self.current_step as f64 * clock::thirty_second(self.bpm);
        if swung {
            self.next_step_time = straight + clock::swing_delay(self.bpm, self.swing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_wraps_and_repins_the_loop_origin() {
        let mut t = TransportState::new(120.0, Swing::Straight, Resolution::ThirtySecond);
        t.start(10.0, false);
        for _ in 0..31 {
            t.advance(32);
        }
        assert_eq!(t.current_step, 31);
        assert_eq!(t.loop_start_time, 10.0);
        t.advance(32);
        assert_eq!(t.current_step, 0);
        assert!((t.loop_start_time - 12.0).abs() < 1e-9);
        assert_eq!(t.loop_start_time, t.next_step_time);
    }

    #[test]
    fn mode_accessors() {
        let mut t = TransportState::new(90.0, Swing::Light, Resolution::Sixteenth);
        assert!(!t.playing());
        t.mode = TransportMode::CountingIn;
        assert!(t.counting_in() && !t.playing());
        t.start(0.0, true);
        assert!(t.playing() && t.recording());
        t.stop();
        assert_eq!(t.mode, TransportMode::Stopped);
    }

    #[test]
    fn tempo_change_keeps_the_upcoming_step_in_place() {
        let mut t = TransportState::new(120.0, Swing::Straight, Resolution::ThirtySecond);
        t.start(0.0, false);
        for _ in 0..8 {
            t.advance(128);
        }
        let next = t.next_step_time;
        t.set_bpm(60.0);
        assert_eq!(t.next_step_time, next);
        assert!((t.loop_start_time - (next - 8.0 * 0.125)).abs() < 1e-9);
        t.set_bpm(1000.0);
        assert_eq!(t.bpm, clock::MAX_BPM);
    }

    #[test]
    fn tempo_change_inside_a_swung_sixteenth_keeps_the_grid() {
        let mut t = TransportState::new(120.0, Swing::Heavy, Resolution::ThirtySecond);
        t.start(0.0, true);
        t.advance(128);
        t.advance(128);
        assert_eq!(t.current_step, 2);
        let next = t.next_step_time;
        t.set_bpm(120.0);
        assert!(t.loop_start_time.abs() < 1e-9);
        assert!((t.next_step_time - next).abs() < 1e-9);

        // A hit exactly on the straight step 8 still lands in step 8.
        while t.current_step < 8 {
            t.advance(128);
        }
        let elapsed = t.next_step_time - t.loop_start_time;
        assert_eq!(crate::sequence::quantize(elapsed, t.bpm, Resolution::ThirtySecond, 128), 8);
    }

    #[test]
    fn tempo_change_inside_a_swung_sixteenth_uses_the_new_swing_delay() {
        let mut t = TransportState::new(120.0, Swing::Heavy, Resolution::ThirtySecond);
        t.start(0.0, false);
        t.advance(128);
        t.advance(128);
        t.set_bpm(60.0);
        // Straight position of step 2 was 0.125 s; 32nd at 60 bpm is 0.125 s.
        assert!((t.loop_start_time - (0.125 - 2.0 * 0.125)).abs() < 1e-9);
        let expected = 0.125 + clock::swing_delay(60.0, Swing::Heavy);
        assert!((t.next_step_time - expected).abs() < 1e-9);
    }
}
