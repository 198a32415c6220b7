use std::f32::consts::PI;

use crate::effects::{AudioEffect, BiquadFilter, FilterMode};

/// Columns in a drum row: one 16th-note cycle, repeated every bar.
pub const PATTERN_STEPS: usize = 16;

pub const MIN_PITCH: i32 = -12;
pub const MAX_PITCH: i32 = 12;

/// Length of the kick's pitch sweep.
const KICK_RAMP: f32 = 0.1;
/// Decay of the snare's tonal body.
const SNARE_BODY_DECAY: f32 = 0.1;

// ── Drum kind ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrumKind {
    Kick,
    Snare,
    Hihat,
    Cymbal,
}

impl DrumKind {
    pub const ALL: [DrumKind; 4] = [
        DrumKind::Kick,
        DrumKind::Snare,
        DrumKind::Hihat,
        DrumKind::Cymbal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Kick   => "Kick ",
            Self::Snare  => "Snare",
            Self::Hihat  => "Hihat",
            Self::Cymbal => "Cymb ",
        }
    }
}

// ── Banks ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KickPreset {
    pub start_freq: f32,
    pub end_freq: f32,
    pub decay: f32,
    pub tone_mix: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnarePreset {
    pub tone_freq: f32,
    pub noise_decay: f32,
    pub filter_freq: f32,
    pub tone_mix: f32,
}

/// Shared shape of the two filtered-noise voices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoisePreset {
    pub filter_freq: f32,
    pub q: f32,
    pub decay: f32,
}

/// Immutable synthesis parameters for every drum kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrumBank {
    pub name: &'static str,
    pub kick: KickPreset,
    pub snare: SnarePreset,
    pub hihat: NoisePreset,
    pub cymbal: NoisePreset,
}

pub const BANKS: [DrumBank; 3] = [
    DrumBank {
        name: "808",
        kick:   KickPreset  { start_freq: 150.0, end_freq: 40.0, decay: 0.6, tone_mix: 0.9 },
        snare:  SnarePreset { tone_freq: 180.0, noise_decay: 0.15, filter_freq: 2000.0, tone_mix: 0.35 },
        hihat:  NoisePreset { filter_freq: 8000.0, q: 1.0, decay: 0.05 },
        cymbal: NoisePreset { filter_freq: 6000.0, q: 0.8, decay: 0.6 },
    },
    DrumBank {
        name: "909",
        kick:   KickPreset  { start_freq: 200.0, end_freq: 50.0, decay: 0.35, tone_mix: 0.8 },
        snare:  SnarePreset { tone_freq: 220.0, noise_decay: 0.12, filter_freq: 3000.0, tone_mix: 0.3 },
        hihat:  NoisePreset { filter_freq: 9000.0, q: 1.2, decay: 0.04 },
        cymbal: NoisePreset { filter_freq: 7500.0, q: 0.7, decay: 0.8 },
    },
    DrumBank {
        name: "Lo-Fi",
        kick:   KickPreset  { start_freq: 120.0, end_freq: 45.0, decay: 0.45, tone_mix: 0.95 },
        snare:  SnarePreset { tone_freq: 160.0, noise_decay: 0.2, filter_freq: 1500.0, tone_mix: 0.45 },
        hihat:  NoisePreset { filter_freq: 6000.0, q: 0.9, decay: 0.07 },
        cymbal: NoisePreset { filter_freq: 4500.0, q: 1.1, decay: 0.5 },
    },
];

pub fn pitch_mult(semitones: i32) -> f32 {
    2f32.powf(semitones as f32 / 12.0)
}

// ── Pattern + tracks ──────────────────────────────────────────────────────────

/// One row of the drum grid with its mix settings.
#[derive(Clone, Debug, PartialEq)]
pub struct DrumTrack {
    pub kind:   DrumKind,
    pub steps:  [bool; PATTERN_STEPS],
    pub volume: f32,
    pub pitch:  i32,
    pub muted:  bool,
}

impl DrumTrack {
    fn new(kind: DrumKind) -> Self {
        Self { kind, steps: [false; PATTERN_STEPS], volume: 0.8, pitch: 0, muted: false }
    }
}

/// Everything needed to start one drum voice on the audio thread.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrumHit {
    pub kind: DrumKind,
    pub bank: DrumBank,
    pub pitch_mult: f32,
    pub gain: f32,
}

/// The drum pattern (`tracks x 16`), per-track settings and the selected bank.
#[derive(Clone, Debug)]
pub struct DrumKit {
    pub tracks: Vec<DrumTrack>,
    bank: usize,
}

impl Default for DrumKit {
    fn default() -> Self {
        Self::new()
    }
}

impl DrumKit {
    pub fn new() -> Self {
        Self { tracks: DrumKind::ALL.iter().map(|&k| DrumTrack::new(k)).collect(), bank: 0 }
    }

    pub fn bank(&self) -> &DrumBank {
        &BANKS[self.bank]
    }

    pub fn bank_index(&self) -> usize {
        self.bank
    }

    /// Any index is accepted and wrapped into the bank table.
    pub fn set_bank(&mut self, index: usize) {
        self.bank = index % BANKS.len();
    }

    pub fn toggle_step(&mut self, track: usize, column: usize) {
        if let Some(s) = self.tracks.get_mut(track).and_then(|t| t.steps.get_mut(column)) {
            *s = !*s;
        }
    }

    pub fn set_volume(&mut self, track: usize, volume: f32) {
        if let Some(t) = self.tracks.get_mut(track) {
            t.volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
        }
    }

    pub fn set_pitch(&mut self, track: usize, semitones: i32) {
        if let Some(t) = self.tracks.get_mut(track) {
            t.pitch = semitones.clamp(MIN_PITCH, MAX_PITCH);
        }
    }

    pub fn toggle_mute(&mut self, track: usize) {
        if let Some(t) = self.tracks.get_mut(track) {
            t.muted = !t.muted;
        }
    }

    /// Build a hit for `track` with the current bank, ignoring the pattern and mute.
    pub fn hit(&self, track: usize) -> Option<DrumHit> {
        let t = self.tracks.get(track)?;
        Some(DrumHit {
            kind: t.kind,
            bank: *self.bank(),
            pitch_mult: pitch_mult(t.pitch),
            gain: t.volume,
        })
    }

    /// Hits for every unmuted track with `column` set.
    pub fn hits_at(&self, column: usize) -> impl Iterator<Item = DrumHit> + '_ {
        let column = column % PATTERN_STEPS;
        self.tracks
            .iter()
            .enumerate()
            .filter(move |(_, t)| !t.muted && t.steps[column])
            .filter_map(|(i, _)| self.hit(i))
    }
}

// ── Single drum voice ─────────────────────────────────────────────────────────

/// One triggered drum hit.  Generates samples until its envelope runs out.
/// Voices are fire-and-forget: the mixer keeps any number of them at once.
pub struct DrumVoice {
    hit: DrumHit,
    sample_pos: u64,
    dur_samples: u64,
    /// Phase accumulator for tonal components (0..1 normalised).
    phase: f32,
    /// Unseeded, so simultaneous hits differ.
    noise: fastrand::Rng,
    filter: Option<BiquadFilter>,
    sample_rate: f32,
}

impl DrumVoice {
    pub fn new(hit: DrumHit, sample_rate: f32) -> Self {
        let pm = hit.pitch_mult;
        let bank = &hit.bank;
        let (duration, filter) = match hit.kind {
            DrumKind::Kick => (bank.kick.decay, None),
            DrumKind::Snare => (
                bank.snare.noise_decay.max(SNARE_BODY_DECAY),
                Some(BiquadFilter::new(FilterMode::BandPass, bank.snare.filter_freq * pm, 1.0, sample_rate)),
            ),
            DrumKind::Hihat => (
                bank.hihat.decay,
                Some(BiquadFilter::new(FilterMode::HighPass, bank.hihat.filter_freq * pm, bank.hihat.q, sample_rate)),
            ),
            DrumKind::Cymbal => (
                bank.cymbal.decay,
                Some(BiquadFilter::new(FilterMode::BandPass, bank.cymbal.filter_freq * pm, bank.cymbal.q, sample_rate)),
            ),
        };
        Self {
            hit,
            sample_pos: 0,
            dur_samples: (duration.max(0.0) * sample_rate).ceil() as u64,
            phase: 0.0,
            noise: fastrand::Rng::new(),
            filter,
            sample_rate,
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.sample_pos >= self.dur_samples
    }

    pub fn next_sample(&mut self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }
        let t = self.sample_pos as f32 / self.sample_rate;
        let raw = match self.hit.kind {
            DrumKind::Kick   => self.kick(t),
            DrumKind::Snare  => self.snare(t),
            DrumKind::Hihat  => self.metal(t, self.hit.bank.hihat.decay),
            DrumKind::Cymbal => self.metal(t, self.hit.bank.cymbal.decay),
        };
        self.sample_pos += 1;
        raw * self.hit.gain
    }

    // ── Synthesis helpers ─────────────────────────────────────────────────

    #[inline]
    fn white(&mut self) -> f32 {
        self.noise.f32() * 2.0 - 1.0
    }

    #[inline]
    fn filtered_noise(&mut self) -> f32 {
        let n = self.white();
        match self.filter.as_mut() {
            Some(f) => f.process(n),
            None => n,
        }
    }

    /// Advance the phase accumulator and return a sine value.
    #[inline]
    fn sine(&mut self, freq: f32) -> f32 {
        self.phase += freq / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        (self.phase * 2.0 * PI).sin()
    }

    // ── Individual drum synthesisers ──────────────────────────────────────

    fn kick(&mut self, t: f32) -> f32 {
        let p = self.hit.bank.kick;
        let pm = self.hit.pitch_mult;
        let f0 = p.start_freq * pm;
        let f1 = (p.end_freq * pm).max(10.0);
        let freq = f0 * (f1 / f0).powf((t / KICK_RAMP).min(1.0));
        let tone = self.sine(freq);
        let click = self.white() * (-t * 300.0).exp();
        (tone * p.tone_mix + click * (1.0 - p.tone_mix)) * decay_env(t, p.decay)
    }

    fn snare(&mut self, t: f32) -> f32 {
        let p = self.hit.bank.snare;
        let body = self.sine(p.tone_freq * self.hit.pitch_mult) * decay_env(t, SNARE_BODY_DECAY);
        let noise = self.filtered_noise() * decay_env(t, p.noise_decay);
        body * p.tone_mix + noise * (1.0 - p.tone_mix)
    }

    fn metal(&mut self, t: f32, decay: f32) -> f32 {
        self.filtered_noise() * decay_env(t, decay)
    }
}

/// Exponential decay reaching 0.001 (-60 dB) at `decay` seconds.
#[inline]
fn decay_env(t: f32, decay: f32) -> f32 {
    if decay <= 0.0 {
        return 0.0;
    }
    0.001f32.powf(t / decay)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44_100.0;

    fn render(hit: DrumHit) -> Vec<f32> {
        let mut v = DrumVoice::new(hit, SR);
        let mut out = Vec::new();
        while !v.is_finished() {
            out.push(v.next_sample());
        }
        out
    }

    fn rms(s: &[f32]) -> f32 {
        (s.iter().map(|x| x * x).sum::<f32>() / s.len().max(1) as f32).sqrt()
    }

    fn zero_crossings(s: &[f32]) -> usize {
        s.windows(2).filter(|w| (w[0] < 0.0) != (w[1] < 0.0)).count()
    }

    fn kit_hit(kind: usize, pitch: i32) -> DrumHit {
        let mut kit = DrumKit::new();
        kit.set_pitch(kind, pitch);
        kit.hit(kind).unwrap()
    }

    #[test]
    fn every_voice_decays_and_finishes() {
        for bank in 0..BANKS.len() {
            let mut kit = DrumKit::new();
            kit.set_bank(bank);
            for track in 0..kit.tracks.len() {
                let out = render(kit.hit(track).unwrap());
                assert!(!out.is_empty());
                let n = out.len() / 5;
                let head = rms(&out[..n]);
                let tail = rms(&out[out.len() - n..]);
                assert!(head > tail * 4.0, "bank {bank} track {track}: {head} vs {tail}");
            }
        }
    }

    #[test]
    fn kick_lasts_its_decay_time() {
        let out = render(kit_hit(0, 0));
        let expected = (BANKS[0].kick.decay * SR).ceil() as usize;
        assert_eq!(out.len(), expected);
    }

    #[test]
    fn pitch_raises_kick_frequency() {
        let mut hit = kit_hit(0, 0);
        hit.bank.kick.tone_mix = 1.0;
        let low = render(hit);
        hit.pitch_mult = pitch_mult(12);
        let high = render(hit);
        let n = (0.3 * SR) as usize;
        assert!(zero_crossings(&high[..n]) > zero_crossings(&low[..n]) * 3 / 2);
    }

    #[test]
    fn high_passed_hihat_is_brighter_than_low_band_passed_cymbal() {
        let mut hat = kit_hit(2, 0);
        hat.bank.hihat.decay = 0.5;
        hat.bank.hihat.filter_freq = 3000.0;
        let mut cym = kit_hit(3, 0);
        cym.bank.cymbal.filter_freq = 300.0;
        cym.bank.cymbal.decay = 0.5;
        let n = 1000;
        assert!(zero_crossings(&render(hat)[..n]) > zero_crossings(&render(cym)[..n]));
    }

    #[test]
    fn zero_volume_is_silent() {
        let mut kit = DrumKit::new();
        kit.set_volume(1, 0.0);
        assert!(render(kit.hit(1).unwrap()).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn settings_are_clamped_and_bank_wraps() {
        let mut kit = DrumKit::new();
        kit.set_pitch(0, 40);
        kit.set_volume(0, 3.0);
        kit.set_volume(1, f32::NAN);
        assert_eq!(kit.tracks[0].pitch, MAX_PITCH);
        assert_eq!(kit.tracks[0].volume, 1.0);
        assert_eq!(kit.tracks[1].volume, 0.0);
        kit.set_bank(4);
        assert_eq!(kit.bank().name, "909");
    }

    #[test]
    fn hits_follow_pattern_and_skip_muted_tracks() {
        let mut kit = DrumKit::new();
        kit.toggle_step(0, 4);
        kit.toggle_step(2, 4);
        let kinds: Vec<DrumKind> = kit.hits_at(4).map(|h| h.kind).collect();
        assert_eq!(kinds, vec![DrumKind::Kick, DrumKind::Hihat]);
        assert_eq!(kit.hits_at(20).count(), 2);
        kit.toggle_mute(0);
        assert_eq!(kit.hits_at(4).count(), 1);
        assert_eq!(kit.hits_at(5).count(), 0);
    }

    #[test]
    fn bank_swap_keeps_the_pattern() {
        let mut kit = DrumKit::new();
        kit.toggle_step(1, 8);
        kit.set_bank(2);
        let hit = kit.hits_at(8).next().unwrap();
        assert_eq!(hit.bank.name, "Lo-Fi");
        assert_eq!(hit.kind, DrumKind::Snare);
    }
}
