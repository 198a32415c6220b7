use std::path::Path;

use crate::error::SampleError;

/// Decoded mono audio.  Read-only once loaded; voices share it through an `Arc`.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer {
    frames: Vec<f32>,
    sample_rate: u32,
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

impl SampleBuffer {
    pub fn new(frames: Vec<f32>, sample_rate: u32) -> Self {
        Self { frames, sample_rate: sample_rate.max(1) }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames.len() as f64 / self.sample_rate as f64
    }

    /// Linearly interpolated read at a fractional frame position.  Reads past
    /// either end are silent.
    pub fn read(&self, pos: f64) -> f32 {
        if pos.is_nan() || pos < 0.0 {
            return 0.0;
        }
        let i = pos as usize;
        let Some(&s0) = self.frames.get(i) else { return 0.0 };
        let s1 = self.frames.get(i + 1).copied().unwrap_or(s0);
        lerp(s0, s1, (pos - i as f64) as f32)
    }

    /// Peak magnitude per column, for the waveform strip.
    pub fn overview(&self, columns: usize) -> Vec<f32> {
        if columns == 0 || self.is_empty() {
            return vec![0.0; columns];
        }
        let per = self.frames.len().div_ceil(columns).max(1);
        let mut out: Vec<f32> = self
            .frames
            .chunks(per)
            .map(|c| c.iter().fold(0.0f32, |m, s| m.max(s.abs())))
            .collect();
        out.resize(columns, 0.0);
        out
    }
}

/// Decode a WAV file (int or float, any channel count) and mix it down to mono.
pub fn load_wav(path: &Path) -> Result<SampleBuffer, SampleError> {
    let decode = |source| SampleError::Decode { path: path.to_path_buf(), source };

    let mut reader = hound::WavReader::open(path).map_err(decode)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode)?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max))
                .collect::<Result<Vec<_>, _>>()
                .map_err(decode)?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let frames: Vec<f32> = samples
        .chunks_exact(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect();

    if frames.is_empty() {
        return Err(SampleError::Empty(path.to_path_buf()));
    }
    Ok(SampleBuffer::new(frames, spec.sample_rate))
}
