use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use tracing::{error, info};

use crate::mixer::Mixer;

/// Owns the cpal output stream.  Dropping it stops audio.
pub struct AudioEngine {
    _stream: cpal::Stream,
    pub mixer: Arc<Mutex<Mixer>>,
}

impl AudioEngine {
    /// Open the default output device and start pulling from a fresh mixer
    /// running at the device's rate.
    pub fn start() -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().context("no default output device")?;
        let config = device.default_output_config().context("no default output config")?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;
        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            format = ?config.sample_format(),
            "audio output opened"
        );

        let stream_config: cpal::StreamConfig = config.clone().into();
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, Arc::clone(&mixer), channels)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, Arc::clone(&mixer), channels)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, Arc::clone(&mixer), channels)?,
            other => anyhow::bail!("unsupported sample format {other:?}"),
        };
        stream.play().context("failed to play output stream")?;

        Ok(Self { _stream: stream, mixer })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    channels: usize,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let err_fn = |err| error!("audio output stream error: {err}");
    let mut mono: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            mono.resize(frames, 0.0);
            {
                let mut m = mixer.lock().unwrap_or_else(PoisonError::into_inner);
                m.render(&mut mono);
            }
            for (frame, s) in data.chunks_mut(channels.max(1)).zip(&mono) {
                let v = T::from_sample(*s);
                frame.fill(v);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
