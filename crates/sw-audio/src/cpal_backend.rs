//! CPAL-based audio output backend.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sw_ir::AudioBuffer;

use crate::bridge::{FrameBridge, FrameReceiver, FrameSender, HandoffMode};
use crate::traits::{AudioError, AudioOutput};

/// CPAL-based audio output.
///
/// Rendered frames go through a [`FrameBridge`]; the device callback drains
/// the receiving half and interleaves each planar frame into the device
/// buffer.
pub struct CpalOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    sender: FrameSender,
    frames: usize,
    running: Arc<AtomicBool>,
}

impl CpalOutput {
    /// Open the default device for `channels` × `frames_per_buffer` frames.
    ///
    /// The bridge holds `ring_capacity` frames. Returns the receiving half,
    /// to be passed to [`CpalOutput::build_stream`].
    pub fn new(
        sample_rate: u32,
        channels: u16,
        frames_per_buffer: usize,
        ring_capacity: usize,
        mode: HandoffMode,
    ) -> Result<(Self, FrameReceiver), AudioError> {
        if channels == 0 || frames_per_buffer == 0 {
            return Err(AudioError::DeviceInit(format!(
                "empty frame ({} channels x {} frames)",
                channels, frames_per_buffer
            )));
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoDevice)?;

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;

        let mut config: StreamConfig = config.into();
        config.channels = channels;
        config.sample_rate = SampleRate(sample_rate);

        let (sender, receiver) =
            FrameBridge::new(ring_capacity, channels as usize * frames_per_buffer, mode);

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            frames_per_buffer,
            ring_capacity,
            ?mode,
            "opened audio output"
        );

        let output = Self {
            device,
            config,
            stream: None,
            sender,
            frames: frames_per_buffer,
            running: Arc::new(AtomicBool::new(false)),
        };

        Ok((output, receiver))
    }

    /// Build and start the audio stream.
    pub fn build_stream(&mut self, mut receiver: FrameReceiver) -> Result<(), AudioError> {
        let running = self.running.clone();
        let channels = self.config.channels as usize;
        let frames = self.frames;
        // Start past the end so the first callback pulls a frame.
        let mut cursor = frames;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }

                    #[cfg(feature = "alloc_check")]
                    assert_no_alloc::assert_no_alloc(|| {
                        fill_interleaved(data, &mut receiver, &mut cursor, frames, channels)
                    });
                    #[cfg(not(feature = "alloc_check"))]
                    fill_interleaved(data, &mut receiver, &mut cursor, frames, channels);
                },
                |err| tracing::error!(%err, "audio stream error"),
                None,
            )
            .map_err(|e| AudioError::StreamCreate(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        self.stream = Some(stream);

        Ok(())
    }

    pub fn handoff_mode(&self) -> HandoffMode {
        self.sender.mode()
    }
}

/// Interleave planar frames from `receiver` into a device buffer, pulling
/// the next frame whenever `cursor` reaches the end of the current one.
fn fill_interleaved(
    data: &mut [f32],
    receiver: &mut FrameReceiver,
    cursor: &mut usize,
    frames: usize,
    channels: usize,
) {
    for chunk in data.chunks_mut(channels) {
        if *cursor == frames {
            receiver.recv();
            *cursor = 0;
        }
        let frame = receiver.current();
        for (ch, sample) in chunk.iter_mut().enumerate() {
            *sample = frame[ch * frames + *cursor];
        }
        *cursor += 1;
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn is_ready(&self) -> bool {
        self.sender.is_ready()
    }

    fn push(&mut self, frame: &AudioBuffer) -> Result<(), AudioError> {
        self.sender.send(frame.as_slice())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.running.store(true, Ordering::Relaxed);
        if let Some(ref stream) = self.stream {
            stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(ref stream) = self.stream {
            stream.pause().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }
}
