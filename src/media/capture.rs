//! Real capture backend: cpal microphone input plus V4L2 frame grabs.
//!
//! The cpal stream is owned by a dedicated thread (cpal streams must not
//! cross threads); the handle keeps a stop channel whose drop ends the
//! thread and with it the stream. Frames come from ffmpeg, one JPEG per
//! request, which works with most cameras without linking a capture library.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{AudioInput, FacingMode, MediaBackend, MediaError, VideoSource};
use crate::settings::AppSettings;

/// Upper bound on a single ffmpeg frame grab.
const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Sample batches buffered between the capture thread and the consumer.
const SAMPLE_CHANNEL_DEPTH: usize = 64;

pub struct SystemMedia {
    video_device_back: PathBuf,
    video_device_front: PathBuf,
}

impl SystemMedia {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            video_device_back: settings.video_device_back.clone(),
            video_device_front: settings.video_device_front.clone(),
        }
    }

    fn video_device(&self, facing: FacingMode) -> &PathBuf {
        match facing {
            FacingMode::Front => &self.video_device_front,
            FacingMode::Back => &self.video_device_back,
        }
    }
}

#[async_trait]
impl MediaBackend for SystemMedia {
    async fn open_audio(&self, _facing: FacingMode) -> Result<AudioInput, MediaError> {
        // The microphone does not follow the camera facing; both modes
        // capture from the default input device.
        let (result_tx, result_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_DEPTH);

        std::thread::spawn(move || capture_thread(result_tx, stop_rx, sample_tx));

        let outcome = tokio::task::spawn_blocking(move || result_rx.recv()).await;
        match outcome {
            Ok(Ok(Ok(sample_rate))) => Ok(AudioInput::new(sample_rate, sample_rx, Box::new(stop_tx))),
            Ok(Ok(Err(e))) => Err(e),
            _ => Err(MediaError::DeviceUnavailable(
                "audio capture thread died during setup".to_string(),
            )),
        }
    }

    async fn open_video(&self, facing: FacingMode) -> Result<VideoSource, MediaError> {
        let device = self.video_device(facing);
        if !device.exists() {
            return Err(MediaError::DeviceUnavailable(format!(
                "camera device {:?} not found",
                device
            )));
        }
        Ok(VideoSource {
            device: device.clone(),
        })
    }

    async fn grab_frame(&self, video: &VideoSource) -> Result<Vec<u8>, MediaError> {
        let output = timeout(
            FRAME_TIMEOUT,
            Command::new("ffmpeg")
                .args(["-loglevel", "error", "-f", "v4l2", "-i"])
                .arg(&video.device)
                .args(["-frames:v", "1", "-f", "image2", "-c:v", "mjpeg", "pipe:1"])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| MediaError::DeviceUnavailable("frame capture timed out".to_string()))?
        .map_err(|e| MediaError::DeviceUnavailable(format!("ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(MediaError::DeviceUnavailable(format!(
                "ffmpeg exited with {}",
                output.status
            )));
        }
        if output.stdout.is_empty() {
            // The device answered but produced nothing; dimensions are
            // likely not negotiated yet.
            return Err(MediaError::DeviceUnavailable("empty frame".to_string()));
        }
        Ok(output.stdout)
    }
}

type SetupResult = Result<u32, MediaError>;

/// Owns the cpal stream for its whole lifetime. Reports the negotiated
/// sample rate (or the setup error) over `result_tx`, then parks until the
/// stop channel disconnects.
fn capture_thread(
    result_tx: std::sync::mpsc::Sender<SetupResult>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    samples: mpsc::Sender<Vec<i16>>,
) {
    let setup = || -> Result<(cpal::Stream, u32), MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MediaError::DeviceUnavailable("no audio input device".to_string()))?;

        log::info!("media: using audio input device: {:?}", device.name());

        let supported = device.default_input_config().map_err(map_config_error)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        log::info!(
            "media: audio config: {} Hz, {} channels, {:?}",
            sample_rate,
            channels,
            sample_format
        );

        let stream = match sample_format {
            SampleFormat::I16 => build_input_stream::<i16>(&device, &config, channels, samples),
            SampleFormat::U16 => build_input_stream::<u16>(&device, &config, channels, samples),
            SampleFormat::F32 => build_input_stream::<f32>(&device, &config, channels, samples),
            other => Err(MediaError::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                other
            ))),
        }?;

        stream
            .play()
            .map_err(|e| MediaError::DeviceUnavailable(format!("failed to start stream: {}", e)))?;

        Ok((stream, sample_rate))
    };

    match setup() {
        Ok((stream, sample_rate)) => {
            let _ = result_tx.send(Ok(sample_rate));
            // Blocks until the owning AudioInput drops its stop sender.
            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("media: audio capture thread exiting");
        }
        Err(e) => {
            let _ = result_tx.send(Err(e));
        }
    }
}

fn map_config_error(e: cpal::DefaultStreamConfigError) -> MediaError {
    let message = e.to_string();
    if message.to_lowercase().contains("permission") {
        MediaError::PermissionDenied
    } else {
        MediaError::DeviceUnavailable(message)
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    samples: mpsc::Sender<Vec<i16>>,
) -> Result<cpal::Stream, MediaError>
where
    T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
{
    let err_fn = |err| log::error!("media: audio stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono = mix_to_mono(data, channels);
                // try_send: a full channel means the consumer is behind;
                // dropping a batch beats blocking the audio callback.
                let _ = samples.try_send(mono);
            },
            err_fn,
            None,
        )
        .map_err(|e| MediaError::DeviceUnavailable(format!("failed to create stream: {}", e)))
}

/// Collapse interleaved frames to mono i16 by averaging the channels.
fn mix_to_mono<T: cpal::Sample<Float = f32>>(data: &[T], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return data.iter().map(|&s| sample_to_i16(s)).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| sample_to_i16(s) as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Convert any cpal sample type to i16.
fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_to_i16() {
        assert_eq!(sample_to_i16(0.0f32), 0);
        assert_eq!(sample_to_i16(1.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-1.0f32), -i16::MAX);

        // Clamping
        assert_eq!(sample_to_i16(2.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-2.0f32), -i16::MAX);
    }

    #[test]
    fn test_mix_to_mono_passthrough() {
        let data = [0.0f32, 1.0, -1.0];
        assert_eq!(mix_to_mono(&data, 1), vec![0, i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_mix_to_mono_stereo_average() {
        let data = [1.0f32, 1.0, -1.0, -1.0];
        assert_eq!(mix_to_mono(&data, 2), vec![i16::MAX, -i16::MAX]);
    }
}
