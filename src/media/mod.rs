//! Media capture lifecycle for the session.
//!
//! `MediaCaptureManager` owns the microphone/camera pair behind a generation
//! counter: every successful acquisition gets a strictly larger generation,
//! and any async result carrying an older generation is discarded instead of
//! being applied to the live session. `release()` also advances the counter,
//! so an acquisition that resolves after teardown stops its own tracks and
//! reports `Superseded`.

mod capture;

pub use capture::SystemMedia;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Which camera the session is looking through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    Front,
    Back,
}

impl FacingMode {
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Back,
            FacingMode::Back => FacingMode::Front,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::Front => "front",
            FacingMode::Back => "back",
        }
    }
}

/// Errors from device acquisition and frame capture.
#[derive(Debug, Clone)]
pub enum MediaError {
    PermissionDenied,
    DeviceUnavailable(String),
    /// A facing switch is already running; the second call is rejected
    /// rather than interleaved.
    SwitchInProgress,
    NoActiveVideo,
    /// The acquisition resolved after a newer generation took over. The
    /// caller discards the result silently; its tracks are already stopped.
    Superseded,
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::PermissionDenied => write!(f, "设备权限被拒绝"),
            MediaError::DeviceUnavailable(e) => write!(f, "设备不可用: {}", e),
            MediaError::SwitchInProgress => write!(f, "摄像头切换进行中"),
            MediaError::NoActiveVideo => write!(f, "没有可用的视频画面"),
            MediaError::Superseded => write!(f, "acquisition superseded"),
        }
    }
}

impl std::error::Error for MediaError {}

/// A live audio track. Samples arrive as mono i16 batches at `sample_rate`;
/// dropping the input stops the underlying capture.
pub struct AudioInput {
    sample_rate: u32,
    samples: Option<mpsc::Receiver<Vec<i16>>>,
    /// Opaque keepalive for the capture resource; dropping it stops the track.
    _track: Box<dyn std::any::Any + Send>,
}

impl AudioInput {
    pub fn new(
        sample_rate: u32,
        samples: mpsc::Receiver<Vec<i16>>,
        track: Box<dyn std::any::Any + Send>,
    ) -> Self {
        Self {
            sample_rate,
            samples: Some(samples),
            _track: track,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_samples(&mut self) -> Option<mpsc::Receiver<Vec<i16>>> {
        self.samples.take()
    }
}

/// A camera ready for frame snapshots.
#[derive(Debug, Clone)]
pub struct VideoSource {
    pub device: PathBuf,
}

/// The currently held device pair. Exclusively owned by the manager; other
/// components only read from it (audio samples, frame snapshots).
pub struct MediaHandle {
    pub facing: FacingMode,
    pub generation: u64,
    audio: AudioInput,
    video: VideoSource,
}

/// Seam between the manager's lifecycle logic and actual device access, so
/// the generation/switch behavior is testable without hardware.
#[async_trait]
pub trait MediaBackend: Send + Sync + 'static {
    async fn open_audio(&self, facing: FacingMode) -> Result<AudioInput, MediaError>;
    async fn open_video(&self, facing: FacingMode) -> Result<VideoSource, MediaError>;
    async fn grab_frame(&self, video: &VideoSource) -> Result<Vec<u8>, MediaError>;
}

pub struct MediaCaptureManager {
    backend: Arc<dyn MediaBackend>,
    current: Mutex<Option<MediaHandle>>,
    generation: AtomicU64,
    switching: AtomicBool,
}

impl MediaCaptureManager {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
            switching: AtomicBool::new(false),
        }
    }

    /// Acquire the device pair for `facing` and install it as the live
    /// handle, stopping the previous handle's tracks first. On failure the
    /// prior handle stays intact. Returns the new generation.
    pub async fn acquire(&self, facing: FacingMode) -> Result<u64, MediaError> {
        let started = self.generation.load(Ordering::SeqCst);

        let audio = self.backend.open_audio(facing).await?;
        let video = self.backend.open_video(facing).await?;

        let mut current = self.current.lock().unwrap();
        if self.generation.load(Ordering::SeqCst) != started {
            // A release or a newer acquisition won the race; the fresh
            // tracks are dropped (stopped) on return.
            return Err(MediaError::Superseded);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = current.take() {
            log::info!(
                "media: stopping superseded handle (generation {})",
                old.generation
            );
            drop(old);
        }
        *current = Some(MediaHandle {
            facing,
            generation,
            audio,
            video,
        });
        log::info!(
            "media: acquired {} devices (generation {})",
            facing.as_str(),
            generation
        );
        Ok(generation)
    }

    /// Acquire the opposite facing mode. Re-entrant calls are rejected with
    /// `SwitchInProgress` so two acquisitions never race for the handle.
    pub async fn switch_facing(&self) -> Result<u64, MediaError> {
        if self.switching.swap(true, Ordering::SeqCst) {
            return Err(MediaError::SwitchInProgress);
        }
        let result = self.switch_inner().await;
        self.switching.store(false, Ordering::SeqCst);
        result
    }

    async fn switch_inner(&self) -> Result<u64, MediaError> {
        let facing = self
            .current_facing()
            .ok_or(MediaError::NoActiveVideo)?
            .opposite();
        self.acquire(facing).await
    }

    /// Stop and drop every live track. Safe to call during an in-flight
    /// acquisition: the counter advance makes that acquisition resolve
    /// `Superseded`, and its tracks are stopped at the discard site.
    pub fn release(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.current.lock().unwrap().take().is_some() {
            log::info!("media: released all tracks");
        }
    }

    /// Hand the audio sample stream of the handle with `generation` to a
    /// consumer. Returns `None` if the generation is stale or the stream was
    /// already taken.
    pub fn take_audio(&self, generation: u64) -> Option<(mpsc::Receiver<Vec<i16>>, u32)> {
        let mut current = self.current.lock().unwrap();
        let handle = current.as_mut()?;
        if handle.generation != generation {
            return None;
        }
        let rate = handle.audio.sample_rate();
        handle.audio.take_samples().map(|rx| (rx, rate))
    }

    /// Snapshot the current video frame as encoded image bytes.
    pub async fn current_frame(&self) -> Result<Vec<u8>, MediaError> {
        let video = {
            let current = self.current.lock().unwrap();
            current
                .as_ref()
                .ok_or(MediaError::NoActiveVideo)?
                .video
                .clone()
        };
        self.backend.grab_frame(&video).await
    }

    pub fn current_facing(&self) -> Option<FacingMode> {
        self.current.lock().unwrap().as_ref().map(|h| h.facing)
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.current.lock().unwrap().as_ref().map(|h| h.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    /// Decrements the live-track count when the handle is dropped.
    struct TrackGuard(Arc<AtomicUsize>);

    impl Drop for TrackGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct ScriptedBackend {
        live_tracks: Arc<AtomicUsize>,
        fail_audio: AtomicBool,
        /// Each `open_audio` call waits for one permit, letting tests
        /// interleave releases with in-flight acquisitions.
        gate: Semaphore,
    }

    impl ScriptedBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                live_tracks: Arc::new(AtomicUsize::new(0)),
                fail_audio: AtomicBool::new(false),
                gate: Semaphore::new(usize::MAX >> 3),
            })
        }

        fn gated() -> Arc<Self> {
            Arc::new(Self {
                live_tracks: Arc::new(AtomicUsize::new(0)),
                fail_audio: AtomicBool::new(false),
                gate: Semaphore::new(0),
            })
        }

        fn live(&self) -> usize {
            self.live_tracks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaBackend for ScriptedBackend {
        async fn open_audio(&self, _facing: FacingMode) -> Result<AudioInput, MediaError> {
            self.gate.acquire().await.expect("gate closed").forget();
            if self.fail_audio.load(Ordering::SeqCst) {
                return Err(MediaError::DeviceUnavailable("scripted failure".into()));
            }
            self.live_tracks.fetch_add(1, Ordering::SeqCst);
            let (_tx, rx) = mpsc::channel(1);
            Ok(AudioInput::new(
                48_000,
                rx,
                Box::new(TrackGuard(self.live_tracks.clone())),
            ))
        }

        async fn open_video(&self, _facing: FacingMode) -> Result<VideoSource, MediaError> {
            Ok(VideoSource {
                device: PathBuf::from("/dev/null"),
            })
        }

        async fn grab_frame(&self, _video: &VideoSource) -> Result<Vec<u8>, MediaError> {
            Ok(vec![0xff, 0xd8, 0xff, 0xd9])
        }
    }

    #[tokio::test]
    async fn repeated_acquire_never_leaks_tracks() {
        let backend = ScriptedBackend::new();
        let manager = MediaCaptureManager::new(backend.clone());

        for i in 1..=5u64 {
            let generation = manager.acquire(FacingMode::Front).await.expect("acquire");
            assert_eq!(generation, i);
            assert_eq!(backend.live(), 1, "exactly one live track after acquire");
        }

        manager.release();
        assert_eq!(backend.live(), 0, "release stops every track");
    }

    #[tokio::test]
    async fn generations_strictly_increase_across_switches() {
        let backend = ScriptedBackend::new();
        let manager = MediaCaptureManager::new(backend.clone());

        let g1 = manager.acquire(FacingMode::Front).await.expect("acquire");
        let g2 = manager.switch_facing().await.expect("switch");
        assert!(g2 > g1);
        assert_eq!(manager.current_facing(), Some(FacingMode::Back));

        let g3 = manager.switch_facing().await.expect("switch back");
        assert!(g3 > g2);
        assert_eq!(manager.current_facing(), Some(FacingMode::Front));
    }

    #[tokio::test]
    async fn failed_acquire_leaves_prior_handle_intact() {
        let backend = ScriptedBackend::new();
        let manager = MediaCaptureManager::new(backend.clone());

        let g1 = manager.acquire(FacingMode::Front).await.expect("acquire");
        backend.fail_audio.store(true, Ordering::SeqCst);

        let err = manager.acquire(FacingMode::Back).await.unwrap_err();
        assert!(matches!(err, MediaError::DeviceUnavailable(_)));
        assert_eq!(manager.current_facing(), Some(FacingMode::Front));
        assert_eq!(manager.current_generation(), Some(g1));
        assert_eq!(backend.live(), 1);
    }

    #[tokio::test]
    async fn release_during_acquire_discards_the_result() {
        let backend = ScriptedBackend::gated();
        let manager = Arc::new(MediaCaptureManager::new(backend.clone()));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire(FacingMode::Front).await })
        };

        // The acquisition is parked on the gate; tear down first.
        tokio::task::yield_now().await;
        manager.release();
        backend.gate.add_permits(1);

        let result = task.await.expect("join");
        assert!(matches!(result, Err(MediaError::Superseded)));
        assert_eq!(backend.live(), 0, "the orphaned track was stopped");
        assert!(manager.current_generation().is_none());
    }

    #[tokio::test]
    async fn second_switch_is_rejected_while_one_is_running() {
        let backend = ScriptedBackend::gated();
        backend.gate.add_permits(1);
        let manager = Arc::new(MediaCaptureManager::new(backend.clone()));
        manager.acquire(FacingMode::Front).await.expect("acquire");

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.switch_facing().await })
        };
        tokio::task::yield_now().await;

        let second = manager.switch_facing().await;
        assert!(matches!(second, Err(MediaError::SwitchInProgress)));

        backend.gate.add_permits(1);
        let first = first.await.expect("join").expect("first switch");
        assert_eq!(first, 2);
        assert_eq!(backend.live(), 1);
    }

    #[tokio::test]
    async fn frame_snapshot_requires_an_active_handle() {
        let backend = ScriptedBackend::new();
        let manager = MediaCaptureManager::new(backend.clone());

        let err = manager.current_frame().await.unwrap_err();
        assert!(matches!(err, MediaError::NoActiveVideo));

        manager.acquire(FacingMode::Front).await.expect("acquire");
        let frame = manager.current_frame().await.expect("frame");
        assert!(!frame.is_empty());
    }

    #[tokio::test]
    async fn take_audio_rejects_stale_generations() {
        let backend = ScriptedBackend::new();
        let manager = MediaCaptureManager::new(backend.clone());

        let g1 = manager.acquire(FacingMode::Front).await.expect("acquire");
        let g2 = manager.acquire(FacingMode::Front).await.expect("reacquire");

        assert!(manager.take_audio(g1).is_none());
        assert!(manager.take_audio(g2).is_some());
        // The stream can only be taken once.
        assert!(manager.take_audio(g2).is_none());
    }
}
