//! Guardian poller: periodic camera-frame classification with a
//! non-stacking alert policy.
//!
//! Runs on its own timer, fully decoupled from the session's narrative
//! state: it reads frames from the media manager, posts them to the
//! classifier and raises `UiUpdate::GuardianAlert` straight on the UI
//! channel. While a warning is visible, further positive classifications are
//! ignored until the user dismisses it. Every failure on a tick (no video,
//! capture error, network, parse) is logged and means "no alert this tick".

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::media::{MediaCaptureManager, MediaError};
use crate::UiUpdate;

/// Explicit timeout so a stalled classifier never wedges the tick loop.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client for classification uploads.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Clone)]
pub struct GuardianConfig {
    pub url: String,
    pub period: Duration,
    /// Class the guardian expects; anything else can raise the alert.
    pub target_class: String,
    pub threshold: f32,
}

#[derive(Debug, Clone, Default)]
pub struct GuardianState {
    pub last_alert_at: Option<DateTime<Utc>>,
    pub warning_visible: bool,
}

/// Classifier verdict for one frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug)]
enum GuardianError {
    Network(String),
    Api { status: u16 },
    Parse(String),
}

impl std::fmt::Display for GuardianError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardianError::Network(e) => write!(f, "network error: {}", e),
            GuardianError::Api { status } => write!(f, "classifier returned status {}", status),
            GuardianError::Parse(e) => write!(f, "failed to parse classification: {}", e),
        }
    }
}

pub struct GuardianPoller {
    config: GuardianConfig,
    media: Arc<MediaCaptureManager>,
    ui: broadcast::Sender<UiUpdate>,
    state: Mutex<GuardianState>,
    cancel: CancellationToken,
}

impl GuardianPoller {
    pub fn new(
        config: GuardianConfig,
        media: Arc<MediaCaptureManager>,
        ui: broadcast::Sender<UiUpdate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            media,
            ui,
            state: Mutex::new(GuardianState::default()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    async fn run(&self) {
        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "guardian: polling every {:?} (target class {:?}, threshold {})",
            self.config.period,
            self.config.target_class,
            self.config.threshold
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let frame = match self.media.current_frame().await {
                Ok(frame) => frame,
                Err(MediaError::NoActiveVideo) => {
                    log::debug!("guardian: no active video, skipping tick");
                    continue;
                }
                Err(e) => {
                    log::warn!("guardian: frame capture failed: {}", e);
                    continue;
                }
            };

            match self.classify(frame).await {
                Ok(classification) => self.apply(classification),
                // Failure counts as "no alert" for this tick; the next tick
                // tries again.
                Err(e) => log::warn!("guardian: classification failed: {}", e),
            }
        }
        log::info!("guardian: poller stopped");
    }

    async fn classify(&self, frame: Vec<u8>) -> Result<Classification, GuardianError> {
        let part = Part::bytes(frame)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| GuardianError::Network(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = HTTP_CLIENT
            .post(&self.config.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| GuardianError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GuardianError::Api {
                status: status.as_u16(),
            });
        }

        response
            .json::<Classification>()
            .await
            .map_err(|e| GuardianError::Parse(e.to_string()))
    }

    fn apply(&self, classification: Classification) {
        let mut state = self.state.lock().unwrap();
        if !evaluate(&mut state, &self.config, &classification) {
            return;
        }
        log::warn!(
            "guardian: alert raised ({} @ {:.2})",
            classification.label,
            classification.confidence
        );
        let _ = self.ui.send(UiUpdate::GuardianAlert {
            label: classification.label,
            confidence: classification.confidence,
        });
    }

    /// Explicit user dismissal; ticks may alert again afterwards.
    pub fn dismiss(&self) {
        let mut state = self.state.lock().unwrap();
        if state.warning_visible {
            state.warning_visible = false;
            let _ = self.ui.send(UiUpdate::GuardianCleared);
        }
    }

    pub fn state(&self) -> GuardianState {
        self.state.lock().unwrap().clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The alert policy. Mutates `state` and returns whether to raise the alert:
/// fires iff the class differs from the target, the confidence clears the
/// threshold, and no warning is currently visible.
fn evaluate(
    state: &mut GuardianState,
    config: &GuardianConfig,
    classification: &Classification,
) -> bool {
    if classification.label == config.target_class {
        return false;
    }
    if classification.confidence <= config.threshold {
        return false;
    }
    if state.warning_visible {
        return false;
    }
    state.warning_visible = true;
    state.last_alert_at = Some(Utc::now());
    true
}
