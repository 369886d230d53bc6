//! Effect runner for the session loop.
//!
//! The reducer stays pure; everything that touches a device, a socket or the
//! network is an `Effect` executed here. Each effect runs on its own task and
//! reports back exclusively through events, so all state mutation stays in
//! the session loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::asr::TranscriptionChannel;
use crate::guardian::GuardianPoller;
use crate::media::{MediaCaptureManager, MediaError};
use crate::narrative::{BranchReply, NarrativeClient};
use crate::session::{Effect, Event};
use crate::settings::AppSettings;
use crate::typewriter::Typewriter;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Real effect runner wired to the live components.
pub struct LiveEffectRunner {
    media: Arc<MediaCaptureManager>,
    channel: Arc<TranscriptionChannel>,
    narrative: Arc<NarrativeClient>,
    typewriter: Arc<Typewriter>,
    guardian: Arc<GuardianPoller>,
    settings: AppSettings,
}

impl LiveEffectRunner {
    pub fn new(
        media: Arc<MediaCaptureManager>,
        channel: Arc<TranscriptionChannel>,
        narrative: Arc<NarrativeClient>,
        typewriter: Arc<Typewriter>,
        guardian: Arc<GuardianPoller>,
        settings: AppSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            media,
            channel,
            narrative,
            typewriter,
            guardian,
            settings,
        })
    }
}

impl EffectRunner for LiveEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::AcquireMedia => {
                let media = self.media.clone();
                let facing = self.settings.initial_facing;
                tokio::spawn(async move {
                    match media.acquire(facing).await {
                        Ok(generation) => {
                            let _ = tx.send(Event::MediaReady { generation }).await;
                        }
                        Err(MediaError::Superseded) => {
                            log::debug!("media: acquisition superseded, result discarded");
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::MediaFailed { err: e.to_string() })
                                .await;
                        }
                    }
                });
            }

            Effect::SwitchFacing => {
                let media = self.media.clone();
                tokio::spawn(async move {
                    match media.switch_facing().await {
                        Ok(generation) => {
                            let _ = tx.send(Event::MediaReady { generation }).await;
                        }
                        Err(MediaError::Superseded) => {
                            log::debug!("media: switch superseded, result discarded");
                        }
                        // The prior handle is intact; a notice is enough.
                        Err(e) => {
                            let _ = tx
                                .send(Event::SwitchRejected {
                                    reason: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::OpenChannel { generation } => {
                let media = self.media.clone();
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    match channel.open(&media, generation, tx.clone()).await {
                        Ok(()) => {
                            let _ = tx.send(Event::ChannelOpen { generation }).await;
                        }
                        Err(e) => {
                            log::warn!("transcription: open failed: {}", e);
                            let _ = tx
                                .send(Event::ChannelClosed {
                                    generation,
                                    reason: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::RequestBranch {
                request_id,
                trigger,
                history,
            } => {
                let narrative = self.narrative.clone();
                tokio::spawn(async move {
                    let history = if history.is_empty() {
                        None
                    } else {
                        Some(history)
                    };
                    match narrative.request(&trigger, history.as_deref()).await {
                        Ok(reply) => {
                            let _ = tx
                                .send(Event::BranchOk {
                                    request_id,
                                    text: reply.text,
                                    speaker: reply.speaker,
                                    options: reply.options,
                                })
                                .await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::BranchFailed {
                                    request_id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            // Synchronous on purpose: the previous reveal must be cancelled
            // before this call returns.
            Effect::Reveal { speaker, text } => self.typewriter.reveal(speaker, text),

            Effect::DismissGuardian => self.guardian.dismiss(),

            Effect::Notice { .. } | Effect::EmitUi => {
                unreachable!("handled in run_session_loop");
            }
        }
    }
}

/// Scripted effect runner for tests. Media and channel effects succeed
/// immediately with generations 1, 2, …; branch requests answer with the
/// canned reply, or stay in flight for the test to resolve when there is
/// none. Every spawned effect is recorded.
pub struct StubEffectRunner {
    effects: std::sync::Mutex<Vec<Effect>>,
    branch_reply: Option<BranchReply>,
    next_generation: AtomicU64,
}

impl StubEffectRunner {
    pub fn new(branch_reply: Option<BranchReply>) -> Arc<Self> {
        Arc::new(Self {
            effects: std::sync::Mutex::new(Vec::new()),
            branch_reply,
            next_generation: AtomicU64::new(0),
        })
    }

    pub fn effects(&self) -> Vec<Effect> {
        self.effects.lock().unwrap().clone()
    }

    pub fn branch_request_count(&self) -> usize {
        self.effects
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Effect::RequestBranch { .. }))
            .count()
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        self.effects.lock().unwrap().push(effect.clone());
        match effect {
            Effect::AcquireMedia | Effect::SwitchFacing => {
                let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(async move {
                    let _ = tx.send(Event::MediaReady { generation }).await;
                });
            }
            Effect::OpenChannel { generation } => {
                tokio::spawn(async move {
                    let _ = tx.send(Event::ChannelOpen { generation }).await;
                });
            }
            Effect::RequestBranch { request_id, .. } => {
                if let Some(reply) = self.branch_reply.clone() {
                    tokio::spawn(async move {
                        let _ = tx
                            .send(Event::BranchOk {
                                request_id,
                                text: reply.text,
                                speaker: reply.speaker,
                                options: reply.options,
                            })
                            .await;
                    });
                }
            }
            Effect::Reveal { .. } | Effect::DismissGuardian => {}
            Effect::Notice { .. } | Effect::EmitUi => {}
        }
    }
}
