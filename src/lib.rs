//! Live galgame companion client.
//!
//! One cooperative event loop keeps four independently paced activities
//! consistent: continuous audio streaming to the transcription server,
//! sporadic transcript arrival, on-demand narrative branching and periodic
//! guardian classification. The reducer in [`session`] owns every state
//! transition; the components only execute effects and report back as
//! events.

pub mod asr;
pub mod effects;
pub mod guardian;
pub mod media;
pub mod narrative;
pub mod session;
pub mod settings;
pub mod typewriter;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use effects::EffectRunner;
use session::{reduce, Effect, Event, OptionItem, Session, State};

/// Where the session currently is, for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Initializing,
    CapturingIdle,
    Listening,
    AwaitingBranch,
    PresentingOptions,
    Error,
}

/// Snapshot of the session sent to the frontend on every change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub phase: Phase,
    pub speaker: String,
    pub transcript: String,
    pub options: Vec<OptionItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the UI layer receives. `Session` snapshots come from the
/// session loop; `Reveal` and the guardian updates are emitted directly by
/// their components, independent of narrative state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UiUpdate {
    Session { view: SessionView },
    Reveal { speaker: String, text: String },
    GuardianAlert { label: String, confidence: f32 },
    GuardianCleared,
    Notice { message: String },
}

pub fn session_view(session: &Session) -> SessionView {
    let (phase, error) = match &session.state {
        State::Initializing { .. } => (Phase::Initializing, None),
        State::CapturingIdle { .. } => (Phase::CapturingIdle, None),
        State::Listening { .. } => (Phase::Listening, None),
        State::AwaitingBranch { .. } => (Phase::AwaitingBranch, None),
        State::PresentingOptions { .. } => (Phase::PresentingOptions, None),
        State::Error { message } => (Phase::Error, Some(message.clone())),
    };
    SessionView {
        phase,
        speaker: session.active_speaker.clone(),
        transcript: session.last_transcript.clone(),
        options: session.options.clone(),
        error,
    }
}

fn emit_session(ui: &broadcast::Sender<UiUpdate>, session: &Session) {
    let view = session_view(session);
    log::debug!("emitting session view: {:?}", serde_json::to_string(&view));
    // No receivers just means nobody is watching yet.
    let _ = ui.send(UiUpdate::Session { view });
}

/// Handle for dispatching events into the session loop.
pub struct SessionHandle {
    tx: mpsc::Sender<Event>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event).await
    }
}

/// Run the session loop until `Event::Shutdown` or the last sender drops.
///
/// All `Session` mutation happens here, in event arrival order. Effects are
/// handed to the runner; `EmitUi` and `Notice` go straight to the UI channel.
pub async fn run_session_loop(
    ui: broadcast::Sender<UiUpdate>,
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    runner: Arc<dyn EffectRunner>,
) {
    let mut session = Session::default();

    emit_session(&ui, &session);
    log::info!("session loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("received event: {:?}", event);

        // Handle Shutdown at the edge
        if matches!(event, Event::Shutdown) {
            log::info!("shutdown requested, leaving session loop");
            break;
        }

        let old_discriminant = std::mem::discriminant(&session.state);
        let (next, effects) = reduce(&session, event);
        let new_discriminant = std::mem::discriminant(&next.state);

        if old_discriminant != new_discriminant {
            log::info!("session transition: {:?} -> {:?}", session.state, next.state);
        }

        session = next;

        for effect in effects {
            match effect {
                Effect::EmitUi => emit_session(&ui, &session),
                Effect::Notice { message } => {
                    let _ = ui.send(UiUpdate::Notice { message });
                }
                other => runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("session loop ended");
}
