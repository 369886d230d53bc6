//! Session state machine.
//!
//! All state transitions go through `reduce()`, which returns the next
//! session and a list of effects to execute (single-writer pattern). Key
//! rules:
//!
//! - never mutate state outside the reducer
//! - drop events carrying a stale media generation or branch request id
//! - at most one branch request in flight; a second trigger overwrites the
//!   pending slot instead of issuing a concurrent call

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::narrative::{self, BranchTrigger};

/// Dialogue lines kept as context for branch requests.
const HISTORY_LIMIT: usize = 40;

/// Speaker shown before the server names one.
const DEFAULT_SPEAKER: &str = "主角";

/// A user-selectable narrative branch. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionItem {
    pub id: String,
    pub text: String,
}

/// Where the session currently is. Generations tag which media acquisition a
/// state belongs to, so late results from superseded devices can be dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Initializing {
        /// Set once the devices are up and the channel is being opened.
        generation: Option<u64>,
    },
    CapturingIdle {
        generation: u64,
    },
    Listening {
        generation: u64,
    },
    AwaitingBranch {
        generation: u64,
        request_id: Uuid,
        /// The newest trigger that arrived while the request was in flight.
        pending: Option<BranchTrigger>,
    },
    PresentingOptions {
        generation: u64,
    },
    Error {
        message: String,
    },
}

impl State {
    fn generation(&self) -> Option<u64> {
        match self {
            State::Initializing { generation } => *generation,
            State::CapturingIdle { generation }
            | State::Listening { generation }
            | State::AwaitingBranch { generation, .. }
            | State::PresentingOptions { generation } => Some(*generation),
            State::Error { .. } => None,
        }
    }
}

/// The one session of the running program. Exclusively mutated by the
/// session loop via `reduce()`.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: State,
    pub active_speaker: String,
    pub last_transcript: String,
    pub options: Vec<OptionItem>,
    pub history: Vec<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: State::Initializing { generation: None },
            active_speaker: DEFAULT_SPEAKER.to_string(),
            last_transcript: String::new(),
            options: Vec::new(),
            history: Vec::new(),
        }
    }
}

/// Every inbound callback of the system, as one event type: device results,
/// socket messages, branch replies and user actions all land here.
#[derive(Debug, Clone)]
pub enum Event {
    /// Kick off the initial device acquisition.
    Start,
    /// User-initiated retry from the error screen.
    Retry,
    /// Application exit requested.
    Shutdown,

    // Media events
    MediaReady {
        generation: u64,
    },
    MediaFailed {
        err: String,
    },
    /// User asked to flip the camera.
    SwitchCamera,
    /// A switch was rejected or failed; the prior handle is intact.
    SwitchRejected {
        reason: String,
    },

    // Transcription channel events
    ChannelOpen {
        generation: u64,
    },
    ChannelClosed {
        generation: u64,
        reason: String,
    },
    Transcript {
        generation: u64,
        text: String,
        speaker: Option<String>,
    },
    TranscriptOptions {
        generation: u64,
        options: Vec<OptionItem>,
    },

    // Narrative events
    /// User picked a branch option.
    OptionSelected {
        id: String,
    },
    BranchOk {
        request_id: Uuid,
        text: String,
        speaker: Option<String>,
        options: Vec<OptionItem>,
    },
    BranchFailed {
        request_id: Uuid,
        err: String,
    },

    // Guardian events
    /// User dismissed the guardian warning.
    DismissWarning,
}

/// Effects produced by a transition, executed asynchronously by the effect
/// runner. `EmitUi` and `Notice` are handled by the session loop itself.
#[derive(Debug, Clone)]
pub enum Effect {
    AcquireMedia,
    SwitchFacing,
    OpenChannel {
        generation: u64,
    },
    RequestBranch {
        request_id: Uuid,
        trigger: BranchTrigger,
        history: String,
    },
    Reveal {
        speaker: String,
        text: String,
    },
    DismissGuardian,
    Notice {
        message: String,
    },
    EmitUi,
}

fn push_history(history: &mut Vec<String>, line: String) {
    history.push(line);
    if history.len() > HISTORY_LIMIT {
        let excess = history.len() - HISTORY_LIMIT;
        history.drain(..excess);
    }
}

fn history_context(history: &[String]) -> String {
    history.join("\n")
}

/// Reducer function: (session, event) -> (next_session, effects)
pub fn reduce(session: &Session, event: Event) -> (Session, Vec<Effect>) {
    use Effect::*;

    let mut next = session.clone();
    let current_generation = session.state.generation();

    match event {
        Event::Start => match session.state {
            State::Initializing { generation: None } => (next, vec![AcquireMedia, EmitUi]),
            _ => (next, vec![]),
        },

        Event::Retry => match session.state {
            State::Error { .. } => {
                next.state = State::Initializing { generation: None };
                (next, vec![AcquireMedia, EmitUi])
            }
            _ => (next, vec![]),
        },

        Event::Shutdown => (next, vec![]),

        Event::MediaReady { generation } => {
            // A fresh acquisition always carries a larger generation; anything
            // else is a stale callback.
            if current_generation.is_some_and(|g| generation <= g) {
                return (next, vec![]);
            }
            next.state = match &session.state {
                State::Initializing { .. } => State::Initializing {
                    generation: Some(generation),
                },
                State::CapturingIdle { .. } => State::CapturingIdle { generation },
                State::Listening { .. } => State::Listening { generation },
                State::AwaitingBranch {
                    request_id, pending, ..
                } => State::AwaitingBranch {
                    generation,
                    request_id: *request_id,
                    pending: pending.clone(),
                },
                State::PresentingOptions { .. } => State::PresentingOptions { generation },
                State::Error { .. } => return (next, vec![]),
            };
            (next, vec![OpenChannel { generation }, EmitUi])
        }

        Event::MediaFailed { err } => match session.state {
            State::Initializing { .. } => {
                next.state = State::Error { message: err };
                (next, vec![EmitUi])
            }
            _ => {
                log::warn!("ignoring media failure outside initialization: {}", err);
                (next, vec![])
            }
        },

        Event::SwitchCamera => match session.state {
            State::Initializing { .. } | State::Error { .. } => (
                next,
                vec![Notice {
                    message: "摄像头尚未就绪".to_string(),
                }],
            ),
            _ => (next, vec![SwitchFacing]),
        },

        Event::SwitchRejected { reason } => (next, vec![Notice { message: reason }]),

        Event::ChannelOpen { generation } => {
            if Some(generation) != current_generation {
                return (next, vec![]);
            }
            match session.state {
                State::Initializing { .. } => {
                    next.state = State::CapturingIdle { generation };
                    (next, vec![EmitUi])
                }
                // Channel re-opened after a camera switch; no phase change.
                _ => (next, vec![]),
            }
        }

        Event::ChannelClosed { generation, reason } => {
            if Some(generation) != current_generation {
                return (next, vec![]);
            }
            let notice = Notice {
                message: format!("转写通道已断开: {}", reason),
            };
            match session.state {
                // Devices are up even though subtitles are not; the session
                // still runs and a camera switch can rebuild the channel.
                State::Initializing { .. } => {
                    next.state = State::CapturingIdle { generation };
                    (next, vec![notice, EmitUi])
                }
                _ => (next, vec![notice]),
            }
        }

        Event::Transcript {
            generation,
            text,
            speaker,
        } => {
            if Some(generation) != current_generation {
                return (next, vec![]);
            }
            if let Some(speaker) = speaker {
                next.active_speaker = speaker;
            }
            let reveal_speaker = next.active_speaker.clone();
            next.last_transcript = text.clone();
            push_history(&mut next.history, format!("{}: {}", reveal_speaker, text));

            let reveal = Reveal {
                speaker: reveal_speaker,
                text: text.clone(),
            };

            match &session.state {
                State::AwaitingBranch {
                    request_id,
                    pending,
                    ..
                } => {
                    // A cue while a request is in flight coalesces: the
                    // newest trigger replaces the pending one.
                    let pending = if narrative::contains_cue(&text) {
                        Some(BranchTrigger::Prompt(text))
                    } else {
                        pending.clone()
                    };
                    next.state = State::AwaitingBranch {
                        generation,
                        request_id: *request_id,
                        pending,
                    };
                    (next, vec![reveal, EmitUi])
                }
                State::PresentingOptions { .. } => {
                    // Subtitles keep flowing; only an option selection leaves
                    // this state.
                    (next, vec![reveal, EmitUi])
                }
                _ => {
                    if narrative::contains_cue(&text) {
                        let request_id = Uuid::new_v4();
                        next.state = State::AwaitingBranch {
                            generation,
                            request_id,
                            pending: None,
                        };
                        let history = history_context(&next.history);
                        (
                            next,
                            vec![
                                reveal,
                                RequestBranch {
                                    request_id,
                                    trigger: BranchTrigger::Prompt(text),
                                    history,
                                },
                                EmitUi,
                            ],
                        )
                    } else {
                        next.state = State::Listening { generation };
                        (next, vec![reveal, EmitUi])
                    }
                }
            }
        }

        Event::TranscriptOptions {
            generation,
            options,
        } => {
            if Some(generation) != current_generation {
                return (next, vec![]);
            }
            next.options = options;
            match session.state {
                State::CapturingIdle { .. } | State::Listening { .. }
                    if !next.options.is_empty() =>
                {
                    next.state = State::PresentingOptions { generation };
                }
                State::PresentingOptions { .. } if next.options.is_empty() => {
                    next.state = State::Listening { generation };
                }
                _ => {}
            }
            (next, vec![EmitUi])
        }

        Event::OptionSelected { id } => match &session.state {
            State::CapturingIdle { generation }
            | State::Listening { generation }
            | State::PresentingOptions { generation } => {
                let request_id = Uuid::new_v4();
                next.state = State::AwaitingBranch {
                    generation: *generation,
                    request_id,
                    pending: None,
                };
                let history = history_context(&next.history);
                (
                    next,
                    vec![
                        RequestBranch {
                            request_id,
                            trigger: BranchTrigger::Option(id),
                            history,
                        },
                        EmitUi,
                    ],
                )
            }
            State::AwaitingBranch {
                generation,
                request_id,
                ..
            } => {
                next.state = State::AwaitingBranch {
                    generation: *generation,
                    request_id: *request_id,
                    pending: Some(BranchTrigger::Option(id)),
                };
                (next, vec![])
            }
            _ => (next, vec![]),
        },

        Event::BranchOk {
            request_id,
            text,
            speaker,
            options,
        } => match &session.state {
            State::AwaitingBranch {
                generation,
                request_id: awaiting,
                pending,
            } if *awaiting == request_id => {
                let generation = *generation;
                if let Some(speaker) = speaker {
                    next.active_speaker = speaker;
                }
                let reveal_speaker = next.active_speaker.clone();
                push_history(&mut next.history, format!("{}: {}", reveal_speaker, text));
                next.options = options;

                let mut effects = vec![Reveal {
                    speaker: reveal_speaker,
                    text,
                }];

                match pending {
                    Some(trigger) => {
                        // The coalesced trigger goes out now; requests stay
                        // strictly serialized.
                        let next_id = Uuid::new_v4();
                        next.state = State::AwaitingBranch {
                            generation,
                            request_id: next_id,
                            pending: None,
                        };
                        let history = history_context(&next.history);
                        effects.push(RequestBranch {
                            request_id: next_id,
                            trigger: trigger.clone(),
                            history,
                        });
                    }
                    None if !next.options.is_empty() => {
                        next.state = State::PresentingOptions { generation };
                    }
                    None => {
                        next.state = State::Listening { generation };
                    }
                }
                effects.push(EmitUi);
                (next, effects)
            }
            _ => {
                log::debug!("dropping stale branch reply {}", request_id);
                (next, vec![])
            }
        },

        Event::BranchFailed { request_id, err } => match &session.state {
            State::AwaitingBranch {
                generation,
                request_id: awaiting,
                pending,
            } if *awaiting == request_id => {
                log::warn!("branch request failed: {}", err);
                match pending {
                    Some(trigger) => {
                        let next_id = Uuid::new_v4();
                        next.state = State::AwaitingBranch {
                            generation: *generation,
                            request_id: next_id,
                            pending: None,
                        };
                        let history = history_context(&next.history);
                        (
                            next,
                            vec![RequestBranch {
                                request_id: next_id,
                                trigger: trigger.clone(),
                                history,
                            }],
                        )
                    }
                    None => {
                        // Dialogue and options stay as they were.
                        next.state = State::Listening {
                            generation: *generation,
                        };
                        (
                            next,
                            vec![
                                Notice {
                                    message: "剧情生成失败，继续聆听".to_string(),
                                },
                                EmitUi,
                            ],
                        )
                    }
                }
            }
            _ => {
                log::debug!("dropping stale branch failure {}", request_id);
                (next, vec![])
            }
        },

        Event::DismissWarning => (next, vec![DismissGuardian]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_session(generation: u64) -> Session {
        Session {
            state: State::CapturingIdle { generation },
            ..Session::default()
        }
    }

    fn listening_session(generation: u64) -> Session {
        Session {
            state: State::Listening { generation },
            ..Session::default()
        }
    }

    fn find_request(effects: &[Effect]) -> Option<(&Uuid, &BranchTrigger)> {
        effects.iter().find_map(|e| match e {
            Effect::RequestBranch {
                request_id,
                trigger,
                ..
            } => Some((request_id, trigger)),
            _ => None,
        })
    }

    fn request_count(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::RequestBranch { .. }))
            .count()
    }

    #[test]
    fn start_acquires_media() {
        let (next, effects) = reduce(&Session::default(), Event::Start);
        assert!(matches!(next.state, State::Initializing { generation: None }));
        assert!(effects.iter().any(|e| matches!(e, Effect::AcquireMedia)));
    }

    #[test]
    fn init_completes_after_media_and_channel() {
        let session = Session::default();

        let (session, effects) = reduce(&session, Event::MediaReady { generation: 1 });
        assert!(matches!(
            session.state,
            State::Initializing {
                generation: Some(1)
            }
        ));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenChannel { generation: 1 })));

        let (session, _) = reduce(&session, Event::ChannelOpen { generation: 1 });
        assert!(matches!(session.state, State::CapturingIdle { generation: 1 }));
    }

    #[test]
    fn media_failure_during_init_is_fatal_until_retry() {
        let session = Session::default();
        let (session, _) = reduce(
            &session,
            Event::MediaFailed {
                err: "permission denied".to_string(),
            },
        );
        assert!(matches!(session.state, State::Error { .. }));

        let (session, effects) = reduce(&session, Event::Retry);
        assert!(matches!(
            session.state,
            State::Initializing { generation: None }
        ));
        assert!(effects.iter().any(|e| matches!(e, Effect::AcquireMedia)));
    }

    #[test]
    fn transcript_moves_to_listening_and_reveals() {
        let session = idle_session(1);
        let (session, effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "你好".to_string(),
                speaker: Some("主角".to_string()),
            },
        );

        assert!(matches!(session.state, State::Listening { generation: 1 }));
        assert_eq!(session.last_transcript, "你好");
        assert_eq!(session.history, vec!["主角: 你好"]);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Reveal { text, .. } if text == "你好")));
        assert_eq!(request_count(&effects), 0, "no cue means no branch request");
    }

    #[test]
    fn cue_transcript_triggers_exactly_one_branch_request() {
        let session = listening_session(1);
        let (session, effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "你是谁吗？".to_string(),
                speaker: None,
            },
        );

        assert!(matches!(session.state, State::AwaitingBranch { .. }));
        assert_eq!(request_count(&effects), 1);
        let (_, trigger) = find_request(&effects).unwrap();
        assert_eq!(trigger, &BranchTrigger::Prompt("你是谁吗？".to_string()));
    }

    #[test]
    fn stale_generation_transcript_is_dropped() {
        let session = listening_session(2);
        let (session, effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "你是谁吗？".to_string(),
                speaker: None,
            },
        );
        assert!(matches!(session.state, State::Listening { generation: 2 }));
        assert!(effects.is_empty());
        assert!(session.last_transcript.is_empty());
    }

    #[test]
    fn second_cue_coalesces_instead_of_issuing_a_call() {
        let session = listening_session(1);
        let (session, first_effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "为什么？".to_string(),
                speaker: None,
            },
        );
        assert_eq!(request_count(&first_effects), 1);

        let (session, second_effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "怎么办？".to_string(),
                speaker: None,
            },
        );
        // Still one request in flight, nothing new issued.
        assert_eq!(request_count(&second_effects), 0);
        match &session.state {
            State::AwaitingBranch { pending, .. } => {
                assert_eq!(
                    pending.as_ref(),
                    Some(&BranchTrigger::Prompt("怎么办？".to_string()))
                );
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn resolution_dispatches_the_coalesced_trigger() {
        let session = listening_session(1);
        let (session, effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "为什么？".to_string(),
                speaker: None,
            },
        );
        let (&first_id, _) = find_request(&effects).unwrap();

        let (session, _) = reduce(
            &session,
            Event::OptionSelected {
                id: "comfort".to_string(),
            },
        );

        let (session, effects) = reduce(
            &session,
            Event::BranchOk {
                request_id: first_id,
                text: "嗯".to_string(),
                speaker: None,
                options: vec![],
            },
        );

        // The pending option selection goes out as the one follow-up call.
        assert_eq!(request_count(&effects), 1);
        let (_, trigger) = find_request(&effects).unwrap();
        assert_eq!(trigger, &BranchTrigger::Option("comfort".to_string()));
        assert!(matches!(
            session.state,
            State::AwaitingBranch { pending: None, .. }
        ));
    }

    #[test]
    fn branch_reply_with_options_presents_them() {
        let session = listening_session(1);
        let (session, effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "你是谁吗？".to_string(),
                speaker: None,
            },
        );
        let (&request_id, _) = find_request(&effects).unwrap();

        let (session, effects) = reduce(
            &session,
            Event::BranchOk {
                request_id,
                text: "你好".to_string(),
                speaker: Some("同伴".to_string()),
                options: vec![OptionItem {
                    id: "1".to_string(),
                    text: "继续".to_string(),
                }],
            },
        );

        assert!(matches!(
            session.state,
            State::PresentingOptions { generation: 1 }
        ));
        assert_eq!(session.active_speaker, "同伴");
        assert_eq!(session.options.len(), 1);
        assert_eq!(session.options[0].text, "继续");
        assert!(effects.iter().any(
            |e| matches!(e, Effect::Reveal { speaker, text } if speaker == "同伴" && text == "你好")
        ));
    }

    #[test]
    fn branch_reply_without_options_resumes_listening() {
        let session = listening_session(1);
        let (session, effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "你是谁吗？".to_string(),
                speaker: None,
            },
        );
        let (&request_id, _) = find_request(&effects).unwrap();

        let (session, _) = reduce(
            &session,
            Event::BranchOk {
                request_id,
                text: "嗯".to_string(),
                speaker: None,
                options: vec![],
            },
        );
        assert!(matches!(session.state, State::Listening { generation: 1 }));
        assert!(session.options.is_empty());
    }

    #[test]
    fn branch_failure_leaves_dialogue_untouched() {
        let mut session = listening_session(1);
        session.options = vec![OptionItem {
            id: "a".to_string(),
            text: "旧选项".to_string(),
        }];
        session.last_transcript = "旧台词".to_string();

        let (session, effects) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "为什么？".to_string(),
                speaker: None,
            },
        );
        let (&request_id, _) = find_request(&effects).unwrap();

        let (session, effects) = reduce(
            &session,
            Event::BranchFailed {
                request_id,
                err: "timeout".to_string(),
            },
        );

        assert!(matches!(session.state, State::Listening { generation: 1 }));
        assert_eq!(session.options[0].text, "旧选项", "options unchanged");
        assert!(effects.iter().any(|e| matches!(e, Effect::Notice { .. })));
        assert_eq!(request_count(&effects), 0);
    }

    #[test]
    fn stale_branch_reply_is_dropped() {
        let session = listening_session(1);
        let (session, _) = reduce(
            &session,
            Event::Transcript {
                generation: 1,
                text: "为什么？".to_string(),
                speaker: None,
            },
        );

        let (session, effects) = reduce(
            &session,
            Event::BranchOk {
                request_id: Uuid::new_v4(),
                text: "迟到的回复".to_string(),
                speaker: None,
                options: vec![],
            },
        );
        assert!(matches!(session.state, State::AwaitingBranch { .. }));
        assert!(effects.is_empty());
        assert!(session.history.iter().all(|l| !l.contains("迟到的回复")));
    }

    #[test]
    fn option_selection_requests_that_branch() {
        let mut session = idle_session(1);
        session.state = State::PresentingOptions { generation: 1 };

        let (session, effects) = reduce(
            &session,
            Event::OptionSelected {
                id: "comfort".to_string(),
            },
        );
        assert!(matches!(session.state, State::AwaitingBranch { .. }));
        let (_, trigger) = find_request(&effects).unwrap();
        assert_eq!(trigger, &BranchTrigger::Option("comfort".to_string()));
    }

    #[test]
    fn server_pushed_options_enter_presenting() {
        let session = listening_session(1);
        let (session, _) = reduce(
            &session,
            Event::TranscriptOptions {
                generation: 1,
                options: vec![OptionItem {
                    id: "a".to_string(),
                    text: "说点什么".to_string(),
                }],
            },
        );
        assert!(matches!(
            session.state,
            State::PresentingOptions { generation: 1 }
        ));

        let (session, _) = reduce(
            &session,
            Event::TranscriptOptions {
                generation: 1,
                options: vec![],
            },
        );
        assert!(matches!(session.state, State::Listening { generation: 1 }));
    }

    #[test]
    fn switch_during_capture_issues_the_effect_once() {
        let session = listening_session(1);
        let (_, effects) = reduce(&session, Event::SwitchCamera);
        assert!(effects.iter().any(|e| matches!(e, Effect::SwitchFacing)));

        let (_, effects) = reduce(&Session::default(), Event::SwitchCamera);
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Notice { .. })),
            "switching before devices are up is a visible no-op"
        );
    }

    #[test]
    fn switch_rejection_is_a_notice_without_state_change() {
        let session = listening_session(1);
        let (next, effects) = reduce(
            &session,
            Event::SwitchRejected {
                reason: "摄像头切换进行中".to_string(),
            },
        );
        assert_eq!(next.state, session.state);
        assert!(effects.iter().any(|e| matches!(e, Effect::Notice { .. })));
    }

    #[test]
    fn new_generation_reopens_the_channel() {
        let session = listening_session(1);
        let (session, effects) = reduce(&session, Event::MediaReady { generation: 2 });
        assert!(matches!(session.state, State::Listening { generation: 2 }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenChannel { generation: 2 })));

        // The stale acquisition result is ignored.
        let (session, effects) = reduce(&session, Event::MediaReady { generation: 1 });
        assert!(matches!(session.state, State::Listening { generation: 2 }));
        assert!(effects.is_empty());
    }

    #[test]
    fn channel_loss_is_nonfatal() {
        let session = listening_session(1);
        let (next, effects) = reduce(
            &session,
            Event::ChannelClosed {
                generation: 1,
                reason: "io error".to_string(),
            },
        );
        assert_eq!(next.state, session.state);
        assert!(effects.iter().any(|e| matches!(e, Effect::Notice { .. })));
    }

    #[test]
    fn dismiss_routes_to_the_guardian() {
        let session = listening_session(1);
        let (next, effects) = reduce(&session, Event::DismissWarning);
        assert_eq!(next.state, session.state);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::DismissGuardian)));
    }

    #[test]
    fn history_is_bounded() {
        let mut session = listening_session(1);
        for i in 0..100 {
            let (next, _) = reduce(
                &session,
                Event::Transcript {
                    generation: 1,
                    text: format!("第{}句", i),
                    speaker: None,
                },
            );
            session = next;
        }
        assert_eq!(session.history.len(), HISTORY_LIMIT);
        assert!(session.history.last().unwrap().contains("第99句"));
    }
}
