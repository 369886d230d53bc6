//! Narrative branch engine client.
//!
//! Two things live here: cue detection over transcript text, and the `/gpt`
//! request itself. The at-most-one-in-flight rule is not enforced here — the
//! session reducer owns the single-slot coalescing and only ever emits one
//! `RequestBranch` effect at a time.

use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::OptionItem;

/// Explicit timeout so a dead server cannot pin the session in
/// `AwaitingBranch` forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client for branch requests (avoids TLS handshake overhead).
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("failed to build HTTP client")
});

/// Characters that mark a transcript line as question-like.
const CUE_CHARS: [char; 4] = ['?', '？', '吗', '呢'];
/// Question words that trigger even without punctuation.
const CUE_WORDS: [&str; 2] = ["为什么", "怎么"];

/// Does this transcript line ask for a narrative branch?
pub fn contains_cue(text: &str) -> bool {
    text.chars().any(|c| CUE_CHARS.contains(&c)) || CUE_WORDS.iter().any(|w| text.contains(w))
}

/// What asked for the branch: a question-like transcript line, or an option
/// the user picked.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchTrigger {
    Prompt(String),
    Option(String),
}

#[derive(Debug)]
pub enum NarrativeError {
    NetworkError(String),
    ApiError { status: u16, message: String },
    ParseError(String),
}

impl std::fmt::Display for NarrativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NarrativeError::NetworkError(e) => write!(f, "network error: {}", e),
            NarrativeError::ApiError { status, message } => {
                write!(f, "branch endpoint error ({}): {}", status, message)
            }
            NarrativeError::ParseError(e) => write!(f, "failed to parse branch reply: {}", e),
        }
    }
}

impl std::error::Error for NarrativeError {}

#[derive(Debug, Serialize)]
struct BranchRequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    option: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<&'a str>,
}

/// Reply from `/gpt`. A missing `speaker` keeps the current one; missing
/// `options` clears the option list.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchReply {
    pub text: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionItem>,
}

pub struct NarrativeClient {
    url: String,
}

impl NarrativeClient {
    pub fn new(url: String) -> Self {
        Self { url }
    }

    pub async fn request(
        &self,
        trigger: &BranchTrigger,
        history: Option<&str>,
    ) -> Result<BranchReply, NarrativeError> {
        let body = match trigger {
            BranchTrigger::Option(id) => BranchRequestBody {
                option: Some(id),
                prompt: None,
                history,
            },
            BranchTrigger::Prompt(prompt) => BranchRequestBody {
                option: None,
                prompt: Some(prompt),
                history,
            },
        };

        let response = HTTP_CLIENT
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NarrativeError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NarrativeError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<BranchReply>()
            .await
            .map_err(|e| NarrativeError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_mark_is_a_cue() {
        assert!(contains_cue("你是谁吗？"));
        assert!(contains_cue("really?"));
        assert!(contains_cue("是这样呢"));
    }

    #[test]
    fn question_words_are_cues() {
        assert!(contains_cue("为什么会这样"));
        assert!(contains_cue("怎么办"));
    }

    #[test]
    fn plain_text_is_not_a_cue() {
        assert!(!contains_cue("你好"));
        assert!(!contains_cue("今天天气不错"));
        assert!(!contains_cue(""));
    }

    #[test]
    fn request_body_skips_absent_fields() {
        let body = BranchRequestBody {
            option: None,
            prompt: Some("你是谁吗？"),
            history: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"prompt":"你是谁吗？"}"#);

        let body = BranchRequestBody {
            option: Some("comfort"),
            prompt: None,
            history: Some("主角: 你好"),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""option":"comfort""#));
        assert!(json.contains(r#""history":"主角: 你好""#));
        assert!(!json.contains("prompt"));
    }

    #[test]
    fn reply_parses_with_all_fields() {
        let reply: BranchReply = serde_json::from_str(
            r#"{"text": "你好", "speaker": "同伴", "options": [{"id": "1", "text": "继续"}]}"#,
        )
        .unwrap();
        assert_eq!(reply.text, "你好");
        assert_eq!(reply.speaker.as_deref(), Some("同伴"));
        assert_eq!(reply.options.len(), 1);
    }

    #[test]
    fn reply_defaults_missing_speaker_and_options() {
        let reply: BranchReply = serde_json::from_str(r#"{"text": "嗯"}"#).unwrap();
        assert!(reply.speaker.is_none());
        assert!(reply.options.is_empty());
    }
}
