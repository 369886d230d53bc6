//! Streaming transcription channel.
//!
//! One persistent websocket per media generation:
//!
//! ```text
//! Capture thread ──samples──▶ write_loop ── downsample 16kHz
//!                                 │            500ms chunks
//!                                 ▼
//!                          ChunkQueue (bounded, drop-oldest)
//!                                 │ while Open
//!                                 ▼
//!                          binary WAV frames ──▶ /ws_asr
//!
//! /ws_asr ──JSON frames──▶ read_loop ──▶ Event::Transcript / TranscriptOptions
//! ```
//!
//! Socket failures land the channel in `Closed`; there is no automatic
//! reconnect. A camera switch (fresh generation) builds a new channel.

mod client;
mod protocol;
mod queue;

pub use client::{ChannelStatus, TranscriptionChannel};
pub use protocol::{downsample, parse_frame, wav_chunk, ServerFrame, TARGET_SAMPLE_RATE};
pub use queue::ChunkQueue;

/// Errors from opening the transcription channel. Failures after open are
/// not errors to the caller: they surface as one `ChannelClosed` event.
#[derive(Debug, Clone)]
pub enum ChannelError {
    /// The media handle's audio stream was stale or already consumed.
    NoAudio,
    ConnectFailed(String),
    HandshakeTimeout,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::NoAudio => write!(f, "no audio stream for this generation"),
            ChannelError::ConnectFailed(e) => write!(f, "failed to connect: {}", e),
            ChannelError::HandshakeTimeout => write!(f, "websocket handshake timed out"),
        }
    }
}

impl std::error::Error for ChannelError {}
