//! Transcription channel client.
//!
//! Connection flow:
//!
//! 1. `open()` — tear down any previous connection, take the audio stream of
//!    the given media generation, dial `/ws_asr` with a timeout
//! 2. the writer task paces audio into bounded chunks and sends them
//! 3. the reader task parses JSON frames into session events, in order
//! 4. `close()` — cancel both tasks and send the close frame
//!
//! There is no reconnection: a socket failure marks the channel `Closed`,
//! emits one `ChannelClosed` event and stops. The next media generation (or
//! a manual retry) opens a fresh channel.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{protocol, queue::ChunkQueue, ChannelError};
use crate::media::MediaCaptureManager;
use crate::session::Event;

/// Timeout for the websocket dial + handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

struct ActiveConnection {
    generation: u64,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct TranscriptionChannel {
    url: String,
    chunk_ms: u64,
    queue_depth: usize,
    status: Arc<Mutex<ChannelStatus>>,
    active: tokio::sync::Mutex<Option<ActiveConnection>>,
}

impl TranscriptionChannel {
    pub fn new(url: String, chunk_ms: u64, queue_depth: usize) -> Self {
        Self {
            url,
            chunk_ms,
            queue_depth,
            status: Arc::new(Mutex::new(ChannelStatus::Closed)),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.lock().unwrap()
    }

    /// Open a connection against the audio track of `generation`, tearing
    /// down any existing connection first. Failures leave the channel in
    /// `Closed`; the caller turns them into a `ChannelClosed` event.
    pub async fn open(
        &self,
        media: &MediaCaptureManager,
        generation: u64,
        events: mpsc::Sender<Event>,
    ) -> Result<(), ChannelError> {
        self.close().await;

        let (samples, sample_rate) = media
            .take_audio(generation)
            .ok_or(ChannelError::NoAudio)?;

        set_status(&self.status, ChannelStatus::Connecting);
        log::info!(
            "transcription: connecting to {} (generation {})",
            self.url,
            generation
        );

        let ws = match timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                set_status(&self.status, ChannelStatus::Closed);
                return Err(ChannelError::ConnectFailed(e.to_string()));
            }
            Err(_) => {
                set_status(&self.status, ChannelStatus::Closed);
                return Err(ChannelError::HandshakeTimeout);
            }
        };

        set_status(&self.status, ChannelStatus::Open);
        log::info!("transcription: connected (generation {})", generation);

        let (write, read) = ws.split();
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            read,
            generation,
            events.clone(),
            self.status.clone(),
            cancel.clone(),
        ));
        let writer = tokio::spawn(write_loop(
            write,
            samples,
            sample_rate,
            self.chunk_ms,
            self.queue_depth,
            generation,
            events,
            self.status.clone(),
            cancel.clone(),
        ));

        *self.active.lock().await = Some(ActiveConnection {
            generation,
            cancel,
            reader,
            writer,
        });
        Ok(())
    }

    /// Graceful teardown of the current connection, if any.
    pub async fn close(&self) {
        let Some(conn) = self.active.lock().await.take() else {
            return;
        };

        set_status(&self.status, ChannelStatus::Closing);
        conn.cancel.cancel();
        // The writer owns the sink and sends the close frame on its way out.
        let _ = conn.writer.await;
        let _ = conn.reader.await;
        set_status(&self.status, ChannelStatus::Closed);
        log::info!(
            "transcription: channel closed (generation {})",
            conn.generation
        );
    }
}

fn set_status(status: &Mutex<ChannelStatus>, next: ChannelStatus) -> ChannelStatus {
    std::mem::replace(&mut status.lock().unwrap(), next)
}

/// Flag the connection as failed and surface it as an event, exactly once.
async fn mark_failed(
    status: &Mutex<ChannelStatus>,
    events: &mpsc::Sender<Event>,
    cancel: &CancellationToken,
    generation: u64,
    reason: String,
) {
    let previous = set_status(status, ChannelStatus::Closed);
    cancel.cancel();
    if previous != ChannelStatus::Closed && previous != ChannelStatus::Closing {
        let _ = events
            .send(Event::ChannelClosed { generation, reason })
            .await;
    }
}

async fn read_loop(
    mut read: WsSource,
    generation: u64,
    events: mpsc::Sender<Event>,
    status: Arc<Mutex<ChannelStatus>>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(raw))) => match protocol::parse_frame(&raw) {
                Ok(frame) => {
                    // Forward in arrival order; the session loop applies them
                    // in the same order.
                    if let Some(text) = frame.text {
                        if events
                            .send(Event::Transcript {
                                generation,
                                text,
                                speaker: frame.speaker.clone(),
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    if let Some(options) = frame.options {
                        if events
                            .send(Event::TranscriptOptions {
                                generation,
                                options,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("transcription: discarding malformed frame: {}", e);
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                mark_failed(
                    &status,
                    &events,
                    &cancel,
                    generation,
                    "closed by server".to_string(),
                )
                .await;
                break;
            }
            Some(Ok(_)) => {} // ping/pong/binary: nothing to do
            Some(Err(e)) => {
                mark_failed(&status, &events, &cancel, generation, e.to_string()).await;
                break;
            }
        }
    }
    log::debug!("transcription: reader task exiting (generation {})", generation);
}

#[allow(clippy::too_many_arguments)]
async fn write_loop(
    mut write: WsSink,
    mut samples: mpsc::Receiver<Vec<i16>>,
    sample_rate: u32,
    chunk_ms: u64,
    queue_depth: usize,
    generation: u64,
    events: mpsc::Sender<Event>,
    status: Arc<Mutex<ChannelStatus>>,
    cancel: CancellationToken,
) {
    let mut pending: Vec<i16> = Vec::new();
    let mut queue = ChunkQueue::new(queue_depth);
    let mut ticker = interval(Duration::from_millis(chunk_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            batch = samples.recv() => match batch {
                Some(batch) => pending.extend(protocol::downsample(
                    &batch,
                    sample_rate,
                    protocol::TARGET_SAMPLE_RATE,
                )),
                // The audio track stopped; the channel follows it down.
                None => break,
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    match protocol::wav_chunk(&pending, protocol::TARGET_SAMPLE_RATE) {
                        Ok(bytes) => {
                            if queue.push(bytes) {
                                log::debug!(
                                    "transcription: outbound queue full, dropped oldest chunk ({} total)",
                                    queue.dropped()
                                );
                            }
                        }
                        Err(e) => log::warn!("transcription: failed to encode chunk: {}", e),
                    }
                    pending.clear();
                }

                if *status.lock().unwrap() == ChannelStatus::Open {
                    while let Some(chunk) = queue.pop() {
                        if let Err(e) = write.send(Message::Binary(chunk)).await {
                            mark_failed(&status, &events, &cancel, generation, e.to_string())
                                .await;
                            return;
                        }
                    }
                }
            }
        }
    }

    let _ = write.close().await;
    log::debug!("transcription: writer task exiting (generation {})", generation);
}
