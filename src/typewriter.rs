//! Cancellable character-by-character dialogue reveal.
//!
//! At most one reveal task is live. Starting a new one cancels the previous
//! task and clears the visible line before the new task emits its first
//! character. Cancellation is belt-and-braces: the token stops a sleeping
//! task, and the epoch counter fences a task that already woke up, since the
//! epoch check and the emit have no await between them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::UiUpdate;

pub struct Typewriter {
    ui: broadcast::Sender<UiUpdate>,
    interval: Duration,
    epoch: Arc<AtomicU64>,
    current: Mutex<Option<CancellationToken>>,
}

impl Typewriter {
    pub fn new(ui: broadcast::Sender<UiUpdate>, interval: Duration) -> Self {
        Self {
            ui,
            interval,
            epoch: Arc::new(AtomicU64::new(0)),
            current: Mutex::new(None),
        }
    }

    /// Start revealing `text`, cancelling any live reveal first. The visible
    /// line grows monotonically, one character per interval.
    pub fn reveal(&self, speaker: String, text: String) {
        let token = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap();
            if let Some(previous) = current.take() {
                previous.cancel();
            }
            *current = Some(token.clone());
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        // Clear the line before the new reveal starts.
        let _ = self.ui.send(UiUpdate::Reveal {
            speaker: speaker.clone(),
            text: String::new(),
        });

        let ui = self.ui.clone();
        let interval = self.interval;
        let epoch_counter = self.epoch.clone();

        tokio::spawn(async move {
            let mut visible = String::with_capacity(text.len());
            for ch in text.chars() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if epoch_counter.load(Ordering::SeqCst) != epoch {
                    return;
                }
                visible.push(ch);
                let _ = ui.send(UiUpdate::Reveal {
                    speaker: speaker.clone(),
                    text: visible.clone(),
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn reveal_texts_until(
        rx: &mut broadcast::Receiver<UiUpdate>,
        stop_at: &str,
    ) -> Vec<String> {
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Ok(UiUpdate::Reveal { text, .. }) => {
                    let done = text == stop_at;
                    seen.push(text);
                    if done {
                        return seen;
                    }
                }
                Ok(_) => {}
                Err(_) => return seen,
            }
        }
    }

    #[tokio::test]
    async fn reveal_grows_monotonically_to_the_full_text() {
        let (ui, mut rx) = broadcast::channel(256);
        let tw = Typewriter::new(ui, Duration::from_millis(1));

        tw.reveal("同伴".to_string(), "你好".to_string());

        let seen = timeout(Duration::from_secs(5), reveal_texts_until(&mut rx, "你好"))
            .await
            .expect("reveal completed");

        // Clear, then one character at a time
        assert_eq!(seen, vec!["", "你", "你好"]);
    }

    #[tokio::test]
    async fn new_reveal_cancels_the_previous_task() {
        let (ui, mut rx) = broadcast::channel(256);
        let tw = Typewriter::new(ui, Duration::from_millis(1));

        tw.reveal("甲".to_string(), "abc".to_string());
        tw.reveal("乙".to_string(), "xyz".to_string());

        let seen = timeout(Duration::from_secs(5), reveal_texts_until(&mut rx, "xyz"))
            .await
            .expect("second reveal completed");

        // No character of the first text ever appears: the rendered output
        // is a full reveal of the second text alone.
        for text in &seen {
            assert!(
                "xyz".starts_with(text.as_str()),
                "unexpected reveal output: {:?}",
                text
            );
        }
        assert_eq!(seen.last().map(String::as_str), Some("xyz"));
    }

    #[tokio::test]
    async fn empty_text_only_clears_the_line() {
        let (ui, mut rx) = broadcast::channel(16);
        let tw = Typewriter::new(ui, Duration::from_millis(1));

        tw.reveal("同伴".to_string(), String::new());

        let first = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("update arrives")
            .expect("channel open");
        match first {
            UiUpdate::Reveal { text, .. } => assert!(text.is_empty()),
            other => panic!("unexpected update: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
