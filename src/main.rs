//! Binary entry point: wires settings and components together and renders
//! the session to the terminal. Commands come from stdin:
//! `pick <id>` | `switch` | `dismiss` | `retry` | `quit`.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use live_galgame::asr::TranscriptionChannel;
use live_galgame::effects::LiveEffectRunner;
use live_galgame::guardian::{GuardianConfig, GuardianPoller};
use live_galgame::media::{MediaCaptureManager, SystemMedia};
use live_galgame::narrative::NarrativeClient;
use live_galgame::session::Event;
use live_galgame::typewriter::Typewriter;
use live_galgame::{run_session_loop, settings, SessionHandle, UiUpdate};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("rustls crypto provider already installed");
    }

    let settings = settings::load_settings();
    log::info!("server base: {}", settings.server_base);

    let (ui_tx, _) = broadcast::channel::<UiUpdate>(256);

    let media = Arc::new(MediaCaptureManager::new(Arc::new(SystemMedia::new(
        &settings,
    ))));
    let channel = Arc::new(TranscriptionChannel::new(
        settings.asr_url(),
        settings.chunk_ms,
        settings.outbound_queue_depth,
    ));
    let narrative = Arc::new(NarrativeClient::new(settings.branch_url()));
    let typewriter = Arc::new(Typewriter::new(
        ui_tx.clone(),
        Duration::from_millis(settings.reveal_interval_ms),
    ));
    let guardian = GuardianPoller::new(
        GuardianConfig {
            url: settings.classify_url(),
            period: Duration::from_millis(settings.guardian_period_ms),
            target_class: settings.guardian_target_class.clone(),
            threshold: settings.guardian_threshold,
        },
        media.clone(),
        ui_tx.clone(),
    );
    guardian.spawn();

    let (tx, rx) = mpsc::channel::<Event>(64);
    let runner = LiveEffectRunner::new(
        media.clone(),
        channel.clone(),
        narrative,
        typewriter,
        guardian.clone(),
        settings,
    );

    tokio::spawn(render(ui_tx.subscribe()));
    tokio::spawn(read_commands(SessionHandle::new(tx.clone())));

    if tx.send(Event::Start).await.is_err() {
        return;
    }

    run_session_loop(ui_tx.clone(), rx, tx.clone(), runner).await;

    // Teardown: stop the poller, close the socket, release every track.
    guardian.shutdown();
    channel.close().await;
    media.release();
}

async fn render(mut ui: broadcast::Receiver<UiUpdate>) {
    use std::io::Write;

    loop {
        match ui.recv().await {
            Ok(UiUpdate::Reveal { speaker, text }) => {
                print!("\r{}: {}", speaker, text);
                let _ = std::io::stdout().flush();
            }
            Ok(UiUpdate::Session { view }) => {
                println!();
                println!("[{:?}]", view.phase);
                for option in &view.options {
                    println!("  ({}) {}", option.id, option.text);
                }
                if let Some(error) = view.error {
                    println!("错误: {} — 输入 retry 重试", error);
                }
            }
            Ok(UiUpdate::GuardianAlert { label, confidence }) => {
                println!();
                println!(
                    "⚠ 画面检测到 {} (置信度 {:.2}) — 输入 dismiss 关闭警告",
                    label, confidence
                );
            }
            Ok(UiUpdate::GuardianCleared) => {
                println!("警告已解除");
            }
            Ok(UiUpdate::Notice { message }) => {
                println!();
                println!("{}", message);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("ui: dropped {} updates", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn read_commands(session: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let event = match line {
            "" => continue,
            "switch" => Event::SwitchCamera,
            "dismiss" => Event::DismissWarning,
            "retry" => Event::Retry,
            "quit" | "exit" => Event::Shutdown,
            other => {
                if let Some(id) = other.strip_prefix("pick ") {
                    Event::OptionSelected {
                        id: id.trim().to_string(),
                    }
                } else {
                    println!("命令: pick <id> | switch | dismiss | retry | quit");
                    continue;
                }
            }
        };

        let is_shutdown = matches!(event, Event::Shutdown);
        if session.send(event).await.is_err() || is_shutdown {
            break;
        }
    }
}
