use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::media::FacingMode;

const SETTINGS_FILE_NAME: &str = "settings.json";
const APP_CONFIG_DIR: &str = "live-galgame";

/// Overrides `server_base` when set; handy for pointing a dev build at a
/// remote backend without touching settings.json.
const SERVER_ENV_VAR: &str = "GALGAME_SERVER";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Base URL of the galgame backend (http or https).
    pub server_base: String,
    /// Websocket path of the streaming transcription endpoint.
    pub asr_path: String,
    /// POST path of the narrative branch endpoint.
    pub branch_path: String,
    /// POST path of the guardian classification endpoint.
    pub classify_path: String,

    /// Camera used when the session starts.
    pub initial_facing: FacingMode,
    /// V4L2 device node of the back camera.
    pub video_device_back: PathBuf,
    /// V4L2 device node of the front camera.
    pub video_device_front: PathBuf,

    /// Cadence of outbound audio chunks in milliseconds.
    pub chunk_ms: u64,
    /// Chunks buffered while the channel is not open; oldest dropped first.
    pub outbound_queue_depth: usize,

    /// Delay between revealed dialogue characters in milliseconds.
    pub reveal_interval_ms: u64,

    /// Guardian polling period in milliseconds.
    pub guardian_period_ms: u64,
    /// Class the guardian expects to see; any other class can raise the alert.
    pub guardian_target_class: String,
    /// Minimum classifier confidence before a mismatch raises the alert.
    pub guardian_threshold: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_base: "http://127.0.0.1:8000".to_string(),
            asr_path: "/ws_asr".to_string(),
            branch_path: "/gpt".to_string(),
            classify_path: "/yolo_gender".to_string(),
            initial_facing: FacingMode::Front,
            video_device_back: PathBuf::from("/dev/video0"),
            video_device_front: PathBuf::from("/dev/video1"),
            chunk_ms: 500,
            outbound_queue_depth: 4,
            reveal_interval_ms: 32,
            guardian_period_ms: 3000,
            guardian_target_class: "female".to_string(),
            guardian_threshold: 0.7,
        }
    }
}

impl AppSettings {
    /// Websocket URL of the transcription endpoint, derived from `server_base`.
    pub fn asr_url(&self) -> String {
        let base = if let Some(rest) = self.server_base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.server_base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", self.server_base)
        };
        format!("{}{}", base.trim_end_matches('/'), self.asr_path)
    }

    pub fn branch_url(&self) -> String {
        format!("{}{}", self.server_base.trim_end_matches('/'), self.branch_path)
    }

    pub fn classify_url(&self) -> String {
        format!(
            "{}{}",
            self.server_base.trim_end_matches('/'),
            self.classify_path
        )
    }

}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or("Could not determine config directory")?;
    Ok(dir.join(APP_CONFIG_DIR).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> AppSettings {
    let mut settings = match settings_path() {
        Ok(path) if path.exists() => read_from(&path),
        Ok(path) => {
            // First run: persist the defaults so they are there to edit.
            let defaults = AppSettings::default();
            if let Err(e) = write_to(&path, &defaults) {
                log::debug!("Settings: could not write defaults: {}", e);
            }
            defaults
        }
        Err(e) => {
            log::warn!("Settings: {}", e);
            AppSettings::default()
        }
    };

    if let Ok(base) = std::env::var(SERVER_ENV_VAR) {
        if !base.is_empty() {
            log::info!("Settings: {} overrides server base", SERVER_ENV_VAR);
            settings.server_base = base;
        }
    }

    settings
}

fn read_from(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

fn write_to(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    // This prevents partial/corrupt settings.json if the app crashes mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename will atomically replace the destination. On Windows, rename
    // fails if the destination exists, so we remove it first (ignoring NotFound).
    if cfg!(windows) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!("Remove existing settings file {:?}: {}", path, e));
                }
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}
