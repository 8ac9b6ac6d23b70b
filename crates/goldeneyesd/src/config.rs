use goldeneyes_core::{LostFacePolicy, ProjectorConfig};
use goldeneyes_platform::{PresetError, PresetFile, DEFAULT_PRESET};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Built-in preset name (default: forward-up).
    pub preset: String,
    /// User preset file; takes precedence over `preset` when set.
    pub preset_file: Option<PathBuf>,
    /// Overrides the preset's lost-face policy when set.
    pub lost_face: Option<LostFacePolicy>,
    /// JSON-lines face tracking recording fed to the replay tracker.
    pub recording_path: PathBuf,
    /// Delay between replayed frames.
    pub frame_interval_ms: u64,
    /// Restart the recording from the top when it ends.
    pub loop_recording: bool,
    /// Enable tracking as soon as the daemon is up.
    pub start_enabled: bool,
    /// Capacity of the engine request queue.
    pub queue_depth: usize,
}

impl Config {
    /// Load configuration from `GOLDENEYES_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("goldeneyes");

        let recording_path = std::env::var("GOLDENEYES_RECORDING")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("recording.jsonl"));

        let lost_face = std::env::var("GOLDENEYES_LOST_FACE")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring GOLDENEYES_LOST_FACE");
                    None
                }
            });

        Self {
            preset: std::env::var("GOLDENEYES_PRESET")
                .unwrap_or_else(|_| DEFAULT_PRESET.to_string()),
            preset_file: std::env::var("GOLDENEYES_PRESET_FILE").ok().map(PathBuf::from),
            lost_face,
            recording_path,
            frame_interval_ms: env_u64("GOLDENEYES_FRAME_INTERVAL_MS", 16),
            loop_recording: env_flag("GOLDENEYES_LOOP", true),
            start_enabled: env_flag("GOLDENEYES_START_ENABLED", true),
            queue_depth: env_usize("GOLDENEYES_QUEUE_DEPTH", 64).max(1),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Resolve the preset and apply overrides. Returns the preset name too.
    pub fn projector_config(&self) -> Result<(String, ProjectorConfig), PresetError> {
        let preset = match &self.preset_file {
            Some(path) => PresetFile::load(path)?,
            None => goldeneyes_platform::lookup_preset(&self.preset)?.clone(),
        };
        let mut projector = preset.projector;
        if let Some(policy) = self.lost_face {
            projector.lost_face = policy;
        }
        Ok((preset.preset.name, projector))
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
