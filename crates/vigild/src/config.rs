use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use vigil_core::EngineConfig;

/// Where frames come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// A V4L2 capture device (`VIGIL_DEVICE`).
    Camera(PathBuf),
    /// A directory of still images replayed as the frame stream.
    Directory { dir: PathBuf, looped: bool },
}

impl SourceKind {
    fn select(device: Option<PathBuf>, frame_dir: PathBuf, looped: bool) -> Self {
        match device {
            Some(device) => Self::Camera(device),
            None => Self::Directory { dir: frame_dir, looped },
        }
    }
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    pub source: SourceKind,
    /// Ingestion rate in frames per second.
    pub frame_rate: f64,
    /// Face detector ONNX model.
    pub face_model: PathBuf,
    /// Person detector ONNX model; height matching is off without it.
    pub body_model: Option<PathBuf>,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root of the per-identity training photo tree.
    pub training_dir: PathBuf,
    /// Persisted face model.
    pub model_file: PathBuf,
    pub height_profiles: PathBuf,
    pub recordings_dir: PathBuf,
    /// Decision engine tunables, from the `[engine]` table of `VIGIL_CONFIG`.
    pub engine: EngineConfig,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    engine: EngineConfig,
}

impl Config {
    /// Load configuration from `VIGIL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("VIGIL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("vigil")
            });

        let model_dir = env_path("VIGIL_MODEL_DIR").unwrap_or_else(|| data_dir.join("models"));
        let body_model = env_path("VIGIL_BODY_MODEL").or_else(|| {
            let default = model_dir.join("person.onnx");
            default.exists().then_some(default)
        });

        let engine = match std::env::var("VIGIL_CONFIG") {
            Ok(path) => load_engine_config(Path::new(&path))?,
            Err(_) => EngineConfig::default(),
        };

        let source = SourceKind::select(
            env_path("VIGIL_DEVICE"),
            env_path("VIGIL_FRAME_DIR").unwrap_or_else(|| data_dir.join("frames")),
            std::env::var("VIGIL_LOOP_FRAMES")
                .map(|v| v != "0")
                .unwrap_or(true),
        );

        Ok(Self {
            source,
            frame_rate: env_f64("VIGIL_FRAME_RATE", 30.0).clamp(0.1, 240.0),
            face_model: env_path("VIGIL_FACE_MODEL").unwrap_or_else(|| model_dir.join("face.onnx")),
            body_model,
            db_path: env_path("VIGIL_DB_PATH").unwrap_or_else(|| data_dir.join("vigil.db")),
            training_dir: env_path("VIGIL_TRAINING_DIR").unwrap_or_else(|| data_dir.join("training-data")),
            model_file: env_path("VIGIL_MODEL_FILE").unwrap_or_else(|| model_dir.join("lbph.json")),
            height_profiles: env_path("VIGIL_HEIGHT_PROFILES")
                .unwrap_or_else(|| data_dir.join("height_profiles.json")),
            recordings_dir: env_path("VIGIL_RECORDINGS_DIR").unwrap_or_else(|| data_dir.join("recordings")),
            engine,
        })
    }

    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    parse_engine_config(&text).with_context(|| format!("parsing {}", path.display()))
}

fn parse_engine_config(text: &str) -> Result<EngineConfig> {
    let file: FileConfig = toml::from_str(text)?;
    Ok(file.engine)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
