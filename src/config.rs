use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::SessionPolicy;
use crate::gate::TriggerMode;
use crate::preprocess::CropMode;
use crate::runtime::Permissions;
use crate::sink::{ImageEncoding, StorageBackend};

const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_TRIGGER_MODE: &str = "periodic";
const DEFAULT_PERIODIC_INTERVAL_MS: u64 = 3_000;
const DEFAULT_THROTTLED_INTERVAL_MS: u64 = 5_000;
const DEFAULT_CLASSIFIER: &str = "stub";
const DEFAULT_PICTURES_DIR: &str = "Pictures";
const DEFAULT_ALBUM: &str = "ASL_Images";

const KNOWN_CLASSIFIERS: [&str; 2] = ["stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<SourceConfigFile>,
    trigger: Option<TriggerConfigFile>,
    preprocess: Option<PreprocessConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    storage: Option<StorageConfigFile>,
    permissions: Option<PermissionsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    rotation_degrees: Option<i32>,
    loop_playback: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TriggerConfigFile {
    mode: Option<String>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PreprocessConfigFile {
    crop: Option<CropMode>,
    apply_rotation: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    session: Option<SessionPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    enabled: Option<bool>,
    backend: Option<StorageBackend>,
    pictures_dir: Option<PathBuf>,
    album: Option<String>,
    encoding: Option<ImageEncoding>,
    scoped_storage: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PermissionsConfigFile {
    camera: Option<bool>,
    storage: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub source: SourceSettings,
    pub trigger: TriggerMode,
    pub preprocess: PreprocessSettings,
    pub classifier: ClassifierSettings,
    pub storage: StorageSettings,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// `stub://...` or a local image file/directory.
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Sensor rotation reported with every frame.
    pub rotation_degrees: i32,
    pub loop_playback: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            target_fps: DEFAULT_SOURCE_FPS,
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
            rotation_degrees: 0,
            loop_playback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessSettings {
    pub crop: CropMode,
    pub apply_rotation: bool,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            crop: CropMode::None,
            apply_rotation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub session: SessionPolicy,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_CLASSIFIER.to_string(),
            model_path: None,
            session: SessionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub enabled: bool,
    pub backend: StorageBackend,
    /// Pictures directory (directory backend) or media root (collection backend).
    pub root: PathBuf,
    pub album: String,
    pub encoding: ImageEncoding,
    /// Whether the platform offers a managed media collection.
    pub scoped_storage: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: StorageBackend::Auto,
            root: PathBuf::from(DEFAULT_PICTURES_DIR),
            album: DEFAULT_ALBUM.to_string(),
            encoding: ImageEncoding::Png,
            scoped_storage: false,
        }
    }
}

impl CaptureConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ASL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read a config file without environment overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Result<Self> {
        let defaults = SourceSettings::default();
        let source = match file.source {
            Some(src) => SourceSettings {
                url: src.url.unwrap_or(defaults.url),
                target_fps: src.target_fps.unwrap_or(defaults.target_fps),
                width: src.width.unwrap_or(defaults.width),
                height: src.height.unwrap_or(defaults.height),
                rotation_degrees: src.rotation_degrees.unwrap_or(defaults.rotation_degrees),
                loop_playback: src.loop_playback.unwrap_or(defaults.loop_playback),
            },
            None => defaults,
        };

        let trigger_file = file.trigger.unwrap_or_default();
        let trigger = parse_trigger(
            trigger_file.mode.as_deref().unwrap_or(DEFAULT_TRIGGER_MODE),
            trigger_file.interval_ms,
        )?;

        let preprocess_defaults = PreprocessSettings::default();
        let preprocess = match file.preprocess {
            Some(pre) => PreprocessSettings {
                crop: pre.crop.unwrap_or(preprocess_defaults.crop),
                apply_rotation: pre
                    .apply_rotation
                    .unwrap_or(preprocess_defaults.apply_rotation),
            },
            None => preprocess_defaults,
        };

        let classifier_defaults = ClassifierSettings::default();
        let classifier = match file.classifier {
            Some(cls) => ClassifierSettings {
                backend: cls.backend.unwrap_or(classifier_defaults.backend),
                model_path: cls.model_path,
                session: cls.session.unwrap_or(classifier_defaults.session),
            },
            None => classifier_defaults,
        };

        let storage_defaults = StorageSettings::default();
        let storage = match file.storage {
            Some(st) => StorageSettings {
                enabled: st.enabled.unwrap_or(storage_defaults.enabled),
                backend: st.backend.unwrap_or(storage_defaults.backend),
                root: st.pictures_dir.unwrap_or(storage_defaults.root),
                album: st.album.unwrap_or(storage_defaults.album),
                encoding: st.encoding.unwrap_or(storage_defaults.encoding),
                scoped_storage: st.scoped_storage.unwrap_or(storage_defaults.scoped_storage),
            },
            None => storage_defaults,
        };

        let permission_defaults = Permissions::default();
        let permissions = match file.permissions {
            Some(p) => Permissions {
                camera: p.camera.unwrap_or(permission_defaults.camera),
                storage: p.storage.unwrap_or(permission_defaults.storage),
            },
            None => permission_defaults,
        };

        Ok(Self {
            source,
            trigger,
            preprocess,
            classifier,
            storage,
            permissions,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("ASL_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(rotation) = std::env::var("ASL_ROTATION_DEGREES") {
            self.source.rotation_degrees = rotation
                .trim()
                .parse()
                .map_err(|_| anyhow!("ASL_ROTATION_DEGREES must be an integer number of degrees"))?;
        }

        let mode = std::env::var("ASL_TRIGGER_MODE")
            .ok()
            .filter(|m| !m.trim().is_empty());
        let interval_ms = match std::env::var("ASL_INTERVAL_MS") {
            Ok(ms) => Some(ms.trim().parse::<u64>().map_err(|_| {
                anyhow!("ASL_INTERVAL_MS must be an integer number of milliseconds")
            })?),
            Err(_) => None,
        };
        if mode.is_some() || interval_ms.is_some() {
            let name = mode.as_deref().unwrap_or(self.trigger.label());
            // An unchanged mode keeps its configured interval.
            let interval_ms = interval_ms.or_else(|| {
                if name.trim().eq_ignore_ascii_case(self.trigger.label()) {
                    self.trigger.interval().map(|d| d.as_millis() as u64)
                } else {
                    None
                }
            });
            self.trigger = parse_trigger(name, interval_ms)?;
        }

        if let Ok(backend) = std::env::var("ASL_CLASSIFIER") {
            if !backend.trim().is_empty() {
                self.classifier.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("ASL_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.classifier.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(dir) = std::env::var("ASL_PICTURES_DIR") {
            if !dir.trim().is_empty() {
                self.storage.root = PathBuf::from(dir);
            }
        }
        if let Ok(backend) = std::env::var("ASL_STORAGE_BACKEND") {
            self.storage.backend = StorageBackend::parse(&backend).ok_or_else(|| {
                anyhow!("ASL_STORAGE_BACKEND must be one of auto, directory, collection")
            })?;
        }
        if let Ok(crop) = std::env::var("ASL_CROP") {
            self.preprocess.crop = CropMode::parse(&crop)
                .ok_or_else(|| anyhow!("ASL_CROP must be one of none, center_square, quarter"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be greater than zero"));
        }
        if let Some(interval) = self.trigger.interval() {
            if interval.is_zero() {
                return Err(anyhow!(
                    "{} trigger interval must be greater than zero",
                    self.trigger.label()
                ));
            }
        }

        self.classifier.backend = self.classifier.backend.to_lowercase();
        if !KNOWN_CLASSIFIERS.contains(&self.classifier.backend.as_str()) {
            return Err(anyhow!(
                "unknown classifier backend '{}' (expected one of: {})",
                self.classifier.backend,
                KNOWN_CLASSIFIERS.join(", ")
            ));
        }
        if self.classifier.backend == "tract" && self.classifier.model_path.is_none() {
            return Err(anyhow!("classifier backend 'tract' requires model_path"));
        }

        if self.storage.album.trim().is_empty() || self.storage.album.contains(['/', '\\']) {
            return Err(anyhow!("storage album must be a single non-empty folder name"));
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings::default(),
            trigger: TriggerMode::Periodic(Duration::from_millis(DEFAULT_PERIODIC_INTERVAL_MS)),
            preprocess: PreprocessSettings::default(),
            classifier: ClassifierSettings::default(),
            storage: StorageSettings::default(),
            permissions: Permissions::default(),
        }
    }
}

/// Build a trigger mode from its name. A missing interval takes the mode's default.
pub fn parse_trigger(mode: &str, interval_ms: Option<u64>) -> Result<TriggerMode> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "manual" => Ok(TriggerMode::Manual),
        "periodic" => Ok(TriggerMode::Periodic(Duration::from_millis(
            interval_ms.unwrap_or(DEFAULT_PERIODIC_INTERVAL_MS),
        ))),
        "throttled" => Ok(TriggerMode::Throttled(Duration::from_millis(
            interval_ms.unwrap_or(DEFAULT_THROTTLED_INTERVAL_MS),
        ))),
        other => Err(anyhow!(
            "unknown trigger mode '{}' (expected manual, periodic or throttled)",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
