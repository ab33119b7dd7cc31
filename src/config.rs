//! Configuration
//!
//! JSON config with defaults matching the observed panel. Every field is
//! optional; a missing default config file means built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glam::UVec2;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::asset::SourceKind;
use crate::color::PackedColor;
use crate::compositor::AssetPolicy;
use crate::error::ConfigError;
use crate::geometry::{DmdLayout, DotGeometry};
use crate::kernel::{Kernel, Substitution};

pub const DEFAULT_CONFIG_PATH: &str = "dmd.json";

/// Which dispatcher runs the kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Gpu,
    Cpu,
}

/// One entry of the layer stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub path: PathBuf,
    pub kind: SourceKind,
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmdConfig {
    pub logical_width: u32,
    pub logical_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub dot: DotGeometry,
    /// `null` disables near-black substitution.
    pub substitution: Option<Substitution>,
    /// Value of output pixels between dots.
    pub gap_color: PackedColor,
    pub backend: Backend,
    pub dispatch_timeout_ms: u64,
    pub asset_policy: AssetPolicy,
    /// Bottom layer first.
    pub layers: Vec<LayerConfig>,
    pub warmup_ticks: u64,
    pub log_level: String,
}

impl Default for DmdConfig {
    fn default() -> Self {
        Self {
            logical_width: 256,
            logical_height: 78,
            output_width: 1280,
            output_height: 390,
            dot: DotGeometry::default(),
            substitution: Some(Substitution::default()),
            gap_color: PackedColor::TRANSPARENT,
            backend: Backend::Gpu,
            dispatch_timeout_ms: 2000,
            asset_policy: AssetPolicy::Skip,
            layers: vec![
                LayerConfig {
                    path: PathBuf::from("assets/clouds.webp"),
                    kind: SourceKind::Animation,
                },
                LayerConfig {
                    path: PathBuf::from("assets/game-over-clouds.webp"),
                    kind: SourceKind::Still,
                },
                LayerConfig {
                    path: PathBuf::from("assets/game-over.webp"),
                    kind: SourceKind::Still,
                },
            ],
            warmup_ticks: 60,
            log_level: "info".to_string(),
        }
    }
}

impl DmdConfig {
    /// Read `path`, or the default path if none is given. Only the default
    /// path may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Self::from_json(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Validated layout. Rejects geometry that would write outside the output.
    pub fn layout(&self) -> Result<DmdLayout, ConfigError> {
        DmdLayout::new(
            UVec2::new(self.logical_width, self.logical_height),
            UVec2::new(self.output_width, self.output_height),
            self.dot,
        )
    }

    pub fn kernel(&self) -> Result<Kernel, ConfigError> {
        Ok(Kernel::new(self.layout()?, self.substitution))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::LogLevel(self.log_level.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_observed_panel() {
        let config = DmdConfig::default();
        assert_eq!(config.layout().unwrap(), DmdLayout::observed());
        assert_eq!(config.substitution.unwrap().threshold, 15);
        assert_eq!(config.substitution.unwrap().off_color.0, 4_279_176_975);
        assert_eq!(config.layers.len(), 3);
        assert_eq!(config.log_level().unwrap(), Level::INFO);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DmdConfig::from_json(
            r#"{ "backend": "cpu", "dot": { "h_gap": 0 }, "output_width": 1024 }"#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Cpu);
        assert_eq!(config.dot, DotGeometry::new(4, 4, 0, 1));
        assert_eq!(config.logical_height, 78);
        assert!(config.layout().is_ok());
    }

    #[test]
    fn null_substitution_disables_it() {
        let config = DmdConfig::from_json(r#"{ "substitution": null }"#).unwrap();
        assert!(config.substitution.is_none());
    }

    #[test]
    fn layers_and_policy_parse() {
        let config = DmdConfig::from_json(
            r#"{
                "asset_policy": "wait",
                "gap_color": 4278190080,
                "layers": [ { "path": "a.webp", "kind": "animation" } ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.asset_policy, AssetPolicy::Wait);
        assert_eq!(config.gap_color, PackedColor::from_rgba(0, 0, 0, 255));
        assert_eq!(config.layers[0].kind, SourceKind::Animation);
    }

    #[test]
    fn bad_geometry_is_rejected_before_first_tick() {
        let config = DmdConfig::from_json(r#"{ "dot": { "dot_width": 5 } }"#).unwrap();
        assert!(matches!(
            config.layout(),
            Err(ConfigError::GeometryOverflow { axis: "horizontal", .. })
        ));
    }

    #[test]
    fn explicit_config_paths_are_read_strictly() {
        let dir = std::env::temp_dir().join(format!("dmd-sim-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let explicit = dir.join("absent.json");
        assert!(matches!(
            DmdConfig::load(Some(&explicit)),
            Err(ConfigError::Read { .. })
        ));

        let path = dir.join("dmd.json");
        std::fs::write(&path, r#"{ "warmup_ticks": 5 }"#).unwrap();
        assert_eq!(DmdConfig::load(Some(&path)).unwrap().warmup_ticks, 5);

        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            DmdConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unknown_log_level_is_an_error() {
        let config = DmdConfig {
            log_level: "loud".to_string(),
            ..DmdConfig::default()
        };
        assert!(matches!(config.log_level(), Err(ConfigError::LogLevel(_))));
    }
}
