use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::SceneKind;
use crate::vulkan::window_settings::WindowSettings;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Vulkan,
    /// The CPU reference device with a headless surface.
    Software,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub scene: SceneKind,
    pub window: WindowSettings,
    /// Where the compiled SPIR-V is read from. Defaults to the build output.
    pub shader_directory: Option<PathBuf>,
    /// How many frames the software backend renders before exiting.
    pub headless_frames: u32,
    pub sph_particle_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Vulkan,
            scene: SceneKind::Mandelbrot,
            window: WindowSettings::default(),
            shader_directory: None,
            headless_frames: 120,
            sph_particle_count: 20000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not access config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Config file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Reads the config file. A missing file gets created with the defaults.
    pub fn load_config(&mut self) -> Result<&mut Config, ConfigError> {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", self.path.display());
                self.config = Some(Config::default());
                self.save_config()?;
                Config::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(self.config.insert(config))
    }

    pub fn get_or_load_config(&mut self) -> Result<&mut Config, ConfigError> {
        if let Some(config) = self.config.take() {
            return Ok(self.config.insert(config));
        }
        self.load_config()
    }

    pub fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(config) = &self.config {
            let content =
                serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
                    path: self.path.clone(),
                    source,
                })?;
            std::fs::write(&self.path, content).map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::window_settings::PresentMode;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("labscenes-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_file_is_written_with_defaults() {
        let path = temp_path("missing.json");
        let _ = std::fs::remove_file(&path);

        let mut loader = ConfigFileLoader::new(&path);
        let config = loader.load_config().unwrap().clone();
        assert_eq!(config, Config::default());
        assert_eq!(config.sph_particle_count, 20000);

        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: Config = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, config);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "backend": "software", "scene": "ray_trace_triangle", "window": { "width": 64, "height": 32, "present_mode": "Mailbox" } }"#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Software);
        assert_eq!(config.scene, SceneKind::RayTraceTriangle);
        assert_eq!(config.window.present_mode, PresentMode::Mailbox);
        assert_eq!(config.headless_frames, Config::default().headless_frames);
    }

    #[test]
    fn malformed_files_are_reported() {
        let path = temp_path("malformed.json");
        std::fs::write(&path, "{ not json").unwrap();
        let mut loader = ConfigFileLoader::new(&path);
        assert!(matches!(
            loader.load_config(),
            Err(ConfigError::Parse { .. })
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
