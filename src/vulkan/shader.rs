use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use ash::vk;

use super::context::ShaderSource;
use super::device::Shader;
use super::error::ShaderError;

/// Loads `<name>.spv` files, as written by the build script.
pub struct SpirvDirectory {
    root: PathBuf,
}

impl SpirvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory the build script compiled the shaders into.
    pub fn compiled() -> Self {
        Self::new(env!("OUT_DIR"))
    }
}

impl ShaderSource for SpirvDirectory {
    fn load(&self, name: &str, stage: vk::ShaderStageFlags) -> Result<Shader, ShaderError> {
        let path = self.root.join(format!("{name}.spv"));
        let spirv = File::open(&path)
            .and_then(|mut file| ash::util::read_spv(&mut file))
            .map_err(|source| ShaderError::Io {
                path: path.clone(),
                source,
            })?;
        log::debug!("Loaded shader {}", path.display());

        Ok(Shader {
            name: name.to_owned(),
            stage,
            spirv,
        })
    }
}

/// Hands out code-less shaders by name, for backends that look kernels up by name.
#[derive(Default)]
pub struct NamedShaders {
    known: Option<HashSet<String>>,
    requested: Mutex<Vec<String>>,
}

impl NamedShaders {
    /// Accepts any name.
    pub fn any() -> Self {
        Self::default()
    }

    /// Only accepts the given names.
    pub fn only<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            known: Some(names.into_iter().map(str::to_owned).collect()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }
}

impl ShaderSource for NamedShaders {
    fn load(&self, name: &str, stage: vk::ShaderStageFlags) -> Result<Shader, ShaderError> {
        if let Some(known) = &self.known {
            if !known.contains(name) {
                return Err(ShaderError::Unknown {
                    name: name.to_owned(),
                });
            }
        }
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(name.to_owned());
        }
        Ok(Shader {
            name: name.to_owned(),
            stage,
            spirv: Vec::new(),
        })
    }
}
