pub mod kernels;
pub mod mandelbrot;
pub mod overlay;
pub mod ray_trace_triangle;
pub mod sph;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::input_map::InputSource;
use crate::time::Time;
use crate::vulkan::{
    AccelerationStructureError, Context, DescriptorError, DeviceError, ShaderError, SurfaceFrame,
};

use self::mandelbrot::MandelbrotScene;
use self::overlay::OverlayScene;
use self::ray_trace_triangle::RayTraceTriangleScene;
use self::sph::SphScene;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    AccelerationStructure(#[from] AccelerationStructureError),
    #[error("egui did not hand out a font atlas")]
    MissingFontAtlas,
}

/// What the app loop drives every tick.
pub trait Scene {
    /// Reacts to input and advances the simulation by one tick.
    fn update(&mut self, input: &dyn InputSource, time: &Time) -> Result<(), SceneError>;
    /// Submits the work of `frame`. Presenting is up to the caller.
    fn render(&mut self, frame: &SurfaceFrame);
    /// Waits for everything in flight, so the scene can be dropped.
    fn cleanup(&mut self);
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SceneKind {
    #[default]
    Mandelbrot,
    Sph,
    RayTraceTriangle,
    Overlay,
}

impl SceneKind {
    pub const ALL: [SceneKind; 4] = [
        SceneKind::Mandelbrot,
        SceneKind::Sph,
        SceneKind::RayTraceTriangle,
        SceneKind::Overlay,
    ];

    /// The scene Tab switches to.
    pub fn next(self) -> SceneKind {
        let index = Self::ALL.iter().position(|kind| *kind == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneSettings {
    pub sph_particle_count: usize,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            sph_particle_count: sph::DEFAULT_PARTICLE_COUNT,
        }
    }
}

pub enum DemoScene {
    Mandelbrot(MandelbrotScene),
    Sph(SphScene),
    RayTraceTriangle(RayTraceTriangleScene),
    Overlay(OverlayScene),
}

impl DemoScene {
    pub fn init(
        kind: SceneKind,
        context: &Arc<Context>,
        settings: &SceneSettings,
    ) -> Result<Self, SceneError> {
        log::info!("Initializing the {kind:?} scene");
        Ok(match kind {
            SceneKind::Mandelbrot => DemoScene::Mandelbrot(MandelbrotScene::new(context)?),
            SceneKind::Sph => {
                DemoScene::Sph(SphScene::new(context, settings.sph_particle_count)?)
            }
            SceneKind::RayTraceTriangle => {
                DemoScene::RayTraceTriangle(RayTraceTriangleScene::new(context)?)
            }
            SceneKind::Overlay => DemoScene::Overlay(OverlayScene::new(context)?),
        })
    }

    pub fn kind(&self) -> SceneKind {
        match self {
            DemoScene::Mandelbrot(_) => SceneKind::Mandelbrot,
            DemoScene::Sph(_) => SceneKind::Sph,
            DemoScene::RayTraceTriangle(_) => SceneKind::RayTraceTriangle,
            DemoScene::Overlay(_) => SceneKind::Overlay,
        }
    }

    fn inner(&mut self) -> &mut dyn Scene {
        match self {
            DemoScene::Mandelbrot(scene) => scene,
            DemoScene::Sph(scene) => scene,
            DemoScene::RayTraceTriangle(scene) => scene,
            DemoScene::Overlay(scene) => scene,
        }
    }
}

impl Scene for DemoScene {
    fn update(&mut self, input: &dyn InputSource, time: &Time) -> Result<(), SceneError> {
        self.inner().update(input, time)
    }

    fn render(&mut self, frame: &SurfaceFrame) {
        self.inner().render(frame)
    }

    fn cleanup(&mut self) {
        self.inner().cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_cycles_through_every_scene() {
        let mut kind = SceneKind::default();
        let mut seen = Vec::new();
        for _ in 0..SceneKind::ALL.len() {
            seen.push(kind);
            kind = kind.next();
        }
        assert_eq!(kind, SceneKind::Mandelbrot);
        assert_eq!(seen, SceneKind::ALL);
    }

    #[test]
    fn kinds_use_snake_case_names() {
        let json = serde_json::to_string(&SceneKind::RayTraceTriangle).unwrap();
        assert_eq!(json, "\"ray_trace_triangle\"");
    }
}
