//! Layer-based scene renderer.
//!
//! A [`Renderer`] walks the layers of a [`Scene`] every frame, renders each
//! through its own chain of off-screen passes and composites the results.
//! All GPU work goes through the [`GraphicsDevice`] trait; the
//! [`HeadlessDevice`] records it instead of executing it.

pub mod device;
pub mod effects;
pub mod error;
pub mod renderer;
pub mod scene;
pub mod settings;

pub use device::{GraphicsDevice, HeadlessDevice};
pub use error::RenderError;
pub use renderer::{CompositeTarget, Renderer};
pub use scene::Scene;
pub use settings::RenderSettings;

/// Installs `env_logger` with an `Info` default. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
