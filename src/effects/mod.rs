//! Effect and custom material classes and the interpreter that runs their
//! command lists.
//!
//! A class is registered once with its property declarations, a table of
//! program sources and a command list. Instances carry packed property
//! values; the [`EffectSystem`] walks the command list for an instance,
//! allocating its buffers into a per-instance [`EffectContext`] and drawing
//! full-screen passes into the output it binds.

mod class;
mod command;
mod context;
mod instance;
mod property;
mod system;

pub use class::{ClassKind, EffectClass, EffectRegistry};
pub use command::{EffectCommand, RenderState};
pub use context::EffectContext;
pub use instance::EffectInstance;
pub use property::{PropertyDeclaration, PropertyType, PropertyValue};
pub use system::{EffectRenderArgs, EffectSystem, SOURCE_TEXTURE};
