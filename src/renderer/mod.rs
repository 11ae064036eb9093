pub mod blend;
pub mod layer;
pub mod lights;
pub mod render_context;
pub mod render_task;
pub mod renderable;
pub mod renderer;
pub mod resource_pool;
pub mod shader;
pub mod shadows;
pub mod vertex;

pub use layer::{CompositeTarget, LayerPass, LayerRenderData, LayerStage, TargetKind};
pub use render_context::FrameContext;
pub use render_task::{RenderTask, RenderTaskQueue, RenderToTextureTask};
pub use renderer::Renderer;
pub use resource_pool::ResourcePool;
pub use vertex::Vertex;
