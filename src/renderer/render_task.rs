//! Deferred "render this layer to texture" units of work.
//!
//! Tasks run synchronously on the caller's thread; a queue only fixes the
//! order in which a frame scheduler invokes them.

use std::collections::VecDeque;

use crate::device::{GraphicsDevice, TextureHandle};
use crate::renderer::Renderer;
use crate::scene::{NodeId, Scene};

pub trait RenderTask<D: GraphicsDevice> {
    fn run(&mut self, renderer: &mut Renderer<D>, scene: &Scene);
}

/// Prepares and renders one layer to its texture. Compositing is left to
/// whoever consumes the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderToTextureTask {
    layer: NodeId,
    output: Option<TextureHandle>,
}

impl RenderToTextureTask {
    pub fn new(layer: NodeId) -> Self {
        Self { layer, output: None }
    }

    pub fn layer(&self) -> NodeId {
        self.layer
    }

    /// Output of the last run, if it produced one.
    pub fn output(&self) -> Option<TextureHandle> {
        self.output
    }
}

impl<D: GraphicsDevice> RenderTask<D> for RenderToTextureTask {
    fn run(&mut self, renderer: &mut Renderer<D>, scene: &Scene) {
        self.output = renderer.render_layer_to_texture(scene, self.layer);
    }
}

pub struct RenderTaskQueue<D: GraphicsDevice> {
    tasks: VecDeque<Box<dyn RenderTask<D>>>,
}

impl<D: GraphicsDevice> Default for RenderTaskQueue<D> {
    fn default() -> Self {
        Self { tasks: VecDeque::new() }
    }
}

impl<D: GraphicsDevice> RenderTaskQueue<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Box<dyn RenderTask<D>>) {
        self.tasks.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs every queued task in submission order and empties the queue.
    pub fn run_all(&mut self, renderer: &mut Renderer<D>, scene: &Scene) {
        while let Some(mut task) = self.tasks.pop_front() {
            task.run(renderer, scene);
        }
    }
}
