use std::rc::Rc;

use crate::device::{
    Attachment, AttachmentTarget, FramebufferHandle, FramebufferStatus, Geometry, GraphicsDevice,
    ProgramHandle,
};
use crate::effects::EffectSystem;
use crate::error::RenderError;
use crate::renderer::resource_pool::ResourcePool;
use crate::renderer::shader::{BuiltinProgram, ShaderCache, ShaderPropertyBundle};
use crate::settings::RenderSettings;

/// Context handed to every layer pass for one frame.
///
/// Bundles the renderer's shared state as separate borrows so a pass can
/// hand the device to the pool, the shader cache and the effect system in
/// turn.
pub struct FrameContext<'a> {
    pub device: &'a mut dyn GraphicsDevice,
    pub pool: &'a mut ResourcePool,
    pub shaders: &'a mut ShaderCache,
    pub effects: &'a mut EffectSystem,
    pub settings: &'a RenderSettings,
    /// Unit quad spanning clip space, used by every full-screen pass.
    pub quad: Geometry,
    pub frame: u32,
}

impl<'a> FrameContext<'a> {
    /// Acquires a pooled framebuffer with the given attachments and checks
    /// that it is complete. On failure nothing stays acquired.
    pub fn acquire_target(
        &mut self,
        pass: &'static str,
        attachments: &[(Attachment, AttachmentTarget)],
    ) -> Result<FramebufferHandle, RenderError> {
        let fb = self
            .pool
            .acquire_frame_buffer(self.device)
            .ok_or_else(|| RenderError::creation(format!("{pass} framebuffer")))?;
        for (attachment, target) in attachments {
            self.device.attach(fb, *attachment, Some(*target));
        }
        let status = self.device.framebuffer_status(fb);
        if status != FramebufferStatus::Complete {
            self.pool.release_frame_buffer(self.device, fb);
            return Err(RenderError::FramebufferIncomplete { pass, status });
        }
        Ok(fb)
    }

    pub fn release_target(&mut self, fb: FramebufferHandle) {
        self.pool.release_frame_buffer(self.device, fb);
    }

    pub fn builtin(&mut self, program: BuiltinProgram) -> Option<ProgramHandle> {
        self.shaders.builtin(self.device, program)
    }

    /// Compiles (once) and activates a built-in program, returning its
    /// uniform bundle.
    pub fn use_builtin(&mut self, program: BuiltinProgram) -> Result<Rc<ShaderPropertyBundle>, RenderError> {
        let handle = self.builtin(program).ok_or_else(|| RenderError::ShaderCompile {
            name: program.name(),
            log: "cached compile failure".to_string(),
        })?;
        self.device.set_active_program(Some(handle));
        Ok(self.shaders.get_or_create_shader_entry(self.device, handle))
    }
}
