use glam::Vec4;

use crate::device::{
    Attachment, AttachmentTarget, BufferDescriptor, BufferHandle, BufferUsage, ClearFlags,
    FramebufferStatus, GraphicsDevice, ImageAccess, ImageHandle, TextureHandle, TextureSampling,
};
use crate::renderer::resource_pool::ResourcePool;

#[derive(Debug, Clone)]
pub(crate) struct AllocatedBuffer {
    pub name: String,
    pub texture: TextureHandle,
    pub format: wgpu::TextureFormat,
    pub size: (u32, u32),
    pub per_frame: bool,
    pub needs_clear: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct AllocatedImage {
    pub name: String,
    pub texture: TextureHandle,
    pub image: ImageHandle,
    pub format: wgpu::TextureFormat,
    pub size: (u32, u32),
    pub access: ImageAccess,
}

#[derive(Debug, Clone)]
pub(crate) struct AllocatedDataBuffer {
    pub name: String,
    pub buffer: BufferHandle,
    pub usage: BufferUsage,
    pub size: usize,
    pub per_frame: bool,
    pub needs_clear: bool,
}

/// Resources one effect instance allocated through its command list.
/// They live until the context is released.
#[derive(Debug, Default)]
pub struct EffectContext {
    buffers: Vec<AllocatedBuffer>,
    images: Vec<AllocatedImage>,
    data_buffers: Vec<AllocatedDataBuffer>,
}

impl EffectContext {
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn data_buffer_count(&self) -> usize {
        self.data_buffers.len()
    }

    pub fn buffer_texture(&self, name: &str) -> Option<TextureHandle> {
        self.buffer(name).map(|buffer| buffer.texture)
    }

    pub(crate) fn buffer(&self, name: &str) -> Option<&AllocatedBuffer> {
        self.buffers.iter().find(|buffer| buffer.name == name)
    }

    pub(crate) fn image(&self, name: &str) -> Option<&AllocatedImage> {
        self.images.iter().find(|image| image.name == name)
    }

    pub(crate) fn data_buffer(&self, name: &str) -> Option<&AllocatedDataBuffer> {
        self.data_buffers.iter().find(|buffer| buffer.name == name)
    }

    /// Flags per-frame contents stale for the new frame.
    pub(crate) fn begin_frame(&mut self) {
        for buffer in self.buffers.iter_mut().filter(|buffer| buffer.per_frame) {
            buffer.needs_clear = true;
        }
        for buffer in self.data_buffers.iter_mut().filter(|buffer| buffer.per_frame) {
            buffer.needs_clear = true;
        }
    }

    /// Returns the named colour buffer, reallocating it when its size or
    /// format no longer fits.
    pub(crate) fn allocate_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        pool: &mut ResourcePool,
        name: &str,
        format: wgpu::TextureFormat,
        size: (u32, u32),
        sampling: TextureSampling,
        per_frame: bool,
    ) -> Option<TextureHandle> {
        if let Some(pos) = self.buffers.iter().position(|buffer| buffer.name == name) {
            let existing = &mut self.buffers[pos];
            if existing.size == size && existing.format == format {
                existing.per_frame = per_frame;
                device.set_texture_sampling(existing.texture, sampling);
                return Some(existing.texture);
            }
            let stale = self.buffers.swap_remove(pos);
            pool.release_texture(stale.texture);
        }

        let texture = pool.acquire_texture_2d(device, size.0, size.1, format, 1, false)?;
        device.set_texture_sampling(texture, sampling);
        self.buffers.push(AllocatedBuffer {
            name: name.to_string(),
            texture,
            format,
            size,
            per_frame,
            needs_clear: true,
        });
        Some(texture)
    }

    pub(crate) fn allocate_image(
        &mut self,
        device: &mut dyn GraphicsDevice,
        pool: &mut ResourcePool,
        name: &str,
        format: wgpu::TextureFormat,
        size: (u32, u32),
        access: ImageAccess,
    ) -> Option<ImageHandle> {
        if let Some(pos) = self.images.iter().position(|image| image.name == name) {
            let existing = &self.images[pos];
            if existing.size == size && existing.format == format && existing.access == access {
                return Some(existing.image);
            }
            let stale = self.images.swap_remove(pos);
            pool.release_image(device, stale.image);
            pool.release_texture(stale.texture);
        }

        let texture = pool.acquire_texture_2d(device, size.0, size.1, format, 1, false)?;
        let Some(image) = pool.acquire_image_2d(device, texture, access) else {
            pool.release_texture(texture);
            return None;
        };
        self.images.push(AllocatedImage {
            name: name.to_string(),
            texture,
            image,
            format,
            size,
            access,
        });
        Some(image)
    }

    pub(crate) fn allocate_data_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        usage: BufferUsage,
        size: usize,
        per_frame: bool,
    ) -> Option<BufferHandle> {
        if let Some(pos) = self.data_buffers.iter().position(|buffer| buffer.name == name) {
            let existing = &mut self.data_buffers[pos];
            if existing.size == size && existing.usage == usage {
                existing.per_frame = per_frame;
                return Some(existing.buffer);
            }
            let stale = self.data_buffers.swap_remove(pos);
            device.destroy_buffer(stale.buffer);
        }

        let desc = BufferDescriptor {
            usage,
            size,
            dynamic: true,
        };
        let buffer = device.create_buffer(&desc, None)?;
        self.data_buffers.push(AllocatedDataBuffer {
            name: name.to_string(),
            buffer,
            usage,
            size,
            per_frame,
            needs_clear: false,
        });
        Some(buffer)
    }

    /// Zeroes the named colour buffer if it is flagged stale.
    pub(crate) fn clear_buffer_if_needed(
        &mut self,
        device: &mut dyn GraphicsDevice,
        pool: &mut ResourcePool,
        name: &str,
    ) {
        let Some(buffer) = self.buffers.iter_mut().find(|buffer| buffer.name == name) else {
            return;
        };
        if !buffer.needs_clear {
            return;
        }
        let Some(fb) = pool.acquire_frame_buffer(device) else {
            return;
        };
        device.attach(fb, Attachment::Color(0), Some(AttachmentTarget::Texture(buffer.texture)));
        if device.framebuffer_status(fb) == FramebufferStatus::Complete {
            let previous = device.render_target();
            device.set_render_target(Some(fb));
            device.clear(ClearFlags::COLOR, Vec4::ZERO, 1.0);
            device.set_render_target(previous);
            buffer.needs_clear = false;
        }
        pool.release_frame_buffer(device, fb);
    }

    pub(crate) fn clear_data_buffer_if_needed(&mut self, device: &mut dyn GraphicsDevice, name: &str) {
        if let Some(buffer) = self
            .data_buffers
            .iter_mut()
            .find(|buffer| buffer.name == name && buffer.needs_clear)
        {
            device.update_buffer(buffer.buffer, 0, &vec![0u8; buffer.size]);
            buffer.needs_clear = false;
        }
    }

    pub(crate) fn mark_cleared(&mut self, name: &str) {
        if let Some(buffer) = self.buffers.iter_mut().find(|buffer| buffer.name == name) {
            buffer.needs_clear = false;
        }
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice, pool: &mut ResourcePool) {
        for buffer in self.buffers.drain(..) {
            pool.release_texture(buffer.texture);
        }
        for image in self.images.drain(..) {
            pool.release_image(device, image.image);
            pool.release_texture(image.texture);
        }
        for buffer in self.data_buffers.drain(..) {
            device.destroy_buffer(buffer.buffer);
        }
    }
}
