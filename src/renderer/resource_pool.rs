//! Reference-counted pool of transient GPU resources.
//!
//! The pool owns every render target the pipeline allocates. Callers get
//! plain handles back and must hand each acquire back through the matching
//! `release_*`. Resources whose count drops to zero are parked on a free list
//! and handed out again to the next request with an identical descriptor;
//! [`ResourcePool::destroy_free_sized_resources`] drops everything parked.

use std::collections::BTreeMap;

use crate::device::{
    Attachment, FramebufferHandle, GraphicsDevice, ImageAccess, ImageHandle, RenderbufferHandle,
    TextureDescriptor, TextureHandle,
};

/// Colour attachment slots cleared when a framebuffer goes back to the pool.
const MAX_COLOR_ATTACHMENTS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextureKey {
    Flat(TextureDescriptor),
    Cube { size: u32, format: wgpu::TextureFormat },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RenderbufferKey {
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    samples: u32,
}

#[derive(Debug)]
struct Pooled<K> {
    key: K,
    refs: u32,
}

#[derive(Debug)]
struct PooledImage {
    texture: TextureHandle,
    refs: u32,
}

#[derive(Debug, Default)]
pub struct ResourcePool {
    textures: BTreeMap<TextureHandle, Pooled<TextureKey>>,
    free_textures: Vec<TextureHandle>,
    framebuffers: BTreeMap<FramebufferHandle, u32>,
    free_framebuffers: Vec<FramebufferHandle>,
    renderbuffers: BTreeMap<RenderbufferHandle, Pooled<RenderbufferKey>>,
    free_renderbuffers: Vec<RenderbufferHandle>,
    images: BTreeMap<ImageHandle, PooledImage>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_frame_buffer(&mut self, device: &mut dyn GraphicsDevice) -> Option<FramebufferHandle> {
        if let Some(fb) = self.free_framebuffers.pop() {
            self.framebuffers.insert(fb, 1);
            return Some(fb);
        }
        let fb = device.create_framebuffer()?;
        self.framebuffers.insert(fb, 1);
        Some(fb)
    }

    pub fn release_frame_buffer(&mut self, device: &mut dyn GraphicsDevice, fb: FramebufferHandle) {
        let Some(refs) = self.framebuffers.get_mut(&fb) else {
            log::warn!("Released framebuffer {:?} that the pool does not own", fb);
            return;
        };
        if *refs == 0 {
            log::warn!("Framebuffer {:?} released more often than acquired", fb);
            return;
        }
        *refs -= 1;
        if *refs == 0 {
            for slot in 0..MAX_COLOR_ATTACHMENTS {
                device.attach(fb, Attachment::Color(slot), None);
            }
            device.attach(fb, Attachment::Depth, None);
            device.attach(fb, Attachment::DepthStencil, None);
            self.free_framebuffers.push(fb);
        }
    }

    pub fn acquire_texture_2d(
        &mut self,
        device: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        mip_levels: u32,
        immutable: bool,
    ) -> Option<TextureHandle> {
        let mut desc = TextureDescriptor::new(width, height, format);
        desc.mip_levels = mip_levels.max(1);
        desc.immutable = immutable;
        self.acquire_texture(device, desc)
    }

    /// Multisample variant of [`Self::acquire_texture_2d`].
    pub fn acquire_multisample_texture(
        &mut self,
        device: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        samples: u32,
    ) -> Option<TextureHandle> {
        self.acquire_texture(device, TextureDescriptor::new(width, height, format).with_samples(samples))
    }

    pub fn acquire_texture(
        &mut self,
        device: &mut dyn GraphicsDevice,
        desc: TextureDescriptor,
    ) -> Option<TextureHandle> {
        self.acquire_keyed(device, TextureKey::Flat(desc))
    }

    pub fn acquire_texture_cube(
        &mut self,
        device: &mut dyn GraphicsDevice,
        size: u32,
        format: wgpu::TextureFormat,
    ) -> Option<TextureHandle> {
        self.acquire_keyed(device, TextureKey::Cube { size, format })
    }

    fn acquire_keyed(&mut self, device: &mut dyn GraphicsDevice, key: TextureKey) -> Option<TextureHandle> {
        if let Some(pos) = self
            .free_textures
            .iter()
            .position(|handle| self.textures.get(handle).is_some_and(|entry| entry.key == key))
        {
            let handle = self.free_textures.swap_remove(pos);
            if let Some(entry) = self.textures.get_mut(&handle) {
                entry.refs = 1;
            }
            return Some(handle);
        }

        let handle = match key {
            TextureKey::Flat(desc) => device.create_texture_2d(&desc),
            TextureKey::Cube { size, format } => device.create_texture_cube(size, format),
        };
        let Some(handle) = handle else {
            log::warn!("Texture allocation failed for {:?}", key);
            return None;
        };
        self.textures.insert(handle, Pooled { key, refs: 1 });
        Some(handle)
    }

    pub fn retain_texture(&mut self, texture: TextureHandle) {
        match self.textures.get_mut(&texture) {
            Some(entry) if entry.refs > 0 => entry.refs += 1,
            Some(_) => log::warn!("Retained texture {:?} that is already free", texture),
            None => log::warn!("Retained texture {:?} that the pool does not own", texture),
        }
    }

    pub fn release_texture(&mut self, texture: TextureHandle) {
        let Some(entry) = self.textures.get_mut(&texture) else {
            log::warn!("Released texture {:?} that the pool does not own", texture);
            return;
        };
        if entry.refs == 0 {
            log::warn!("Texture {:?} released more often than acquired", texture);
            return;
        }
        entry.refs -= 1;
        if entry.refs == 0 {
            self.free_textures.push(texture);
        }
    }

    /// Exact (width, height, format) comparison against a pooled 2D texture.
    pub fn texture_matches(
        &self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> bool {
        match self.textures.get(&texture).map(|entry| entry.key) {
            Some(TextureKey::Flat(desc)) => {
                desc.width == width && desc.height == height && desc.format == format
            }
            _ => false,
        }
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        match self.textures.get(&texture)?.key {
            TextureKey::Flat(desc) => Some(desc),
            TextureKey::Cube { size, format } => Some(TextureDescriptor::new(size, size, format)),
        }
    }

    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.texture_descriptor(texture).map(|desc| (desc.width, desc.height))
    }

    /// Load/store view of a pooled texture. Keeps the texture alive until
    /// the image is released.
    pub fn acquire_image_2d(
        &mut self,
        device: &mut dyn GraphicsDevice,
        texture: TextureHandle,
        access: ImageAccess,
    ) -> Option<ImageHandle> {
        if let Some((handle, entry)) = self
            .images
            .iter_mut()
            .find(|(_, entry)| entry.texture == texture && entry.refs > 0)
        {
            entry.refs += 1;
            return Some(*handle);
        }
        let image = device.create_image_2d(texture, 0, access)?;
        self.retain_texture(texture);
        self.images.insert(image, PooledImage { texture, refs: 1 });
        Some(image)
    }

    pub fn release_image(&mut self, device: &mut dyn GraphicsDevice, image: ImageHandle) {
        let Some(entry) = self.images.get_mut(&image) else {
            log::warn!("Released image {:?} that the pool does not own", image);
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            let texture = entry.texture;
            self.images.remove(&image);
            device.destroy_image(image);
            self.release_texture(texture);
        }
    }

    pub fn acquire_renderbuffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        samples: u32,
    ) -> Option<RenderbufferHandle> {
        let key = RenderbufferKey {
            width,
            height,
            format,
            samples: samples.max(1),
        };
        if let Some(pos) = self
            .free_renderbuffers
            .iter()
            .position(|handle| self.renderbuffers.get(handle).is_some_and(|entry| entry.key == key))
        {
            let handle = self.free_renderbuffers.swap_remove(pos);
            if let Some(entry) = self.renderbuffers.get_mut(&handle) {
                entry.refs = 1;
            }
            return Some(handle);
        }
        let handle = device.create_renderbuffer(width, height, format, key.samples)?;
        self.renderbuffers.insert(handle, Pooled { key, refs: 1 });
        Some(handle)
    }

    pub fn release_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        let Some(entry) = self.renderbuffers.get_mut(&renderbuffer) else {
            log::warn!("Released renderbuffer {:?} that the pool does not own", renderbuffer);
            return;
        };
        if entry.refs == 0 {
            return;
        }
        entry.refs -= 1;
        if entry.refs == 0 {
            self.free_renderbuffers.push(renderbuffer);
        }
    }

    /// Destroys every parked resource. Called when the viewport size changes
    /// so stale sizes do not accumulate.
    pub fn destroy_free_sized_resources(&mut self, device: &mut dyn GraphicsDevice) {
        let textures = self.free_textures.len();
        for texture in self.free_textures.drain(..) {
            self.textures.remove(&texture);
            device.destroy_texture(texture);
        }
        for fb in self.free_framebuffers.drain(..) {
            self.framebuffers.remove(&fb);
            device.destroy_framebuffer(fb);
        }
        for rb in self.free_renderbuffers.drain(..) {
            self.renderbuffers.remove(&rb);
            device.destroy_renderbuffer(rb);
        }
        if textures > 0 {
            log::debug!("Destroyed {} pooled textures", textures);
        }
    }

    /// Sum of live reference counts across every resource kind.
    pub fn outstanding_references(&self) -> u32 {
        self.textures.values().map(|entry| entry.refs).sum::<u32>()
            + self.framebuffers.values().sum::<u32>()
            + self.renderbuffers.values().map(|entry| entry.refs).sum::<u32>()
            + self.images.values().map(|entry| entry.refs).sum::<u32>()
    }

    pub fn free_texture_count(&self) -> usize {
        self.free_textures.len()
    }

    /// Destroys everything regardless of outstanding references.
    pub fn release_all(&mut self, device: &mut dyn GraphicsDevice) {
        for (image, _) in std::mem::take(&mut self.images) {
            device.destroy_image(image);
        }
        for (texture, _) in std::mem::take(&mut self.textures) {
            device.destroy_texture(texture);
        }
        for (fb, _) in std::mem::take(&mut self.framebuffers) {
            device.destroy_framebuffer(fb);
        }
        for (rb, _) in std::mem::take(&mut self.renderbuffers) {
            device.destroy_renderbuffer(rb);
        }
        self.free_textures.clear();
        self.free_framebuffers.clear();
        self.free_renderbuffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    #[test]
    fn release_with_remaining_references_only_decrements() {
        let mut device = HeadlessDevice::new();
        let mut pool = ResourcePool::new();

        let tex = pool.acquire_texture_2d(&mut device, 64, 64, FORMAT, 1, false).unwrap();
        pool.retain_texture(tex);
        pool.release_texture(tex);

        assert_eq!(pool.outstanding_references(), 1);
        assert_eq!(pool.free_texture_count(), 0);
        pool.destroy_free_sized_resources(&mut device);
        assert!(device.is_texture_alive(tex));
    }

    #[test]
    fn released_texture_is_reused_for_identical_request() {
        let mut device = HeadlessDevice::new();
        let mut pool = ResourcePool::new();

        let first = pool.acquire_texture_2d(&mut device, 32, 16, FORMAT, 1, false).unwrap();
        pool.release_texture(first);
        let other_size = pool.acquire_texture_2d(&mut device, 16, 32, FORMAT, 1, false).unwrap();
        let again = pool.acquire_texture_2d(&mut device, 32, 16, FORMAT, 1, false).unwrap();

        assert_ne!(other_size, first);
        assert_eq!(again, first);
        assert_eq!(device.live_texture_count(), 2);
    }

    #[test]
    fn destroy_free_sized_resources_only_touches_parked_entries() {
        let mut device = HeadlessDevice::new();
        let mut pool = ResourcePool::new();

        let kept = pool.acquire_texture_2d(&mut device, 8, 8, FORMAT, 1, false).unwrap();
        let parked = pool.acquire_texture_2d(&mut device, 4, 4, FORMAT, 1, false).unwrap();
        pool.release_texture(parked);
        pool.destroy_free_sized_resources(&mut device);

        assert!(device.is_texture_alive(kept));
        assert!(!device.is_texture_alive(parked));
        assert!(pool.texture_matches(kept, 8, 8, FORMAT));
        assert!(!pool.texture_matches(parked, 4, 4, FORMAT));
    }

    #[test]
    fn image_keeps_its_texture_alive() {
        let mut device = HeadlessDevice::new();
        let mut pool = ResourcePool::new();

        let tex = pool.acquire_texture_2d(&mut device, 8, 8, FORMAT, 1, false).unwrap();
        let image = pool.acquire_image_2d(&mut device, tex, ImageAccess::ReadWrite).unwrap();
        pool.release_texture(tex);
        assert_eq!(pool.free_texture_count(), 0);

        pool.release_image(&mut device, image);
        assert_eq!(pool.free_texture_count(), 1);
        assert_eq!(pool.outstanding_references(), 0);
    }
}
