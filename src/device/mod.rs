//! Backend-neutral graphics device interface.
//!
//! The pipeline never talks to a native API directly. Everything goes
//! through [`GraphicsDevice`], which mirrors a GL-style immediate state
//! model: resources are created and destroyed through opaque handles and
//! fixed-function state is set before each draw. Creation calls return
//! `None` when the backend cannot satisfy the request; callers check.

mod headless;
mod scoped;

pub use headless::{DeviceCommand, FailureInjection, HeadlessDevice};
pub use scoped::{
    with_blend_state, with_depth_state, with_render_target, with_scissor, with_state,
    with_viewport, StateAccessor,
};

use bitflags::bitflags;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

handle!(
    /// Vertex, index, constant, storage or indirect buffer.
    BufferHandle,
    /// 2D, multisample or cube texture.
    TextureHandle,
    RenderbufferHandle,
    FramebufferHandle,
    /// Linked shader program.
    ProgramHandle,
    /// Load/store image view of a texture level.
    ImageHandle,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Compute,
    GeometryShader,
    Tessellation,
    MultisampleTexture,
    AdvancedBlend,
    ConstantBuffer,
    StorageBuffer,
    IndirectDraw,
    ShaderImageLoadStore,
    DepthTexture,
    FloatRenderTarget,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::Compute,
        Capability::GeometryShader,
        Capability::Tessellation,
        Capability::MultisampleTexture,
        Capability::AdvancedBlend,
        Capability::ConstantBuffer,
        Capability::StorageBuffer,
        Capability::IndirectDraw,
        Capability::ShaderImageLoadStore,
        Capability::DepthTexture,
        Capability::FloatRenderTarget,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Constant,
    Storage,
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub usage: BufferUsage,
    pub size: usize,
    pub dynamic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub immutable: bool,
}

impl TextureDescriptor {
    pub fn new(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            mip_levels: 1,
            sample_count: 1,
            immutable: false,
        }
    }

    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSampling {
    pub min_filter: wgpu::FilterMode,
    pub mag_filter: wgpu::FilterMode,
    pub wrap_s: wgpu::AddressMode,
    pub wrap_t: wgpu::AddressMode,
}

impl TextureSampling {
    pub const LINEAR_CLAMP: Self = Self {
        min_filter: wgpu::FilterMode::Linear,
        mag_filter: wgpu::FilterMode::Linear,
        wrap_s: wgpu::AddressMode::ClampToEdge,
        wrap_t: wgpu::AddressMode::ClampToEdge,
    };

    pub const NEAREST_CLAMP: Self = Self {
        min_filter: wgpu::FilterMode::Nearest,
        mag_filter: wgpu::FilterMode::Nearest,
        wrap_s: wgpu::AddressMode::ClampToEdge,
        wrap_t: wgpu::AddressMode::ClampToEdge,
    };

    pub fn new(filter: wgpu::FilterMode, wrap: wgpu::AddressMode) -> Self {
        Self {
            min_filter: filter,
            mag_filter: filter,
            wrap_s: wrap,
            wrap_t: wrap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Look direction and up vector of the face, following the usual cube
    /// map orientation.
    pub fn basis(self) -> (Vec3, Vec3) {
        match self {
            CubeFace::PositiveX => (Vec3::X, Vec3::NEG_Y),
            CubeFace::NegativeX => (Vec3::NEG_X, Vec3::NEG_Y),
            CubeFace::PositiveY => (Vec3::Y, Vec3::Z),
            CubeFace::NegativeY => (Vec3::NEG_Y, Vec3::NEG_Z),
            CubeFace::PositiveZ => (Vec3::Z, Vec3::NEG_Y),
            CubeFace::NegativeZ => (Vec3::NEG_Z, Vec3::NEG_Y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attachment {
    Color(u32),
    Depth,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentTarget {
    Texture(TextureHandle),
    CubeFace(TextureHandle, CubeFace),
    Renderbuffer(RenderbufferHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    MissingAttachment,
    IncompleteDimensions,
    Unsupported,
}

/// Program sources handed to the backend. `name` is diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramSource {
    pub name: String,
    pub vertex: String,
    pub fragment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformLocation(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Bool,
    BoolVec2,
    BoolVec3,
    BoolVec4,
    Mat3,
    Mat4,
    Sampler2D,
    Sampler2DArray,
    SamplerCube,
    Image2D,
}

impl UniformType {
    pub fn name(self) -> &'static str {
        match self {
            UniformType::Int => "int",
            UniformType::Float => "float",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
            UniformType::Bool => "bool",
            UniformType::BoolVec2 => "bvec2",
            UniformType::BoolVec3 => "bvec3",
            UniformType::BoolVec4 => "bvec4",
            UniformType::Mat3 => "mat3",
            UniformType::Mat4 => "mat4",
            UniformType::Sampler2D => "sampler2D",
            UniformType::Sampler2DArray => "sampler2DArray",
            UniformType::SamplerCube => "samplerCube",
            UniformType::Image2D => "image2D",
        }
    }

    /// Parses a GLSL type keyword.
    pub fn from_glsl(keyword: &str) -> Option<Self> {
        let ty = match keyword {
            "int" => UniformType::Int,
            "float" => UniformType::Float,
            "vec2" => UniformType::Vec2,
            "vec3" => UniformType::Vec3,
            "vec4" => UniformType::Vec4,
            "bool" => UniformType::Bool,
            "bvec2" => UniformType::BoolVec2,
            "bvec3" => UniformType::BoolVec3,
            "bvec4" => UniformType::BoolVec4,
            "mat3" => UniformType::Mat3,
            "mat4" => UniformType::Mat4,
            "sampler2D" => UniformType::Sampler2D,
            "sampler2DArray" => UniformType::Sampler2DArray,
            "samplerCube" => UniformType::SamplerCube,
            "image2D" => UniformType::Image2D,
            _ => return None,
        };
        Some(ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformInfo {
    pub location: UniformLocation,
    pub ty: UniformType,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Bool(bool),
    BoolVec2([bool; 2]),
    BoolVec3([bool; 3]),
    BoolVec4([bool; 4]),
    Mat3(Mat3),
    Mat4(Mat4),
    Texture2D(Option<TextureHandle>),
    TextureArray(Option<TextureHandle>),
    TextureCube(Option<TextureHandle>),
    Image2D(Option<ImageHandle>),
}

impl UniformValue {
    pub fn uniform_type(&self) -> UniformType {
        match self {
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Bool(_) => UniformType::Bool,
            UniformValue::BoolVec2(_) => UniformType::BoolVec2,
            UniformValue::BoolVec3(_) => UniformType::BoolVec3,
            UniformValue::BoolVec4(_) => UniformType::BoolVec4,
            UniformValue::Mat3(_) => UniformType::Mat3,
            UniformValue::Mat4(_) => UniformType::Mat4,
            UniformValue::Texture2D(_) => UniformType::Sampler2D,
            UniformValue::TextureArray(_) => UniformType::Sampler2DArray,
            UniformValue::TextureCube(_) => UniformType::SamplerCube,
            UniformValue::Image2D(_) => UniformType::Image2D,
        }
    }
}

/// Blend equations. The last three need `Capability::AdvancedBlend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Overlay,
    ColorBurn,
    ColorDodge,
}

impl BlendEquation {
    pub fn is_advanced(self) -> bool {
        matches!(
            self,
            BlendEquation::Overlay | BlendEquation::ColorBurn | BlendEquation::ColorDodge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFunction {
    pub src_rgb: wgpu::BlendFactor,
    pub dst_rgb: wgpu::BlendFactor,
    pub src_alpha: wgpu::BlendFactor,
    pub dst_alpha: wgpu::BlendFactor,
}

impl BlendFunction {
    pub const fn new(
        src_rgb: wgpu::BlendFactor,
        dst_rgb: wgpu::BlendFactor,
        src_alpha: wgpu::BlendFactor,
        dst_alpha: wgpu::BlendFactor,
    ) -> Self {
        Self {
            src_rgb,
            dst_rgb,
            src_alpha,
            dst_alpha,
        }
    }

    pub const fn uniform(src: wgpu::BlendFactor, dst: wgpu::BlendFactor) -> Self {
        Self::new(src, dst, src, dst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub function: BlendFunction,
    pub equation: BlendEquation,
}

impl BlendState {
    pub const fn new(function: BlendFunction, equation: BlendEquation) -> Self {
        Self { function, equation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: wgpu::CompareFunction,
}

impl DepthState {
    pub const DISABLED: Self = Self {
        test: false,
        write: false,
        compare: wgpu::CompareFunction::Always,
    };

    pub const fn new(test: bool, write: bool) -> Self {
        Self {
            test,
            write,
            compare: wgpu::CompareFunction::LessEqual,
        }
    }
}

impl Default for DepthState {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterizerState {
    pub cull: Option<wgpu::Face>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Vertex/index buffer pair plus the range to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
    pub count: u32,
    pub topology: wgpu::PrimitiveTopology,
}

impl Geometry {
    pub fn triangles(vertex_buffer: BufferHandle, index_buffer: Option<BufferHandle>, count: u32) -> Self {
        Self {
            vertex_buffer: Some(vertex_buffer),
            index_buffer,
            count,
            topology: wgpu::PrimitiveTopology::TriangleList,
        }
    }
}

pub trait GraphicsDevice {
    fn has_capability(&self, capability: Capability) -> bool;
    fn max_texture_size(&self) -> u32;
    fn max_samples(&self) -> u32;

    fn create_buffer(&mut self, desc: &BufferDescriptor, data: Option<&[u8]>) -> Option<BufferHandle>;
    fn update_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture_2d(&mut self, desc: &TextureDescriptor) -> Option<TextureHandle>;
    fn create_texture_cube(&mut self, size: u32, format: wgpu::TextureFormat) -> Option<TextureHandle>;
    fn set_texture_sampling(&mut self, texture: TextureHandle, sampling: TextureSampling);
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_image_2d(
        &mut self,
        texture: TextureHandle,
        mip_level: u32,
        access: ImageAccess,
    ) -> Option<ImageHandle>;
    fn destroy_image(&mut self, image: ImageHandle);

    fn create_renderbuffer(
        &mut self,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        sample_count: u32,
    ) -> Option<RenderbufferHandle>;
    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    fn create_framebuffer(&mut self) -> Option<FramebufferHandle>;
    fn attach(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        target: Option<AttachmentTarget>,
    );
    fn framebuffer_status(&mut self, framebuffer: FramebufferHandle) -> FramebufferStatus;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    fn render_target(&self) -> Option<FramebufferHandle>;
    fn set_render_target(&mut self, framebuffer: Option<FramebufferHandle>);

    /// Compiles and links a program. The error carries the backend's log.
    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramHandle, String>;
    fn destroy_program(&mut self, program: ProgramHandle);
    fn active_program(&self) -> Option<ProgramHandle>;
    fn set_active_program(&mut self, program: Option<ProgramHandle>);
    fn uniform_info(&self, program: ProgramHandle, name: &str) -> Option<UniformInfo>;
    fn set_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: &UniformValue);
    /// Binds `buffer` to the named uniform block. Returns false when the
    /// program has no such block.
    fn bind_constant_buffer(&mut self, program: ProgramHandle, block: &str, buffer: BufferHandle) -> bool;
    fn bind_storage_buffer(&mut self, program: ProgramHandle, block: &str, buffer: BufferHandle) -> bool;

    fn blend_state(&self) -> Option<BlendState>;
    fn set_blend_state(&mut self, state: Option<BlendState>);
    fn depth_state(&self) -> DepthState;
    fn set_depth_state(&mut self, state: DepthState);
    fn color_writes(&self) -> bool;
    fn set_color_writes(&mut self, enabled: bool);
    fn rasterizer_state(&self) -> RasterizerState;
    fn set_rasterizer_state(&mut self, state: RasterizerState);
    fn stencil_test(&self) -> bool;
    fn set_stencil_test(&mut self, enabled: bool);
    fn viewport(&self) -> Rect;
    fn set_viewport(&mut self, viewport: Rect);
    fn scissor(&self) -> Option<Rect>;
    fn set_scissor(&mut self, scissor: Option<Rect>);

    fn clear(&mut self, flags: ClearFlags, color: Vec4, depth: f32);
    fn draw(&mut self, geometry: &Geometry);
    fn draw_indirect(&mut self, geometry: &Geometry, buffer: BufferHandle, offset: usize);
    fn memory_barrier(&mut self);
    fn blit_framebuffer(
        &mut self,
        src: Option<FramebufferHandle>,
        src_rect: Rect,
        dst: Option<FramebufferHandle>,
        dst_rect: Rect,
        filter: wgpu::FilterMode,
    );
    /// Reads RGBA8 pixels of the current render target into `out`.
    fn read_pixels(&mut self, rect: Rect, out: &mut [u8]) -> bool;
}

/// Uploads a `Pod` slice into a new buffer.
pub fn create_buffer_with<T: bytemuck::Pod>(
    device: &mut dyn GraphicsDevice,
    usage: BufferUsage,
    contents: &[T],
) -> Option<BufferHandle> {
    let bytes: &[u8] = bytemuck::cast_slice(contents);
    device.create_buffer(
        &BufferDescriptor {
            usage,
            size: bytes.len(),
            dynamic: false,
        },
        Some(bytes),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glsl_keywords_round_trip_through_names() {
        let types = [
            UniformType::Int,
            UniformType::Vec4,
            UniformType::Mat3,
            UniformType::SamplerCube,
            UniformType::Image2D,
        ];
        for ty in types {
            assert_eq!(UniformType::from_glsl(ty.name()), Some(ty));
        }
        assert_eq!(UniformType::from_glsl("dvec2"), None);
    }

    #[test]
    fn only_overlay_family_is_advanced() {
        assert!(BlendEquation::Overlay.is_advanced());
        assert!(BlendEquation::ColorDodge.is_advanced());
        assert!(!BlendEquation::ReverseSubtract.is_advanced());
    }
}
