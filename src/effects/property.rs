//! Typed effect and custom-material properties and their packed layout.

use bytemuck::pod_read_unaligned;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::device::{BufferHandle, ImageHandle, TextureHandle, UniformValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
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
    Texture2D,
    TextureArray,
    TextureCube,
    Image2D,
    DataBuffer,
}

impl PropertyType {
    /// Bytes the type occupies in an instance data section. Handles are a
    /// presence flag followed by the id.
    pub fn size(self) -> usize {
        match self {
            PropertyType::Int | PropertyType::Float => 4,
            PropertyType::Vec2 => 8,
            PropertyType::Vec3 => 12,
            PropertyType::Vec4 => 16,
            PropertyType::Bool => 1,
            PropertyType::BoolVec2 => 2,
            PropertyType::BoolVec3 => 3,
            PropertyType::BoolVec4 => 4,
            PropertyType::Mat3 => 36,
            PropertyType::Mat4 => 64,
            PropertyType::Texture2D
            | PropertyType::TextureArray
            | PropertyType::TextureCube
            | PropertyType::Image2D
            | PropertyType::DataBuffer => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PropertyType::Int => "int",
            PropertyType::Float => "float",
            PropertyType::Vec2 => "vec2",
            PropertyType::Vec3 => "vec3",
            PropertyType::Vec4 => "vec4",
            PropertyType::Bool => "bool",
            PropertyType::BoolVec2 => "bvec2",
            PropertyType::BoolVec3 => "bvec3",
            PropertyType::BoolVec4 => "bvec4",
            PropertyType::Mat3 => "mat3",
            PropertyType::Mat4 => "mat4",
            PropertyType::Texture2D => "texture2D",
            PropertyType::TextureArray => "textureArray",
            PropertyType::TextureCube => "textureCube",
            PropertyType::Image2D => "image2D",
            PropertyType::DataBuffer => "dataBuffer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
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
    DataBuffer(Option<BufferHandle>),
}

fn write_handle(out: &mut [u8], id: Option<u32>) {
    let words = [u32::from(id.is_some()), id.unwrap_or(0)];
    out.copy_from_slice(bytemuck::cast_slice(&words));
}

fn read_handle(bytes: &[u8]) -> Option<u32> {
    let words: [u32; 2] = pod_read_unaligned(bytes);
    (words[0] != 0).then_some(words[1])
}

fn write_bools(out: &mut [u8], bools: &[bool]) {
    for (byte, value) in out.iter_mut().zip(bools) {
        *byte = u8::from(*value);
    }
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Int(_) => PropertyType::Int,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::Vec2(_) => PropertyType::Vec2,
            PropertyValue::Vec3(_) => PropertyType::Vec3,
            PropertyValue::Vec4(_) => PropertyType::Vec4,
            PropertyValue::Bool(_) => PropertyType::Bool,
            PropertyValue::BoolVec2(_) => PropertyType::BoolVec2,
            PropertyValue::BoolVec3(_) => PropertyType::BoolVec3,
            PropertyValue::BoolVec4(_) => PropertyType::BoolVec4,
            PropertyValue::Mat3(_) => PropertyType::Mat3,
            PropertyValue::Mat4(_) => PropertyType::Mat4,
            PropertyValue::Texture2D(_) => PropertyType::Texture2D,
            PropertyValue::TextureArray(_) => PropertyType::TextureArray,
            PropertyValue::TextureCube(_) => PropertyType::TextureCube,
            PropertyValue::Image2D(_) => PropertyType::Image2D,
            PropertyValue::DataBuffer(_) => PropertyType::DataBuffer,
        }
    }

    /// Writes the value into `out`, which must be exactly `size()` bytes.
    pub fn write(&self, out: &mut [u8]) {
        match self {
            PropertyValue::Int(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            PropertyValue::Float(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            PropertyValue::Vec2(v) => out.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            PropertyValue::Vec3(v) => out.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            PropertyValue::Vec4(v) => out.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            PropertyValue::Bool(v) => out[0] = u8::from(*v),
            PropertyValue::BoolVec2(v) => write_bools(out, v),
            PropertyValue::BoolVec3(v) => write_bools(out, v),
            PropertyValue::BoolVec4(v) => write_bools(out, v),
            PropertyValue::Mat3(m) => out.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
            PropertyValue::Mat4(m) => out.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
            PropertyValue::Texture2D(t) | PropertyValue::TextureArray(t) | PropertyValue::TextureCube(t) => {
                write_handle(out, t.map(|t| t.0))
            }
            PropertyValue::Image2D(i) => write_handle(out, i.map(|i| i.0)),
            PropertyValue::DataBuffer(b) => write_handle(out, b.map(|b| b.0)),
        }
    }

    /// Reads a value of type `ty` from `bytes` (`ty.size()` long).
    pub fn read(ty: PropertyType, bytes: &[u8]) -> Self {
        match ty {
            PropertyType::Int => PropertyValue::Int(pod_read_unaligned(bytes)),
            PropertyType::Float => PropertyValue::Float(pod_read_unaligned(bytes)),
            PropertyType::Vec2 => PropertyValue::Vec2(Vec2::from_array(pod_read_unaligned(bytes))),
            PropertyType::Vec3 => PropertyValue::Vec3(Vec3::from_array(pod_read_unaligned(bytes))),
            PropertyType::Vec4 => PropertyValue::Vec4(Vec4::from_array(pod_read_unaligned(bytes))),
            PropertyType::Bool => PropertyValue::Bool(bytes[0] != 0),
            PropertyType::BoolVec2 => PropertyValue::BoolVec2([bytes[0] != 0, bytes[1] != 0]),
            PropertyType::BoolVec3 => {
                PropertyValue::BoolVec3([bytes[0] != 0, bytes[1] != 0, bytes[2] != 0])
            }
            PropertyType::BoolVec4 => PropertyValue::BoolVec4([
                bytes[0] != 0,
                bytes[1] != 0,
                bytes[2] != 0,
                bytes[3] != 0,
            ]),
            PropertyType::Mat3 => {
                PropertyValue::Mat3(Mat3::from_cols_array(&pod_read_unaligned(bytes)))
            }
            PropertyType::Mat4 => {
                PropertyValue::Mat4(Mat4::from_cols_array(&pod_read_unaligned(bytes)))
            }
            PropertyType::Texture2D => PropertyValue::Texture2D(read_handle(bytes).map(TextureHandle)),
            PropertyType::TextureArray => {
                PropertyValue::TextureArray(read_handle(bytes).map(TextureHandle))
            }
            PropertyType::TextureCube => PropertyValue::TextureCube(read_handle(bytes).map(TextureHandle)),
            PropertyType::Image2D => PropertyValue::Image2D(read_handle(bytes).map(ImageHandle)),
            PropertyType::DataBuffer => PropertyValue::DataBuffer(read_handle(bytes).map(BufferHandle)),
        }
    }

    /// The uniform to upload, or `None` for values that bind as blocks.
    pub fn to_uniform(&self) -> Option<UniformValue> {
        let value = match *self {
            PropertyValue::Int(v) => UniformValue::Int(v),
            PropertyValue::Float(v) => UniformValue::Float(v),
            PropertyValue::Vec2(v) => UniformValue::Vec2(v),
            PropertyValue::Vec3(v) => UniformValue::Vec3(v),
            PropertyValue::Vec4(v) => UniformValue::Vec4(v),
            PropertyValue::Bool(v) => UniformValue::Bool(v),
            PropertyValue::BoolVec2(v) => UniformValue::BoolVec2(v),
            PropertyValue::BoolVec3(v) => UniformValue::BoolVec3(v),
            PropertyValue::BoolVec4(v) => UniformValue::BoolVec4(v),
            PropertyValue::Mat3(v) => UniformValue::Mat3(v),
            PropertyValue::Mat4(v) => UniformValue::Mat4(v),
            PropertyValue::Texture2D(t) => UniformValue::Texture2D(t),
            PropertyValue::TextureArray(t) => UniformValue::TextureArray(t),
            PropertyValue::TextureCube(t) => UniformValue::TextureCube(t),
            PropertyValue::Image2D(i) => UniformValue::Image2D(i),
            PropertyValue::DataBuffer(_) => return None,
        };
        Some(value)
    }
}

/// One declared property of an effect or custom material class.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDeclaration {
    pub name: String,
    pub ty: PropertyType,
    pub default: PropertyValue,
    pub enum_names: Vec<String>,
    pub filter: Option<wgpu::FilterMode>,
    pub wrap: Option<wgpu::AddressMode>,
}

impl PropertyDeclaration {
    pub fn new(name: impl Into<String>, default: PropertyValue) -> Self {
        Self {
            name: name.into(),
            ty: default.property_type(),
            default,
            enum_names: Vec::new(),
            filter: None,
            wrap: None,
        }
    }

    /// An integer property whose value indexes `names`.
    pub fn with_enum_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sampling(mut self, filter: wgpu::FilterMode, wrap: wgpu::AddressMode) -> Self {
        self.filter = Some(filter);
        self.wrap = Some(wrap);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_the_packed_layout() {
        let values = [
            PropertyValue::Vec3(Vec3::new(1.0, -2.0, 3.5)),
            PropertyValue::BoolVec3([true, false, true]),
            PropertyValue::Mat3(Mat3::from_diagonal(Vec3::new(2.0, 3.0, 4.0))),
            PropertyValue::Texture2D(Some(TextureHandle(7))),
            PropertyValue::TextureCube(None),
        ];
        for value in values {
            let ty = value.property_type();
            let mut bytes = vec![0u8; ty.size()];
            value.write(&mut bytes);
            assert_eq!(PropertyValue::read(ty, &bytes), value);
        }
    }

    #[test]
    fn data_buffers_do_not_map_to_uniforms() {
        assert_eq!(PropertyValue::DataBuffer(None).to_uniform(), None);
        assert_eq!(
            PropertyValue::Float(0.25).to_uniform(),
            Some(UniformValue::Float(0.25))
        );
    }
}
