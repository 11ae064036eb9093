//! Shader variant generation, caching and uniform binding.

pub mod builtin;
pub mod cache;
pub mod generator;
pub mod key;
pub mod properties;

pub use builtin::BuiltinProgram;
pub use cache::{
    AoBinding, GlobalInputs, MaterialInputs, ShaderCache, ShadowBinding, LIGHTS_BLOCK,
};
pub use generator::{generate_material_program, MaterialShaderRequest, VertexPipeline};
pub use key::{MaterialFeatures, ShaderFeatureSet, ShaderVariantKey};
pub use properties::{ShaderConstant, ShaderPropertyBundle};
