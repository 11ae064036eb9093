//! GLSL generation for default materials.
//!
//! Output depends only on the request, so equal requests always produce
//! byte-identical sources. Texture coordinate transforms go through one
//! `transform_uv` helper shared by the vertex stage (displacement) and the
//! fragment stage (every material image).

use crate::device::ProgramSource;
use crate::renderer::lights::MAX_LIGHTS;
use crate::scene::{LightKind, MapKind};

use super::key::{MaterialFeatures, ShaderFeatureSet, ShaderVariantKey};

const GLSL_VERSION: &str = "#version 330 core";

/// What the vertex stage has to produce besides position and normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexPipeline {
    /// Image slot sampled to displace vertices along their normal.
    pub displacement_image: Option<u8>,
    pub second_uv: bool,
    pub vertex_colors: bool,
}

impl VertexPipeline {
    pub fn for_material(key: &ShaderVariantKey, images: &[MapKind]) -> Self {
        Self {
            displacement_image: images
                .iter()
                .position(|kind| *kind == MapKind::Displacement)
                .map(|index| index as u8),
            second_uv: images.iter().any(|kind| kind.uv_set() == 1),
            vertex_colors: key.features.contains(MaterialFeatures::VERTEX_COLORS),
        }
    }

    fn code(&self) -> String {
        format!(
            "{}{}{}",
            self.displacement_image.map_or("n".to_string(), |i| i.to_string()),
            u8::from(self.second_uv),
            u8::from(self.vertex_colors)
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaterialShaderRequest<'a> {
    pub key: ShaderVariantKey,
    pub features: ShaderFeatureSet,
    pub pipeline: VertexPipeline,
    /// Material images in sampler order.
    pub images: &'a [MapKind],
    pub has_transparency: bool,
}

impl MaterialShaderRequest<'_> {
    /// Cache name. Two requests with the same name generate the same source.
    pub fn program_name(&self) -> String {
        format!(
            "material_{:032x}_{:02x}_{}_{}",
            self.key.to_bits(),
            self.features.bits(),
            self.pipeline.code(),
            u8::from(self.has_transparency)
        )
    }
}

#[derive(Default)]
struct Glsl(String);

impl Glsl {
    fn line(&mut self, text: impl AsRef<str>) {
        self.0.push_str(text.as_ref());
        self.0.push('\n');
    }

    fn raw(&mut self, text: &str) {
        self.0.push_str(text);
    }
}

fn header(out: &mut Glsl, features: ShaderFeatureSet) {
    out.line(GLSL_VERSION);
    out.raw(&features.define_block());
}

fn uv_transform_helper(out: &mut Glsl) {
    out.line("vec2 transform_uv(vec2 uv, vec4 rotations, vec4 offsets) {");
    out.line("    vec3 uv3 = vec3(uv, 1.0);");
    out.line("    return vec2(dot(uv3, vec3(rotations.xy, offsets.x)), dot(uv3, vec3(rotations.zw, offsets.y)));");
    out.line("}");
}

fn image_uniforms(out: &mut Glsl, index: usize) {
    out.line(format!("uniform sampler2D image{index}_sampler;"));
    out.line(format!("uniform vec4 image{index}_rotations;"));
    out.line(format!("uniform vec4 image{index}_offsets;"));
}

fn image_sample(index: usize, kind: MapKind) -> String {
    let uv = if kind.uv_set() == 1 {
        "varTexCoord1"
    } else {
        "varTexCoord0"
    };
    format!("texture(image{index}_sampler, transform_uv({uv}, image{index}_rotations, image{index}_offsets))")
}

pub fn generate_vertex(request: &MaterialShaderRequest<'_>) -> String {
    let pipeline = request.pipeline;
    let mut out = Glsl::default();
    header(&mut out, request.features);

    out.line("in vec3 attr_pos;");
    out.line("in vec3 attr_norm;");
    out.line("in vec2 attr_uv0;");
    if pipeline.second_uv {
        out.line("in vec2 attr_uv1;");
    }
    if pipeline.vertex_colors {
        out.line("in vec4 attr_color;");
    }
    out.line("uniform mat4 model_view_projection;");
    out.line("uniform mat4 model_matrix;");
    out.line("uniform mat3 normal_matrix;");
    if let Some(index) = pipeline.displacement_image {
        image_uniforms(&mut out, index as usize);
        out.line("uniform float displace_amount;");
        uv_transform_helper(&mut out);
    }
    out.line("out vec3 varWorldPos;");
    out.line("out vec3 varNormal;");
    out.line("out vec2 varTexCoord0;");
    if pipeline.second_uv {
        out.line("out vec2 varTexCoord1;");
    }
    if pipeline.vertex_colors {
        out.line("out vec4 varColor;");
    }

    out.line("void main() {");
    out.line("    vec3 pos = attr_pos;");
    if let Some(index) = pipeline.displacement_image {
        out.line(format!(
            "    vec2 displaceUV = transform_uv(attr_uv0, image{index}_rotations, image{index}_offsets);"
        ));
        out.line(format!(
            "    pos += attr_norm * texture(image{index}_sampler, displaceUV).r * displace_amount;"
        ));
    }
    out.line("    varWorldPos = (model_matrix * vec4(pos, 1.0)).xyz;");
    out.line("    varNormal = normalize(normal_matrix * attr_norm);");
    out.line("    varTexCoord0 = attr_uv0;");
    if pipeline.second_uv {
        out.line("    varTexCoord1 = attr_uv1;");
    }
    if pipeline.vertex_colors {
        out.line("    varColor = attr_color;");
    }
    out.line("    gl_Position = model_view_projection * vec4(pos, 1.0);");
    out.line("}");
    out.0
}

fn light_declarations(out: &mut Glsl, constant_buffer: bool) {
    out.line("struct LightSource {");
    for field in [
        "vec4 position;",
        "vec4 direction;",
        "vec4 up;",
        "vec4 right;",
        "vec4 diffuse;",
        "vec4 ambient;",
        "vec4 specular;",
        "float spotExponent;",
        "float spotCutoff;",
        "float constantAttenuation;",
        "float linearAttenuation;",
        "float quadraticAttenuation;",
        "float range;",
        "float width;",
        "float height;",
        "vec4 shadowControls;",
        "mat4 shadowView;",
        "int shadowIdx;",
    ] {
        out.line(format!("    {field}"));
    }
    out.line("};");

    if constant_buffer {
        out.line("layout(std140) uniform cbBufferLights {");
        out.line("    int uNumLights;");
        out.line(format!("    LightSource lights[{MAX_LIGHTS}];"));
        out.line("};");
    } else {
        out.line("uniform int uNumLights;");
        out.line(format!("uniform LightSource lights[{MAX_LIGHTS}];"));
    }
}

fn shadow_uniforms(out: &mut Glsl, key: &ShaderVariantKey) {
    for index in 0..key.light_count() {
        if !key.light_has_shadow(index) {
            continue;
        }
        let (sampler, name) = match key.light_kind(index) {
            Some(LightKind::Directional) => ("sampler2D", "shadowmap"),
            _ => ("samplerCube", "shadowcube"),
        };
        out.line(format!("uniform {sampler} {name}{index};"));
        out.line(format!("uniform mat4 {name}{index}_matrix;"));
        out.line(format!("uniform vec4 {name}{index}_control;"));
    }
}

fn shadow_term(index: usize, kind: Option<LightKind>) -> String {
    match kind {
        Some(LightKind::Directional) => format!(
            "sample_orthographic_shadow(shadowmap{index}, shadowmap{index}_control, shadowmap{index}_matrix, varWorldPos)"
        ),
        _ => format!(
            "sample_cubemap_shadow(shadowcube{index}, shadowcube{index}_control, shadowcube{index}_matrix, lights[{index}].position.xyz, varWorldPos)"
        ),
    }
}

fn shadow_helpers(out: &mut Glsl) {
    out.line("float sample_orthographic_shadow(sampler2D map, vec4 control, mat4 matrix, vec3 world) {");
    out.line("    vec4 coord = matrix * vec4(world, 1.0);");
    out.line("    float depth = texture(map, coord.xy).r;");
    out.line("    return clamp(exp(control.y * (depth - coord.z + control.x)), 0.0, 1.0);");
    out.line("}");
    out.line("float sample_cubemap_shadow(samplerCube map, vec4 control, mat4 matrix, vec3 light, vec3 world) {");
    out.line("    vec3 toLight = world - light;");
    out.line("    float current = length(toLight) / control.z;");
    out.line("    float depth = texture(map, (matrix * vec4(toLight, 0.0)).xyz).r;");
    out.line("    return clamp(exp(control.y * (depth - current + control.x)), 0.0, 1.0);");
    out.line("}");
}

pub fn generate_fragment(request: &MaterialShaderRequest<'_>) -> String {
    let key = &request.key;
    let features = key.features;
    let flags = request.features;
    let lit = features.contains(MaterialFeatures::PIXEL_LIGHTING) && key.light_count() > 0;
    let any_shadow = (0..key.light_count()).any(|i| key.light_has_shadow(i));
    let mut out = Glsl::default();
    header(&mut out, flags);

    out.line("in vec3 varWorldPos;");
    out.line("in vec3 varNormal;");
    out.line("in vec2 varTexCoord0;");
    if request.pipeline.second_uv {
        out.line("in vec2 varTexCoord1;");
    }
    if request.pipeline.vertex_colors {
        out.line("in vec4 varColor;");
    }
    out.line("out vec4 fragOutput;");

    out.line("uniform vec3 camera_position;");
    out.line("uniform vec4 material_diffuse;");
    out.line("uniform vec4 material_specular;");
    out.line("uniform vec4 material_properties;");
    out.line("uniform vec3 material_emissive;");
    out.line("uniform float object_opacity;");
    out.line("uniform vec3 light_ambient_total;");
    if features.intersects(MaterialFeatures::BUMP_MAP | MaterialFeatures::NORMAL_MAP) {
        out.line("uniform float bump_amount;");
    }
    for (index, _) in request.images.iter().enumerate() {
        image_uniforms(&mut out, index);
    }
    if lit {
        light_declarations(&mut out, flags.contains(ShaderFeatureSet::CG_LIGHTING));
        shadow_uniforms(&mut out, key);
    }
    let ambient_occlusion = flags.intersects(ShaderFeatureSet::SSAO | ShaderFeatureSet::SSDO);
    if ambient_occlusion {
        out.line("uniform sampler2D ao_texture;");
        out.line("uniform vec4 ao_properties;");
        out.line("uniform vec4 ao_properties2;");
        out.line("uniform vec4 shadow_properties;");
        out.line("uniform vec4 ao_screen_const;");
    }
    let probe = flags.contains(ShaderFeatureSet::LIGHT_PROBE) || features.contains(MaterialFeatures::IBL);
    if probe {
        out.line("uniform sampler2D light_probe;");
        out.line("uniform vec4 light_probe_props;");
        out.line("uniform vec4 light_probe_rotation;");
        out.line("uniform vec4 light_probe_offset;");
        if flags.contains(ShaderFeatureSet::LIGHT_PROBE_2) {
            out.line("uniform sampler2D light_probe2;");
            out.line("uniform vec4 light_probe2_props;");
        }
    }

    if !request.images.is_empty() || probe {
        uv_transform_helper(&mut out);
    }
    if lit && any_shadow {
        shadow_helpers(&mut out);
    }

    out.line("void main() {");
    out.line("    vec3 normal = normalize(varNormal);");
    out.line("    vec3 viewDir = normalize(camera_position - varWorldPos);");
    out.line("    vec4 diffuseColor = material_diffuse;");
    if request.pipeline.vertex_colors {
        out.line("    diffuseColor *= varColor;");
    }
    out.line("    float alpha = object_opacity * material_diffuse.a;");
    out.line("    vec3 emissive = material_emissive;");
    out.line("    float roughness = material_properties.x;");

    for (index, kind) in request.images.iter().enumerate() {
        let sample = image_sample(index, *kind);
        match kind {
            MapKind::Diffuse => out.line(format!("    diffuseColor *= {sample};")),
            MapKind::Specular => out.line(format!("    vec4 specularMapColor = {sample};")),
            MapKind::Roughness => out.line(format!("    roughness *= {sample}.r;")),
            MapKind::Bump => out.line(format!(
                "    normal = normalize(normal + (({sample}.xyz * 2.0) - 1.0) * bump_amount);"
            )),
            MapKind::Normal => out.line(format!(
                "    normal = normalize(mix(normal, ({sample}.xyz * 2.0) - 1.0, bump_amount));"
            )),
            MapKind::Displacement => out.line(format!("    // image{index} displaces vertices")),
            MapKind::Opacity => out.line(format!("    alpha *= {sample}.a;")),
            MapKind::Emissive => out.line(format!("    emissive *= {sample}.rgb;")),
            MapKind::Translucency => out.line(format!("    float translucency = {sample}.r;")),
            MapKind::LightmapIndirect => out.line(format!("    vec3 lightmapIndirect = {sample}.rgb;")),
            MapKind::LightmapRadiosity => out.line(format!("    vec3 lightmapRadiosity = {sample}.rgb;")),
            MapKind::LightmapShadow => out.line(format!("    float lightmapShadow = {sample}.r;")),
        }
    }

    out.line("    vec3 global_diffuse = light_ambient_total;");
    out.line("    vec3 global_specular = vec3(0.0);");
    if ambient_occlusion {
        out.line("    vec2 screenUV = gl_FragCoord.xy * ao_screen_const.zw;");
        out.line("    float aoFactor = texture(ao_texture, screenUV).x;");
        out.line("    global_diffuse *= aoFactor;");
    }
    if lit {
        for index in 0..key.light_count() {
            let kind = key.light_kind(index);
            out.line("    {");
            match kind {
                Some(LightKind::Directional) => {
                    out.line(format!("        vec3 L = -lights[{index}].direction.xyz;"));
                    out.line("        float atten = 1.0;");
                }
                Some(LightKind::Area) => {
                    out.line(format!("        vec3 toLight = lights[{index}].position.xyz - varWorldPos;"));
                    out.line(format!(
                        "        vec3 onPlane = toLight - dot(toLight, lights[{index}].direction.xyz) * lights[{index}].direction.xyz;"
                    ));
                    out.line(format!(
                        "        vec2 extent = vec2(dot(onPlane, lights[{index}].right.xyz), dot(onPlane, lights[{index}].up.xyz));"
                    ));
                    out.line(format!(
                        "        vec3 L = normalize(toLight - clamp(extent.x, -lights[{index}].width, lights[{index}].width) * lights[{index}].right.xyz - clamp(extent.y, -lights[{index}].height, lights[{index}].height) * lights[{index}].up.xyz);"
                    ));
                    out.line(format!(
                        "        float atten = 1.0 / (lights[{index}].constantAttenuation + lights[{index}].linearAttenuation * length(toLight) + lights[{index}].quadraticAttenuation * dot(toLight, toLight));"
                    ));
                }
                _ => {
                    out.line(format!("        vec3 toLight = lights[{index}].position.xyz - varWorldPos;"));
                    out.line("        float dist = length(toLight);");
                    out.line("        vec3 L = toLight / max(dist, 0.0001);");
                    out.line(format!(
                        "        float atten = 1.0 / (lights[{index}].constantAttenuation + lights[{index}].linearAttenuation * dist + lights[{index}].quadraticAttenuation * dist * dist);"
                    ));
                }
            }
            if key.light_has_shadow(index) {
                out.line(format!("        atten *= {};", shadow_term(index, kind)));
            }
            out.line(format!(
                "        global_diffuse += atten * lights[{index}].diffuse.rgb * max(dot(normal, L), 0.0);"
            ));
            if features.contains(MaterialFeatures::SPECULAR) {
                out.line("        vec3 H = normalize(L + viewDir);");
                out.line(format!(
                    "        global_specular += atten * lights[{index}].specular.rgb * pow(max(dot(normal, H), 0.0), 2.0 / max(roughness * roughness, 0.0001));"
                ));
            }
            out.line("    }");
        }
    } else {
        out.line("    global_diffuse = vec3(1.0);");
    }
    if probe {
        out.line("    vec2 probeUV = transform_uv(normal.xy * 0.5 + 0.5, light_probe_rotation, light_probe_offset);");
        out.line("    vec4 probeSample = texture(light_probe, probeUV);");
        if flags.contains(ShaderFeatureSet::RGBE_LIGHT_PROBE) {
            out.line("    probeSample.rgb *= exp2(probeSample.a * 255.0 - 128.0);");
        }
        out.line("    global_diffuse += probeSample.rgb * light_probe_props.w;");
        if flags.contains(ShaderFeatureSet::LIGHT_PROBE_2) {
            out.line("    vec4 probe2Sample = texture(light_probe2, probeUV);");
            out.line("    global_diffuse = mix(global_diffuse, probe2Sample.rgb, light_probe2_props.x);");
        }
    }
    if features.contains(MaterialFeatures::FRESNEL) {
        out.line("    float fresnel = pow(1.0 - max(dot(normal, viewDir), 0.0), material_properties.y);");
        out.line("    global_specular *= fresnel;");
    }
    if features.contains(MaterialFeatures::SPECULAR_MAP) {
        out.line("    global_specular *= specularMapColor.rgb;");
    }
    if features.contains(MaterialFeatures::LIGHTMAP_INDIRECT) {
        out.line("    global_diffuse += lightmapIndirect;");
    }
    if features.contains(MaterialFeatures::LIGHTMAP_RADIOSITY) {
        out.line("    global_diffuse += lightmapRadiosity;");
    }
    if features.contains(MaterialFeatures::LIGHTMAP_SHADOW) {
        out.line("    global_diffuse *= lightmapShadow;");
    }
    if features.contains(MaterialFeatures::TRANSLUCENCY_MAP) {
        out.line("    global_diffuse = mix(global_diffuse, global_diffuse * translucency, material_properties.w);");
    }
    out.line("    vec3 color = diffuseColor.rgb * global_diffuse + global_specular * material_specular.rgb + emissive;");
    if request.has_transparency {
        out.line("    fragOutput = vec4(color * alpha, alpha);");
    } else {
        out.line("    fragOutput = vec4(color, 1.0);");
    }
    out.line("}");
    out.0
}

/// Full program for a default-material request.
pub fn generate_material_program(request: &MaterialShaderRequest<'_>) -> ProgramSource {
    ProgramSource {
        name: request.program_name(),
        vertex: generate_vertex(request),
        fragment: generate_fragment(request),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(images: &[MapKind], features: ShaderFeatureSet) -> MaterialShaderRequest<'_> {
        let mut key = ShaderVariantKey::new(MaterialFeatures::PIXEL_LIGHTING);
        for kind in images {
            key.features |= MaterialFeatures::for_map(*kind);
        }
        key.push_light(LightKind::Directional, true);
        key.push_light(LightKind::Point, false);
        MaterialShaderRequest {
            key,
            features,
            pipeline: VertexPipeline::for_material(&key, images),
            images,
            has_transparency: false,
        }
    }

    #[test]
    fn same_request_generates_identical_source() {
        let images = [MapKind::Diffuse, MapKind::Specular, MapKind::Displacement];
        let features = ShaderFeatureSet::SSM | ShaderFeatureSet::SSAO;
        let first = generate_material_program(&request(&images, features));
        let second = generate_material_program(&request(&images, features));

        assert_eq!(first.name, second.name);
        assert_eq!(first.vertex.as_bytes(), second.vertex.as_bytes());
        assert_eq!(first.fragment.as_bytes(), second.fragment.as_bytes());
        assert_ne!(first.fragment, generate_material_program(&request(&images, ShaderFeatureSet::SSM)).fragment);
    }

    #[test]
    fn displacement_and_fragment_share_the_uv_helper() {
        let images = [MapKind::Diffuse, MapKind::Displacement];
        let req = request(&images, ShaderFeatureSet::empty());
        let program = generate_material_program(&req);

        assert_eq!(req.pipeline.displacement_image, Some(1));
        assert!(program.vertex.contains("transform_uv(attr_uv0, image1_rotations, image1_offsets)"));
        assert!(program.fragment.contains("transform_uv(varTexCoord0, image0_rotations, image0_offsets)"));
        assert_eq!(
            program.vertex.matches("vec2 transform_uv(").count(),
            program.fragment.matches("vec2 transform_uv(").count()
        );
    }

    #[test]
    fn constant_buffer_lighting_declares_block() {
        let with_cb = generate_fragment(&request(&[], ShaderFeatureSet::CG_LIGHTING));
        let without = generate_fragment(&request(&[], ShaderFeatureSet::empty()));

        assert!(with_cb.contains("uniform cbBufferLights {"));
        assert!(without.contains("uniform LightSource lights[8];"));
        assert!(with_cb.contains("shadowmap0_matrix"));
        assert!(!with_cb.contains("shadowcube1"));
    }

    #[test]
    fn lightmaps_pull_in_second_uv_set() {
        let images = [MapKind::LightmapShadow];
        let req = request(&images, ShaderFeatureSet::empty());

        assert!(req.pipeline.second_uv);
        assert!(generate_vertex(&req).contains("varTexCoord1 = attr_uv1;"));
    }
}
