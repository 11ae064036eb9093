use glam::{Mat4, Vec2, Vec3, Vec4};

use layer_render::device::{DeviceCommand, HeadlessDevice, ProgramSource, Rect};
use layer_render::effects::{
    ClassKind, EffectClass, EffectCommand, EffectInstance, EffectRenderArgs, EffectSystem,
    PropertyDeclaration, PropertyValue,
};
use layer_render::renderer::shader::ShaderCache;
use layer_render::renderer::vertex::{create_cube_geometry, create_quad_geometry};
use layer_render::renderer::{CompositeTarget, LayerPass, Renderer, ResourcePool};
use layer_render::scene::{Bounds, CustomMaterial, DefaultMaterial, Layer, Material, Model, NodeId, Scene};
use layer_render::settings::RenderSettings;

const LAYER: NodeId = NodeId(1);
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const FULLSCREEN_VS: &str = "#version 330 core
in vec3 attr_pos;
in vec2 attr_uv0;
out vec2 uv;
void main() {
    uv = attr_uv0;
    gl_Position = vec4(attr_pos, 1.0);
}
";

fn fragment(uniforms: &[&str], body: &str) -> String {
    let mut source = String::from("#version 330 core\nuniform sampler2D Texture0;\nuniform vec4 Texture0Info;\nuniform vec2 DestSize;\n");
    for uniform in uniforms {
        source.push_str(&format!("uniform {uniform};\n"));
    }
    source.push_str("in vec2 uv;\nout vec4 fragColor;\nvoid main() {\n");
    source.push_str(body);
    source.push_str("\n}\n");
    source
}

fn program(name: &str, fragment: String) -> ProgramSource {
    ProgramSource {
        name: name.to_string(),
        vertex: FULLSCREEN_VS.to_string(),
        fragment,
    }
}

/// Downsamples into a half-size buffer, then scales back up into the output.
fn half_blur() -> EffectClass {
    EffectClass::new(
        "half_blur",
        ClassKind::Effect,
        vec![PropertyDeclaration::new("amount", PropertyValue::Float(1.0))],
        vec![
            program("half_blur_down", fragment(&["float amount"], "fragColor = texture(Texture0, uv) * amount;")),
            program("half_blur_up", fragment(&[], "fragColor = texture(Texture0, uv);")),
        ],
        vec![
            EffectCommand::AllocateBuffer {
                name: "half".to_string(),
                format: FORMAT,
                filter: wgpu::FilterMode::Linear,
                wrap: wgpu::AddressMode::ClampToEdge,
                size_multiplier: 0.5,
                per_frame: false,
            },
            EffectCommand::BindBuffer {
                name: "half".to_string(),
                needs_clear: true,
            },
            EffectCommand::BindShader {
                shader: "half_blur_down".to_string(),
            },
            EffectCommand::ApplyInstanceValue { property: None },
            EffectCommand::Render {
                needs_clear: false,
                indirect: None,
            },
            EffectCommand::BindTarget { format: FORMAT },
            EffectCommand::BindShader {
                shader: "half_blur_up".to_string(),
            },
            EffectCommand::ApplyBufferValue {
                buffer: Some("half".to_string()),
                uniform: None,
            },
            EffectCommand::Render {
                needs_clear: false,
                indirect: None,
            },
        ],
    )
}

fn tint() -> EffectClass {
    EffectClass::new(
        "tint",
        ClassKind::Effect,
        vec![PropertyDeclaration::new("tint_color", PropertyValue::Vec4(Vec4::ONE))],
        vec![program("tint", fragment(&["vec4 tint_color"], "fragColor = texture(Texture0, uv) * tint_color;"))],
        vec![
            EffectCommand::BindTarget { format: FORMAT },
            EffectCommand::BindShader {
                shader: "tint".to_string(),
            },
            EffectCommand::ApplyInstanceValue { property: None },
            EffectCommand::Render {
                needs_clear: true,
                indirect: None,
            },
        ],
    )
}

fn renderer() -> Renderer<HeadlessDevice> {
    let mut renderer = Renderer::new(HeadlessDevice::new(), RenderSettings::default()).expect("renderer");
    renderer.effects_mut().register_class(half_blur()).expect("register half_blur");
    renderer.effects_mut().register_class(tint()).expect("register tint");
    renderer
}

fn layer_with_effects(renderer: &mut Renderer<HeadlessDevice>) -> Layer {
    let cube = create_cube_geometry(renderer.device_mut(), 50.0).expect("cube geometry");
    let mut layer = Layer::new(LAYER);
    layer.models.push(Model::new(NodeId(10), Mat4::IDENTITY).with_subset(
        cube,
        Bounds::new(Vec3::splat(-50.0), Vec3::splat(50.0)),
        Material::Default(DefaultMaterial::default()),
    ));
    let mut tint = renderer.effects().create_instance("tint", NodeId(21)).unwrap();
    tint.set_property("tint_color", PropertyValue::Vec4(Vec4::new(1.0, 0.5, 0.5, 1.0)))
        .unwrap();
    layer.effects = vec![renderer.effects().create_instance("half_blur", NodeId(20)).unwrap(), tint];
    layer
}

fn draw_viewport(commands: &[DeviceCommand], name: &str) -> Option<Rect> {
    commands.iter().find_map(|command| match command {
        DeviceCommand::Draw { program, viewport, .. } if program.as_deref() == Some(name) => Some(*viewport),
        _ => None,
    })
}

#[test]
fn two_effects_run_in_order_and_release_their_buffers() {
    let mut renderer = renderer();
    let layer = layer_with_effects(&mut renderer);
    let scene = Scene::new().with_layer(layer);
    let target = CompositeTarget::screen(256, 256);

    renderer.render_frame(&scene, &target);

    let data = renderer.layer_data(LAYER).unwrap();
    assert_eq!(
        data.pass_events(),
        &[LayerPass::DepthPrepass, LayerPass::Main, LayerPass::Effects, LayerPass::Composite]
    );
    let commands = renderer.device().commands();
    assert_eq!(draw_viewport(commands, "half_blur_down"), Some(Rect::from_size(128, 128)));
    assert_eq!(draw_viewport(commands, "half_blur_up"), Some(Rect::from_size(256, 256)));
    assert_eq!(draw_viewport(commands, "tint"), Some(Rect::from_size(256, 256)));
    let position = |name: &str| {
        commands.iter().position(|command| {
            matches!(command, DeviceCommand::Draw { program, .. } if program.as_deref() == Some(name))
        })
    };
    assert!(position("half_blur_up") < position("tint"));
    assert!(position("tint") < position("layer_composite"));
    assert_eq!(renderer.effects().context_count(), 2);

    // steady state: a second frame reuses every pooled texture
    let textures = renderer.device().live_texture_count();
    renderer.render_frame(&scene, &target);
    assert_eq!(renderer.device().live_texture_count(), textures);

    renderer.render_frame(&Scene::new(), &target);
    assert_eq!(renderer.pool().outstanding_references(), 0);
    assert_eq!(renderer.effects().context_count(), 0);
}

#[test]
fn chain_output_matches_the_input_size_and_only_effect_buffers_stay_referenced() {
    let mut device = HeadlessDevice::new();
    let mut pool = ResourcePool::new();
    let mut shaders = ShaderCache::new(false);
    let mut effects = EffectSystem::new();
    effects.register_class(half_blur()).unwrap();
    effects.register_class(tint()).unwrap();
    let chain = vec![
        effects.create_instance("half_blur", NodeId(20)).unwrap(),
        effects.create_instance("tint", NodeId(21)).unwrap(),
    ];
    let quad = create_quad_geometry(&mut device).expect("quad geometry");
    let input = pool
        .acquire_texture_2d(&mut device, 256, 256, FORMAT, 1, false)
        .expect("input texture");
    let before = pool.outstanding_references();
    let args = EffectRenderArgs {
        input,
        input_size: (256, 256),
        clip_range: Vec2::new(10.0, 5000.0),
        depth: None,
        frame: 0,
        quad,
    };

    let output = effects
        .render_chain(&mut device, &mut pool, &mut shaders, &chain, &args)
        .expect("chain output");

    assert_ne!(output, input);
    assert_eq!(pool.texture_size(output), Some((256, 256)));
    let half_blur = effects.context(NodeId(20)).unwrap();
    let half = half_blur.buffer_texture("half").expect("half buffer");
    assert_eq!(pool.texture_size(half), Some((128, 128)));
    let effect_buffers = (half_blur.buffer_count() + effects.context(NodeId(21)).unwrap().buffer_count()) as u32;
    assert_eq!(effect_buffers, 1);

    pool.release_texture(output);
    assert_eq!(pool.outstanding_references() - effect_buffers, before);

    effects.release_all(&mut device, &mut pool);
    assert_eq!(pool.outstanding_references(), before);
    pool.release_texture(input);
    assert_eq!(pool.outstanding_references(), 0);
}

#[test]
fn removed_effect_drops_its_context() {
    let mut renderer = renderer();
    let layer = layer_with_effects(&mut renderer);
    let mut scene = Scene::new().with_layer(layer);
    let target = CompositeTarget::screen(256, 256);
    renderer.render_frame(&scene, &target);
    assert!(renderer.effects().context(NodeId(20)).is_some());

    scene.layer_mut(LAYER).unwrap().effects.remove(0);
    renderer.render_frame(&scene, &target);
    assert!(renderer.effects().context(NodeId(20)).is_none());
    assert!(renderer.effects().context(NodeId(21)).is_some());
}

#[test]
fn inactive_effects_are_skipped() {
    let mut renderer = renderer();
    let mut layer = layer_with_effects(&mut renderer);
    for effect in &mut layer.effects {
        effect.active = false;
    }
    let scene = Scene::new().with_layer(layer);

    renderer.render_frame(&scene, &CompositeTarget::screen(256, 256));

    let data = renderer.layer_data(LAYER).unwrap();
    assert!(!data.pass_events().contains(&LayerPass::Effects));
    assert_eq!(renderer.device().draws_with_program("tint"), 0);
}

#[test]
fn failing_effect_is_skipped_and_the_chain_continues() {
    let mut renderer = renderer();
    renderer.device_mut().failures_mut().program_names.push("half_blur".to_string());
    let layer = layer_with_effects(&mut renderer);
    let scene = Scene::new().with_layer(layer);

    renderer.render_frame(&scene, &CompositeTarget::screen(256, 256));

    let device = renderer.device();
    assert_eq!(device.draws_with_program("half_blur"), 0);
    assert_eq!(device.draws_with_program("tint"), 1);
    assert_eq!(device.draws_with_program("layer_composite"), 1);
}

#[test]
fn custom_material_draws_with_its_class_program() {
    let mut renderer = renderer();
    let class = EffectClass::new(
        "glow",
        ClassKind::CustomMaterial { has_transparency: true },
        vec![PropertyDeclaration::new("glow_color", PropertyValue::Vec4(Vec4::new(0.2, 0.8, 1.0, 1.0)))],
        vec![ProgramSource {
            name: "glow".to_string(),
            vertex: "#version 330 core
in vec3 attr_pos;
uniform mat4 model_view_projection;
uniform mat4 model_matrix;
uniform mat3 normal_matrix;
void main() {
    gl_Position = model_view_projection * vec4(attr_pos, 1.0);
}
"
            .to_string(),
            fragment: "#version 330 core
uniform vec4 glow_color;
uniform float object_opacity;
out vec4 fragColor;
void main() {
    fragColor = glow_color * object_opacity;
}
"
            .to_string(),
        }],
        Vec::new(),
    );
    let class = renderer.effects_mut().register_class(class).unwrap();
    let cube = create_cube_geometry(renderer.device_mut(), 50.0).unwrap();
    let mut layer = Layer::new(LAYER);
    layer.models.push(Model::new(NodeId(10), Mat4::IDENTITY).with_subset(
        cube,
        Bounds::unit(),
        Material::Custom(CustomMaterial {
            instance: EffectInstance::new(NodeId(30), class),
        }),
    ));
    let scene = Scene::new().with_layer(layer);

    renderer.render_frame(&scene, &CompositeTarget::screen(256, 256));

    let data = renderer.layer_data(LAYER).unwrap();
    let prepared = data.prepared().unwrap();
    assert_eq!(prepared.transparent.len(), 1);
    assert!(prepared.opaque.is_empty());
    let blend = renderer.device().commands().iter().find_map(|command| match command {
        DeviceCommand::Draw { program, blend, .. } if program.as_deref() == Some("glow") => Some(*blend),
        _ => None,
    });
    assert!(blend.expect("glow draw").is_some());
}
