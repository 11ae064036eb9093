use glam::{Mat4, Vec3};

use layer_render::device::{DeviceCommand, HeadlessDevice};
use layer_render::renderer::shader::ShaderFeatureSet;
use layer_render::renderer::shadows::ShadowMapKind;
use layer_render::renderer::vertex::create_cube_geometry;
use layer_render::renderer::{CompositeTarget, LayerPass, Renderer};
use layer_render::scene::{Bounds, DefaultMaterial, Layer, Light, Material, Model, NodeId, Scene};
use layer_render::settings::RenderSettings;

const LAYER: NodeId = NodeId(1);

fn renderer(settings: RenderSettings) -> Renderer<HeadlessDevice> {
    Renderer::new(HeadlessDevice::new(), settings).expect("renderer")
}

fn lit_cube_scene(renderer: &mut Renderer<HeadlessDevice>, light: Light) -> Scene {
    let cube = create_cube_geometry(renderer.device_mut(), 50.0).expect("cube geometry");
    let mut layer = Layer::new(LAYER);
    layer.lights.push(light);
    layer.models.push(Model::new(NodeId(10), Mat4::IDENTITY).with_subset(
        cube,
        Bounds::new(Vec3::splat(-50.0), Vec3::splat(50.0)),
        Material::Default(DefaultMaterial::default()),
    ));
    Scene::new().with_layer(layer)
}

fn shadow_light(light: Light) -> Light {
    Light {
        cast_shadow: true,
        ..light
    }
}

/// Shadow-map texture coordinates of `world_pos`, origin top-left.
fn project_shadow_cpu(matrix: Mat4, world_pos: Vec3) -> Vec3 {
    let ndc = matrix.project_point3(world_pos);
    Vec3::new(ndc.x * 0.5 + 0.5, -ndc.y * 0.5 + 0.5, ndc.z)
}

fn first_draw_index(commands: &[DeviceCommand], prefix: &str) -> Option<usize> {
    commands.iter().position(|command| match command {
        DeviceCommand::Draw { program, .. } => program.as_deref().is_some_and(|name| name.starts_with(prefix)),
        _ => false,
    })
}

#[test]
fn directional_shadow_renders_and_blurs_before_the_main_pass() {
    let mut renderer = renderer(RenderSettings::default());
    let light = shadow_light(Light::directional(NodeId(2), Vec3::new(0.3, -1.0, -0.4)));
    let scene = lit_cube_scene(&mut renderer, light);

    renderer.render_frame(&scene, &CompositeTarget::screen(640, 480));

    let data = renderer.layer_data(LAYER).expect("layer data");
    assert_eq!(
        data.pass_events(),
        &[LayerPass::Shadow, LayerPass::DepthPrepass, LayerPass::Main, LayerPass::Composite]
    );
    let entries = data.shadow_maps().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, ShadowMapKind::Directional);
    assert_eq!(entries[0].size, 1024);
    let prepared = data.prepared().expect("prepared layer");
    assert!(prepared.features.contains(ShaderFeatureSet::SSM));

    let device = renderer.device();
    assert_eq!(device.draws_with_program("orthographic_shadow"), 1);
    assert_eq!(device.draws_with_program("shadow_blur_x"), 1);
    assert_eq!(device.draws_with_program("shadow_blur_y"), 1);
    assert_eq!(device.draws_with_program("material_"), 1);

    let commands = device.commands();
    let shadow = first_draw_index(commands, "orthographic_shadow").unwrap();
    let blur = first_draw_index(commands, "shadow_blur_y").unwrap();
    let main = first_draw_index(commands, "material_").unwrap();
    assert!(shadow < blur && blur < main);
}

#[test]
fn caster_projects_inside_the_fitted_shadow_map() {
    let mut renderer = renderer(RenderSettings::default());
    let light = shadow_light(Light::directional(NodeId(2), Vec3::new(0.0, -1.0, -1.0)));
    let scene = lit_cube_scene(&mut renderer, light);
    renderer.render_frame(&scene, &CompositeTarget::screen(640, 480));

    let entry = &renderer.layer_data(LAYER).unwrap().shadow_maps().entries()[0];
    for corner in [Vec3::ZERO, Vec3::splat(50.0), Vec3::splat(-50.0)] {
        let uvz = project_shadow_cpu(entry.view_proj, corner);
        assert!((0.0..=1.0).contains(&uvz.x), "{corner:?} -> {uvz:?}");
        assert!((0.0..=1.0).contains(&uvz.y), "{corner:?} -> {uvz:?}");
        assert!((-1.0..=1.0).contains(&uvz.z), "{corner:?} -> {uvz:?}");
    }
}

#[test]
fn point_light_renders_all_six_cube_faces() {
    let mut renderer = renderer(RenderSettings::default());
    let mut light = shadow_light(Light::point(NodeId(2), Vec3::new(0.0, 200.0, 0.0)));
    light.shadow_map_size = 256;
    let scene = lit_cube_scene(&mut renderer, light);

    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    let entry = &renderer.layer_data(LAYER).unwrap().shadow_maps().entries()[0];
    assert_eq!(entry.kind, ShadowMapKind::Cube);
    assert_eq!(entry.size, 256);
    assert_eq!(entry.position, Vec3::new(0.0, 200.0, 0.0));

    let device = renderer.device();
    assert_eq!(device.draws_with_program("cube_shadow"), 6);
    assert_eq!(device.draws_with_program("cube_blur_x"), 1);
    assert_eq!(device.draws_with_program("cube_blur_y"), 1);
}

#[test]
fn disabled_shadow_mapping_skips_the_pass() {
    let settings = RenderSettings {
        shadow_mapping_enabled: false,
        ..RenderSettings::default()
    };
    let mut renderer = renderer(settings);
    let light = shadow_light(Light::directional(NodeId(2), Vec3::NEG_Y));
    let scene = lit_cube_scene(&mut renderer, light);

    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    let data = renderer.layer_data(LAYER).unwrap();
    assert!(!data.pass_events().contains(&LayerPass::Shadow));
    assert!(data.shadow_maps().entries().is_empty());
    assert!(!data.prepared().unwrap().features.contains(ShaderFeatureSet::SSM));
    assert_eq!(renderer.device().draws_with_program("orthographic_shadow"), 0);
}

#[test]
fn shadow_maps_follow_the_light_list() {
    let mut renderer = renderer(RenderSettings::default());
    let light = shadow_light(Light::directional(NodeId(2), Vec3::NEG_Y));
    let mut scene = lit_cube_scene(&mut renderer, light);
    let target = CompositeTarget::screen(320, 240);

    renderer.render_frame(&scene, &target);
    assert_eq!(renderer.layer_data(LAYER).unwrap().shadow_maps().entries().len(), 1);

    scene.layer_mut(LAYER).unwrap().lights[0].cast_shadow = false;
    renderer.render_frame(&scene, &target);
    assert!(renderer.layer_data(LAYER).unwrap().shadow_maps().entries().is_empty());

    // removing the layer returns every pooled resource
    renderer.render_frame(&Scene::new(), &target);
    assert!(renderer.layer_data(LAYER).is_none());
    assert_eq!(renderer.pool().outstanding_references(), 0);
}
