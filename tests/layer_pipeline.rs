use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec3};
use pretty_assertions::assert_eq;

use layer_render::device::{
    Capability, DeviceCommand, GraphicsDevice, HeadlessDevice, Rect, TextureDescriptor,
};
use layer_render::renderer::blend::{LayerBlendMode, MaterialBlendMode};
use layer_render::renderer::vertex::create_cube_geometry;
use layer_render::renderer::{
    CompositeTarget, LayerPass, RenderTask, RenderTaskQueue, RenderToTextureTask, Renderer,
};
use layer_render::scene::{
    Bounds, DefaultMaterial, Layer, LayerRect, Material, Model, MultisampleMode, NodeId,
    ProgressiveMode, Scene,
};
use layer_render::settings::RenderSettings;

const LAYER: NodeId = NodeId(1);

/// Canonical order every frame's passes must follow.
const PASS_ORDER: [LayerPass; 7] = [
    LayerPass::Shadow,
    LayerPass::Ao,
    LayerPass::DepthPrepass,
    LayerPass::Main,
    LayerPass::AaBlend,
    LayerPass::Effects,
    LayerPass::Composite,
];

fn renderer_with(device: HeadlessDevice) -> Renderer<HeadlessDevice> {
    Renderer::new(device, RenderSettings::default()).expect("renderer")
}

fn cube_layer(renderer: &mut Renderer<HeadlessDevice>, id: NodeId, material: DefaultMaterial) -> Layer {
    let cube = create_cube_geometry(renderer.device_mut(), 50.0).expect("cube geometry");
    let mut layer = Layer::new(id);
    layer.models.push(Model::new(NodeId(id.0 * 100), Mat4::IDENTITY).with_subset(
        cube,
        Bounds::new(Vec3::splat(-50.0), Vec3::splat(50.0)),
        Material::Default(material),
    ));
    layer
}

fn draw_viewports(commands: &[DeviceCommand], prefix: &str) -> Vec<Rect> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::Draw { program, viewport, .. }
                if program.as_deref().is_some_and(|name| name.starts_with(prefix)) =>
            {
                Some(*viewport)
            }
            _ => None,
        })
        .collect()
}

fn blit_count(commands: &[DeviceCommand]) -> usize {
    commands
        .iter()
        .filter(|command| matches!(command, DeviceCommand::Blit { .. }))
        .count()
}

fn is_ordered(events: &[LayerPass]) -> bool {
    let mut order = PASS_ORDER.iter();
    events.iter().all(|event| order.any(|pass| pass == event))
}

#[test]
fn ssaa_renders_oversized_and_downsamples_to_the_layer_size() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.multisample = MultisampleMode::Ssaa;
    let scene = Scene::new().with_layer(layer);

    renderer.render_frame(&scene, &CompositeTarget::screen(400, 300));

    let data = renderer.layer_data(LAYER).unwrap();
    assert_eq!(data.render_size(), (600, 450));
    assert_eq!(data.texture_size(), (400, 300));
    let output = data.output_texture().expect("layer output");
    assert_eq!(renderer.pool().texture_size(output), Some((400, 300)));

    let commands = renderer.device().commands();
    assert_eq!(draw_viewports(commands, "material_"), vec![Rect::from_size(600, 450)]);
    assert_eq!(draw_viewports(commands, "ssaa_downsample"), vec![Rect::from_size(400, 300)]);
}

#[test]
fn msaa_resolves_with_a_blit_and_falls_back_without_support() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.multisample = MultisampleMode::X4;
    let scene = Scene::new().with_layer(layer);
    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));
    assert_eq!(blit_count(renderer.device().commands()), 1);

    let without_msaa = Capability::ALL
        .into_iter()
        .filter(|capability| *capability != Capability::MultisampleTexture);
    let mut renderer = renderer_with(HeadlessDevice::with_capabilities(without_msaa));
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.multisample = MultisampleMode::X4;
    let scene = Scene::new().with_layer(layer);
    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));
    assert_eq!(blit_count(renderer.device().commands()), 0);
    assert_eq!(renderer.device().draws_with_program("material_"), 1);
}

#[test]
fn progressive_passes_climb_until_the_layer_is_cached() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.progressive = ProgressiveMode::X4;
    let mut scene = Scene::new().with_layer(layer);
    let target = CompositeTarget::screen(320, 240);

    renderer.render_frame(&scene, &target);
    let data = renderer.layer_data(LAYER).unwrap();
    assert_eq!(data.progressive_pass_index(), 1);
    assert!(!data.pass_events().contains(&LayerPass::AaBlend));
    scene.layer_mut(LAYER).unwrap().contents_dirty = false;

    let mut last = 1;
    for _ in 0..3 {
        renderer.render_frame(&scene, &target);
        let data = renderer.layer_data(LAYER).unwrap();
        assert!(data.progressive_pass_index() > last);
        last = data.progressive_pass_index();
        assert!(data.pass_events().contains(&LayerPass::AaBlend));
    }
    assert_eq!(last, 4);
    assert_eq!(renderer.device().draws_with_program("aa_blend"), 3);

    renderer.device_mut().take_commands();
    renderer.render_frame(&scene, &target);
    let data = renderer.layer_data(LAYER).unwrap();
    assert_eq!(data.pass_events(), &[LayerPass::Composite]);
    assert_eq!(renderer.device().draws_with_program("material_"), 0);

    scene.layer_mut(LAYER).unwrap().contents_dirty = true;
    renderer.render_frame(&scene, &target);
    let data = renderer.layer_data(LAYER).unwrap();
    assert_eq!(data.progressive_pass_index(), 1);
    assert!(data.pass_events().contains(&LayerPass::Main));
}

#[test]
fn temporal_aa_blends_from_the_second_frame() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.temporal_aa = true;
    let scene = Scene::new().with_layer(layer);
    let target = CompositeTarget::screen(320, 240);

    renderer.render_frame(&scene, &target);
    let first = renderer.layer_data(LAYER).unwrap().prepared().unwrap().jitter;
    assert!(!renderer.layer_data(LAYER).unwrap().pass_events().contains(&LayerPass::AaBlend));

    renderer.render_frame(&scene, &target);
    let data = renderer.layer_data(LAYER).unwrap();
    assert!(data.pass_events().contains(&LayerPass::AaBlend));
    assert_eq!(data.prepared().unwrap().blend_factors, Some(glam::Vec2::new(0.5, 0.5)));
    assert_ne!(data.prepared().unwrap().jitter, first);
}

#[test]
fn passes_follow_the_fixed_order() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.ao.strength = 100.0;
    layer.progressive = ProgressiveMode::X2;
    let mut scene = Scene::new().with_layer(layer);
    let target = CompositeTarget::screen(320, 240);

    for frame in 0..4 {
        renderer.render_frame(&scene, &target);
        let events = renderer.layer_data(LAYER).unwrap().pass_events().to_vec();
        assert!(is_ordered(&events), "frame {frame}: {events:?}");
        scene.layer_mut(LAYER).unwrap().contents_dirty = false;
    }
    // ambient occlusion renders only on the first progressive pass
    assert_eq!(renderer.device().draws_with_program("ssao"), 1);
}

#[test]
fn screen_composite_uses_the_layer_blend_function() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.blend_mode = LayerBlendMode::Multiply;
    let scene = Scene::new().with_layer(layer);

    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    let composite = renderer.device().commands().iter().find_map(|command| match command {
        DeviceCommand::Draw { program, blend, target, .. }
            if program.as_deref() == Some("layer_composite") =>
        {
            Some((*blend, *target))
        }
        _ => None,
    });
    let (blend, target) = composite.expect("composite draw");
    assert!(blend.is_some());
    assert_eq!(target, None);
}

#[test]
fn overlay_composite_falls_back_to_the_blend_shader() {
    let without_advanced = Capability::ALL
        .into_iter()
        .filter(|capability| *capability != Capability::AdvancedBlend);
    let mut renderer = renderer_with(HeadlessDevice::with_capabilities(without_advanced));
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.blend_mode = LayerBlendMode::Overlay;
    let scene = Scene::new().with_layer(layer);

    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    let device = renderer.device();
    assert_eq!(device.draws_with_program("advanced_blend_overlay"), 1);
    assert_eq!(device.draws_with_program("layer_composite"), 0);
    let background_copies = device
        .commands()
        .iter()
        .filter(|command| matches!(command, DeviceCommand::Blit { src: None, dst: Some(_), .. }))
        .count();
    assert_eq!(background_copies, 1);
}

#[test]
fn overlay_material_is_drawn_in_two_passes_without_hardware_blend() {
    let without_advanced = Capability::ALL
        .into_iter()
        .filter(|capability| *capability != Capability::AdvancedBlend);
    let mut renderer = renderer_with(HeadlessDevice::with_capabilities(without_advanced));
    let material = DefaultMaterial {
        blend_mode: MaterialBlendMode::Overlay,
        ..DefaultMaterial::default()
    };
    let layer = cube_layer(&mut renderer, LAYER, material);
    let scene = Scene::new().with_layer(layer);

    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    let data = renderer.layer_data(LAYER).unwrap();
    assert_eq!(data.prepared().unwrap().transparent.len(), 1);
    let device = renderer.device();
    assert_eq!(device.draws_with_program("material_"), 1);
    assert_eq!(device.draws_with_program("advanced_blend_overlay"), 1);
}

#[test]
fn full_size_texture_target_is_filled_by_a_blit() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    let scene = Scene::new().with_layer(layer.clone());

    let device = renderer.device_mut();
    let texture = device
        .create_texture_2d(&TextureDescriptor::new(256, 256, wgpu::TextureFormat::Rgba8Unorm))
        .unwrap();
    let fb = device.create_framebuffer().unwrap();
    device.attach(
        fb,
        layer_render::device::Attachment::Color(0),
        Some(layer_render::device::AttachmentTarget::Texture(texture)),
    );
    let target = CompositeTarget::texture(fb, 256, 256);

    renderer.render_frame(&scene, &target);
    assert_eq!(renderer.device().draws_with_program("layer_composite"), 0);
    assert!(renderer
        .device()
        .commands()
        .iter()
        .any(|command| matches!(command, DeviceCommand::Blit { dst: Some(dst), .. } if *dst == fb)));

    // a partial rect needs the quad so the rest of the target is kept
    let mut partial = layer;
    partial.rect = LayerRect::pixels(0.0, 0.0, 128.0, 128.0);
    let scene = Scene::new().with_layer(partial);
    renderer.device_mut().take_commands();
    renderer.render_frame(&scene, &target);
    assert_eq!(renderer.device().draws_with_program("layer_composite"), 1);
}

#[test]
fn render_plugin_replaces_the_layer_content() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let plugin = renderer
        .device_mut()
        .create_texture_2d(&TextureDescriptor::new(320, 240, wgpu::TextureFormat::Rgba8Unorm))
        .unwrap();
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.render_plugin = Some(plugin);
    let scene = Scene::new().with_layer(layer);

    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    let data = renderer.layer_data(LAYER).unwrap();
    assert_eq!(data.pass_events(), &[LayerPass::Composite]);
    assert_eq!(data.output_texture(), Some(plugin));
    assert_eq!(renderer.device().draws_with_program("material_"), 0);
}

#[test]
fn layers_without_area_or_camera_are_skipped() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let mut empty = cube_layer(&mut renderer, NodeId(1), DefaultMaterial::default());
    empty.rect = LayerRect::pixels(0.0, 0.0, 0.0, 100.0);
    let mut blind = cube_layer(&mut renderer, NodeId(2), DefaultMaterial::default());
    blind.camera = None;
    let scene = Scene::new().with_layer(empty).with_layer(blind);

    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    for id in [NodeId(1), NodeId(2)] {
        assert!(renderer.layer_data(id).unwrap().pass_events().is_empty());
    }
    assert_eq!(renderer.device().draw_count(), 0);
}

#[test]
fn allocation_failure_skips_the_frame_without_leaking() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    let scene = Scene::new().with_layer(layer);
    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    renderer.device_mut().failures_mut().texture_allocation = true;
    renderer.device_mut().take_commands();
    renderer.render_frame(&scene, &CompositeTarget::screen(500, 300));
    assert_eq!(renderer.device().draws_with_program("material_"), 0);
    assert_eq!(renderer.layer_data(LAYER).unwrap().output_texture(), None);

    renderer.device_mut().failures_mut().texture_allocation = false;
    renderer.render_frame(&scene, &CompositeTarget::screen(500, 300));
    assert_eq!(renderer.device().draws_with_program("material_"), 1);

    renderer.render_frame(&Scene::new(), &CompositeTarget::screen(500, 300));
    assert_eq!(renderer.pool().outstanding_references(), 0);
}

#[test]
fn render_task_renders_to_texture_without_compositing() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    let scene = Scene::new().with_layer(layer);

    let mut task = renderer.create_render_to_texture_task(LAYER);
    assert_eq!(task.output(), None);
    task.run(&mut renderer, &scene);

    let data = renderer.layer_data(LAYER).unwrap();
    assert_eq!(data.pass_events(), &[LayerPass::DepthPrepass, LayerPass::Main]);
    assert_eq!(task.output(), data.output_texture());
    assert!(task.output().is_some());
    assert_eq!(renderer.device().draws_with_program("layer_composite"), 0);
}

/// Notes which layer it was queued for, then renders it.
struct RecordingTask {
    inner: RenderToTextureTask,
    log: Rc<RefCell<Vec<NodeId>>>,
}

impl RenderTask<HeadlessDevice> for RecordingTask {
    fn run(&mut self, renderer: &mut Renderer<HeadlessDevice>, scene: &Scene) {
        self.log.borrow_mut().push(self.inner.layer());
        self.inner.run(renderer, scene);
    }
}

#[test]
fn task_queue_runs_in_submission_order() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let first = cube_layer(&mut renderer, NodeId(1), DefaultMaterial::default());
    let second = cube_layer(&mut renderer, NodeId(2), DefaultMaterial::default());
    let scene = Scene::new().with_layer(first).with_layer(second);

    let log = Rc::new(RefCell::new(Vec::new()));
    let mut queue = RenderTaskQueue::new();
    for id in [NodeId(2), NodeId(1)] {
        queue.push(Box::new(RecordingTask {
            inner: renderer.create_render_to_texture_task(id),
            log: Rc::clone(&log),
        }));
    }
    assert_eq!(queue.len(), 2);
    queue.run_all(&mut renderer, &scene);

    assert!(queue.is_empty());
    assert_eq!(*log.borrow(), vec![NodeId(2), NodeId(1)]);
    assert_eq!(renderer.device().draws_with_program("material_"), 2);
    for id in [NodeId(1), NodeId(2)] {
        assert!(renderer.layer_data(id).unwrap().pass_events().contains(&LayerPass::Main));
    }
}

#[test]
fn release_layer_and_shutdown_free_every_device_resource() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    let scene = Scene::new().with_layer(layer);
    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));
    assert!(renderer.pool().outstanding_references() > 0);

    renderer.release_layer(LAYER);
    assert!(renderer.layer_data(LAYER).is_none());
    assert_eq!(renderer.pool().outstanding_references(), 0);

    renderer.shutdown();
    let device = renderer.device();
    assert_eq!(device.live_texture_count(), 0);
    assert_eq!(device.live_framebuffer_count(), 0);
    assert_eq!(device.live_program_count(), 0);
}

#[test]
fn switching_antialiasing_off_shows_the_fresh_render() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let mut layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    layer.progressive = ProgressiveMode::X4;
    let mut scene = Scene::new().with_layer(layer);
    let target = CompositeTarget::screen(320, 240);
    for _ in 0..3 {
        renderer.render_frame(&scene, &target);
    }
    let accumulated = renderer.layer_data(LAYER).unwrap().output_texture();
    let refs_accumulating = renderer.pool().outstanding_references();
    assert!(accumulated.is_some());

    let layer = scene.layer_mut(LAYER).unwrap();
    layer.progressive = ProgressiveMode::None;
    layer.contents_dirty = true;
    for _ in 0..3 {
        renderer.render_frame(&scene, &target);
        let data = renderer.layer_data(LAYER).unwrap();
        assert!(data.pass_events().contains(&LayerPass::Main));
        assert!(!data.pass_events().contains(&LayerPass::AaBlend));
        assert!(data.output_texture().is_some());
        assert_ne!(data.output_texture(), accumulated);
    }
    assert_eq!(renderer.pool().outstanding_references(), refs_accumulating - 1);
}

#[test]
fn hidden_layer_releases_its_render_targets() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    let mut scene = Scene::new().with_layer(layer);
    let target = CompositeTarget::screen(320, 240);
    renderer.render_frame(&scene, &target);
    assert!(renderer.pool().outstanding_references() > 0);

    scene.layer_mut(LAYER).unwrap().visible = false;
    for _ in 0..3 {
        renderer.render_frame(&scene, &target);
        assert!(renderer.layer_data(LAYER).is_none());
        assert_eq!(renderer.pool().outstanding_references(), 0);
    }

    // showing it again rebuilds the chain from scratch
    scene.layer_mut(LAYER).unwrap().visible = true;
    renderer.render_frame(&scene, &target);
    assert!(renderer.layer_data(LAYER).unwrap().pass_events().contains(&LayerPass::Composite));
}

#[test]
fn layer_that_loses_its_camera_releases_its_render_targets() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    let mut scene = Scene::new().with_layer(layer);
    let target = CompositeTarget::screen(320, 240);
    renderer.render_frame(&scene, &target);
    assert!(renderer.layer_data(LAYER).unwrap().output_texture().is_some());

    scene.layer_mut(LAYER).unwrap().camera = None;
    renderer.render_frame(&scene, &target);

    let data = renderer.layer_data(LAYER).unwrap();
    assert!(data.pass_events().is_empty());
    assert_eq!(data.output_texture(), None);
    assert_eq!(renderer.pool().outstanding_references(), 0);
}

#[test]
fn pass_state_is_scoped_to_each_draw() {
    let mut renderer = renderer_with(HeadlessDevice::new());
    let layer = cube_layer(&mut renderer, LAYER, DefaultMaterial::default());
    let scene = Scene::new().with_layer(layer);
    renderer.render_frame(&scene, &CompositeTarget::screen(320, 240));

    let writes: Vec<(String, bool)> = renderer
        .device()
        .commands()
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::Draw { program: Some(name), color_writes, .. } => Some((name.clone(), *color_writes)),
            _ => None,
        })
        .collect();
    assert!(writes.iter().any(|(name, on)| name == "depth_prepass" && !on));
    assert!(writes.iter().filter(|(name, _)| name != "depth_prepass").all(|(_, on)| *on));

    let device = renderer.device();
    assert!(device.color_writes());
    assert_eq!(device.blend_state(), None);
    assert_eq!(device.scissor(), None);
}
