//! Runs effect command lists against the device.

use std::collections::HashMap;
use std::rc::Rc;

use glam::{Vec2, Vec4};

use crate::device::{
    with_render_target, with_viewport, Attachment, AttachmentTarget, BlendEquation, BlendFunction,
    BlendState, ClearFlags, DepthState, FramebufferStatus, Geometry, GraphicsDevice,
    ProgramHandle, RasterizerState, Rect, TextureHandle, TextureSampling, UniformValue,
};
use crate::error::RenderError;
use crate::renderer::resource_pool::ResourcePool;
use crate::renderer::shader::{ShaderCache, ShaderPropertyBundle};
use crate::scene::NodeId;

use super::class::{ClassKind, EffectClass, EffectRegistry};
use super::command::{EffectCommand, RenderState};
use super::context::EffectContext;
use super::instance::EffectInstance;
use super::property::PropertyValue;

/// Uniform the current source texture is bound to unless a command names
/// another one.
pub const SOURCE_TEXTURE: &str = "Texture0";

/// Everything an effect reads from the layer that runs it.
#[derive(Debug, Clone, Copy)]
pub struct EffectRenderArgs {
    pub input: TextureHandle,
    pub input_size: (u32, u32),
    pub clip_range: Vec2,
    /// Sampled depth of the layer, when one was rendered.
    pub depth: Option<TextureHandle>,
    pub frame: u32,
    pub quad: Geometry,
}

#[derive(Debug, Clone, Copy)]
struct Target {
    texture: TextureHandle,
    size: (u32, u32),
    clear: bool,
}

/// Interpreter state while one command list runs.
struct Run {
    program: Option<(ProgramHandle, Rc<ShaderPropertyBundle>)>,
    target: Option<Target>,
    output: Option<TextureHandle>,
    source: (TextureHandle, (u32, u32)),
}

fn scaled(size: (u32, u32), multiplier: f32) -> (u32, u32) {
    let scale = |v: u32| ((v as f32 * multiplier).ceil() as u32).max(1);
    (scale(size.0), scale(size.1))
}

fn size_info(size: (u32, u32)) -> UniformValue {
    UniformValue::Vec4(Vec4::new(size.0 as f32, size.1 as f32, 0.0, 1.0))
}

#[derive(Debug, Default)]
pub struct EffectSystem {
    registry: EffectRegistry,
    contexts: HashMap<NodeId, EffectContext>,
}

impl EffectSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    pub fn register_class(&mut self, class: EffectClass) -> Result<Rc<EffectClass>, RenderError> {
        self.registry.register(class)
    }

    pub fn create_instance(&self, class: &str, id: NodeId) -> Result<EffectInstance, RenderError> {
        self.registry.create_instance(class, id)
    }

    /// Forces the class programs to be rebuilt the next time they are bound.
    pub fn set_requires_compilation(&self, class: &str, value: bool) -> Result<(), RenderError> {
        self.registry.set_requires_compilation(class, value)
    }

    pub fn context(&self, id: NodeId) -> Option<&EffectContext> {
        self.contexts.get(&id)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn release_effect_context(
        &mut self,
        device: &mut dyn GraphicsDevice,
        pool: &mut ResourcePool,
        id: NodeId,
    ) {
        if let Some(mut context) = self.contexts.remove(&id) {
            context.release(device, pool);
        }
    }

    pub fn release_all(&mut self, device: &mut dyn GraphicsDevice, pool: &mut ResourcePool) {
        for (_, mut context) in self.contexts.drain() {
            context.release(device, pool);
        }
    }

    /// Applies `effects` in order, each reading the previous output.
    /// Intermediate outputs are released as soon as the next effect has
    /// consumed them. Returns the final output, owned by the caller, or
    /// `None` when no effect produced anything.
    pub fn render_chain<'a>(
        &mut self,
        device: &mut dyn GraphicsDevice,
        pool: &mut ResourcePool,
        shaders: &mut ShaderCache,
        effects: impl IntoIterator<Item = &'a EffectInstance>,
        args: &EffectRenderArgs,
    ) -> Option<TextureHandle> {
        let mut current = *args;
        let mut owned: Option<TextureHandle> = None;
        for instance in effects {
            match self.render_effect(device, pool, shaders, instance, &current) {
                Ok(output) => {
                    if let Some(previous) = owned.replace(output) {
                        pool.release_texture(previous);
                    }
                    current.input = output;
                    current.input_size = pool.texture_size(output).unwrap_or(current.input_size);
                }
                Err(err) => log::warn!("Effect {} skipped: {}", instance.class_name(), err),
            }
        }
        owned
    }

    /// Runs one effect over `args.input` and returns its output texture,
    /// which the caller must release.
    pub fn render_effect(
        &mut self,
        device: &mut dyn GraphicsDevice,
        pool: &mut ResourcePool,
        shaders: &mut ShaderCache,
        instance: &EffectInstance,
        args: &EffectRenderArgs,
    ) -> Result<TextureHandle, RenderError> {
        let class = Rc::clone(instance.class());
        if class.kind() != ClassKind::Effect {
            return Err(RenderError::UnsupportedFeature("custom material used as an effect"));
        }
        let context = self.contexts.entry(instance.id).or_default();
        context.begin_frame();

        let mut run = Run {
            program: None,
            target: None,
            output: None,
            source: (args.input, args.input_size),
        };
        device.set_depth_state(DepthState::DISABLED);
        device.set_blend_state(None);

        let mut result = Ok(());
        for command in class.commands() {
            if let Err(err) = execute(device, pool, shaders, context, &class, instance, args, &mut run, command) {
                log::warn!("{}: {} failed", class.name(), command.name());
                result = Err(err);
                break;
            }
        }
        device.set_blend_state(None);
        device.set_active_program(None);
        if class.requires_compilation() {
            class.set_requires_compilation(false);
        }

        match (result, run.output) {
            (Ok(()), Some(output)) => Ok(output),
            (Ok(()), None) => Err(RenderError::MissingTarget(class.name().to_string())),
            (Err(err), output) => {
                if let Some(output) = output {
                    pool.release_texture(output);
                }
                Err(err)
            }
        }
    }

    /// Program of a custom material instance, built from the first entry
    /// of its shader table.
    pub fn custom_material_program(
        &self,
        device: &mut dyn GraphicsDevice,
        shaders: &mut ShaderCache,
        instance: &EffectInstance,
    ) -> Option<ProgramHandle> {
        let class = instance.class();
        if !matches!(class.kind(), ClassKind::CustomMaterial { .. }) {
            log::warn!("{} is not a custom material", class.name());
            return None;
        }
        let Some(source) = class.shaders().first() else {
            log::warn!("Custom material {} has no shaders", class.name());
            return None;
        };
        let program = shaders.compile_program(device, source, class.requires_compilation());
        class.set_requires_compilation(false);
        program
    }

    /// Uploads one property of `instance`, or all of them for `None`.
    pub fn apply_instance_values(
        &self,
        device: &mut dyn GraphicsDevice,
        shaders: &mut ShaderCache,
        program: ProgramHandle,
        instance: &EffectInstance,
        property: Option<&str>,
    ) {
        let bundle = shaders.get_or_create_shader_entry(device, program);
        apply_instance(device, &bundle, instance, property);
    }
}

fn apply_instance(
    device: &mut dyn GraphicsDevice,
    bundle: &ShaderPropertyBundle,
    instance: &EffectInstance,
    property: Option<&str>,
) {
    let class = instance.class();
    let indices: Vec<usize> = match property {
        Some(name) => match class.property_index(name) {
            Some(index) => vec![index],
            None => {
                log::warn!("{} has no property {}", class.name(), name);
                return;
            }
        },
        None => (0..class.properties().len()).collect(),
    };

    for index in indices {
        let declaration = &class.properties()[index];
        let value = instance.property_at(index);
        match value {
            PropertyValue::DataBuffer(Some(buffer)) => {
                if !device.bind_storage_buffer(bundle.program(), &declaration.name, buffer) {
                    log::warn!("Program has no block {} for {}", declaration.name, class.name());
                }
            }
            PropertyValue::DataBuffer(None) => {}
            _ => {
                if let PropertyValue::Texture2D(Some(texture)) = value {
                    if let (Some(filter), Some(wrap)) = (declaration.filter, declaration.wrap) {
                        device.set_texture_sampling(texture, TextureSampling::new(filter, wrap));
                    }
                }
                if let Some(uniform) = value.to_uniform() {
                    bundle.set(device, &declaration.name, uniform);
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn execute(
    device: &mut dyn GraphicsDevice,
    pool: &mut ResourcePool,
    shaders: &mut ShaderCache,
    context: &mut EffectContext,
    class: &EffectClass,
    instance: &EffectInstance,
    args: &EffectRenderArgs,
    run: &mut Run,
    command: &EffectCommand,
) -> Result<(), RenderError> {
    match command {
        EffectCommand::AllocateBuffer {
            name,
            format,
            filter,
            wrap,
            size_multiplier,
            per_frame,
        } => {
            let size = scaled(args.input_size, *size_multiplier);
            let sampling = TextureSampling::new(*filter, *wrap);
            context
                .allocate_buffer(device, pool, name, *format, size, sampling, *per_frame)
                .ok_or_else(|| RenderError::creation(format!("effect buffer {name}")))?;
        }
        EffectCommand::AllocateImage {
            name,
            format,
            access,
            size_multiplier,
        } => {
            let size = scaled(args.input_size, *size_multiplier);
            context
                .allocate_image(device, pool, name, *format, size, *access)
                .ok_or_else(|| RenderError::creation(format!("effect image {name}")))?;
        }
        EffectCommand::AllocateDataBuffer {
            name,
            usage,
            size,
            per_frame,
        } => {
            context
                .allocate_data_buffer(device, name, *usage, *size, *per_frame)
                .ok_or_else(|| RenderError::creation(format!("effect data buffer {name}")))?;
        }
        EffectCommand::BindTarget { format } => {
            if let Some(previous) = run.output.take() {
                pool.release_texture(previous);
            }
            let (width, height) = args.input_size;
            let texture = pool
                .acquire_texture_2d(device, width, height, *format, 1, false)
                .ok_or_else(|| RenderError::creation("effect output"))?;
            run.output = Some(texture);
            run.target = Some(Target {
                texture,
                size: args.input_size,
                clear: true,
            });
        }
        EffectCommand::BindBuffer { name, needs_clear } => {
            let Some(buffer) = context.buffer(name) else {
                log::warn!("{}: BindBuffer names unknown buffer {}", class.name(), name);
                return Ok(());
            };
            run.target = Some(Target {
                texture: buffer.texture,
                size: buffer.size,
                clear: *needs_clear || buffer.needs_clear,
            });
            context.mark_cleared(name);
        }
        EffectCommand::BindShader { shader } => {
            let Some(source) = class.shader(shader) else {
                log::warn!("{}: no shader named {}", class.name(), shader);
                run.program = None;
                return Ok(());
            };
            let program = shaders
                .compile_program(device, source, class.requires_compilation())
                .ok_or_else(|| RenderError::ShaderCompile {
                    name: source.name.clone(),
                    log: "cached compile failure".to_string(),
                })?;
            device.set_active_program(Some(program));
            run.program = Some((program, shaders.get_or_create_shader_entry(device, program)));
        }
        EffectCommand::ApplyInstanceValue { property } => {
            if let Some((_, bundle)) = &run.program {
                apply_instance(device, bundle, instance, property.as_deref());
            }
        }
        EffectCommand::ApplyValue { property, value } => {
            let Some((_, bundle)) = &run.program else {
                return Ok(());
            };
            if let Some(index) = class.property_index(property) {
                let declared = class.properties()[index].ty;
                if declared != value.property_type() {
                    log::error!(
                        "{}: value for {} is {} but the property is {}; not applied",
                        class.name(),
                        property,
                        value.property_type().name(),
                        declared.name()
                    );
                    return Ok(());
                }
            }
            match value.to_uniform() {
                Some(uniform) => {
                    bundle.set(device, property, uniform);
                }
                None => {
                    if let PropertyValue::DataBuffer(Some(buffer)) = value {
                        device.bind_storage_buffer(bundle.program(), property, *buffer);
                    }
                }
            }
        }
        EffectCommand::ApplyBlending(blend) => {
            let state = blend.map(|(src, dst)| {
                BlendState::new(BlendFunction::uniform(src, dst), BlendEquation::Add)
            });
            device.set_blend_state(state);
        }
        EffectCommand::ApplyBufferValue { buffer, uniform } => {
            let (texture, size) = match buffer {
                Some(name) => {
                    context.clear_buffer_if_needed(device, pool, name);
                    match context.buffer(name) {
                        Some(buffer) => (buffer.texture, buffer.size),
                        None => {
                            log::warn!("{}: no buffer named {}", class.name(), name);
                            return Ok(());
                        }
                    }
                }
                None => (args.input, args.input_size),
            };
            match uniform {
                Some(uniform) => {
                    if let Some((_, bundle)) = &run.program {
                        bundle.set(device, uniform, UniformValue::Texture2D(Some(texture)));
                        bundle.set(device, &format!("{uniform}Info"), size_info(size));
                    }
                }
                None => run.source = (texture, size),
            }
        }
        EffectCommand::ApplyDepthValue { uniform } => {
            let Some((_, bundle)) = &run.program else {
                return Ok(());
            };
            if args.depth.is_none() {
                log::warn!("{}: layer has no depth texture for {}", class.name(), uniform);
            }
            bundle.set(device, uniform, UniformValue::Texture2D(args.depth));
        }
        EffectCommand::ApplyImageValue {
            image,
            uniform,
            as_texture,
        } => {
            let Some((_, bundle)) = &run.program else {
                return Ok(());
            };
            let Some(allocated) = context.image(image) else {
                log::warn!("{}: no image named {}", class.name(), image);
                return Ok(());
            };
            let value = if *as_texture {
                UniformValue::Texture2D(Some(allocated.texture))
            } else {
                UniformValue::Image2D(Some(allocated.image))
            };
            bundle.set(device, uniform, value);
        }
        EffectCommand::ApplyDataBufferValue { buffer, block } => {
            let Some((program, _)) = &run.program else {
                return Ok(());
            };
            context.clear_data_buffer_if_needed(device, buffer);
            let Some(allocated) = context.data_buffer(buffer) else {
                log::warn!("{}: no data buffer named {}", class.name(), buffer);
                return Ok(());
            };
            if !device.bind_storage_buffer(*program, block, allocated.buffer) {
                log::warn!("{}: program has no block {}", class.name(), block);
            }
        }
        EffectCommand::ApplyRenderState { state, enabled } => apply_render_state(device, *state, *enabled),
        EffectCommand::Render {
            needs_clear,
            indirect,
        } => {
            let Some((_, bundle)) = &run.program else {
                log::warn!("{}: Render without a bound shader", class.name());
                return Ok(());
            };
            let Some(target) = run.target else {
                return Err(RenderError::MissingTarget(class.name().to_string()));
            };
            let indirect = match indirect {
                Some(name) => match context.data_buffer(name) {
                    Some(buffer) => Some(buffer.buffer),
                    None => {
                        log::warn!("{}: no indirect buffer named {}", class.name(), name);
                        return Ok(());
                    }
                },
                None => None,
            };

            let fb = pool
                .acquire_frame_buffer(device)
                .ok_or_else(|| RenderError::creation("effect framebuffer"))?;
            device.attach(fb, Attachment::Color(0), Some(AttachmentTarget::Texture(target.texture)));
            let status = device.framebuffer_status(fb);
            if status != FramebufferStatus::Complete {
                pool.release_frame_buffer(device, fb);
                return Err(RenderError::FramebufferIncomplete {
                    pass: "effect",
                    status,
                });
            }

            let (source, source_size) = run.source;
            let viewport = Rect::from_size(target.size.0, target.size.1);
            with_render_target(device, Some(fb), |device| {
                with_viewport(device, viewport, |device| {
                    bundle.set(device, SOURCE_TEXTURE, UniformValue::Texture2D(Some(source)));
                    bundle.set(device, "Texture0Info", size_info(source_size));
                    bundle.set(
                        device,
                        "DestSize",
                        UniformValue::Vec2(Vec2::new(target.size.0 as f32, target.size.1 as f32)),
                    );
                    bundle.set(device, "CameraClipRange", UniformValue::Vec2(args.clip_range));
                    bundle.set(device, "AppFrame", UniformValue::Float(args.frame as f32));
                    if *needs_clear || target.clear {
                        device.clear(ClearFlags::COLOR, Vec4::ZERO, 1.0);
                    }
                    match indirect {
                        Some(buffer) => device.draw_indirect(&args.quad, buffer, 0),
                        None => device.draw(&args.quad),
                    }
                })
            });
            pool.release_frame_buffer(device, fb);

            if let Some(current) = run.target.as_mut() {
                current.clear = false;
            }
            run.source = (args.input, args.input_size);
        }
    }
    Ok(())
}

fn apply_render_state(device: &mut dyn GraphicsDevice, state: RenderState, enabled: bool) {
    match state {
        RenderState::Blend => {
            if !enabled {
                device.set_blend_state(None);
            } else if device.blend_state().is_none() {
                device.set_blend_state(Some(BlendState::new(
                    BlendFunction::uniform(wgpu::BlendFactor::One, wgpu::BlendFactor::OneMinusSrcAlpha),
                    BlendEquation::Add,
                )));
            }
        }
        RenderState::DepthTest => {
            let depth = device.depth_state();
            device.set_depth_state(DepthState { test: enabled, ..depth });
        }
        RenderState::DepthWrite => {
            let depth = device.depth_state();
            device.set_depth_state(DepthState { write: enabled, ..depth });
        }
        RenderState::Stencil => device.set_stencil_test(enabled),
        RenderState::CullFace => device.set_rasterizer_state(RasterizerState {
            cull: enabled.then_some(wgpu::Face::Back),
        }),
    }
}
