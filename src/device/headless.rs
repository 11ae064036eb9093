//! In-memory device that records what the pipeline asks of it.
//!
//! Nothing is rasterised. Resources are bookkept so leaks, reuse and
//! framebuffer completeness can be checked, uniforms are reflected from the
//! GLSL handed to `create_program`, and draws/clears/blits are appended to a
//! command log that tests inspect.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use glam::Vec4;

use super::{
    Attachment, AttachmentTarget, BlendState, BufferDescriptor, BufferHandle, Capability,
    ClearFlags, DepthState, FramebufferHandle, FramebufferStatus, Geometry, GraphicsDevice,
    ImageAccess, ImageHandle, ProgramHandle, ProgramSource, RasterizerState, Rect,
    RenderbufferHandle, TextureDescriptor, TextureHandle, TextureSampling, UniformInfo,
    UniformLocation, UniformType, UniformValue,
};

/// Failures the headless device can be told to produce.
#[derive(Debug, Clone, Default)]
pub struct FailureInjection {
    pub texture_allocation: bool,
    pub framebuffer_incomplete: bool,
    /// Programs whose name contains one of these fragments fail to link.
    pub program_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Clear {
        target: Option<FramebufferHandle>,
        flags: ClearFlags,
        color: Vec4,
    },
    Draw {
        target: Option<FramebufferHandle>,
        program: Option<String>,
        count: u32,
        blend: Option<BlendState>,
        depth: DepthState,
        color_writes: bool,
        viewport: Rect,
    },
    DrawIndirect {
        target: Option<FramebufferHandle>,
        program: Option<String>,
        buffer: BufferHandle,
    },
    Blit {
        src: Option<FramebufferHandle>,
        dst: Option<FramebufferHandle>,
        src_rect: Rect,
        dst_rect: Rect,
        filter: wgpu::FilterMode,
    },
    Unsupported {
        method: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
enum TextureShape {
    Flat(TextureDescriptor),
    Cube { size: u32, format: wgpu::TextureFormat },
}

#[derive(Debug, Clone, Copy)]
struct HeadlessTexture {
    shape: TextureShape,
    sampling: TextureSampling,
}

#[derive(Debug, Clone, Copy)]
struct HeadlessRenderbuffer {
    width: u32,
    height: u32,
}

#[derive(Debug)]
struct HeadlessProgram {
    name: String,
    uniforms: BTreeMap<String, UniformInfo>,
    blocks: BTreeSet<String>,
    values: HashMap<UniformLocation, UniformValue>,
    bound_blocks: HashMap<String, BufferHandle>,
}

#[derive(Debug, Clone, Copy)]
struct PipelineState {
    target: Option<FramebufferHandle>,
    program: Option<ProgramHandle>,
    blend: Option<BlendState>,
    depth: DepthState,
    color_writes: bool,
    rasterizer: RasterizerState,
    stencil_test: bool,
    viewport: Rect,
    scissor: Option<Rect>,
}

pub struct HeadlessDevice {
    capabilities: HashSet<Capability>,
    max_texture_size: u32,
    max_samples: u32,
    next_id: u32,
    buffers: HashMap<BufferHandle, (BufferDescriptor, Vec<u8>)>,
    textures: HashMap<TextureHandle, HeadlessTexture>,
    images: HashMap<ImageHandle, TextureHandle>,
    renderbuffers: HashMap<RenderbufferHandle, HeadlessRenderbuffer>,
    framebuffers: HashMap<FramebufferHandle, BTreeMap<Attachment, AttachmentTarget>>,
    programs: HashMap<ProgramHandle, HeadlessProgram>,
    state: PipelineState,
    commands: Vec<DeviceCommand>,
    failures: FailureInjection,
}

impl HeadlessDevice {
    /// A device that reports every capability.
    pub fn new() -> Self {
        Self::with_capabilities(Capability::ALL)
    }

    pub fn with_capabilities(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            max_texture_size: 8192,
            max_samples: 8,
            next_id: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            images: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            state: PipelineState {
                target: None,
                program: None,
                blend: None,
                depth: DepthState::default(),
                color_writes: true,
                rasterizer: RasterizerState::default(),
                stencil_test: false,
                viewport: Rect::from_size(1, 1),
                scissor: None,
            },
            commands: Vec::new(),
            failures: FailureInjection::default(),
        }
    }

    pub fn set_capability(&mut self, capability: Capability, enabled: bool) {
        if enabled {
            self.capabilities.insert(capability);
        } else {
            self.capabilities.remove(&capability);
        }
    }

    pub fn failures_mut(&mut self) -> &mut FailureInjection {
        &mut self.failures
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|cmd| matches!(cmd, DeviceCommand::Draw { .. } | DeviceCommand::DrawIndirect { .. }))
            .count()
    }

    /// Number of draws issued with a program whose name starts with `prefix`.
    pub fn draws_with_program(&self, prefix: &str) -> usize {
        self.commands
            .iter()
            .filter(|cmd| match cmd {
                DeviceCommand::Draw { program, .. } | DeviceCommand::DrawIndirect { program, .. } => {
                    program.as_deref().is_some_and(|name| name.starts_with(prefix))
                }
                _ => false,
            })
            .count()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn is_texture_alive(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        match self.textures.get(&texture)?.shape {
            TextureShape::Flat(desc) => Some(desc),
            TextureShape::Cube { size, format } => Some(TextureDescriptor::new(size, size, format)),
        }
    }

    pub fn texture_sampling(&self, texture: TextureHandle) -> Option<TextureSampling> {
        self.textures.get(&texture).map(|tex| tex.sampling)
    }

    pub fn program_name(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(&program).map(|prog| prog.name.as_str())
    }

    pub fn uniform_value(&self, program: ProgramHandle, name: &str) -> Option<UniformValue> {
        let prog = self.programs.get(&program)?;
        let info = prog.uniforms.get(name)?;
        prog.values.get(&info.location).copied()
    }

    pub fn bound_constant_buffer(&self, program: ProgramHandle, block: &str) -> Option<BufferHandle> {
        self.programs.get(&program)?.bound_blocks.get(block).copied()
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|(_, data)| data.as_slice())
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn unsupported(&mut self, method: &'static str) {
        log::warn!("Unsupported method {} on this device; ignoring", method);
        self.commands.push(DeviceCommand::Unsupported { method });
    }

    fn program_label(&self) -> Option<String> {
        self.state
            .program
            .and_then(|program| self.programs.get(&program))
            .map(|prog| prog.name.clone())
    }

    fn attachment_size(&self, target: &AttachmentTarget) -> Option<(u32, u32)> {
        match target {
            AttachmentTarget::Texture(texture) => match self.textures.get(texture)?.shape {
                TextureShape::Flat(desc) => Some((desc.width, desc.height)),
                TextureShape::Cube { .. } => None,
            },
            AttachmentTarget::CubeFace(texture, _) => match self.textures.get(texture)?.shape {
                TextureShape::Cube { size, .. } => Some((size, size)),
                TextureShape::Flat(_) => None,
            },
            AttachmentTarget::Renderbuffer(rb) => {
                self.renderbuffers.get(rb).map(|rb| (rb.width, rb.height))
            }
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn max_samples(&self) -> u32 {
        if self.has_capability(Capability::MultisampleTexture) {
            self.max_samples
        } else {
            1
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor, data: Option<&[u8]>) -> Option<BufferHandle> {
        let needs_storage = matches!(desc.usage, super::BufferUsage::Storage);
        if needs_storage && !self.has_capability(Capability::StorageBuffer) {
            self.unsupported("create_buffer(storage)");
            return None;
        }
        let mut contents = vec![0u8; desc.size];
        if let Some(data) = data {
            let len = data.len().min(contents.len());
            contents[..len].copy_from_slice(&data[..len]);
        }
        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(handle, (*desc, contents));
        Some(handle)
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]) {
        let Some((desc, contents)) = self.buffers.get_mut(&buffer) else {
            log::warn!("update_buffer on unknown buffer {:?}", buffer);
            return;
        };
        let end = offset + data.len();
        if end > contents.len() {
            if !desc.dynamic {
                log::warn!(
                    "update_buffer overflows buffer {:?} ({} > {} bytes)",
                    buffer,
                    end,
                    contents.len()
                );
                return;
            }
            contents.resize(end, 0);
            desc.size = end;
        }
        contents[offset..end].copy_from_slice(data);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn create_texture_2d(&mut self, desc: &TextureDescriptor) -> Option<TextureHandle> {
        if self.failures.texture_allocation {
            return None;
        }
        if desc.width == 0 || desc.height == 0 {
            return None;
        }
        if desc.width > self.max_texture_size || desc.height > self.max_texture_size {
            log::warn!(
                "Texture {}x{} exceeds max size {}",
                desc.width,
                desc.height,
                self.max_texture_size
            );
            return None;
        }
        if desc.sample_count > 1 && !self.has_capability(Capability::MultisampleTexture) {
            self.unsupported("create_texture_2d(multisample)");
            return None;
        }
        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(
            handle,
            HeadlessTexture {
                shape: TextureShape::Flat(*desc),
                sampling: TextureSampling::LINEAR_CLAMP,
            },
        );
        Some(handle)
    }

    fn create_texture_cube(&mut self, size: u32, format: wgpu::TextureFormat) -> Option<TextureHandle> {
        if self.failures.texture_allocation || size == 0 || size > self.max_texture_size {
            return None;
        }
        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(
            handle,
            HeadlessTexture {
                shape: TextureShape::Cube { size, format },
                sampling: TextureSampling::LINEAR_CLAMP,
            },
        );
        Some(handle)
    }

    fn set_texture_sampling(&mut self, texture: TextureHandle, sampling: TextureSampling) {
        if let Some(tex) = self.textures.get_mut(&texture) {
            tex.sampling = sampling;
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_none() {
            log::warn!("destroy_texture on unknown texture {:?}", texture);
        }
        self.images.retain(|_, owner| *owner != texture);
    }

    fn create_image_2d(
        &mut self,
        texture: TextureHandle,
        _mip_level: u32,
        _access: ImageAccess,
    ) -> Option<ImageHandle> {
        if !self.has_capability(Capability::ShaderImageLoadStore) {
            self.unsupported("create_image_2d");
            return None;
        }
        if !self.textures.contains_key(&texture) {
            return None;
        }
        let handle = ImageHandle(self.allocate_id());
        self.images.insert(handle, texture);
        Some(handle)
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.images.remove(&image);
    }

    fn create_renderbuffer(
        &mut self,
        width: u32,
        height: u32,
        _format: wgpu::TextureFormat,
        sample_count: u32,
    ) -> Option<RenderbufferHandle> {
        if width == 0 || height == 0 || sample_count > self.max_samples() {
            return None;
        }
        let handle = RenderbufferHandle(self.allocate_id());
        self.renderbuffers
            .insert(handle, HeadlessRenderbuffer { width, height });
        Some(handle)
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.renderbuffers.remove(&renderbuffer);
    }

    fn create_framebuffer(&mut self) -> Option<FramebufferHandle> {
        let handle = FramebufferHandle(self.allocate_id());
        self.framebuffers.insert(handle, BTreeMap::new());
        Some(handle)
    }

    fn attach(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        target: Option<AttachmentTarget>,
    ) {
        let Some(attachments) = self.framebuffers.get_mut(&framebuffer) else {
            log::warn!("attach on unknown framebuffer {:?}", framebuffer);
            return;
        };
        match target {
            Some(target) => {
                attachments.insert(attachment, target);
            }
            None => {
                attachments.remove(&attachment);
            }
        }
    }

    fn framebuffer_status(&mut self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        if self.failures.framebuffer_incomplete {
            return FramebufferStatus::IncompleteAttachment;
        }
        let Some(attachments) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Unsupported;
        };
        if attachments.is_empty() {
            return FramebufferStatus::MissingAttachment;
        }
        let mut size = None;
        for target in attachments.values() {
            let Some(dims) = self.attachment_size(target) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            match size {
                None => size = Some(dims),
                Some(existing) if existing != dims => {
                    return FramebufferStatus::IncompleteDimensions;
                }
                Some(_) => {}
            }
        }
        FramebufferStatus::Complete
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
        if self.state.target == Some(framebuffer) {
            self.state.target = None;
        }
    }

    fn render_target(&self) -> Option<FramebufferHandle> {
        self.state.target
    }

    fn set_render_target(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.target = framebuffer;
    }

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramHandle, String> {
        if self
            .failures
            .program_names
            .iter()
            .any(|fragment| source.name.contains(fragment.as_str()))
        {
            return Err(format!("{}: injected link failure", source.name));
        }
        for (stage, text) in [("vertex", &source.vertex), ("fragment", &source.fragment)] {
            if !text.contains("void main") {
                return Err(format!("{} {} stage has no entry point", source.name, stage));
            }
        }

        let (uniforms, blocks) = reflect_program(&[source.vertex.as_str(), source.fragment.as_str()]);
        let handle = ProgramHandle(self.allocate_id());
        self.programs.insert(
            handle,
            HeadlessProgram {
                name: source.name.clone(),
                uniforms,
                blocks,
                values: HashMap::new(),
                bound_blocks: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn active_program(&self) -> Option<ProgramHandle> {
        self.state.program
    }

    fn set_active_program(&mut self, program: Option<ProgramHandle>) {
        self.state.program = program;
    }

    fn uniform_info(&self, program: ProgramHandle, name: &str) -> Option<UniformInfo> {
        self.programs.get(&program)?.uniforms.get(name).copied()
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: &UniformValue) {
        let Some(prog) = self.programs.get_mut(&program) else {
            log::warn!("set_uniform on unknown program {:?}", program);
            return;
        };
        let declared = prog
            .uniforms
            .values()
            .find(|info| info.location == location)
            .map(|info| info.ty);
        match declared {
            Some(ty) if ty == value.uniform_type() => {
                prog.values.insert(location, *value);
            }
            Some(ty) => log::warn!(
                "Uniform at {:?} in {} is {} but was set as {}",
                location,
                prog.name,
                ty.name(),
                value.uniform_type().name()
            ),
            None => log::warn!("Unknown uniform location {:?} in {}", location, prog.name),
        }
    }

    fn bind_constant_buffer(&mut self, program: ProgramHandle, block: &str, buffer: BufferHandle) -> bool {
        if !self.has_capability(Capability::ConstantBuffer) {
            self.unsupported("bind_constant_buffer");
            return false;
        }
        let Some(prog) = self.programs.get_mut(&program) else {
            return false;
        };
        if !prog.blocks.contains(block) {
            return false;
        }
        prog.bound_blocks.insert(block.to_string(), buffer);
        true
    }

    fn bind_storage_buffer(&mut self, program: ProgramHandle, block: &str, buffer: BufferHandle) -> bool {
        if !self.has_capability(Capability::StorageBuffer) {
            self.unsupported("bind_storage_buffer");
            return false;
        }
        let Some(prog) = self.programs.get_mut(&program) else {
            return false;
        };
        if !prog.blocks.contains(block) {
            return false;
        }
        prog.bound_blocks.insert(block.to_string(), buffer);
        true
    }

    fn blend_state(&self) -> Option<BlendState> {
        self.state.blend
    }

    fn set_blend_state(&mut self, state: Option<BlendState>) {
        let advanced = state.is_some_and(|blend| blend.equation.is_advanced());
        if advanced && !self.has_capability(Capability::AdvancedBlend) {
            self.unsupported("set_blend_state(advanced equation)");
            return;
        }
        self.state.blend = state;
    }

    fn depth_state(&self) -> DepthState {
        self.state.depth
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.state.depth = state;
    }

    fn color_writes(&self) -> bool {
        self.state.color_writes
    }

    fn set_color_writes(&mut self, enabled: bool) {
        self.state.color_writes = enabled;
    }

    fn rasterizer_state(&self) -> RasterizerState {
        self.state.rasterizer
    }

    fn set_rasterizer_state(&mut self, state: RasterizerState) {
        self.state.rasterizer = state;
    }

    fn stencil_test(&self) -> bool {
        self.state.stencil_test
    }

    fn set_stencil_test(&mut self, enabled: bool) {
        self.state.stencil_test = enabled;
    }

    fn viewport(&self) -> Rect {
        self.state.viewport
    }

    fn set_viewport(&mut self, viewport: Rect) {
        self.state.viewport = viewport;
    }

    fn scissor(&self) -> Option<Rect> {
        self.state.scissor
    }

    fn set_scissor(&mut self, scissor: Option<Rect>) {
        self.state.scissor = scissor;
    }

    fn clear(&mut self, flags: ClearFlags, color: Vec4, _depth: f32) {
        self.commands.push(DeviceCommand::Clear {
            target: self.state.target,
            flags,
            color,
        });
    }

    fn draw(&mut self, geometry: &Geometry) {
        if geometry.count == 0 {
            return;
        }
        self.commands.push(DeviceCommand::Draw {
            target: self.state.target,
            program: self.program_label(),
            count: geometry.count,
            blend: self.state.blend,
            depth: self.state.depth,
            color_writes: self.state.color_writes,
            viewport: self.state.viewport,
        });
    }

    fn draw_indirect(&mut self, _geometry: &Geometry, buffer: BufferHandle, _offset: usize) {
        if !self.has_capability(Capability::IndirectDraw) {
            self.unsupported("draw_indirect");
            return;
        }
        self.commands.push(DeviceCommand::DrawIndirect {
            target: self.state.target,
            program: self.program_label(),
            buffer,
        });
    }

    fn memory_barrier(&mut self) {
        if !self.has_capability(Capability::ShaderImageLoadStore) {
            self.unsupported("memory_barrier");
        }
    }

    fn blit_framebuffer(
        &mut self,
        src: Option<FramebufferHandle>,
        src_rect: Rect,
        dst: Option<FramebufferHandle>,
        dst_rect: Rect,
        filter: wgpu::FilterMode,
    ) {
        self.commands.push(DeviceCommand::Blit {
            src,
            dst,
            src_rect,
            dst_rect,
            filter,
        });
    }

    fn read_pixels(&mut self, rect: Rect, out: &mut [u8]) -> bool {
        let needed = rect.width as usize * rect.height as usize * 4;
        if out.len() < needed {
            return false;
        }
        out[..needed].fill(0);
        true
    }
}

/// Collects uniform names (with struct members and array elements expanded)
/// and uniform/storage block names from GLSL sources.
fn reflect_program(sources: &[&str]) -> (BTreeMap<String, UniformInfo>, BTreeSet<String>) {
    let mut structs: HashMap<String, Vec<Declaration>> = HashMap::new();
    let mut uniforms = BTreeMap::new();
    let mut blocks = BTreeSet::new();
    let mut next_location = 0i32;

    let mut register = |uniforms: &mut BTreeMap<String, UniformInfo>, name: String, ty: UniformType| {
        if uniforms.contains_key(&name) {
            return;
        }
        uniforms.insert(
            name,
            UniformInfo {
                location: UniformLocation(next_location),
                ty,
            },
        );
        next_location += 1;
    };

    for source in sources {
        let mut lines = source.lines().map(str::trim);
        while let Some(line) = lines.next() {
            if let Some(rest) = line.strip_prefix("struct ") {
                let name = rest.trim_end_matches('{').trim().to_string();
                let mut fields = Vec::new();
                for field in lines.by_ref() {
                    if field.starts_with('}') {
                        break;
                    }
                    if let Some(decl) = parse_declaration(field) {
                        fields.push(decl);
                    }
                }
                structs.insert(name, fields);
                continue;
            }

            let line = strip_layout(line);
            let (is_block_keyword, rest) = if let Some(rest) = line.strip_prefix("uniform ") {
                (false, rest)
            } else if let Some(rest) = line.strip_prefix("buffer ") {
                (true, rest)
            } else {
                continue;
            };

            if is_block_keyword || rest.contains('{') || !rest.ends_with(';') {
                let name = rest
                    .split(|c: char| c == '{' || c.is_whitespace())
                    .next()
                    .unwrap_or_default();
                if !name.is_empty() {
                    blocks.insert(name.to_string());
                }
                if !rest.contains('}') {
                    for inner in lines.by_ref() {
                        if inner.starts_with('}') {
                            break;
                        }
                    }
                }
                continue;
            }

            let Some(decl) = parse_declaration(rest) else {
                continue;
            };
            let elements: Vec<String> = match decl.count {
                Some(count) => (0..count).map(|i| format!("{}[{}]", decl.name, i)).collect(),
                None => vec![decl.name.clone()],
            };
            if let Some(fields) = structs.get(&decl.type_name) {
                for element in &elements {
                    for field in fields {
                        let Some(ty) = UniformType::from_glsl(&field.type_name) else {
                            continue;
                        };
                        match field.count {
                            Some(count) => {
                                for j in 0..count {
                                    register(&mut uniforms, format!("{element}.{}[{j}]", field.name), ty);
                                }
                            }
                            None => register(&mut uniforms, format!("{element}.{}", field.name), ty),
                        }
                    }
                }
            } else if let Some(ty) = UniformType::from_glsl(&decl.type_name) {
                for element in &elements {
                    register(&mut uniforms, element.clone(), ty);
                }
                if decl.count.is_some() {
                    if let Some(first) = uniforms.get(&format!("{}[0]", decl.name)).copied() {
                        uniforms.entry(decl.name.clone()).or_insert(first);
                    }
                }
            }
        }
    }

    (uniforms, blocks)
}

#[derive(Debug, Clone)]
struct Declaration {
    type_name: String,
    name: String,
    count: Option<usize>,
}

fn strip_layout(line: &str) -> &str {
    if line.starts_with("layout") {
        if let Some(end) = line.find(')') {
            return line[end + 1..].trim_start();
        }
    }
    line
}

fn parse_declaration(text: &str) -> Option<Declaration> {
    let text = text.trim().strip_suffix(';')?;
    let mut tokens = text
        .split_whitespace()
        .filter(|token| !matches!(*token, "lowp" | "mediump" | "highp" | "flat"));
    let type_name = tokens.next()?.to_string();
    let declarator = tokens.next()?;
    let (name, count) = match declarator.split_once('[') {
        Some((name, rest)) => {
            let count = rest.trim_end_matches(']').parse().ok()?;
            (name.to_string(), Some(count))
        }
        None => (declarator.to_string(), None),
    };
    Some(Declaration {
        type_name,
        name,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BlendEquation;
    use crate::device::BlendFunction;

    const VERTEX: &str = "#version 330 core\nuniform mat4 model_view_projection;\nvoid main() {}\n";

    #[test]
    fn reflects_struct_arrays_and_blocks() {
        let fragment = "\
struct LightSource {
vec4 position;
float range;
};
uniform LightSource lights[2];
layout(std140) uniform cbBufferLights {
int uNumLights;
};
uniform sampler2D image0_sampler;
void main() {}
";
        let (uniforms, blocks) = reflect_program(&[VERTEX, fragment]);
        assert!(uniforms.contains_key("lights[1].range"));
        assert_eq!(uniforms["lights[0].position"].ty, UniformType::Vec4);
        assert_eq!(uniforms["image0_sampler"].ty, UniformType::Sampler2D);
        assert!(uniforms.contains_key("model_view_projection"));
        assert!(blocks.contains("cbBufferLights"));
        assert!(!uniforms.contains_key("uNumLights"));
    }

    #[test]
    fn incomplete_framebuffer_reports_dimension_mismatch() {
        let mut device = HeadlessDevice::new();
        let fb = device.create_framebuffer().unwrap();
        let a = device
            .create_texture_2d(&TextureDescriptor::new(4, 4, wgpu::TextureFormat::Rgba8Unorm))
            .unwrap();
        let b = device
            .create_renderbuffer(8, 8, wgpu::TextureFormat::Depth24PlusStencil8, 1)
            .unwrap();
        device.attach(fb, Attachment::Color(0), Some(AttachmentTarget::Texture(a)));
        device.attach(fb, Attachment::DepthStencil, Some(AttachmentTarget::Renderbuffer(b)));
        assert_eq!(device.framebuffer_status(fb), FramebufferStatus::IncompleteDimensions);
    }

    #[test]
    fn advanced_blend_without_support_is_a_noop() {
        let mut device = HeadlessDevice::with_capabilities([]);
        let state = BlendState::new(
            BlendFunction::uniform(wgpu::BlendFactor::One, wgpu::BlendFactor::OneMinusSrcAlpha),
            BlendEquation::Overlay,
        );
        device.set_blend_state(Some(state));
        assert_eq!(device.blend_state(), None);
        assert!(matches!(
            device.commands().last(),
            Some(DeviceCommand::Unsupported { .. })
        ));
    }
}
