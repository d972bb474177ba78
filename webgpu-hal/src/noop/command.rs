use std::{ops::Range, sync::Arc};

use arrayvec::ArrayVec;

use super::{slice_range, Api, Buffer, Memory, Texture, TextureStorage, TextureView};
use crate::{BufferCopy, BufferTextureCopy, FormatAspects, MAX_COLOR_ATTACHMENTS};

/// Attachments of one render pass: every color target plus depth-stencil.
const MAX_ATTACHMENTS: usize = MAX_COLOR_ATTACHMENTS + 1;

#[derive(Clone, Debug)]
enum ClearValue {
    Color(wgt::Color),
    Depth(f32),
    Stencil(u32),
}

#[derive(Clone, Debug)]
struct Attachment {
    storage: Arc<TextureStorage>,
    format: wgt::TextureFormat,
    mip_level: u32,
    array_layer: u32,
}

impl Attachment {
    fn new(view: &TextureView) -> Self {
        Self {
            storage: Arc::clone(&view.storage),
            format: view.format,
            mip_level: view.mip_level,
            array_layer: view.array_layer,
        }
    }

    fn fill(&self, value: &ClearValue) {
        let (offset, pattern) = match clear_pattern(self.format, value) {
            Some(pattern) => pattern,
            None => {
                log::debug!("Clearing {} is not emulated", self.format);
                return;
            }
        };
        let texel_bytes = self.storage.texel_bytes();
        let range = slice_range(&self.storage, self.mip_level, self.array_layer);
        let mut mips = self.storage.mips.lock();
        let Some(slice) = mips
            .get_mut(self.mip_level as usize)
            .and_then(|level| level.get_mut(range))
        else {
            log::warn!("Attachment is outside of its texture");
            return;
        };
        for texel in slice.chunks_exact_mut(texel_bytes) {
            texel[offset..offset + pattern.len()].copy_from_slice(&pattern);
        }
    }

    fn resolve_into(&self, target: &Attachment) {
        let src_range = slice_range(&self.storage, self.mip_level, self.array_layer);
        let dst_range = slice_range(&target.storage, target.mip_level, target.array_layer);
        let data = {
            let mips = self.storage.mips.lock();
            match mips
                .get(self.mip_level as usize)
                .and_then(|level| level.get(src_range))
            {
                Some(data) => data.to_vec(),
                None => return,
            }
        };
        let mut mips = target.storage.mips.lock();
        if let Some(dst) = mips
            .get_mut(target.mip_level as usize)
            .and_then(|level| level.get_mut(dst_range))
        {
            if dst.len() == data.len() {
                dst.copy_from_slice(&data);
            }
        }
    }
}

/// Byte offset within a texel and the bytes to write there.
fn clear_pattern(format: wgt::TextureFormat, value: &ClearValue) -> Option<(usize, Vec<u8>)> {
    use wgt::TextureFormat as Tf;

    fn unorm8(value: f64) -> u8 {
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    }
    fn srgb8(value: f64) -> u8 {
        let value = value.clamp(0.0, 1.0);
        let encoded = if value <= 0.0031308 {
            value * 12.92
        } else {
            1.055 * value.powf(1.0 / 2.4) - 0.055
        };
        unorm8(encoded)
    }

    let bytes = match (format, value) {
        (Tf::R8Unorm, ClearValue::Color(c)) => vec![unorm8(c.r)],
        (Tf::Rg8Unorm, ClearValue::Color(c)) => vec![unorm8(c.r), unorm8(c.g)],
        (Tf::Rgba8Unorm, ClearValue::Color(c)) => {
            vec![unorm8(c.r), unorm8(c.g), unorm8(c.b), unorm8(c.a)]
        }
        (Tf::Rgba8UnormSrgb, ClearValue::Color(c)) => {
            vec![srgb8(c.r), srgb8(c.g), srgb8(c.b), unorm8(c.a)]
        }
        (Tf::Bgra8Unorm, ClearValue::Color(c)) => {
            vec![unorm8(c.b), unorm8(c.g), unorm8(c.r), unorm8(c.a)]
        }
        (Tf::Bgra8UnormSrgb, ClearValue::Color(c)) => {
            vec![srgb8(c.b), srgb8(c.g), srgb8(c.r), unorm8(c.a)]
        }
        (Tf::R8Uint, ClearValue::Color(c)) => vec![c.r as u8],
        (Tf::Rgba8Uint, ClearValue::Color(c)) => vec![c.r as u8, c.g as u8, c.b as u8, c.a as u8],
        (Tf::R32Uint, ClearValue::Color(c)) => (c.r as u32).to_le_bytes().to_vec(),
        (Tf::R32Float, ClearValue::Color(c)) => (c.r as f32).to_le_bytes().to_vec(),
        (Tf::Rg32Float, ClearValue::Color(c)) => [c.r, c.g]
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect(),
        (Tf::Rgba32Float, ClearValue::Color(c)) => [c.r, c.g, c.b, c.a]
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect(),
        (Tf::Depth32Float, ClearValue::Depth(d)) => d.to_le_bytes().to_vec(),
        (Tf::Depth16Unorm, ClearValue::Depth(d)) => {
            ((d.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16)
                .to_le_bytes()
                .to_vec()
        }
        (Tf::Depth24Plus | Tf::Depth24PlusStencil8, ClearValue::Depth(d)) => {
            let depth = (d.clamp(0.0, 1.0) as f64 * 0xFF_FFFF as f64).round() as u32;
            depth.to_le_bytes()[..3].to_vec()
        }
        (Tf::Stencil8, ClearValue::Stencil(s)) => vec![*s as u8],
        (Tf::Depth24PlusStencil8, ClearValue::Stencil(s)) => return Some((3, vec![*s as u8])),
        _ => return None,
    };
    Some((0, bytes))
}

#[derive(Debug)]
enum Command {
    ClearBuffer {
        dst: Memory,
        range: Range<wgt::BufferAddress>,
    },
    CopyBufferToBuffer {
        src: Memory,
        dst: Memory,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToTexture {
        src: Memory,
        dst: Arc<TextureStorage>,
        regions: Vec<BufferTextureCopy>,
    },
    CopyTextureToBuffer {
        src: Arc<TextureStorage>,
        dst: Memory,
        regions: Vec<BufferTextureCopy>,
    },
    BeginRenderPass {
        label: Option<String>,
        clears: ArrayVec<(Attachment, ClearValue), MAX_ATTACHMENTS>,
        discards: ArrayVec<Attachment, MAX_ATTACHMENTS>,
        resolves: ArrayVec<(Attachment, Attachment), MAX_COLOR_ATTACHMENTS>,
    },
    EndRenderPass,
    BeginComputePass {
        label: Option<String>,
    },
    EndComputePass,
    SetBindGroup {
        index: u32,
        dynamic_offsets: Vec<wgt::DynamicOffset>,
    },
    SetRenderPipeline,
    SetComputePipeline,
    SetVertexBuffer {
        index: u32,
        offset: wgt::BufferAddress,
    },
    SetViewport {
        rect: crate::Rect<f32>,
        depth_range: Range<f32>,
    },
    Draw {
        start_vertex: u32,
        vertex_count: u32,
        start_instance: u32,
        instance_count: u32,
    },
    Dispatch([u32; 3]),
}

impl Command {
    fn describe(&self) -> String {
        match *self {
            Self::ClearBuffer { ref range, .. } => format!("clear_buffer {range:?}"),
            Self::CopyBufferToBuffer { ref regions, .. } => {
                format!("copy_buffer_to_buffer x{}", regions.len())
            }
            Self::CopyBufferToTexture { ref regions, .. } => {
                format!("copy_buffer_to_texture x{}", regions.len())
            }
            Self::CopyTextureToBuffer { ref regions, .. } => {
                format!("copy_texture_to_buffer x{}", regions.len())
            }
            Self::BeginRenderPass { ref label, .. } => format!("begin_render_pass {label:?}"),
            Self::EndRenderPass => "end_render_pass".to_string(),
            Self::BeginComputePass { ref label } => format!("begin_compute_pass {label:?}"),
            Self::EndComputePass => "end_compute_pass".to_string(),
            Self::SetBindGroup {
                index,
                ref dynamic_offsets,
            } => format!("set_bind_group {index} {dynamic_offsets:?}"),
            Self::SetRenderPipeline => "set_render_pipeline".to_string(),
            Self::SetComputePipeline => "set_compute_pipeline".to_string(),
            Self::SetVertexBuffer { index, offset } => {
                format!("set_vertex_buffer {index} {offset}")
            }
            Self::SetViewport {
                ref rect,
                ref depth_range,
            } => format!(
                "set_viewport {} {} {} {} {:?}",
                rect.x, rect.y, rect.w, rect.h, depth_range
            ),
            Self::Draw {
                start_vertex,
                vertex_count,
                start_instance,
                instance_count,
            } => format!("draw {vertex_count} {instance_count} {start_vertex} {start_instance}"),
            Self::Dispatch([x, y, z]) => format!("dispatch {x} {y} {z}"),
        }
    }

    fn execute(&self, pending: &mut PassState) {
        match *self {
            Self::ClearBuffer { ref dst, ref range } => {
                let mut data = dst.lock();
                if let Some(bytes) = data.get_mut(range.start as usize..range.end as usize) {
                    bytes.fill(0);
                }
            }
            Self::CopyBufferToBuffer {
                ref src,
                ref dst,
                ref regions,
            } => copy_buffer_to_buffer(src, dst, regions),
            Self::CopyBufferToTexture {
                ref src,
                ref dst,
                ref regions,
            } => {
                let buffer = src.lock();
                let mut mips = dst.mips.lock();
                for_each_row(dst, regions, |level, texture_offset, buffer_offset, len| {
                    let Some(level) = mips.get_mut(level as usize) else {
                        return;
                    };
                    if let (Some(from), Some(to)) = (
                        buffer.get(buffer_offset..buffer_offset + len),
                        level.get_mut(texture_offset..texture_offset + len),
                    ) {
                        to.copy_from_slice(from);
                    }
                });
            }
            Self::CopyTextureToBuffer {
                ref src,
                ref dst,
                ref regions,
            } => {
                let mips = src.mips.lock();
                let mut buffer = dst.lock();
                for_each_row(src, regions, |level, texture_offset, buffer_offset, len| {
                    let Some(level) = mips.get(level as usize) else {
                        return;
                    };
                    if let (Some(from), Some(to)) = (
                        level.get(texture_offset..texture_offset + len),
                        buffer.get_mut(buffer_offset..buffer_offset + len),
                    ) {
                        to.copy_from_slice(from);
                    }
                });
            }
            Self::BeginRenderPass {
                ref clears,
                ref discards,
                ref resolves,
                ..
            } => {
                for (attachment, value) in clears {
                    attachment.fill(value);
                }
                pending.discards = discards.clone();
                pending.resolves = resolves.clone();
            }
            Self::EndRenderPass => {
                for (src, dst) in pending.resolves.drain(..) {
                    src.resolve_into(&dst);
                }
                for attachment in pending.discards.drain(..) {
                    attachment.fill(&ClearValue::Color(wgt::Color::TRANSPARENT));
                }
            }
            _ => {}
        }
    }
}

/// Render pass effects that apply when the pass ends.
#[derive(Default)]
struct PassState {
    discards: ArrayVec<Attachment, MAX_ATTACHMENTS>,
    resolves: ArrayVec<(Attachment, Attachment), MAX_COLOR_ATTACHMENTS>,
}

fn copy_buffer_to_buffer(src: &Memory, dst: &Memory, regions: &[BufferCopy]) {
    if Arc::ptr_eq(src, dst) {
        let mut data = src.lock();
        for region in regions {
            let start = region.src_offset as usize;
            let end = start + region.size.get() as usize;
            if end <= data.len() && region.dst_offset as usize + (end - start) <= data.len() {
                data.copy_within(start..end, region.dst_offset as usize);
            }
        }
        return;
    }
    let src = src.lock();
    let mut dst = dst.lock();
    for region in regions {
        let size = region.size.get() as usize;
        let src_start = region.src_offset as usize;
        let dst_start = region.dst_offset as usize;
        if let (Some(from), Some(to)) = (
            src.get(src_start..src_start + size),
            dst.get_mut(dst_start..dst_start + size),
        ) {
            to.copy_from_slice(from);
        }
    }
}

/// Walk every texel row touched by `regions`.
///
/// The callback receives the mip level, the byte offset of the row in that
/// level, the byte offset of the row in the buffer and the row length.
fn for_each_row(
    storage: &TextureStorage,
    regions: &[BufferTextureCopy],
    mut row: impl FnMut(u32, usize, usize, usize),
) {
    let texel_bytes = storage.texel_bytes();
    for copy in regions {
        if copy.texture_base.aspect != FormatAspects::from(storage.format) {
            log::debug!("Partial aspect copies of {} are not emulated", storage.format);
            continue;
        }
        let level = copy.texture_base.mip_level;
        let origin = copy.texture_base.origin;
        let row_bytes = copy.size.width as usize * texel_bytes;
        let bytes_per_row = copy
            .buffer_layout
            .bytes_per_row
            .map_or(row_bytes, |bpr| bpr as usize);
        let rows_per_image = copy
            .buffer_layout
            .rows_per_image
            .unwrap_or(copy.size.height) as usize;
        for z in 0..copy.size.depth_or_array_layers {
            let slice = copy.texture_base.array_layer + origin.z + z;
            for y in 0..copy.size.height {
                let buffer_offset = copy.buffer_layout.offset as usize
                    + (z as usize * rows_per_image + y as usize) * bytes_per_row;
                let texture_offset = storage.texel_offset(level, origin.x, origin.y + y, slice);
                row(level, texture_offset, buffer_offset, row_bytes);
            }
        }
    }
}

#[derive(Debug)]
pub struct CommandEncoder {
    label: Option<String>,
    commands: Vec<Command>,
    active: bool,
}

impl CommandEncoder {
    pub(super) fn new(label: crate::Label) -> Self {
        Self {
            label: label.map(str::to_string),
            commands: Vec::new(),
            active: false,
        }
    }

    fn push(&mut self, command: Command) {
        if self.active {
            self.commands.push(command);
        } else {
            log::warn!("Command recorded outside of encoding: {}", command.describe());
        }
    }
}

#[derive(Debug)]
pub struct CommandBuffer {
    label: Option<String>,
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub(super) fn execute(&self, submission: crate::FenceValue, log: &mut Vec<super::ExecutedCommand>) {
        let mut pass = PassState::default();
        for command in self.commands.iter() {
            command.execute(&mut pass);
            log.push(super::ExecutedCommand {
                submission,
                command_buffer: self.label.clone(),
                command: command.describe(),
            });
        }
    }
}

impl crate::CommandEncoder<Api> for CommandEncoder {
    unsafe fn begin_encoding(&mut self, label: crate::Label) -> Result<(), crate::DeviceError> {
        if let Some(label) = label {
            self.label = Some(label.to_string());
        }
        self.commands.clear();
        self.active = true;
        Ok(())
    }
    unsafe fn discard_encoding(&mut self) {
        self.commands.clear();
        self.active = false;
    }
    unsafe fn end_encoding(&mut self) -> Result<CommandBuffer, crate::DeviceError> {
        self.active = false;
        Ok(CommandBuffer {
            label: self.label.clone(),
            commands: std::mem::take(&mut self.commands),
        })
    }

    unsafe fn clear_buffer(&mut self, buffer: &Buffer, range: crate::MemoryRange) {
        self.push(Command::ClearBuffer {
            dst: Arc::clone(&buffer.memory),
            range,
        });
    }

    unsafe fn copy_buffer_to_buffer<T>(&mut self, src: &Buffer, dst: &Buffer, regions: T)
    where
        T: Iterator<Item = BufferCopy>,
    {
        self.push(Command::CopyBufferToBuffer {
            src: Arc::clone(&src.memory),
            dst: Arc::clone(&dst.memory),
            regions: regions.collect(),
        });
    }

    unsafe fn copy_buffer_to_texture<T>(&mut self, src: &Buffer, dst: &Texture, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>,
    {
        self.push(Command::CopyBufferToTexture {
            src: Arc::clone(&src.memory),
            dst: Arc::clone(&dst.storage),
            regions: regions.collect(),
        });
    }

    unsafe fn copy_texture_to_buffer<T>(&mut self, src: &Texture, dst: &Buffer, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>,
    {
        self.push(Command::CopyTextureToBuffer {
            src: Arc::clone(&src.storage),
            dst: Arc::clone(&dst.memory),
            regions: regions.collect(),
        });
    }

    unsafe fn set_bind_group(
        &mut self,
        _layout: &super::Resource,
        index: u32,
        _group: &super::Resource,
        dynamic_offsets: &[wgt::DynamicOffset],
    ) {
        self.push(Command::SetBindGroup {
            index,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    unsafe fn begin_render_pass(&mut self, desc: &crate::RenderPassDescriptor<Api>) {
        let mut clears = ArrayVec::new();
        let mut discards = ArrayVec::new();
        let mut resolves = ArrayVec::new();
        for at in desc.color_attachments.iter().flatten() {
            let target = Attachment::new(at.target);
            if let wgt::LoadOp::Clear(color) = at.ops.load {
                clears.push((target.clone(), ClearValue::Color(color)));
            }
            if let Some(resolve) = at.resolve_target {
                resolves.push((target.clone(), Attachment::new(resolve)));
            }
            if at.ops.store == wgt::StoreOp::Discard {
                discards.push(target);
            }
        }
        if let Some(ref ds) = desc.depth_stencil_attachment {
            let target = Attachment::new(ds.target);
            if let Some(wgt::Operations {
                load: wgt::LoadOp::Clear(depth),
                ..
            }) = ds.depth_ops
            {
                clears.push((target.clone(), ClearValue::Depth(depth)));
            }
            if let Some(wgt::Operations {
                load: wgt::LoadOp::Clear(stencil),
                ..
            }) = ds.stencil_ops
            {
                // Depth and stencil share one attachment slot.
                if clears.is_full() {
                    log::warn!("Too many clears in render pass {:?}", desc.label);
                } else {
                    clears.push((target, ClearValue::Stencil(stencil)));
                }
            }
        }
        self.push(Command::BeginRenderPass {
            label: desc.label.map(str::to_string),
            clears,
            discards,
            resolves,
        });
    }
    unsafe fn end_render_pass(&mut self) {
        self.push(Command::EndRenderPass);
    }

    unsafe fn set_render_pipeline(&mut self, _pipeline: &super::Resource) {
        self.push(Command::SetRenderPipeline);
    }
    unsafe fn set_vertex_buffer<'a>(&mut self, index: u32, binding: crate::BufferBinding<'a, Api>) {
        self.push(Command::SetVertexBuffer {
            index,
            offset: binding.offset,
        });
    }
    unsafe fn set_viewport(&mut self, rect: &crate::Rect<f32>, depth_range: Range<f32>) {
        self.push(Command::SetViewport {
            rect: rect.clone(),
            depth_range,
        });
    }

    unsafe fn draw(
        &mut self,
        start_vertex: u32,
        vertex_count: u32,
        start_instance: u32,
        instance_count: u32,
    ) {
        self.push(Command::Draw {
            start_vertex,
            vertex_count,
            start_instance,
            instance_count,
        });
    }

    unsafe fn begin_compute_pass(&mut self, desc: &crate::ComputePassDescriptor) {
        self.push(Command::BeginComputePass {
            label: desc.label.map(str::to_string),
        });
    }
    unsafe fn end_compute_pass(&mut self) {
        self.push(Command::EndComputePass);
    }

    unsafe fn set_compute_pipeline(&mut self, _pipeline: &super::Resource) {
        self.push(Command::SetComputePipeline);
    }

    unsafe fn dispatch(&mut self, count: [u32; 3]) {
        self.push(Command::Dispatch(count));
    }
}
