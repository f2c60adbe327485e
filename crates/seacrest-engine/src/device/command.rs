use std::collections::HashMap;

use super::backend::{DescriptorHeapId, Format, PipelineId, ResourceId, RootSignatureId};
use super::descriptor::{CpuDescriptor, DescriptorHeap, DescriptorHeapKind, GpuDescriptor};
use super::error::{GpuError, GpuResult};
use super::pipeline::{Pipeline, PrimitiveTopology};
use super::root_signature::{RootParameterKind, RootSignature};
use super::state::{Barrier, ResourceState, StateOverlay};
use super::upload::{UploadAllocation, UploadRing};

/// RGBA clear color, linear 0..1 components.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color from a `0xRRGGBB` literal.
    pub fn rgb_hex(hex: u32) -> Self {
        let c = |shift: u32| ((hex >> shift) & 0xff) as f32 / 255.0;
        Self::new(c(16), c(8), c(0), 1.0)
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VertexBufferView {
    pub buffer: ResourceId,
    pub address: u64,
    pub size: u32,
    pub stride: u32,
}

/// Placement of a texture copied into a linear buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TextureCopyLayout {
    pub width: u32,
    pub height: u32,
    /// Bytes per row in the destination buffer, 256-byte aligned.
    pub row_pitch: u32,
    pub format: Format,
}

/// Row pitch alignment required for texture/buffer copies.
pub const ROW_PITCH_ALIGNMENT: u32 = 256;

impl TextureCopyLayout {
    pub fn new(width: u32, height: u32, format: Format) -> Self {
        let unpadded = width * format.bytes_per_pixel();
        let row_pitch = unpadded.div_ceil(ROW_PITCH_ALIGNMENT) * ROW_PITCH_ALIGNMENT;
        Self {
            width,
            height,
            row_pitch,
            format,
        }
    }

    pub fn size(&self) -> u64 {
        self.row_pitch as u64 * self.height as u64
    }
}

/// Recorded GPU command. Backends translate these into native calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barriers(Vec<Barrier>),
    SetDescriptorHeaps(Vec<DescriptorHeapId>),
    SetRootSignature(RootSignatureId),
    SetPipeline(PipelineId),
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetRenderTarget {
        target: ResourceId,
        rtv: CpuDescriptor,
    },
    ClearRenderTarget {
        target: ResourceId,
        rtv: CpuDescriptor,
        color: [f32; 4],
    },
    SetRootConstantBuffer {
        index: u32,
        address: u64,
    },
    SetRootDescriptorTable {
        index: u32,
        base: GpuDescriptor,
    },
    SetRootConstants {
        index: u32,
        offset: u32,
        values: Vec<u32>,
    },
    SetTopology(PrimitiveTopology),
    SetVertexBuffer(VertexBufferView),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    CopyBuffer {
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    },
    CopyTextureToBuffer {
        src: ResourceId,
        dst: ResourceId,
        layout: TextureCopyLayout,
    },
}

#[derive(Debug, Default)]
struct Bindings {
    root_signature: Option<RootSignature>,
    pipeline: Option<Pipeline>,
    heaps: Vec<(DescriptorHeapId, DescriptorHeapKind)>,
    viewport: bool,
    scissor: bool,
    render_target: Option<ResourceId>,
    vertex_buffer: bool,
}

/// Output of a finished recording.
#[derive(Debug)]
pub(crate) struct RecordedFrame {
    pub commands: Vec<Command>,
    pub final_states: HashMap<ResourceId, ResourceState>,
    pub draw_calls: u32,
    pub barriers: u32,
}

/// Records one frame's command list.
///
/// Every operation checks resource states against the frame's view of the
/// tracker and fails instead of recording a hazard.
pub struct FrameEncoder<'a> {
    states: StateOverlay<'a>,
    upload: &'a mut UploadRing,
    commands: Vec<Command>,
    back_buffer: ResourceId,
    back_buffer_rtv: CpuDescriptor,
    size: (u32, u32),
    bound: Bindings,
    draw_calls: u32,
    barriers: u32,
}

impl<'a> FrameEncoder<'a> {
    pub(crate) fn new(
        states: StateOverlay<'a>,
        upload: &'a mut UploadRing,
        back_buffer: ResourceId,
        back_buffer_rtv: CpuDescriptor,
        size: (u32, u32),
    ) -> Self {
        Self {
            states,
            upload,
            commands: Vec::new(),
            back_buffer,
            back_buffer_rtv,
            size,
            bound: Bindings::default(),
            draw_calls: 0,
            barriers: 0,
        }
    }

    /// Back buffer being rendered this frame.
    pub fn back_buffer(&self) -> ResourceId {
        self.back_buffer
    }

    /// Surface size in physical pixels.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn state(&self, resource: ResourceId) -> GpuResult<ResourceState> {
        self.states.state(resource)
    }

    /// Declares a transition of `resource` to `after`.
    ///
    /// Consecutive barriers are batched into a single native call.
    pub fn transition(&mut self, resource: ResourceId, after: ResourceState) -> GpuResult<()> {
        if let Some(barrier) = self.states.transition(resource, after)? {
            self.barriers += 1;
            match self.commands.last_mut() {
                Some(Command::Barriers(batch)) => batch.push(barrier),
                _ => self.commands.push(Command::Barriers(vec![barrier])),
            }
        }
        Ok(())
    }

    pub fn set_descriptor_heaps(&mut self, heaps: &[&DescriptorHeap]) -> GpuResult<()> {
        let mut seen = Vec::with_capacity(heaps.len());
        for heap in heaps {
            if !heap.shader_visible() {
                return Err(GpuError::Binding(format!(
                    "{:?} heap is not shader visible",
                    heap.kind()
                )));
            }
            if seen.iter().any(|(_, kind)| *kind == heap.kind()) {
                return Err(GpuError::Binding(format!(
                    "more than one {:?} heap bound",
                    heap.kind()
                )));
            }
            seen.push((heap.id(), heap.kind()));
        }

        self.commands
            .push(Command::SetDescriptorHeaps(seen.iter().map(|(id, _)| *id).collect()));
        self.bound.heaps = seen;
        Ok(())
    }

    pub fn set_root_signature(&mut self, root_signature: &RootSignature) {
        self.commands
            .push(Command::SetRootSignature(root_signature.id()));
        self.bound.root_signature = Some(root_signature.clone());
    }

    pub fn set_pipeline(&mut self, pipeline: &Pipeline) {
        self.commands.push(Command::SetPipeline(pipeline.id()));
        self.commands.push(Command::SetTopology(pipeline.topology()));
        self.bound.pipeline = Some(pipeline.clone());
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.commands.push(Command::SetViewport(viewport));
        self.bound.viewport = true;
    }

    pub fn set_scissor(&mut self, rect: ScissorRect) {
        self.commands.push(Command::SetScissor(rect));
        self.bound.scissor = true;
    }

    /// Binds the back buffer as the output render target.
    pub fn bind_back_buffer(&mut self) -> GpuResult<()> {
        self.states
            .require(self.back_buffer, ResourceState::RenderTarget)?;
        self.commands.push(Command::SetRenderTarget {
            target: self.back_buffer,
            rtv: self.back_buffer_rtv,
        });
        self.bound.render_target = Some(self.back_buffer);
        Ok(())
    }

    pub fn clear_back_buffer(&mut self, color: ClearColor) -> GpuResult<()> {
        self.states
            .require(self.back_buffer, ResourceState::RenderTarget)?;
        self.commands.push(Command::ClearRenderTarget {
            target: self.back_buffer,
            rtv: self.back_buffer_rtv,
            color: color.to_array(),
        });
        Ok(())
    }

    pub fn set_root_constant_buffer(&mut self, index: u32, address: u64) -> GpuResult<()> {
        self.expect_parameter(index, RootParameterKind::ConstantBuffer)?;
        self.commands
            .push(Command::SetRootConstantBuffer { index, address });
        Ok(())
    }

    pub fn set_root_descriptor_table(&mut self, index: u32, base: GpuDescriptor) -> GpuResult<()> {
        self.expect_parameter(index, RootParameterKind::DescriptorTable)?;
        if self.bound.heaps.is_empty() {
            return Err(GpuError::Binding(
                "descriptor table set without descriptor heaps".into(),
            ));
        }
        self.commands
            .push(Command::SetRootDescriptorTable { index, base });
        Ok(())
    }

    pub fn set_root_constants(&mut self, index: u32, offset: u32, values: &[u32]) -> GpuResult<()> {
        self.expect_parameter(index, RootParameterKind::Constants)?;
        let count = self
            .bound
            .root_signature
            .as_ref()
            .and_then(|rs| rs.constants_count(index))
            .unwrap_or(0);
        if offset as usize + values.len() > count as usize {
            return Err(GpuError::Binding(format!(
                "root constants {offset}..{} exceed parameter {index} size {count}",
                offset as usize + values.len()
            )));
        }
        self.commands.push(Command::SetRootConstants {
            index,
            offset,
            values: values.to_vec(),
        });
        Ok(())
    }

    /// Copies `value` into this frame's upload region.
    ///
    /// The returned address stays valid until the frame's fence is reached.
    pub fn upload<T: bytemuck::Pod>(&mut self, value: &T) -> GpuResult<UploadAllocation> {
        self.upload.push(bytemuck::bytes_of(value))
    }

    pub fn upload_bytes(&mut self, bytes: &[u8]) -> GpuResult<UploadAllocation> {
        self.upload.push(bytes)
    }

    pub fn set_vertex_buffer(&mut self, view: VertexBufferView) -> GpuResult<()> {
        let state = self.states.state(view.buffer)?;
        if !matches!(
            state,
            ResourceState::GenericRead | ResourceState::VertexAndConstantBuffer
        ) {
            return Err(GpuError::InvalidState {
                resource: view.buffer,
                expected: ResourceState::VertexAndConstantBuffer,
                actual: state,
            });
        }
        self.commands.push(Command::SetVertexBuffer(view));
        self.bound.vertex_buffer = true;
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> GpuResult<()> {
        let root_signature = self
            .bound
            .root_signature
            .as_ref()
            .ok_or_else(|| GpuError::Binding("draw without a root signature".into()))?;
        let pipeline = self
            .bound
            .pipeline
            .as_ref()
            .ok_or_else(|| GpuError::Binding("draw without a pipeline".into()))?;
        if pipeline.root_signature() != root_signature.id() {
            return Err(GpuError::Binding(format!(
                "pipeline '{}' was created for a different root signature",
                pipeline.label()
            )));
        }
        if !self.bound.viewport || !self.bound.scissor {
            return Err(GpuError::Binding("draw without viewport and scissor".into()));
        }
        let target = self
            .bound
            .render_target
            .ok_or_else(|| GpuError::Binding("draw without a render target".into()))?;
        self.states.require(target, ResourceState::RenderTarget)?;

        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        });
        self.draw_calls += 1;
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    ) -> GpuResult<()> {
        let src_state = self.states.state(src)?;
        if !matches!(src_state, ResourceState::CopySource | ResourceState::GenericRead) {
            return Err(GpuError::InvalidState {
                resource: src,
                expected: ResourceState::CopySource,
                actual: src_state,
            });
        }
        self.states.require(dst, ResourceState::CopyDest)?;
        self.commands.push(Command::CopyBuffer {
            dst,
            dst_offset,
            src,
            src_offset,
            size,
        });
        Ok(())
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: ResourceId,
        dst: ResourceId,
        layout: TextureCopyLayout,
    ) -> GpuResult<()> {
        self.states.require(src, ResourceState::CopySource)?;
        self.states.require(dst, ResourceState::CopyDest)?;
        self.commands
            .push(Command::CopyTextureToBuffer { src, dst, layout });
        Ok(())
    }

    /// Closes the recording. The back buffer must be back in `Present`.
    pub(crate) fn finish(self) -> GpuResult<RecordedFrame> {
        self.states.require(self.back_buffer, ResourceState::Present)?;
        Ok(RecordedFrame {
            commands: self.commands,
            final_states: self.states.into_pending(),
            draw_calls: self.draw_calls,
            barriers: self.barriers,
        })
    }

    fn expect_parameter(&self, index: u32, expected: RootParameterKind) -> GpuResult<()> {
        let root_signature = self
            .bound
            .root_signature
            .as_ref()
            .ok_or_else(|| GpuError::Binding("no root signature bound".into()))?;
        match root_signature.parameter_kind(index) {
            Some(kind) if kind == expected => Ok(()),
            Some(kind) => Err(GpuError::Binding(format!(
                "root parameter {index} is {kind:?}, not {expected:?}"
            ))),
            None => Err(GpuError::Binding(format!(
                "root parameter {index} out of range"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::backend::{Backend, HeapKind};
    use crate::device::descriptor::DescriptorHeapDesc;
    use crate::device::headless::HeadlessBackend;
    use crate::device::root_signature::{
        DescriptorRange, RangeKind, RootSignatureDesc, ShaderVisibility,
    };
    use crate::device::state::StateTracker;

    const BACK: ResourceId = ResourceId(100);
    const RTV: CpuDescriptor = CpuDescriptor(0x1000);

    fn fixture() -> (StateTracker, UploadRing) {
        let mut backend = HeadlessBackend::default();
        let ring = UploadRing::new(&mut backend, 1024, 2).unwrap();
        let mut states = StateTracker::new();
        states.register(BACK, ResourceState::Present);
        states.register_pinned(ring.buffer(), HeapKind::Upload.initial_state());
        (states, ring)
    }

    fn root_signature() -> RootSignature {
        RootSignature::new(
            RootSignatureId(1),
            RootSignatureDesc::new()
                .constant_buffer(0, ShaderVisibility::All)
                .constants(1, 2, ShaderVisibility::Pixel),
        )
    }

    #[test]
    fn clear_requires_render_target_state() {
        let (states, mut ring) = fixture();
        let mut enc = FrameEncoder::new(StateOverlay::new(&states), &mut ring, BACK, RTV, (4, 4));
        let err = enc.clear_back_buffer(ClearColor::rgb_hex(0x161616)).unwrap_err();
        assert!(matches!(err, GpuError::InvalidState { .. }));

        enc.transition(BACK, ResourceState::RenderTarget).unwrap();
        enc.clear_back_buffer(ClearColor::rgb_hex(0x161616)).unwrap();
    }

    #[test]
    fn consecutive_barriers_are_batched() {
        let (mut states, mut ring) = fixture();
        let other = ResourceId(7);
        states.register(other, ResourceState::Common);

        let mut enc = FrameEncoder::new(StateOverlay::new(&states), &mut ring, BACK, RTV, (4, 4));
        enc.transition(BACK, ResourceState::RenderTarget).unwrap();
        enc.transition(other, ResourceState::CopyDest).unwrap();
        assert_eq!(enc.commands().len(), 1);
        match &enc.commands()[0] {
            Command::Barriers(batch) => assert_eq!(batch.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn finish_requires_present() {
        let (states, mut ring) = fixture();
        let mut enc = FrameEncoder::new(StateOverlay::new(&states), &mut ring, BACK, RTV, (4, 4));
        enc.transition(BACK, ResourceState::RenderTarget).unwrap();
        assert!(matches!(
            FrameEncoder::finish(enc),
            Err(GpuError::InvalidState { expected: ResourceState::Present, .. })
        ));
    }

    #[test]
    fn root_parameter_kinds_are_checked() {
        let (states, mut ring) = fixture();
        let mut enc = FrameEncoder::new(StateOverlay::new(&states), &mut ring, BACK, RTV, (4, 4));
        assert!(enc.set_root_constant_buffer(0, 0).is_err());

        enc.set_root_signature(&root_signature());
        enc.set_root_constant_buffer(0, 0x10000).unwrap();
        assert!(enc.set_root_constant_buffer(1, 0x10000).is_err());
        enc.set_root_constants(1, 0, &[1, 2]).unwrap();
        assert!(enc.set_root_constants(1, 1, &[1, 2]).is_err());
    }

    #[test]
    fn draw_requires_complete_bindings() {
        let (states, mut ring) = fixture();
        let mut enc = FrameEncoder::new(StateOverlay::new(&states), &mut ring, BACK, RTV, (4, 4));
        assert!(matches!(enc.draw(3, 1), Err(GpuError::Binding(_))));

        enc.set_root_signature(&root_signature());
        assert!(matches!(enc.draw(3, 1), Err(GpuError::Binding(_))));
    }

    #[test]
    fn descriptor_table_requires_bound_heaps() {
        let (states, mut ring) = fixture();
        let mut backend = HeadlessBackend::default();
        let mut heap = DescriptorHeap::new(
            &mut backend,
            DescriptorHeapDesc {
                kind: DescriptorHeapKind::CbvSrvUav,
                capacity: 4,
                shader_visible: true,
            },
        )
        .unwrap();
        let slot = heap.allocate().unwrap();
        let base = slot.gpu.unwrap();

        let table = RootSignature::new(
            RootSignatureId(2),
            RootSignatureDesc::new().table(
                vec![DescriptorRange {
                    kind: RangeKind::Srv,
                    count: 1,
                    base_register: 0,
                    space: 0,
                }],
                ShaderVisibility::Pixel,
            ),
        );

        let mut enc = FrameEncoder::new(StateOverlay::new(&states), &mut ring, BACK, RTV, (4, 4));
        enc.set_root_signature(&table);
        assert!(matches!(
            enc.set_root_descriptor_table(0, base),
            Err(GpuError::Binding(_))
        ));

        enc.set_descriptor_heaps(&[&heap]).unwrap();
        enc.set_root_descriptor_table(0, base).unwrap();
        assert!(matches!(
            enc.commands().last(),
            Some(Command::SetRootDescriptorTable { index: 0, base: b }) if *b == base
        ));
    }

    #[test]
    fn copy_requires_copy_dest() {
        let (mut states, mut ring) = fixture();
        let dst = ResourceId(8);
        states.register(dst, ResourceState::Common);
        ring.begin_frame(0, 0).unwrap();
        let src = ring.buffer();

        let mut enc = FrameEncoder::new(StateOverlay::new(&states), &mut ring, BACK, RTV, (4, 4));
        let bytes = enc.upload_bytes(&[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            enc.copy_buffer(dst, 0, src, bytes.offset, bytes.size),
            Err(GpuError::InvalidState { expected: ResourceState::CopyDest, .. })
        ));
        assert!(enc.commands().is_empty());

        enc.transition(dst, ResourceState::CopyDest).unwrap();
        enc.copy_buffer(dst, 0, src, bytes.offset, bytes.size).unwrap();
        assert!(matches!(
            enc.commands().last(),
            Some(Command::CopyBuffer { size: 4, .. })
        ));
    }

    #[test]
    fn uploads_are_constant_buffer_aligned() {
        let (states, mut ring) = fixture();
        ring.begin_frame(0, 0).unwrap();
        let mut enc = FrameEncoder::new(StateOverlay::new(&states), &mut ring, BACK, RTV, (4, 4));
        let a = enc.upload(&[1.0f32; 4]).unwrap();
        let b = enc.upload(&[2.0f32; 4]).unwrap();
        assert_eq!(b.offset - a.offset, 256);
        assert_eq!(a.address % 256, 0);
    }

    #[test]
    fn copy_layout_pads_rows() {
        let layout = TextureCopyLayout::new(10, 3, Format::Rgba8Unorm);
        assert_eq!(layout.row_pitch, 256);
        assert_eq!(layout.size(), 768);

        let wide = TextureCopyLayout::new(65, 1, Format::Rgba8Unorm);
        assert_eq!(wide.row_pitch, 512);
    }

    #[test]
    fn hex_clear_color() {
        let c = ClearColor::rgb_hex(0xff8000);
        assert_eq!(c.r, 1.0);
        assert!((c.g - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(c.b, 0.0);
        assert_eq!(c.a, 1.0);
    }

    #[test]
    fn backend_is_object_safe() {
        let backend: Box<dyn Backend> = Box::new(HeadlessBackend::default());
        assert_eq!(backend.name(), "headless");
    }
}
