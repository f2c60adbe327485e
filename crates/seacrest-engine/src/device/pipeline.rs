use std::borrow::Cow;

use super::backend::{Format, PipelineId, RootSignatureId};
use super::root_signature::RootSignature;

/// HLSL source for one shader stage.
#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub source: Cow<'static, str>,
    pub entry_point: &'static str,
    /// Shader model target, e.g. `vs_5_0`.
    pub target: &'static str,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VertexAttribute {
    pub semantic: &'static str,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub label: &'static str,
    pub root_signature: RootSignatureId,
    pub vertex: ShaderSource,
    pub pixel: ShaderSource,
    pub vertex_layout: Vec<VertexAttribute>,
    pub render_target_format: Format,
    pub topology: PrimitiveTopology,
}

/// Created pipeline state object.
#[derive(Debug, Clone)]
pub struct Pipeline {
    id: PipelineId,
    root_signature: RootSignatureId,
    topology: PrimitiveTopology,
    label: &'static str,
}

impl Pipeline {
    pub(crate) fn new(id: PipelineId, root_signature: &RootSignature, desc: &PipelineDesc) -> Self {
        Self {
            id,
            root_signature: root_signature.id(),
            topology: desc.topology,
            label: desc.label,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn root_signature(&self) -> RootSignatureId {
        self.root_signature
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}
