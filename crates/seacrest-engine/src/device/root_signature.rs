use std::sync::Arc;

use super::backend::RootSignatureId;
use super::error::{GpuError, GpuResult};

/// Maximum root signature size, in DWORDs.
pub const MAX_ROOT_COST: u32 = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Pixel,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RangeKind {
    Srv,
    Uav,
    Cbv,
    Sampler,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DescriptorRange {
    pub kind: RangeKind,
    pub count: u32,
    pub base_register: u32,
    pub space: u32,
}

/// Kind of a root parameter, used for bind-time checks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RootParameterKind {
    Constants,
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    DescriptorTable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RootParameter {
    Constants {
        register: u32,
        space: u32,
        count: u32,
        visibility: ShaderVisibility,
    },
    ConstantBuffer {
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    },
    ShaderResource {
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    },
    UnorderedAccess {
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    },
    DescriptorTable {
        ranges: Vec<DescriptorRange>,
        visibility: ShaderVisibility,
    },
}

impl RootParameter {
    pub fn kind(&self) -> RootParameterKind {
        match self {
            RootParameter::Constants { .. } => RootParameterKind::Constants,
            RootParameter::ConstantBuffer { .. } => RootParameterKind::ConstantBuffer,
            RootParameter::ShaderResource { .. } => RootParameterKind::ShaderResource,
            RootParameter::UnorderedAccess { .. } => RootParameterKind::UnorderedAccess,
            RootParameter::DescriptorTable { .. } => RootParameterKind::DescriptorTable,
        }
    }

    /// Size in DWORDs.
    pub fn cost(&self) -> u32 {
        match self {
            RootParameter::Constants { count, .. } => *count,
            RootParameter::ConstantBuffer { .. }
            | RootParameter::ShaderResource { .. }
            | RootParameter::UnorderedAccess { .. } => 2,
            RootParameter::DescriptorTable { .. } => 1,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SamplerFilter {
    Point,
    Linear,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddressMode {
    Wrap,
    Clamp,
    Mirror,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StaticSampler {
    pub register: u32,
    pub space: u32,
    pub filter: SamplerFilter,
    pub address: AddressMode,
    pub visibility: ShaderVisibility,
}

/// Resource-binding layout expected by a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
    pub allow_input_layout: bool,
}

impl RootSignatureDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_input_layout(mut self) -> Self {
        self.allow_input_layout = true;
        self
    }

    pub fn constants(mut self, register: u32, count: u32, visibility: ShaderVisibility) -> Self {
        self.parameters.push(RootParameter::Constants {
            register,
            space: 0,
            count,
            visibility,
        });
        self
    }

    pub fn constant_buffer(mut self, register: u32, visibility: ShaderVisibility) -> Self {
        self.parameters.push(RootParameter::ConstantBuffer {
            register,
            space: 0,
            visibility,
        });
        self
    }

    pub fn shader_resource(mut self, register: u32, visibility: ShaderVisibility) -> Self {
        self.parameters.push(RootParameter::ShaderResource {
            register,
            space: 0,
            visibility,
        });
        self
    }

    pub fn table(mut self, ranges: Vec<DescriptorRange>, visibility: ShaderVisibility) -> Self {
        self.parameters
            .push(RootParameter::DescriptorTable { ranges, visibility });
        self
    }

    pub fn static_sampler(mut self, sampler: StaticSampler) -> Self {
        self.static_samplers.push(sampler);
        self
    }

    /// Total size in DWORDs. Summed wide so huge constant counts cannot wrap.
    pub fn cost(&self) -> u64 {
        self.parameters
            .iter()
            .map(|p| u64::from(p.cost()))
            .sum()
    }

    pub fn validate(&self) -> GpuResult<()> {
        let cost = self.cost();
        if cost > u64::from(MAX_ROOT_COST) {
            return Err(GpuError::RootSignature(format!(
                "cost {cost} DWORDs exceeds {MAX_ROOT_COST}"
            )));
        }

        for (index, param) in self.parameters.iter().enumerate() {
            match param {
                RootParameter::Constants { count: 0, .. } => {
                    return Err(GpuError::RootSignature(format!(
                        "parameter {index}: zero root constants"
                    )));
                }
                RootParameter::DescriptorTable { ranges, .. } => {
                    if ranges.is_empty() {
                        return Err(GpuError::RootSignature(format!(
                            "parameter {index}: empty descriptor table"
                        )));
                    }
                    if ranges.iter().any(|r| r.count == 0) {
                        return Err(GpuError::RootSignature(format!(
                            "parameter {index}: empty descriptor range"
                        )));
                    }
                    let samplers = ranges.iter().filter(|r| r.kind == RangeKind::Sampler).count();
                    if samplers != 0 && samplers != ranges.len() {
                        return Err(GpuError::RootSignature(format!(
                            "parameter {index}: sampler ranges mixed with other ranges"
                        )));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Created root signature. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RootSignature {
    id: RootSignatureId,
    desc: Arc<RootSignatureDesc>,
}

impl RootSignature {
    pub(crate) fn new(id: RootSignatureId, desc: RootSignatureDesc) -> Self {
        Self {
            id,
            desc: Arc::new(desc),
        }
    }

    pub fn id(&self) -> RootSignatureId {
        self.id
    }

    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }

    pub fn parameter_kind(&self, index: u32) -> Option<RootParameterKind> {
        self.desc.parameters.get(index as usize).map(RootParameter::kind)
    }

    /// Number of 32-bit values in a constants parameter.
    pub fn constants_count(&self, index: u32) -> Option<u32> {
        match self.desc.parameters.get(index as usize) {
            Some(RootParameter::Constants { count, .. }) => Some(*count),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srv(count: u32) -> DescriptorRange {
        DescriptorRange {
            kind: RangeKind::Srv,
            count,
            base_register: 0,
            space: 0,
        }
    }

    #[test]
    fn cost_counts_dwords() {
        let desc = RootSignatureDesc::new()
            .constants(0, 4, ShaderVisibility::All)
            .constant_buffer(1, ShaderVisibility::Vertex)
            .table(vec![srv(8)], ShaderVisibility::Pixel);
        assert_eq!(desc.cost(), 4 + 2 + 1);
        desc.validate().unwrap();
    }

    #[test]
    fn over_budget_is_rejected() {
        let desc = RootSignatureDesc::new().constants(0, 65, ShaderVisibility::All);
        assert!(matches!(desc.validate(), Err(GpuError::RootSignature(_))));
    }

    #[test]
    fn huge_constant_counts_do_not_wrap() {
        let desc = RootSignatureDesc::new()
            .constants(0, u32::MAX, ShaderVisibility::All)
            .constants(1, 1, ShaderVisibility::All);
        assert_eq!(desc.cost(), u64::from(u32::MAX) + 1);
        assert!(matches!(desc.validate(), Err(GpuError::RootSignature(_))));
    }

    #[test]
    fn exactly_at_budget_is_accepted() {
        let desc = RootSignatureDesc::new()
            .constants(0, 62, ShaderVisibility::All)
            .constant_buffer(0, ShaderVisibility::All);
        desc.validate().unwrap();
    }

    #[test]
    fn empty_table_is_rejected() {
        let desc = RootSignatureDesc::new().table(vec![], ShaderVisibility::All);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn samplers_cannot_share_a_table() {
        let sampler = DescriptorRange {
            kind: RangeKind::Sampler,
            ..srv(1)
        };
        let desc = RootSignatureDesc::new().table(vec![srv(1), sampler], ShaderVisibility::Pixel);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn parameter_kinds_are_exposed() {
        let rs = RootSignature::new(
            RootSignatureId(0),
            RootSignatureDesc::new()
                .constant_buffer(0, ShaderVisibility::All)
                .constants(1, 3, ShaderVisibility::Pixel),
        );
        assert_eq!(rs.parameter_kind(0), Some(RootParameterKind::ConstantBuffer));
        assert_eq!(rs.constants_count(1), Some(3));
        assert_eq!(rs.parameter_kind(2), None);
    }
}
