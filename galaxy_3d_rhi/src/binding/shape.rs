//! Quantized resource shapes, the cache key of binding layouts

use bitflags::bitflags;

use super::{ResourceKind, ShaderMetadataProvider, ShaderResourceCounts, ShaderVisibility};
use crate::config::{DeviceCapabilities, ResourceBindingTier};
use crate::error::{Error, Result};

bitflags! {
    /// Layout-wide features a shader combination needs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShapeFlags: u8 {
        /// Vertex input is read through the input assembler
        const INPUT_ASSEMBLER = 1 << 0;
        /// Four 32-bit root constants are read
        const ROOT_CONSTANTS = 1 << 1;
        /// The diagnostic read/write buffer is written
        const DIAGNOSTIC_BUFFER = 1 << 2;
    }
}

/// Quantized counts of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QuantizedStageCounts {
    /// Constant buffers bound directly, registers `0..direct_constant_buffers`
    pub direct_constant_buffers: u32,
    /// Constant buffers spilled to a table, registers after the direct ones
    pub constant_buffer_table: u32,
    pub shader_resources: u32,
    pub unordered_access: u32,
    pub samplers: u32,
}

impl QuantizedStageCounts {
    pub fn is_empty(&self) -> bool {
        self.direct_constant_buffers == 0
            && self.constant_buffer_table == 0
            && self.shader_resources == 0
            && self.unordered_access == 0
            && self.samplers == 0
    }

    /// Length of the descriptor table of `kind`, 0 if the stage has none
    pub fn table_length(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::ConstantBuffer => self.constant_buffer_table,
            ResourceKind::ShaderResource => self.shader_resources,
            ResourceKind::UnorderedAccess => self.unordered_access,
            ResourceKind::Sampler => self.samplers,
        }
    }

    /// Total constant buffer registers covered
    pub fn constant_buffers(&self) -> u32 {
        self.direct_constant_buffers + self.constant_buffer_table
    }
}

fn round_up_pow2(count: u32, max: u32) -> u32 {
    if count == 0 {
        0
    } else {
        count.next_power_of_two().min(max)
    }
}

fn quantize_stage(
    tier: ResourceBindingTier,
    max_direct_constant_buffers: u32,
    stage: ShaderVisibility,
    counts: &ShaderResourceCounts,
) -> Result<QuantizedStageCounts> {
    for kind in ResourceKind::ALL {
        if counts.get(kind) > kind.max_per_stage() {
            return Err(Error::UnsupportedBinding(format!(
                "{:?} stage declares {} {:?} bindings, at most {} are supported",
                stage,
                counts.get(kind),
                kind,
                kind.max_per_stage()
            )));
        }
    }
    if counts.unordered_access > 0 && !stage.allows_unordered_access() {
        return Err(Error::UnsupportedBinding(format!(
            "{:?} stage cannot bind read/write views",
            stage
        )));
    }

    let direct = counts.constant_buffers.min(max_direct_constant_buffers);
    let spilled = counts.constant_buffers - direct;
    let max_cb = ResourceKind::ConstantBuffer.max_per_stage();

    // Tier 1 tables must match the layout for read views and samplers, tier 2
    // for constant buffers and read/write views
    let (shader_resources, samplers) = if tier <= ResourceBindingTier::Tier1 {
        (
            round_up_pow2(counts.shader_resources, ResourceKind::ShaderResource.max_per_stage()),
            round_up_pow2(counts.samplers, ResourceKind::Sampler.max_per_stage()),
        )
    } else {
        (counts.shader_resources, counts.samplers)
    };
    let (constant_buffer_table, unordered_access) = if tier <= ResourceBindingTier::Tier2 {
        (
            round_up_pow2(spilled, max_cb - direct),
            round_up_pow2(counts.unordered_access, ResourceKind::UnorderedAccess.max_per_stage()),
        )
    } else {
        (spilled, counts.unordered_access)
    };

    Ok(QuantizedStageCounts {
        direct_constant_buffers: direct,
        constant_buffer_table,
        shader_resources,
        unordered_access,
        samplers,
    })
}

/// Canonical, hashable description of what a shader combination binds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuantizedBindingShape {
    pub tier: ResourceBindingTier,
    pub stages: [QuantizedStageCounts; ShaderVisibility::COUNT],
    pub flags: ShapeFlags,
}

impl QuantizedBindingShape {
    /// Quantize the stages a shader combination declares
    ///
    /// Flags the device does not support are dropped.
    pub fn from_counts(
        caps: &DeviceCapabilities,
        stages: &[(ShaderVisibility, ShaderResourceCounts)],
        flags: ShapeFlags,
    ) -> Result<Self> {
        let mut quantized = [QuantizedStageCounts::default(); ShaderVisibility::COUNT];
        for (stage, counts) in stages {
            quantized[stage.index()] = quantize_stage(
                caps.resource_binding_tier,
                caps.max_direct_constant_buffers,
                *stage,
                counts,
            )?;
        }

        let mut flags = flags;
        if !caps.supports_root_constants {
            flags.remove(ShapeFlags::ROOT_CONSTANTS);
        }
        if !caps.supports_diagnostic_buffer {
            flags.remove(ShapeFlags::DIAGNOSTIC_BUFFER);
        }

        Ok(Self {
            tier: caps.resource_binding_tier,
            stages: quantized,
            flags,
        })
    }

    /// Quantize what a metadata provider reports
    pub fn quantize(caps: &DeviceCapabilities, provider: &dyn ShaderMetadataProvider) -> Result<Self> {
        let stages: Vec<(ShaderVisibility, ShaderResourceCounts)> = ShaderVisibility::PRIORITY
            .iter()
            .filter_map(|stage| provider.resource_counts(*stage).map(|counts| (*stage, counts)))
            .collect();

        let mut flags = ShapeFlags::empty();
        flags.set(ShapeFlags::INPUT_ASSEMBLER, provider.uses_input_assembler());
        flags.set(ShapeFlags::ROOT_CONSTANTS, provider.uses_root_constants());
        flags.set(ShapeFlags::DIAGNOSTIC_BUFFER, provider.uses_diagnostic_buffer());

        Self::from_counts(caps, &stages, flags)
    }

    pub fn stage(&self, stage: ShaderVisibility) -> &QuantizedStageCounts {
        &self.stages[stage.index()]
    }
}
