//! Binding layouts - compiled mappings from shader resource needs to slots
//!
//! Shader reflection yields, per visibility stage, how many constant buffers,
//! read views, read/write views and samplers a shader reads. The counts are
//! quantized into a hashable `QuantizedBindingShape`, compiled once into a
//! `BindingLayout` and cached in `BindingLayoutCache` for the lifetime of the
//! device.

mod cache;
mod layout;
mod reflection;
mod shape;

pub use cache::{BindingLayoutCache, BindingLayoutCacheStats};
pub use layout::{BindingLayout, BindingSlot, DescriptorVolatility, LayoutId, SlotScope};
pub use reflection::{ShaderMetadataProvider, ShaderReflection};
pub use shape::{QuantizedBindingShape, QuantizedStageCounts, ShapeFlags};

use bitflags::bitflags;

use crate::descriptor::DescriptorHeapType;

/// Shader stage a binding is visible to
///
/// Declaration order is the order stages are laid out in a binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderVisibility {
    Pixel,
    Vertex,
    Geometry,
    Mesh,
    Amplification,
    /// Every stage; compute shaders bind through it
    All,
}

impl ShaderVisibility {
    pub const COUNT: usize = 6;

    /// Layout priority order
    pub const PRIORITY: [ShaderVisibility; 6] = [
        ShaderVisibility::Pixel,
        ShaderVisibility::Vertex,
        ShaderVisibility::Geometry,
        ShaderVisibility::Mesh,
        ShaderVisibility::Amplification,
        ShaderVisibility::All,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Read/write views are only laid out for these stages
    pub fn allows_unordered_access(&self) -> bool {
        matches!(
            self,
            ShaderVisibility::Pixel | ShaderVisibility::Vertex | ShaderVisibility::All
        )
    }

    pub fn stage_mask(&self) -> StageMask {
        match self {
            ShaderVisibility::Pixel => StageMask::PIXEL,
            ShaderVisibility::Vertex => StageMask::VERTEX,
            ShaderVisibility::Geometry => StageMask::GEOMETRY,
            ShaderVisibility::Mesh => StageMask::MESH,
            ShaderVisibility::Amplification => StageMask::AMPLIFICATION,
            ShaderVisibility::All => StageMask::ALL_STAGES,
        }
    }
}

/// Kind of resource a shader binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    Sampler,
}

impl ResourceKind {
    pub const COUNT: usize = 4;

    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::ConstantBuffer,
        ResourceKind::ShaderResource,
        ResourceKind::UnorderedAccess,
        ResourceKind::Sampler,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Most bindings of this kind a single stage can declare
    pub fn max_per_stage(&self) -> u32 {
        match self {
            ResourceKind::ConstantBuffer => 16,
            ResourceKind::ShaderResource => 64,
            ResourceKind::UnorderedAccess => 16,
            ResourceKind::Sampler => 16,
        }
    }

    /// Heap tables of this kind live in
    pub fn heap_type(&self) -> DescriptorHeapType {
        match self {
            ResourceKind::Sampler => DescriptorHeapType::Sampler,
            _ => DescriptorHeapType::View,
        }
    }
}

bitflags! {
    /// Set of shader stages
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StageMask: u8 {
        const PIXEL = 1 << 0;
        const VERTEX = 1 << 1;
        const GEOMETRY = 1 << 2;
        const MESH = 1 << 3;
        const AMPLIFICATION = 1 << 4;
        const ALL_STAGES = 1 << 5;
    }
}

/// Resource counts one shader stage declares
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShaderResourceCounts {
    pub constant_buffers: u32,
    pub shader_resources: u32,
    pub unordered_access: u32,
    pub samplers: u32,
}

impl ShaderResourceCounts {
    pub fn new(constant_buffers: u32, shader_resources: u32, unordered_access: u32, samplers: u32) -> Self {
        Self {
            constant_buffers,
            shader_resources,
            unordered_access,
            samplers,
        }
    }

    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::ConstantBuffer => self.constant_buffers,
            ResourceKind::ShaderResource => self.shader_resources,
            ResourceKind::UnorderedAccess => self.unordered_access,
            ResourceKind::Sampler => self.samplers,
        }
    }

    pub fn is_empty(&self) -> bool {
        ResourceKind::ALL.iter().all(|kind| self.get(*kind) == 0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "binding_tests.rs"]
mod tests;
