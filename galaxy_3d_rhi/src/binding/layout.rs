//! Binding layout construction

use slotmap::new_key_type;

use super::{QuantizedBindingShape, ResourceKind, ShaderVisibility, ShapeFlags, StageMask};
use crate::config::{DeviceCapabilities, ResourceBindingTier};
use crate::error::{Error, Result};

new_key_type! {
    /// Identity of a cached binding layout
    pub struct LayoutId;
}

/// Binding units of one descriptor table slot
const TABLE_COST: u32 = 1;
/// Binding units of one directly bound descriptor
const DIRECT_COST: u32 = 2;
/// 32-bit values in the root constants slot
pub const ROOT_CONSTANT_COUNT: u32 = 4;

/// Whether table contents may change after the table is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorVolatility {
    /// Descriptors may change until the GPU reads them (tiers 1 and 2)
    Volatile,
    /// Descriptors and data stay unchanged while set at execute (tier 3)
    StaticWhileSetAtExecute,
}

impl DescriptorVolatility {
    fn for_tier(tier: ResourceBindingTier) -> Self {
        if tier.descriptors_volatile() {
            DescriptorVolatility::Volatile
        } else {
            DescriptorVolatility::StaticWhileSetAtExecute
        }
    }
}

/// How a layout slot delivers its bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotScope {
    /// Points at `length` consecutive heap descriptors
    Table {
        length: u32,
        volatility: DescriptorVolatility,
    },
    /// One descriptor bound inline, by GPU address
    Direct,
    /// 32-bit values embedded in the layout
    RootConstants { values: u32 },
}

/// One slot of a binding layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    /// Position in the layout, used by `SetDescriptorTable` and friends
    pub root_index: u32,
    pub kind: ResourceKind,
    pub scope: SlotScope,
    pub visibility: ShaderVisibility,
    /// First shader register covered
    pub base_register: u32,
    /// Engine-wide slot appended after the shader-visible ones
    pub reserved: bool,
}

impl BindingSlot {
    /// Binding units the slot consumes
    pub fn cost(&self) -> u32 {
        match self.scope {
            SlotScope::Table { .. } => TABLE_COST,
            SlotScope::Direct => DIRECT_COST,
            SlotScope::RootConstants { values } => values,
        }
    }
}

/// Compiled slot assignments for one quantized shape
#[derive(Debug, Clone)]
pub struct BindingLayout {
    id: LayoutId,
    shape: QuantizedBindingShape,
    slots: Vec<BindingSlot>,
    denied: StageMask,
    tables: [[Option<u32>; ResourceKind::COUNT]; ShaderVisibility::COUNT],
    direct_constant_buffers: [Option<u32>; ShaderVisibility::COUNT],
    cost: u32,
    budget: u32,
}

/// Layout order of table kinds
const TABLE_ORDER: [ResourceKind; 4] = [
    ResourceKind::ShaderResource,
    ResourceKind::ConstantBuffer,
    ResourceKind::Sampler,
    ResourceKind::UnorderedAccess,
];

/// Binding units the device reserves in every layout
pub(crate) fn reserved_cost(caps: &DeviceCapabilities) -> u32 {
    let mut cost = 0;
    if caps.supports_root_constants {
        cost += ROOT_CONSTANT_COUNT;
    }
    if caps.supports_diagnostic_buffer {
        cost += DIRECT_COST;
    }
    cost
}

impl BindingLayout {
    /// Compile `shape` for a device
    ///
    /// Tables come first (read views, spilled constant buffers, samplers,
    /// read/write views), each kind walking the stages in priority order, then
    /// one direct slot per directly bound constant buffer. Reserved slots are
    /// appended last and do not count against the budget.
    pub fn build(shape: &QuantizedBindingShape, caps: &DeviceCapabilities) -> Result<Self> {
        let volatility = DescriptorVolatility::for_tier(shape.tier);
        let mut slots = Vec::new();
        let mut tables = [[None; ResourceKind::COUNT]; ShaderVisibility::COUNT];
        let mut direct_constant_buffers = [None; ShaderVisibility::COUNT];

        for kind in TABLE_ORDER {
            for stage in ShaderVisibility::PRIORITY {
                let counts = shape.stage(stage);
                let length = counts.table_length(kind);
                if length == 0 {
                    continue;
                }
                let base_register = match kind {
                    ResourceKind::ConstantBuffer => counts.direct_constant_buffers,
                    _ => 0,
                };
                let root_index = slots.len() as u32;
                tables[stage.index()][kind.index()] = Some(root_index);
                slots.push(BindingSlot {
                    root_index,
                    kind,
                    scope: SlotScope::Table { length, volatility },
                    visibility: stage,
                    base_register,
                    reserved: false,
                });
            }
        }

        for stage in ShaderVisibility::PRIORITY {
            let count = shape.stage(stage).direct_constant_buffers;
            if count == 0 {
                continue;
            }
            direct_constant_buffers[stage.index()] = Some(slots.len() as u32);
            for register in 0..count {
                slots.push(BindingSlot {
                    root_index: slots.len() as u32,
                    kind: ResourceKind::ConstantBuffer,
                    scope: SlotScope::Direct,
                    visibility: stage,
                    base_register: register,
                    reserved: false,
                });
            }
        }

        let cost: u32 = slots.iter().map(BindingSlot::cost).sum();
        let budget = caps.max_binding_cost.saturating_sub(reserved_cost(caps));
        if cost > budget {
            return Err(crate::engine_report!(
                "galaxy3d::rhi::BindingLayout",
                Error::LayoutOverflow { required: cost, budget }
            ));
        }

        if shape.flags.contains(ShapeFlags::ROOT_CONSTANTS) {
            slots.push(BindingSlot {
                root_index: slots.len() as u32,
                kind: ResourceKind::ConstantBuffer,
                scope: SlotScope::RootConstants { values: ROOT_CONSTANT_COUNT },
                visibility: ShaderVisibility::All,
                base_register: 0,
                reserved: true,
            });
        }
        if shape.flags.contains(ShapeFlags::DIAGNOSTIC_BUFFER) {
            slots.push(BindingSlot {
                root_index: slots.len() as u32,
                kind: ResourceKind::UnorderedAccess,
                scope: SlotScope::Direct,
                visibility: ShaderVisibility::All,
                base_register: 0,
                reserved: true,
            });
        }

        let denied = ShaderVisibility::PRIORITY
            .iter()
            .filter(|stage| shape.stage(**stage).is_empty())
            .fold(StageMask::empty(), |mask, stage| mask | stage.stage_mask());

        Ok(Self {
            id: LayoutId::default(),
            shape: shape.clone(),
            slots,
            denied,
            tables,
            direct_constant_buffers,
            cost,
            budget,
        })
    }

    pub(crate) fn with_id(self, id: LayoutId) -> Self {
        Self { id, ..self }
    }

    /// Cache identity; the null key for layouts built outside a cache
    pub fn id(&self) -> LayoutId {
        self.id
    }

    pub fn shape(&self) -> &QuantizedBindingShape {
        &self.shape
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Stages the layout exposes nothing to
    pub fn denied_stages(&self) -> StageMask {
        self.denied
    }

    pub fn is_stage_denied(&self, stage: ShaderVisibility) -> bool {
        self.denied.contains(stage.stage_mask())
    }

    /// Binding units used by shader-visible slots
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Binding units available to shader-visible slots
    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn table_slot(&self, stage: ShaderVisibility, kind: ResourceKind) -> Option<&BindingSlot> {
        self.tables[stage.index()][kind.index()].map(|index| &self.slots[index as usize])
    }

    pub fn table_length(&self, stage: ShaderVisibility, kind: ResourceKind) -> u32 {
        self.shape.stage(stage).table_length(kind)
    }

    pub fn direct_constant_buffer_count(&self, stage: ShaderVisibility) -> u32 {
        self.shape.stage(stage).direct_constant_buffers
    }

    /// Direct slot of constant buffer `register`, if it is bound directly
    pub fn direct_constant_buffer_slot(&self, stage: ShaderVisibility, register: u32) -> Option<&BindingSlot> {
        if register >= self.direct_constant_buffer_count(stage) {
            return None;
        }
        self.direct_constant_buffers[stage.index()]
            .map(|first| &self.slots[(first + register) as usize])
    }

    pub fn root_constants_slot(&self) -> Option<&BindingSlot> {
        self.slots
            .iter()
            .find(|slot| matches!(slot.scope, SlotScope::RootConstants { .. }))
    }

    pub fn diagnostic_buffer_slot(&self) -> Option<&BindingSlot> {
        self.slots
            .iter()
            .find(|slot| slot.reserved && slot.kind == ResourceKind::UnorderedAccess)
    }

    /// Number of descriptor table slots
    pub fn table_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.scope, SlotScope::Table { .. }))
            .count()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
