use super::*;
use crate::binding::{QuantizedBindingShape, ShaderResourceCounts, ShapeFlags};

fn build(
    caps: &DeviceCapabilities,
    stages: &[(ShaderVisibility, ShaderResourceCounts)],
    flags: ShapeFlags,
) -> Result<BindingLayout> {
    let shape = QuantizedBindingShape::from_counts(caps, stages, flags)?;
    BindingLayout::build(&shape, caps)
}

#[test]
fn test_two_constants_five_views_one_sampler() {
    let caps = DeviceCapabilities::default();
    let layout = build(
        &caps,
        &[(ShaderVisibility::Pixel, ShaderResourceCounts::new(2, 5, 0, 1))],
        ShapeFlags::empty(),
    )
    .unwrap();

    let views = layout
        .table_slot(ShaderVisibility::Pixel, ResourceKind::ShaderResource)
        .unwrap();
    assert!(matches!(views.scope, SlotScope::Table { length: 5, .. }));

    let samplers = layout.table_slot(ShaderVisibility::Pixel, ResourceKind::Sampler).unwrap();
    assert!(matches!(samplers.scope, SlotScope::Table { length: 1, .. }));

    assert!(layout.table_slot(ShaderVisibility::Pixel, ResourceKind::ConstantBuffer).is_none());
    assert!(layout.table_slot(ShaderVisibility::Pixel, ResourceKind::UnorderedAccess).is_none());
    assert_eq!(layout.table_count(), 2);

    let direct: Vec<&BindingSlot> = layout
        .slots()
        .iter()
        .filter(|slot| slot.scope == SlotScope::Direct)
        .collect();
    assert_eq!(direct.len(), 2);
    assert!(direct.iter().all(|slot| slot.kind == ResourceKind::ConstantBuffer));
    assert_eq!(direct[0].base_register, 0);
    assert_eq!(direct[1].base_register, 1);
    assert_eq!(layout.cost(), 2 * TABLE_COST + 2 * DIRECT_COST);
}

#[test]
fn test_tables_precede_direct_slots() {
    let caps = DeviceCapabilities::default();
    let layout = build(
        &caps,
        &[
            (ShaderVisibility::Vertex, ShaderResourceCounts::new(1, 2, 0, 0)),
            (ShaderVisibility::Pixel, ShaderResourceCounts::new(6, 3, 1, 2)),
        ],
        ShapeFlags::empty(),
    )
    .unwrap();

    let order: Vec<(ResourceKind, ShaderVisibility, bool)> = layout
        .slots()
        .iter()
        .map(|s| (s.kind, s.visibility, matches!(s.scope, SlotScope::Table { .. })))
        .collect();

    assert_eq!(
        &order[..5],
        &[
            (ResourceKind::ShaderResource, ShaderVisibility::Pixel, true),
            (ResourceKind::ShaderResource, ShaderVisibility::Vertex, true),
            (ResourceKind::ConstantBuffer, ShaderVisibility::Pixel, true),
            (ResourceKind::Sampler, ShaderVisibility::Pixel, true),
            (ResourceKind::UnorderedAccess, ShaderVisibility::Pixel, true),
        ]
    );
    // 4 direct pixel buffers, then 1 direct vertex buffer
    assert_eq!(order.len(), 10);
    assert!(order[5..9]
        .iter()
        .all(|s| *s == (ResourceKind::ConstantBuffer, ShaderVisibility::Pixel, false)));
    assert_eq!(order[9], (ResourceKind::ConstantBuffer, ShaderVisibility::Vertex, false));

    // Spilled buffers continue after the direct registers
    let spill = layout
        .table_slot(ShaderVisibility::Pixel, ResourceKind::ConstantBuffer)
        .unwrap();
    assert_eq!(spill.base_register, 4);
    assert_eq!(layout.direct_constant_buffer_slot(ShaderVisibility::Pixel, 3).unwrap().root_index, 8);
    assert!(layout.direct_constant_buffer_slot(ShaderVisibility::Pixel, 4).is_none());
}

#[test]
fn test_root_indices_are_positions() {
    let caps = DeviceCapabilities::default();
    let layout = build(
        &caps,
        &[(ShaderVisibility::All, ShaderResourceCounts::new(3, 4, 2, 1))],
        ShapeFlags::ROOT_CONSTANTS,
    )
    .unwrap();
    for (index, slot) in layout.slots().iter().enumerate() {
        assert_eq!(slot.root_index as usize, index);
    }
}

#[test]
fn test_empty_stages_are_denied() {
    let caps = DeviceCapabilities::default();
    let layout = build(
        &caps,
        &[
            (ShaderVisibility::Vertex, ShaderResourceCounts::new(1, 0, 0, 0)),
            (ShaderVisibility::Pixel, ShaderResourceCounts::new(0, 1, 0, 0)),
            (ShaderVisibility::Geometry, ShaderResourceCounts::default()),
        ],
        ShapeFlags::empty(),
    )
    .unwrap();

    assert!(!layout.is_stage_denied(ShaderVisibility::Vertex));
    assert!(!layout.is_stage_denied(ShaderVisibility::Pixel));
    for stage in [
        ShaderVisibility::Geometry,
        ShaderVisibility::Mesh,
        ShaderVisibility::Amplification,
        ShaderVisibility::All,
    ] {
        assert!(layout.is_stage_denied(stage), "{:?} should be denied", stage);
    }
    assert_eq!(
        layout.denied_stages(),
        StageMask::GEOMETRY | StageMask::MESH | StageMask::AMPLIFICATION | StageMask::ALL_STAGES
    );
}

#[test]
fn test_volatility_follows_tier() {
    for (tier, expected) in [
        (ResourceBindingTier::Tier1, DescriptorVolatility::Volatile),
        (ResourceBindingTier::Tier2, DescriptorVolatility::Volatile),
        (ResourceBindingTier::Tier3, DescriptorVolatility::StaticWhileSetAtExecute),
    ] {
        let caps = DeviceCapabilities {
            resource_binding_tier: tier,
            ..DeviceCapabilities::default()
        };
        let layout = build(
            &caps,
            &[(ShaderVisibility::Pixel, ShaderResourceCounts::new(0, 1, 0, 0))],
            ShapeFlags::empty(),
        )
        .unwrap();
        assert_eq!(
            layout.slots()[0].scope,
            SlotScope::Table {
                length: 1,
                volatility: expected
            }
        );
    }
}

#[test]
fn test_reserved_slots_appended_and_excluded_from_budget() {
    let caps = DeviceCapabilities {
        supports_root_constants: true,
        supports_diagnostic_buffer: true,
        ..DeviceCapabilities::default()
    };
    let layout = build(
        &caps,
        &[(ShaderVisibility::Pixel, ShaderResourceCounts::new(1, 1, 0, 0))],
        ShapeFlags::ROOT_CONSTANTS | ShapeFlags::DIAGNOSTIC_BUFFER,
    )
    .unwrap();

    let slots = layout.slots();
    let constants = layout.root_constants_slot().unwrap();
    let diagnostic = layout.diagnostic_buffer_slot().unwrap();
    assert_eq!(constants.root_index as usize, slots.len() - 2);
    assert_eq!(diagnostic.root_index as usize, slots.len() - 1);
    assert!(constants.reserved && diagnostic.reserved);
    assert!(slots[..slots.len() - 2].iter().all(|slot| !slot.reserved));

    assert_eq!(layout.budget(), 64 - ROOT_CONSTANT_COUNT - DIRECT_COST);
    assert_eq!(layout.cost(), TABLE_COST + DIRECT_COST);
}

#[test]
fn test_overflow_is_a_build_error() {
    let caps = DeviceCapabilities {
        max_binding_cost: 12,
        supports_root_constants: true,
        ..DeviceCapabilities::default()
    };
    // 4 direct buffers (8 units) + 1 view table on each of two stages
    let result = build(
        &caps,
        &[
            (ShaderVisibility::Pixel, ShaderResourceCounts::new(4, 1, 0, 0)),
            (ShaderVisibility::Vertex, ShaderResourceCounts::new(0, 1, 0, 0)),
        ],
        ShapeFlags::empty(),
    );
    assert_eq!(
        result.unwrap_err(),
        Error::LayoutOverflow {
            required: 10,
            budget: 8
        }
    );
}

#[test]
fn test_exactly_at_budget_builds() {
    let caps = DeviceCapabilities {
        max_binding_cost: 10,
        supports_root_constants: false,
        ..DeviceCapabilities::default()
    };
    let layout = build(
        &caps,
        &[(ShaderVisibility::Pixel, ShaderResourceCounts::new(4, 1, 1, 0))],
        ShapeFlags::empty(),
    )
    .unwrap();
    assert_eq!(layout.cost(), 10);
    assert_eq!(layout.budget(), 10);
}

#[test]
fn test_build_is_deterministic() {
    let caps = DeviceCapabilities::default();
    let stages = [
        (ShaderVisibility::Vertex, ShaderResourceCounts::new(2, 3, 1, 1)),
        (ShaderVisibility::Pixel, ShaderResourceCounts::new(5, 8, 2, 4)),
    ];
    let a = build(&caps, &stages, ShapeFlags::ROOT_CONSTANTS).unwrap();
    let b = build(&caps, &stages, ShapeFlags::ROOT_CONSTANTS).unwrap();
    assert_eq!(a.slots(), b.slots());
    assert_eq!(a.denied_stages(), b.denied_stages());
}
