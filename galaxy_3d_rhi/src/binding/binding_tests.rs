use super::*;
use crate::config::{DeviceCapabilities, ResourceBindingTier};
use crate::error::Error;

fn caps(tier: ResourceBindingTier) -> DeviceCapabilities {
    DeviceCapabilities {
        resource_binding_tier: tier,
        ..DeviceCapabilities::default()
    }
}

fn quantize_pixel(tier: ResourceBindingTier, counts: ShaderResourceCounts) -> QuantizedStageCounts {
    let shape = QuantizedBindingShape::from_counts(
        &caps(tier),
        &[(ShaderVisibility::Pixel, counts)],
        ShapeFlags::empty(),
    )
    .unwrap();
    *shape.stage(ShaderVisibility::Pixel)
}

// ============================================================================
// Enumerations
// ============================================================================

#[test]
fn test_priority_covers_every_stage_once() {
    let mut indices: Vec<usize> = ShaderVisibility::PRIORITY.iter().map(|s| s.index()).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(ShaderVisibility::PRIORITY[0], ShaderVisibility::Pixel);
}

#[test]
fn test_unordered_access_stages() {
    assert!(ShaderVisibility::Pixel.allows_unordered_access());
    assert!(ShaderVisibility::Vertex.allows_unordered_access());
    assert!(ShaderVisibility::All.allows_unordered_access());
    assert!(!ShaderVisibility::Geometry.allows_unordered_access());
    assert!(!ShaderVisibility::Mesh.allows_unordered_access());
}

#[test]
fn test_samplers_use_sampler_heap() {
    assert_eq!(ResourceKind::Sampler.heap_type(), DescriptorHeapType::Sampler);
    assert_eq!(ResourceKind::ShaderResource.heap_type(), DescriptorHeapType::View);
}

#[test]
fn test_counts_accessors() {
    let counts = ShaderResourceCounts::new(2, 5, 0, 1);
    assert_eq!(counts.get(ResourceKind::ConstantBuffer), 2);
    assert_eq!(counts.get(ResourceKind::ShaderResource), 5);
    assert_eq!(counts.get(ResourceKind::Sampler), 1);
    assert!(!counts.is_empty());
    assert!(ShaderResourceCounts::default().is_empty());
}

// ============================================================================
// Quantization
// ============================================================================

#[test]
fn test_tier3_keeps_exact_counts() {
    let q = quantize_pixel(ResourceBindingTier::Tier3, ShaderResourceCounts::new(6, 5, 3, 3));
    assert_eq!(q.direct_constant_buffers, 4);
    assert_eq!(q.constant_buffer_table, 2);
    assert_eq!(q.shader_resources, 5);
    assert_eq!(q.unordered_access, 3);
    assert_eq!(q.samplers, 3);
}

#[test]
fn test_tier1_rounds_views_and_samplers() {
    let q = quantize_pixel(ResourceBindingTier::Tier1, ShaderResourceCounts::new(0, 5, 3, 3));
    assert_eq!(q.shader_resources, 8);
    assert_eq!(q.samplers, 4);
    assert_eq!(q.unordered_access, 4);
}

#[test]
fn test_tier2_rounds_spill_and_read_write_only() {
    let q = quantize_pixel(ResourceBindingTier::Tier2, ShaderResourceCounts::new(7, 5, 3, 3));
    assert_eq!(q.direct_constant_buffers, 4);
    assert_eq!(q.constant_buffer_table, 4);
    assert_eq!(q.shader_resources, 5);
    assert_eq!(q.samplers, 3);
    assert_eq!(q.unordered_access, 4);
}

#[test]
fn test_rounding_clamps_to_maximum() {
    let q = quantize_pixel(ResourceBindingTier::Tier1, ShaderResourceCounts::new(0, 40, 0, 0));
    assert_eq!(q.shader_resources, 64);

    let q = quantize_pixel(ResourceBindingTier::Tier2, ShaderResourceCounts::new(16, 0, 0, 0));
    assert_eq!(q.constant_buffers(), 16);
}

#[test]
fn test_few_constant_buffers_are_all_direct() {
    let q = quantize_pixel(ResourceBindingTier::Tier1, ShaderResourceCounts::new(2, 0, 0, 0));
    assert_eq!(q.direct_constant_buffers, 2);
    assert_eq!(q.constant_buffer_table, 0);
}

#[test]
fn test_read_write_views_rejected_on_geometry() {
    let result = QuantizedBindingShape::from_counts(
        &caps(ResourceBindingTier::Tier3),
        &[(ShaderVisibility::Geometry, ShaderResourceCounts::new(0, 0, 1, 0))],
        ShapeFlags::empty(),
    );
    assert!(matches!(result, Err(Error::UnsupportedBinding(_))));
}

#[test]
fn test_too_many_bindings_rejected() {
    let result = QuantizedBindingShape::from_counts(
        &caps(ResourceBindingTier::Tier3),
        &[(ShaderVisibility::Pixel, ShaderResourceCounts::new(0, 0, 0, 17))],
        ShapeFlags::empty(),
    );
    assert!(matches!(result, Err(Error::UnsupportedBinding(_))));
}

#[test]
fn test_unsupported_flags_dropped() {
    let device = DeviceCapabilities {
        supports_root_constants: false,
        supports_diagnostic_buffer: false,
        ..DeviceCapabilities::default()
    };
    let shape = QuantizedBindingShape::from_counts(
        &device,
        &[],
        ShapeFlags::ROOT_CONSTANTS | ShapeFlags::DIAGNOSTIC_BUFFER | ShapeFlags::INPUT_ASSEMBLER,
    )
    .unwrap();
    assert_eq!(shape.flags, ShapeFlags::INPUT_ASSEMBLER);
}

#[test]
fn test_quantize_from_reflection() {
    let reflection = ShaderReflection::graphics()
        .with_stage(ShaderVisibility::Vertex, ShaderResourceCounts::new(1, 0, 0, 0))
        .with_stage(ShaderVisibility::Pixel, ShaderResourceCounts::new(2, 5, 0, 1))
        .with_root_constants();
    let shape = QuantizedBindingShape::quantize(&DeviceCapabilities::default(), &reflection).unwrap();

    assert_eq!(shape.stage(ShaderVisibility::Vertex).direct_constant_buffers, 1);
    assert_eq!(shape.stage(ShaderVisibility::Pixel).shader_resources, 5);
    assert!(shape.stage(ShaderVisibility::Geometry).is_empty());
    assert!(shape.flags.contains(ShapeFlags::INPUT_ASSEMBLER | ShapeFlags::ROOT_CONSTANTS));
}

#[test]
fn test_equal_inputs_give_equal_shapes() {
    let a = ShaderReflection::compute(ShaderResourceCounts::new(1, 3, 2, 0));
    let b = ShaderReflection::compute(ShaderResourceCounts::new(1, 3, 2, 0));
    let caps = DeviceCapabilities::default();
    assert_eq!(
        QuantizedBindingShape::quantize(&caps, &a).unwrap(),
        QuantizedBindingShape::quantize(&caps, &b).unwrap()
    );
}

#[test]
fn test_reflection_bound_stages_in_priority_order() {
    let reflection = ShaderReflection::graphics()
        .with_stage(ShaderVisibility::Vertex, ShaderResourceCounts::default())
        .with_stage(ShaderVisibility::Pixel, ShaderResourceCounts::default());
    let stages: Vec<ShaderVisibility> = reflection.bound_stages().map(|(s, _)| s).collect();
    assert_eq!(stages, vec![ShaderVisibility::Pixel, ShaderVisibility::Vertex]);
}
