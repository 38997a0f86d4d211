//! Shader metadata consumed by layout construction

use super::{ShaderResourceCounts, ShaderVisibility};

/// Source of per-stage resource counts for a shader combination
///
/// Implemented by whatever owns compiled shaders; this crate never looks at
/// shader bytecode.
pub trait ShaderMetadataProvider {
    /// Counts declared by the shader bound to `stage`, `None` if no shader is bound
    fn resource_counts(&self, stage: ShaderVisibility) -> Option<ShaderResourceCounts>;

    fn uses_root_constants(&self) -> bool {
        false
    }

    fn uses_diagnostic_buffer(&self) -> bool {
        false
    }

    fn uses_input_assembler(&self) -> bool {
        false
    }
}

/// Plain-data shader metadata
///
/// # Example
///
/// ```
/// use galaxy_3d_rhi::galaxy3d::binding::{ShaderReflection, ShaderResourceCounts, ShaderVisibility};
///
/// let reflection = ShaderReflection::graphics()
///     .with_stage(ShaderVisibility::Vertex, ShaderResourceCounts::new(1, 0, 0, 0))
///     .with_stage(ShaderVisibility::Pixel, ShaderResourceCounts::new(2, 5, 0, 1));
/// assert!(reflection.stage(ShaderVisibility::Geometry).is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    stages: [Option<ShaderResourceCounts>; ShaderVisibility::COUNT],
    root_constants: bool,
    diagnostic_buffer: bool,
    input_assembler: bool,
}

impl ShaderReflection {
    /// Graphics combination reading vertex input
    pub fn graphics() -> Self {
        Self {
            input_assembler: true,
            ..Self::default()
        }
    }

    /// Compute shader; its bindings are visible to every stage
    pub fn compute(counts: ShaderResourceCounts) -> Self {
        Self::default().with_stage(ShaderVisibility::All, counts)
    }

    pub fn with_stage(mut self, stage: ShaderVisibility, counts: ShaderResourceCounts) -> Self {
        self.stages[stage.index()] = Some(counts);
        self
    }

    pub fn with_root_constants(mut self) -> Self {
        self.root_constants = true;
        self
    }

    pub fn with_diagnostic_buffer(mut self) -> Self {
        self.diagnostic_buffer = true;
        self
    }

    pub fn stage(&self, stage: ShaderVisibility) -> Option<&ShaderResourceCounts> {
        self.stages[stage.index()].as_ref()
    }

    /// Stages with a shader bound, in layout priority order
    pub fn bound_stages(&self) -> impl Iterator<Item = (ShaderVisibility, ShaderResourceCounts)> + '_ {
        ShaderVisibility::PRIORITY
            .into_iter()
            .filter_map(move |stage| self.stages[stage.index()].map(|counts| (stage, counts)))
    }
}

impl ShaderMetadataProvider for ShaderReflection {
    fn resource_counts(&self, stage: ShaderVisibility) -> Option<ShaderResourceCounts> {
        self.stages[stage.index()]
    }

    fn uses_root_constants(&self) -> bool {
        self.root_constants
    }

    fn uses_diagnostic_buffer(&self) -> bool {
        self.diagnostic_buffer
    }

    fn uses_input_assembler(&self) -> bool {
        self.input_assembler
    }
}
