//! Descriptors and shader-visible descriptor heaps
//!
//! A descriptor is a fixed-size plain-old-data record describing one view or
//! sampler. A descriptor heap is raw GPU-visible memory holding `capacity`
//! descriptors back to back; the GPU reads tables out of it through the base
//! slot bound by a command buffer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

/// Size in bytes of one descriptor slot
pub const DESCRIPTOR_SIZE: usize = std::mem::size_of::<Descriptor>();

/// Kind of view a descriptor describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DescriptorKind {
    Null = 0,
    ConstantBuffer = 1,
    ShaderResource = 2,
    UnorderedAccess = 3,
    Sampler = 4,
}

impl DescriptorKind {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => DescriptorKind::ConstantBuffer,
            2 => DescriptorKind::ShaderResource,
            3 => DescriptorKind::UnorderedAccess,
            4 => DescriptorKind::Sampler,
            _ => DescriptorKind::Null,
        }
    }
}

/// One GPU-visible descriptor record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Descriptor {
    /// Identifier of the viewed resource (0 for null descriptors)
    pub resource: u64,
    /// GPU virtual address (constant buffers) or 0
    pub gpu_address: u64,
    /// Format, byte size (constant buffers) or filter bits (samplers)
    pub format: u32,
    /// Raw `DescriptorKind`
    pub kind: u32,
}

impl Descriptor {
    /// Null descriptor: reads return zero
    pub fn null() -> Self {
        Self::zeroed()
    }

    pub fn constant_buffer(resource: u64, gpu_address: u64, size: u32) -> Self {
        Self {
            resource,
            gpu_address,
            format: size,
            kind: DescriptorKind::ConstantBuffer as u32,
        }
    }

    pub fn shader_resource(resource: u64, format: u32) -> Self {
        Self {
            resource,
            gpu_address: 0,
            format,
            kind: DescriptorKind::ShaderResource as u32,
        }
    }

    pub fn unordered_access(resource: u64, format: u32) -> Self {
        Self {
            resource,
            gpu_address: 0,
            format,
            kind: DescriptorKind::UnorderedAccess as u32,
        }
    }

    pub fn sampler(sampler: u64, filter: u32) -> Self {
        Self {
            resource: sampler,
            gpu_address: 0,
            format: filter,
            kind: DescriptorKind::Sampler as u32,
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        DescriptorKind::from_raw(self.kind)
    }

    pub fn is_null(&self) -> bool {
        self.kind() == DescriptorKind::Null
    }
}

/// Which descriptors a heap holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views
    View,
    /// Samplers
    Sampler,
}

impl DescriptorHeapType {
    /// Whether descriptors of `kind` may live in a heap of this type
    pub fn accepts(&self, kind: DescriptorKind) -> bool {
        match self {
            DescriptorHeapType::View => kind != DescriptorKind::Sampler,
            DescriptorHeapType::Sampler => {
                matches!(kind, DescriptorKind::Sampler | DescriptorKind::Null)
            }
        }
    }
}

/// Process-unique heap identity, never recycled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapId(pub u64);

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap#{}", self.0)
    }
}

/// A fixed-capacity, shader-visible descriptor heap
pub struct DescriptorHeap {
    id: HeapId,
    heap_type: DescriptorHeapType,
    capacity: u32,
    memory: RwLock<Vec<u8>>,
    descriptors_written: AtomicU64,
}

impl DescriptorHeap {
    /// Create a heap of `capacity` null descriptors
    pub fn new(heap_type: DescriptorHeapType, capacity: u32) -> Arc<Self> {
        Arc::new(Self {
            id: HeapId(NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed)),
            heap_type,
            capacity,
            memory: RwLock::new(vec![0u8; capacity as usize * DESCRIPTOR_SIZE]),
            descriptors_written: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> HeapId {
        self.id
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Total number of descriptors copied into the heap so far
    pub fn descriptors_written(&self) -> u64 {
        self.descriptors_written.load(Ordering::Relaxed)
    }

    fn check_range(&self, offset: u32, count: usize) -> Result<()> {
        if offset as usize + count > self.capacity as usize {
            return Err(Error::InvalidResource(format!(
                "range {}..{} is outside {} ({} slots)",
                offset,
                offset as usize + count,
                self.id,
                self.capacity
            )));
        }
        Ok(())
    }

    /// Copy a contiguous run of descriptors into the heap starting at `offset`
    pub fn write(&self, offset: u32, descriptors: &[Descriptor]) -> Result<()> {
        self.check_range(offset, descriptors.len())?;
        if let Some(bad) = descriptors.iter().find(|d| !self.heap_type.accepts(d.kind())) {
            return Err(Error::InvalidResource(format!(
                "{:?} descriptor cannot be written to a {:?} heap",
                bad.kind(),
                self.heap_type
            )));
        }

        let start = offset as usize * DESCRIPTOR_SIZE;
        let bytes: &[u8] = bytemuck::cast_slice(descriptors);
        let mut memory = self
            .memory
            .write()
            .map_err(|_| Error::BackendError(format!("{} memory lock poisoned", self.id)))?;
        memory[start..start + bytes.len()].copy_from_slice(bytes);
        self.descriptors_written
            .fetch_add(descriptors.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Read `count` descriptors starting at `offset`
    pub fn read(&self, offset: u32, count: u32) -> Result<Vec<Descriptor>> {
        self.check_range(offset, count as usize)?;
        let start = offset as usize * DESCRIPTOR_SIZE;
        let end = start + count as usize * DESCRIPTOR_SIZE;
        let memory = self
            .memory
            .read()
            .map_err(|_| Error::BackendError(format!("{} memory lock poisoned", self.id)))?;
        Ok(memory[start..end]
            .chunks_exact(DESCRIPTOR_SIZE)
            .map(bytemuck::pod_read_unaligned::<Descriptor>)
            .collect())
    }
}

impl fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("id", &self.id)
            .field("heap_type", &self.heap_type)
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
