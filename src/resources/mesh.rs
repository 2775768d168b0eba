//! Mesh Assets
//!
//! A mesh resource is the shareable geometry payload behind a scene node:
//! vertex/index counts, local-space bounds, and per-LoD index ranges. The
//! vertex bytes themselves are opaque; parsing asset formats is a
//! collaborator concern.

use crate::errors::{DivideError, Result};
use crate::resources::bounds::BoundingBox;
use crate::resources::cache::{Resource, ResourceCache, ResourceHeader, ResourceLoader};
use crate::resources::descriptor::ResourceDescriptor;
use crate::resources::state::ResourceState;

/// Index range of one level of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodRange {
    pub first_index: u32,
    pub index_count: u32,
}

/// Shareable geometry asset.
pub struct Mesh {
    header: ResourceHeader,
    pub vertex_count: u32,
    pub index_count: u32,
    pub local_bounds: BoundingBox,
    /// LoD 0 first; never empty for a loaded mesh.
    pub lods: Vec<LodRange>,
    /// Interleaved vertex bytes (opaque layout).
    pub vertex_data: Vec<u8>,
    pub index_data: Vec<u8>,
}

impl Mesh {
    /// The empty-mesh substitute for failed loads: zero geometry, unit bounds.
    #[must_use]
    pub fn empty(descriptor: &ResourceDescriptor) -> Self {
        let header = ResourceHeader::new(descriptor);
        header.state().advance(ResourceState::Loaded);
        Self {
            header,
            vertex_count: 0,
            index_count: 0,
            local_bounds: BoundingBox::new(glam::Vec3::splat(-0.5), glam::Vec3::splat(0.5)),
            lods: vec![LodRange {
                first_index: 0,
                index_count: 0,
            }],
            vertex_data: Vec::new(),
            index_data: Vec::new(),
        }
    }

    /// Procedural construction (unit cubes, gizmo geometry): counts and
    /// bounds known up front, immediately loaded.
    #[must_use]
    pub fn procedural(
        descriptor: &ResourceDescriptor,
        vertex_count: u32,
        index_count: u32,
        local_bounds: BoundingBox,
    ) -> Self {
        let header = ResourceHeader::new(descriptor);
        header.state().advance(ResourceState::Loaded);
        Self {
            header,
            vertex_count,
            index_count,
            local_bounds,
            lods: vec![LodRange {
                first_index: 0,
                index_count,
            }],
            vertex_data: Vec::new(),
            index_data: Vec::new(),
        }
    }

    /// Picks the LoD for a squared distance against caller thresholds.
    /// Thresholds are squared distances, ascending.
    #[must_use]
    pub fn lod_for_distance_sq(&self, distance_sq: f32, thresholds_sq: &[f32; 4]) -> u8 {
        let mut lod = 0u8;
        for &threshold in thresholds_sq {
            if distance_sq > threshold {
                lod += 1;
            }
        }
        lod.min((self.lods.len().max(1) - 1) as u8)
    }
}

impl Resource for Mesh {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
}

impl ResourceLoader for Mesh {
    fn load(descriptor: &ResourceDescriptor, _cache: &ResourceCache) -> Result<Self> {
        // Property block layout: vertex_count u32, index_count u32, then
        // min/max bounds as 6 f32. Geometry bytes arrive separately through
        // the asset pipeline.
        let block = descriptor.property_block();
        if block.is_empty() {
            return Ok(Self::empty(descriptor));
        }
        if block.len() < 8 + 24 {
            return Err(DivideError::ResourceLoadFailed {
                name: descriptor.name().to_string(),
                reason: "mesh property block truncated".to_string(),
            });
        }
        let vertex_count = u32::from_le_bytes(block[0..4].try_into().expect("sized slice"));
        let index_count = u32::from_le_bytes(block[4..8].try_into().expect("sized slice"));
        let mut floats = [0.0f32; 6];
        for (i, value) in floats.iter_mut().enumerate() {
            let at = 8 + i * 4;
            *value = f32::from_le_bytes(block[at..at + 4].try_into().expect("sized slice"));
        }
        let header = ResourceHeader::new(descriptor);
        header.state().advance(ResourceState::Loaded);
        Ok(Self {
            header,
            vertex_count,
            index_count,
            local_bounds: BoundingBox::new(
                glam::Vec3::new(floats[0], floats[1], floats[2]),
                glam::Vec3::new(floats[3], floats[4], floats[5]),
            ),
            lods: vec![LodRange {
                first_index: 0,
                index_count,
            }],
            vertex_data: Vec::new(),
            index_data: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_selection_respects_thresholds() {
        let mut mesh = Mesh::empty(&ResourceDescriptor::new("lod-mesh"));
        mesh.lods = vec![
            LodRange { first_index: 0, index_count: 300 },
            LodRange { first_index: 300, index_count: 120 },
            LodRange { first_index: 420, index_count: 30 },
        ];
        let thresholds = [25.0, 100.0, 400.0, 1600.0];
        assert_eq!(mesh.lod_for_distance_sq(10.0, &thresholds), 0);
        assert_eq!(mesh.lod_for_distance_sq(50.0, &thresholds), 1);
        assert_eq!(mesh.lod_for_distance_sq(200.0, &thresholds), 2);
        // Clamped to the last available LoD.
        assert_eq!(mesh.lod_for_distance_sq(1e9, &thresholds), 2);
    }
}
