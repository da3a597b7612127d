//! Grid-based spatial hash for near-duplicate vertex detection.
//!
//! Divides 3D space into a grid of cells. To decide whether a position
//! coincides with an existing vertex:
//! 1. Compute which cell the position falls into
//! 2. Check that cell + 26 neighbors (3x3x3 cube)
//! 3. Compare distances only to vertices in those cells
//!
//! This replaces the O(V) (or O(V²) for whole-brush checks) scan over all
//! vertex positions with an O(1) expected-time lookup, and reports *which*
//! vertex was hit so callers can merge or reject.

use glam::DVec3;
use hashbrown::HashMap;

use crate::brush_geometry::VertexIdx;

/// Grid-based spatial hash mapping positions to the vertices that occupy them.
pub struct SpatialHash {
    cells: HashMap<(i64, i64, i64), Vec<(DVec3, VertexIdx)>>,
    cell_size: f64,
    tolerance: f64,
}

impl SpatialHash {
    /// Create a new spatial hash with the given tolerance.
    ///
    /// Positions within `tolerance` distance of each other are considered
    /// the same vertex position.
    #[must_use]
    pub fn new(tolerance: f64) -> Self {
        // Cell size = 2x tolerance ensures near-duplicates are in adjacent cells
        Self {
            cells: HashMap::new(),
            cell_size: tolerance * 2.0,
            tolerance,
        }
    }

    /// Map a position to its grid cell indices.
    #[inline]
    fn cell_coords(&self, p: DVec3) -> (i64, i64, i64) {
        #[allow(clippy::cast_possible_truncation)]
        let discretize = |v: f64| (v / self.cell_size).floor() as i64;
        (discretize(p.x), discretize(p.y), discretize(p.z))
    }

    /// Return the vertex whose stored position is within tolerance of `point`,
    /// if any.
    #[must_use]
    pub fn find(&self, point: DVec3) -> Option<VertexIdx> {
        let (cx, cy, cz) = self.cell_coords(point);

        // Check 3x3x3 neighborhood
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(entries) = self.cells.get(&(cx + dx, cy + dy, cz + dz))
                        && let Some(&(_, v)) = entries
                            .iter()
                            .find(|&&(p, _)| (p - point).length() < self.tolerance)
                    {
                        return Some(v);
                    }
                }
            }
        }

        None
    }

    /// Insert a vertex position into the hash (does not check for duplicates).
    pub fn insert(&mut self, point: DVec3, vertex: VertexIdx) {
        self.cells
            .entry(self.cell_coords(point))
            .or_default()
            .push((point, vertex));
    }

    /// Insert only if no existing vertex occupies the position. Returns the
    /// occupying vertex otherwise.
    pub fn insert_if_unique(&mut self, point: DVec3, vertex: VertexIdx) -> Option<VertexIdx> {
        match self.find(point) {
            Some(existing) => Some(existing),
            None => {
                self.insert(point, vertex);
                None
            }
        }
    }

    /// Clear all entries from the hash.
    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spatial_hash_basic() {
        let mut hash = SpatialHash::new(1e-6);

        let p1 = DVec3::new(1.0, 2.0, 3.0);
        let p2 = DVec3::new(1.0 + 1e-7, 2.0, 3.0); // Within tolerance
        let p3 = DVec3::new(2.0, 2.0, 3.0); // Outside tolerance

        assert!(hash.insert_if_unique(p1, VertexIdx(0)).is_none());
        assert_eq!(hash.insert_if_unique(p2, VertexIdx(1)), Some(VertexIdx(0)));
        assert!(hash.insert_if_unique(p3, VertexIdx(2)).is_none());
    }

    #[test]
    fn test_spatial_hash_cell_boundary() {
        let mut hash = SpatialHash::new(0.1);

        // Positions on opposite sides of a cell boundary but within tolerance
        let p1 = DVec3::new(0.199, 0.0, 0.0);
        let p2 = DVec3::new(0.201, 0.0, 0.0);

        assert!(hash.insert_if_unique(p1, VertexIdx(0)).is_none());
        assert_eq!(hash.insert_if_unique(p2, VertexIdx(1)), Some(VertexIdx(0)));
    }
}
