//! # Convex Brush Geometry
//!
//! This module implements the vertex/edge/side graph of one convex **brush**
//! and the half-space clipping that constructs it.
//!
//! ## What is a Brush?
//!
//! A brush is a convex solid defined as the intersection of half-spaces, each
//! carrying texture data. Level editors for Quake-style formats represent all
//! world geometry as brushes; the editor clips, drags and splits them while
//! keeping an explicit boundary representation.
//!
//! ## Key Concepts
//!
//! - **Face plane**: boundary of one half-space; points strictly above the
//!   plane are outside the brush
//! - **Vertex**: corner point where 3+ face planes meet
//! - **Edge**: segment where exactly 2 sides meet; runs forward relative to
//!   one incident side and backward relative to the other
//! - **Side**: the cyclic ring of edges bounding one face of the brush
//!
//! ## Algorithm Overview
//!
//! 1. **Initial topology**: the world bounding box as an explicit cuboid
//!    (8 vertices, 12 edges, 6 sides)
//! 2. **Clipping**: each face plane clips the brush Sutherland–Hodgman
//!    style: classify vertices, split spanning edges, split or drop sides,
//!    assemble the new side from the chain of split edges
//! 3. **Storage**: sparse arrays with free lists; all cross-references are
//!    typed indices into the owning [`BrushGeometry`]
//! 4. **Scratch state**: classification marks live in per-operation maps, so
//!    no hidden state survives between calls

use std::sync::atomic::{AtomicU64, Ordering};

use glam::DVec3;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::trace;

use crate::spatial_hash::SpatialHash;
use crate::tex_coords::TexCoordSystem;

/// General-purpose equality tolerance for positions and distances.
pub const ALMOST_ZERO: f64 = 1e-3;

/// Tolerance for classifying a point against a plane.
pub const POINT_STATUS_EPSILON: f64 = 1e-4;

/// Tolerance for parallelism tests between edge vectors and plane normals.
pub const COLINEAR_EPSILON: f64 = 1e-5;

/// Coordinates closer than this to an integer are snapped onto it.
pub const CORRECT_EPSILON: f64 = 1e-3;

/// Cyclic successor: `(i + k) mod n`.
#[inline]
pub(crate) const fn succ(i: usize, n: usize, k: usize) -> usize {
    (i + k) % n
}

/// Cyclic predecessor: `(i - k) mod n`.
#[inline]
pub(crate) const fn pred(i: usize, n: usize, k: usize) -> usize {
    (i + n - k % n) % n
}

/// Position equality within `epsilon`.
#[inline]
pub(crate) fn almost_equal(a: DVec3, b: DVec3, epsilon: f64) -> bool {
    (a - b).length_squared() <= epsilon * epsilon
}

/// Snap coordinates that are within [`CORRECT_EPSILON`] of an integer onto it.
///
/// Quake-style maps live on an integer grid; clipping and dragging produce
/// positions like `63.99999999` that must collapse back onto `64.0` or the
/// on-disk plane points drift with every edit.
#[must_use]
pub(crate) fn correct(v: DVec3) -> DVec3 {
    let snap = |x: f64| {
        let r = x.round();
        if (x - r).abs() < CORRECT_EPSILON { r } else { x }
    };
    DVec3::new(snap(v.x), snap(v.y), snap(v.z))
}

/// Whether two direction vectors are parallel within `epsilon` (sine of the
/// enclosed angle). Zero-length inputs are never parallel.
pub(crate) fn parallel(a: DVec3, b: DVec3, epsilon: f64) -> bool {
    let la = a.length();
    let lb = b.length();
    if la < f64::MIN_POSITIVE || lb < f64::MIN_POSITIVE {
        return false;
    }
    (a / la).cross(b / lb).length() < epsilon
}

// INDEX NEWTYPES
//
// Typed indices prevent accidentally passing a vertex index where a side
// index is expected. Indices are only meaningful for the geometry that
// issued them.

/// Index into the vertex array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexIdx(pub usize);

/// Index into the edge array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeIdx(pub usize);

/// Index into the side array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SideIdx(pub usize);

/// Stable identity of a face, preserved across topology surgery.
///
/// Sides come and go as a brush is clipped and dragged; the `FaceId` is what
/// callers use to keep selection and texture state attached to "the same"
/// face across an edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId(pub u64);

static NEXT_FACE_ID: AtomicU64 = AtomicU64::new(1);

fn next_face_id() -> FaceId {
    FaceId(NEXT_FACE_ID.fetch_add(1, Ordering::Relaxed))
}

// CORE GEOMETRIC TYPES

/// Classification of a point relative to a face plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointStatus {
    /// Strictly outside the brush: `n·x > d + ε`
    Above,
    /// Strictly inside: `n·x < d - ε`
    Below,
    /// On the plane within tolerance.
    Inside,
}

/// A face boundary plane: `{ x : n·x = d }` with unit normal pointing out of
/// the brush.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FacePlane {
    /// Unit normal pointing away from the brush interior.
    pub normal: DVec3,
    /// Signed distance from the origin along the normal.
    pub distance: f64,
}

impl FacePlane {
    /// Create a plane from a normal and distance, normalizing the input.
    ///
    /// # Panics
    /// Panics if the normal has zero length.
    #[must_use]
    pub fn new(normal: DVec3, distance: f64) -> Self {
        let len = normal.length();
        assert!(len > ALMOST_ZERO, "plane normal must be non-zero");
        Self {
            normal: normal / len,
            distance: distance / len,
        }
    }

    /// Derive the plane from three points in face winding order.
    ///
    /// The normal is `(p2 - p0) × (p1 - p0)`, matching the map format
    /// convention that the points wind clockwise when seen from outside the
    /// brush. Returns `None` for collinear points.
    #[must_use]
    pub fn from_points(p0: DVec3, p1: DVec3, p2: DVec3) -> Option<Self> {
        let normal = (p2 - p0).cross(p1 - p0);
        if normal.length_squared() <= ALMOST_ZERO * ALMOST_ZERO {
            return None;
        }
        let normal = normal.normalize();
        Some(Self {
            normal,
            distance: p0.dot(normal),
        })
    }

    /// Signed distance: positive = outside, zero = on plane, negative = inside.
    #[inline]
    #[must_use]
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) - self.distance
    }

    /// Classify a point against the plane within [`POINT_STATUS_EPSILON`].
    #[must_use]
    pub fn point_status(&self, point: DVec3) -> PointStatus {
        let d = self.signed_distance(point);
        if d > POINT_STATUS_EPSILON {
            PointStatus::Above
        } else if d < -POINT_STATUS_EPSILON {
            PointStatus::Below
        } else {
            PointStatus::Inside
        }
    }

    /// Distance along the ray at which it crosses the plane, or `None` if the
    /// ray is parallel to it. The distance may be negative.
    #[must_use]
    pub fn intersect_ray(&self, origin: DVec3, direction: DVec3) -> Option<f64> {
        let denom = self.normal.dot(direction);
        if denom.abs() < ALMOST_ZERO {
            return None;
        }
        Some((self.distance - self.normal.dot(origin)) / denom)
    }

    /// An orthonormal basis `(u, v)` of the plane with `u × v = normal`.
    #[must_use]
    pub fn basis(&self) -> (DVec3, DVec3) {
        let arbitrary = if self.normal.z.abs() < 0.9 {
            DVec3::Z
        } else {
            DVec3::Y
        };
        let u = self.normal.cross(arbitrary).normalize();
        let v = self.normal.cross(u).normalize();
        (u, v)
    }

    /// Whether the two planes bound the same half-space within `epsilon`.
    #[must_use]
    pub fn coplanar(&self, other: &FacePlane, epsilon: f64) -> bool {
        self.normal.abs_diff_eq(other.normal, epsilon)
            && (self.distance - other.distance).abs() < ALMOST_ZERO
    }

    /// The plane translated by `delta`.
    #[must_use]
    pub fn translated(&self, delta: DVec3) -> Self {
        Self {
            normal: self.normal,
            distance: self.distance + self.normal.dot(delta),
        }
    }
}

/// Per-face texture attributes as stored in the map file.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceAttributes {
    pub texture_name: String,
    pub x_offset: f64,
    pub y_offset: f64,
    /// Texture rotation in degrees.
    pub rotation: f64,
    pub x_scale: f64,
    pub y_scale: f64,
    /// Quake2-style content/surface/value triple, if present in the record.
    pub extra: Option<(i64, i64, f64)>,
}

impl Default for FaceAttributes {
    fn default() -> Self {
        Self {
            texture_name: String::new(),
            x_offset: 0.0,
            y_offset: 0.0,
            rotation: 0.0,
            x_scale: 1.0,
            y_scale: 1.0,
            extra: None,
        }
    }
}

/// A brush face: boundary plane, the three points that define it on disk,
/// texture attributes and the texture projection derived from them.
#[derive(Clone, Debug)]
pub struct Face {
    pub id: FaceId,
    pub plane: FacePlane,
    /// The three plane-defining points, in map winding order.
    pub points: [DVec3; 3],
    pub attributes: FaceAttributes,
    pub uv: TexCoordSystem,
}

impl Face {
    /// Create a face from its three plane points.
    ///
    /// The points must not be collinear; the derived plane's normal follows
    /// the map winding convention (see [`FacePlane::from_points`]).
    pub fn new(
        p0: DVec3,
        p1: DVec3,
        p2: DVec3,
        attributes: FaceAttributes,
    ) -> Result<Self, GeometryError> {
        let plane = FacePlane::from_points(p0, p1, p2)
            .ok_or(GeometryError::InvalidPlanePoints(p0, p1, p2))?;
        let uv = TexCoordSystem::paraxial(plane.normal, attributes.rotation);
        Ok(Self {
            id: next_face_id(),
            plane,
            points: [p0, p1, p2],
            attributes,
            uv,
        })
    }

    /// Create a face from a plane, synthesizing canonical plane points from
    /// the plane's anchor and basis.
    #[must_use]
    pub fn from_plane(plane: FacePlane, attributes: FaceAttributes) -> Self {
        let anchor = plane.normal * plane.distance;
        let (u, v) = plane.basis();
        let uv = TexCoordSystem::paraxial(plane.normal, attributes.rotation);
        Self {
            id: next_face_id(),
            plane,
            points: [anchor, anchor + v, anchor + u],
            attributes,
            uv,
        }
    }

    /// Create a face from a side's vertex ring, picking the numerically best
    /// point triple.
    pub fn from_ring(ring: &[DVec3], attributes: FaceAttributes) -> Result<Self, GeometryError> {
        let rotation = attributes.rotation;
        let mut face = Self {
            id: next_face_id(),
            plane: FacePlane { normal: DVec3::Z, distance: 0.0 },
            points: [DVec3::ZERO; 3],
            attributes,
            uv: TexCoordSystem::paraxial(DVec3::Z, rotation),
        };
        face.update_points_from_vertices(ring)?;
        Ok(face)
    }

    /// A copy of this face under a fresh identity, used when topology surgery
    /// splits one face into several.
    #[must_use]
    pub fn clone_with_new_id(&self) -> Self {
        let mut copy = self.clone();
        copy.id = next_face_id();
        copy
    }

    /// Recompute the plane points and boundary from the side's vertex ring.
    ///
    /// Picks the vertex whose incident ring edges are closest to
    /// perpendicular, which keeps the derived plane numerically stable, then
    /// refreshes the texture projection for the new normal (texture lock).
    pub fn update_points_from_vertices(&mut self, ring: &[DVec3]) -> Result<(), GeometryError> {
        let n = ring.len();
        if n < 3 {
            return Err(GeometryError::DegeneratePolygon(n));
        }

        let mut best_dot = 1.0;
        let mut best = n;
        for i in 0..n {
            if best_dot <= 0.0 {
                break;
            }
            let p2 = ring[pred(i, n, 1)];
            let p0 = ring[i];
            let p1 = ring[succ(i, n, 1)];
            let v1 = (p2 - p0).normalize();
            let v2 = (p1 - p0).normalize();
            let dot = v1.dot(v2).abs();
            if dot < best_dot {
                best_dot = dot;
                best = i;
            }
        }
        if best >= n {
            // every corner is collinear with its neighbours
            return Err(GeometryError::InvalidPlanePoints(ring[0], ring[1], ring[2]));
        }

        let p2 = correct(ring[pred(best, n, 1)]);
        let p0 = correct(ring[best]);
        let p1 = correct(ring[succ(best, n, 1)]);
        self.plane =
            FacePlane::from_points(p0, p1, p2).ok_or(GeometryError::InvalidPlanePoints(p0, p1, p2))?;
        self.points = [p0, p1, p2];
        self.uv.update(self.plane.normal, self.attributes.rotation);
        Ok(())
    }
}

/// A brush corner.
#[derive(Clone, Copy, Debug)]
pub struct Vertex {
    pub position: DVec3,
}

/// An edge between two vertices with its two incident sides.
///
/// The edge runs forward (start → end) relative to its `right` side and
/// backward relative to its `left` side; this encodes a consistent winding
/// without duplicating half-edges.
#[derive(Clone, Copy, Debug)]
pub struct Edge {
    pub start: VertexIdx,
    pub end: VertexIdx,
    pub left: Option<SideIdx>,
    pub right: Option<SideIdx>,
}

impl Edge {
    /// The edge's first vertex when traversed along `side`'s ring, or `None`
    /// if `side` is not incident.
    #[must_use]
    pub fn start_vertex(&self, side: SideIdx) -> Option<VertexIdx> {
        if self.right == Some(side) {
            Some(self.start)
        } else if self.left == Some(side) {
            Some(self.end)
        } else {
            None
        }
    }

    /// The edge's second vertex when traversed along `side`'s ring, or `None`
    /// if `side` is not incident.
    #[must_use]
    pub fn end_vertex(&self, side: SideIdx) -> Option<VertexIdx> {
        if self.right == Some(side) {
            Some(self.end)
        } else if self.left == Some(side) {
            Some(self.start)
        } else {
            None
        }
    }

    /// Whether the edge connects exactly the two given vertices.
    #[must_use]
    pub fn connects(&self, a: VertexIdx, b: VertexIdx) -> bool {
        (self.start == a && self.end == b) || (self.start == b && self.end == a)
    }

    /// Whether the two edges share a vertex.
    #[must_use]
    pub fn incident_with(&self, other: &Edge) -> bool {
        self.start == other.start
            || self.start == other.end
            || self.end == other.start
            || self.end == other.end
    }

    /// Reverse the edge's direction, keeping side winding consistent.
    pub fn flip(&mut self) {
        std::mem::swap(&mut self.start, &mut self.end);
        std::mem::swap(&mut self.left, &mut self.right);
    }
}

/// The cyclic ring of edges bounding one face of the brush.
///
/// `vertices[i]` is the start, relative to this side, of `edges[i]`; the ring
/// winds so that the face normal points out of the brush.
#[derive(Clone, Debug)]
pub struct Side {
    pub vertices: Vec<VertexIdx>,
    pub edges: Vec<EdgeIdx>,
    /// Unset only for world-bound caps before [`BrushGeometry::build`] seals
    /// them.
    pub face: Option<Face>,
}

impl Side {
    /// Rotate the ring so that index `offset` becomes index 0.
    pub fn shift(&mut self, offset: usize) {
        let count = self.edges.len();
        if count == 0 || offset % count == 0 {
            return;
        }
        self.edges.rotate_left(offset % count);
        self.vertices.rotate_left(offset % count);
    }

    /// Whether the ring visits exactly the given positions in the same cyclic
    /// order.
    ///
    /// Any rotation of `positions` matches; the reversed order does not (the
    /// winding encodes the outward normal), nor does any other permutation or
    /// a ring of different length.
    #[must_use]
    pub fn has_vertex_positions(&self, geometry: &BrushGeometry, positions: &[DVec3]) -> bool {
        let n = self.vertices.len();
        if positions.len() != n {
            return false;
        }
        for offset in 0..n {
            let mut k = 0;
            while k < n
                && almost_equal(
                    geometry.position(self.vertices[(offset + k) % n]),
                    positions[k],
                    ALMOST_ZERO,
                )
            {
                k += 1;
            }
            if k == n {
                return true;
            }
        }
        false
    }
}

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: DVec3,
    pub max: DVec3,
}

impl Bounds {
    #[must_use]
    pub const fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// The smallest box containing all positions. Empty input yields a point
    /// box at the origin.
    #[must_use]
    pub fn of_points<I: IntoIterator<Item = DVec3>>(points: I) -> Self {
        let mut iter = points.into_iter();
        let first = iter.next().unwrap_or(DVec3::ZERO);
        let mut bounds = Self::new(first, first);
        for p in iter {
            bounds.merge_point(p);
        }
        bounds
    }

    pub fn merge_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[must_use]
    pub fn contains_point(&self, p: DVec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    #[must_use]
    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    #[must_use]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    #[must_use]
    pub fn translated(&self, delta: DVec3) -> Self {
        Self::new(self.min + delta, self.max + delta)
    }
}

// MARKS
//
// Transient classification used during one clip pass. Marks are kept in
// per-operation maps keyed by index, never on the elements themselves.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VertexMark {
    Keep,
    Drop,
    Undecided,
    New,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EdgeMark {
    Keep,
    Drop,
    Split,
    Undecided,
    New,
}

/// Outcome of clipping the brush with one face plane.
#[derive(Clone, Debug)]
pub enum ClipResult {
    /// Every vertex is on or inside the plane; the face is discarded and the
    /// brush is unchanged.
    Redundant,
    /// The plane cut the brush; the new side now bounds it.
    Split {
        /// Faces whose sides were clipped away entirely.
        dropped_faces: Vec<FaceId>,
    },
    /// Every vertex is outside the plane; the brush would be empty. The
    /// geometry is left unchanged.
    Empty,
}

/// Errors from brush construction and editing.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum GeometryError {
    #[error("face points {0:?}, {1:?}, {2:?} do not define a plane")]
    InvalidPlanePoints(DVec3, DVec3, DVec3),
    #[error("the face planes clip the brush away entirely")]
    EmptyBrush,
    #[error("invalid brush detected during side split")]
    InvalidSideSplit,
    #[error("a side with {0} vertices cannot bound a face")]
    DegeneratePolygon(usize),
    #[error("no vertex at {0:?}")]
    VertexNotFound(DVec3),
    #[error("no edge between {0:?} and {1:?}")]
    EdgeNotFound(DVec3, DVec3),
    #[error("no side with the given vertex ring")]
    SideNotFound,
    #[error("the requested edit is not feasible")]
    InfeasibleEdit,
}

/// Topology validation errors.
///
/// These indicate inconsistencies in the brush structure that would result
/// from numerical issues or bugs in the editing algorithms.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TopologyError {
    /// Euler characteristic mismatch: a closed brush must have χ = 2.
    #[error("Euler characteristic is {characteristic} for V={vertices}, E={edges}, F={sides} (expected 2)")]
    EulerMismatch {
        vertices: usize,
        edges: usize,
        sides: usize,
        characteristic: i64,
    },
    /// A side's vertex ring and edge ring disagree.
    #[error("side {side:?} has an inconsistent vertex/edge ring")]
    RingMismatch { side: SideIdx },
    /// A side references an edge that does not reference it back.
    #[error("edge {edge:?} does not belong to side {side:?}")]
    MissingIncidence { side: SideIdx, edge: EdgeIdx },
    /// An edge is referenced by fewer or more than two side rings.
    #[error("edge {edge:?} is referenced by {visits} side rings (expected 2)")]
    FreeEdge { edge: EdgeIdx, visits: usize },
    /// An edge has the same side on both of its flanks.
    #[error("edge {edge:?} has the same side on both flanks")]
    IdenticalFlanks { edge: EdgeIdx },
    /// Two vertices occupy the same position.
    #[error("vertices {first:?} and {second:?} occupy the same position")]
    DuplicateVertex { first: VertexIdx, second: VertexIdx },
    /// Two edges connect the same pair of vertices.
    #[error("edge {edge:?} duplicates another edge")]
    DuplicateEdge { edge: EdgeIdx },
    /// A vertex belongs to no side ring.
    #[error("vertex {vertex:?} belongs to no side")]
    IsolatedVertex { vertex: VertexIdx },
}

pub(crate) enum SideSplitOutcome {
    Keep { undecided: Option<EdgeIdx> },
    Drop,
    Split { new_edge: EdgeIdx },
}

/// The complete vertex/edge/side graph of one convex brush.
///
/// Elements live in sparse arrays with free lists; every cross-reference is a
/// typed index into the same geometry. A geometry is exclusively owned by its
/// brush, and indices from one geometry are meaningless in another.
#[derive(Clone, Debug)]
pub struct BrushGeometry {
    vertices: Vec<Option<Vertex>>,
    edges: Vec<Option<Edge>>,
    sides: Vec<Option<Side>>,

    vertex_free: Vec<VertexIdx>,
    edge_free: Vec<EdgeIdx>,
    side_free: Vec<SideIdx>,

    bounds: Bounds,
}

impl BrushGeometry {
    // CONSTRUCTION

    /// The explicit cuboid topology of a bounding box: 8 vertices, 12 edges,
    /// 6 sides. Sides carry no faces yet.
    #[must_use]
    pub fn from_bounds(bounds: Bounds) -> Self {
        let mut geometry = Self {
            vertices: Vec::with_capacity(8),
            edges: Vec::with_capacity(12),
            sides: Vec::with_capacity(6),
            vertex_free: Vec::new(),
            edge_free: Vec::new(),
            side_free: Vec::new(),
            bounds,
        };

        // Corner naming: l/r = min/max x, f/b = min/max y, d/u = min/max z.
        let (min, max) = (bounds.min, bounds.max);
        let lfd = geometry.alloc_vertex(Vertex { position: DVec3::new(min.x, min.y, min.z) });
        let lfu = geometry.alloc_vertex(Vertex { position: DVec3::new(min.x, min.y, max.z) });
        let lbd = geometry.alloc_vertex(Vertex { position: DVec3::new(min.x, max.y, min.z) });
        let lbu = geometry.alloc_vertex(Vertex { position: DVec3::new(min.x, max.y, max.z) });
        let rfd = geometry.alloc_vertex(Vertex { position: DVec3::new(max.x, min.y, min.z) });
        let rfu = geometry.alloc_vertex(Vertex { position: DVec3::new(max.x, min.y, max.z) });
        let rbd = geometry.alloc_vertex(Vertex { position: DVec3::new(max.x, max.y, min.z) });
        let rbu = geometry.alloc_vertex(Vertex { position: DVec3::new(max.x, max.y, max.z) });

        let edge = |geometry: &mut Self, start, end| {
            geometry.alloc_edge(Edge { start, end, left: None, right: None })
        };
        let lfd_lbd = edge(&mut geometry, lfd, lbd);
        let lbd_lbu = edge(&mut geometry, lbd, lbu);
        let lbu_lfu = edge(&mut geometry, lbu, lfu);
        let lfu_lfd = edge(&mut geometry, lfu, lfd);
        let rfd_rfu = edge(&mut geometry, rfd, rfu);
        let rfu_rbu = edge(&mut geometry, rfu, rbu);
        let rbu_rbd = edge(&mut geometry, rbu, rbd);
        let rbd_rfd = edge(&mut geometry, rbd, rfd);
        let lfu_rfu = edge(&mut geometry, lfu, rfu);
        let rfd_lfd = edge(&mut geometry, rfd, lfd);
        let lbd_rbd = edge(&mut geometry, lbd, rbd);
        let rbu_lbu = edge(&mut geometry, rbu, lbu);

        geometry.new_side(&[lfd_lbd, lbd_lbu, lbu_lfu, lfu_lfd], &[false; 4], None);
        geometry.new_side(&[rfd_rfu, rfu_rbu, rbu_rbd, rbd_rfd], &[false; 4], None);
        geometry.new_side(&[lfu_rfu, rfd_rfu, rfd_lfd, lfu_lfd], &[false, true, false, true], None);
        geometry.new_side(&[rbu_lbu, lbd_lbu, lbd_rbd, rbu_rbd], &[false, true, false, true], None);
        geometry.new_side(&[lbu_lfu, rbu_lbu, rfu_rbu, lfu_rfu], &[true; 4], None);
        geometry.new_side(&[rfd_lfd, rbd_rfd, lbd_rbd, lfd_lbd], &[true; 4], None);

        geometry
    }

    /// Intersect the half-spaces of `faces` inside `world_bounds`.
    ///
    /// This is the brush construction entry point: it clips the world box by
    /// every face plane in input order, then seals any side that no input
    /// face bounds (the brush leans against the world bounds there) with a
    /// synthesized face.
    ///
    /// Degenerate input — planes that clip everything away — is reported as
    /// [`GeometryError::EmptyBrush`] rather than producing a zero-side
    /// geometry.
    pub fn build(world_bounds: Bounds, faces: Vec<Face>) -> Result<Self, GeometryError> {
        let mut geometry = Self::from_bounds(world_bounds);
        for face in faces {
            match geometry.add_face(face)? {
                ClipResult::Empty => return Err(GeometryError::EmptyBrush),
                ClipResult::Redundant | ClipResult::Split { .. } => {}
            }
        }
        geometry.seal_open_sides()?;
        Ok(geometry)
    }

    /// Clip the brush with `face`'s plane, keeping the inside half-space.
    ///
    /// On [`ClipResult::Split`] the face becomes the brush's newest side; on
    /// `Redundant` or `Empty` the face is discarded and the geometry is left
    /// exactly as it was.
    pub fn add_face(&mut self, face: Face) -> Result<ClipResult, GeometryError> {
        let plane = face.plane;

        // classify vertices
        let mut vertex_marks: FxHashMap<VertexIdx, VertexMark> = FxHashMap::default();
        let mut keep = 0usize;
        let mut drop = 0usize;
        let mut undecided = 0usize;
        for (idx, vertex) in self.vertices() {
            let mark = match plane.point_status(vertex.position) {
                PointStatus::Above => {
                    drop += 1;
                    VertexMark::Drop
                }
                PointStatus::Below => {
                    keep += 1;
                    VertexMark::Keep
                }
                PointStatus::Inside => {
                    undecided += 1;
                    VertexMark::Undecided
                }
            };
            vertex_marks.insert(idx, mark);
        }

        let total = keep + drop + undecided;
        if keep + undecided == total {
            trace!(kept = keep, undecided, "clip plane is redundant");
            return Ok(ClipResult::Redundant);
        }
        if drop + undecided == total {
            trace!(dropped = drop, undecided, "clip plane empties the brush");
            return Ok(ClipResult::Empty);
        }

        // classify edges, split the spanning ones
        let mut edge_marks: FxHashMap<EdgeIdx, EdgeMark> = FxHashMap::default();
        for idx in self.edge_indices() {
            let mark = self.derive_edge_mark(idx, &vertex_marks);
            edge_marks.insert(idx, mark);
            if mark == EdgeMark::Split {
                let vertex = self.split_edge_on_plane(idx, &plane, &vertex_marks);
                vertex_marks.insert(vertex, VertexMark::New);
            }
        }

        // split or drop sides, collecting the boundary edges of the new side
        let mut new_edges: Vec<EdgeIdx> = Vec::new();
        let mut dropped_faces: Vec<FaceId> = Vec::new();
        for side_idx in self.side_indices() {
            match self.split_side_on_plane(side_idx, &vertex_marks, &mut edge_marks)? {
                SideSplitOutcome::Drop => {
                    if let Some(side) = self.side(side_idx)
                        && let Some(dropped) = &side.face
                    {
                        dropped_faces.push(dropped.id);
                    }
                    self.free_side(side_idx);
                }
                SideSplitOutcome::Split { new_edge } => new_edges.push(new_edge),
                SideSplitOutcome::Keep { undecided: Some(edge_idx) } => {
                    // an edge lying in the plane becomes part of the new
                    // side's boundary; it must run forward relative to the
                    // kept side
                    if self.edge_ref(edge_idx).right != Some(side_idx) {
                        self.edge_mut(edge_idx).flip();
                    }
                    new_edges.push(edge_idx);
                }
                SideSplitOutcome::Keep { undecided: None } => {}
            }
        }

        if new_edges.len() < 3 {
            return Err(GeometryError::InvalidSideSplit);
        }

        // chain the boundary edges into a loop; the new side traverses each
        // of them backward, so consecutive edges meet end-to-start
        for i in 0..new_edges.len() - 1 {
            let start = self.edge_ref(new_edges[i]).start;
            for j in (i + 2)..new_edges.len() {
                if self.edge_ref(new_edges[j]).end == start {
                    new_edges.swap(i + 1, j);
                    break;
                }
            }
        }

        let new_side = self.alloc_side(Side {
            vertices: Vec::with_capacity(new_edges.len()),
            edges: Vec::with_capacity(new_edges.len()),
            face: Some(face),
        });
        for &edge_idx in &new_edges {
            self.edge_mut(edge_idx).left = Some(new_side);
            let vertex = self.edge_ref(edge_idx).end;
            let side = self.side_mut(new_side);
            side.edges.push(edge_idx);
            side.vertices.push(vertex);
        }

        // drop clipped-away vertices and edges, in index order so the free
        // lists stay deterministic
        let mut dropped_vertices: Vec<VertexIdx> = vertex_marks
            .iter()
            .filter(|(_, mark)| **mark == VertexMark::Drop)
            .map(|(idx, _)| *idx)
            .collect();
        dropped_vertices.sort_unstable();
        for idx in dropped_vertices {
            self.free_vertex(idx);
        }
        let mut dropped_edges: Vec<EdgeIdx> = edge_marks
            .iter()
            .filter(|(_, mark)| **mark == EdgeMark::Drop)
            .map(|(idx, _)| *idx)
            .collect();
        dropped_edges.sort_unstable();
        for idx in dropped_edges {
            self.free_edge(idx);
        }

        self.update_bounds();
        trace!(
            new_edges = self.side_ref(new_side).edges.len(),
            dropped = dropped_faces.len(),
            "clip plane split the brush"
        );
        Ok(ClipResult::Split { dropped_faces })
    }

    /// Synthesize faces for sides that no input plane bounds.
    fn seal_open_sides(&mut self) -> Result<(), GeometryError> {
        for side_idx in self.side_indices() {
            if self.side_ref(side_idx).face.is_some() {
                continue;
            }
            let ring = self.side_positions(side_idx);
            let face = Face::from_ring(&ring, FaceAttributes::default())?;
            self.side_mut(side_idx).face = Some(face);
        }
        Ok(())
    }

    // CLIP INTERNALS

    fn derive_edge_mark(&self, idx: EdgeIdx, vertex_marks: &FxHashMap<VertexIdx, VertexMark>) -> EdgeMark {
        let edge = self.edge_ref(idx);
        let mut keep = 0;
        let mut drop = 0;
        for vertex in [edge.start, edge.end] {
            match vertex_marks.get(&vertex) {
                Some(VertexMark::Keep) => keep += 1,
                Some(VertexMark::Drop) => drop += 1,
                _ => {}
            }
        }
        if keep == 1 && drop == 1 {
            EdgeMark::Split
        } else if keep > 0 {
            EdgeMark::Keep
        } else if drop > 0 {
            EdgeMark::Drop
        } else {
            EdgeMark::Undecided
        }
    }

    /// Split a spanning edge at its plane crossing; the dropped endpoint is
    /// re-linked to the new vertex.
    fn split_edge_on_plane(
        &mut self,
        idx: EdgeIdx,
        plane: &FacePlane,
        vertex_marks: &FxHashMap<VertexIdx, VertexMark>,
    ) -> VertexIdx {
        let edge = *self.edge_ref(idx);
        let start_pos = self.position(edge.start);
        let end_pos = self.position(edge.end);
        // the endpoints straddle the plane, so the distance ratio is always
        // well-conditioned, unlike a ray parameter for a near-tangent edge
        let start_dist = plane.signed_distance(start_pos);
        let end_dist = plane.signed_distance(end_pos);
        let t = start_dist / (start_dist - end_dist);
        let position = correct(start_pos + (end_pos - start_pos) * t);
        let vertex = self.alloc_vertex(Vertex { position });

        let edge = self.edge_mut(idx);
        if vertex_marks.get(&edge.start) == Some(&VertexMark::Drop) {
            edge.start = vertex;
        } else {
            edge.end = vertex;
        }
        vertex
    }

    /// Classify one side against the clip plane and, when it spans the plane,
    /// cut its ring with a new boundary edge.
    fn split_side_on_plane(
        &mut self,
        side_idx: SideIdx,
        vertex_marks: &FxHashMap<VertexIdx, VertexMark>,
        edge_marks: &mut FxHashMap<EdgeIdx, EdgeMark>,
    ) -> Result<SideSplitOutcome, GeometryError> {
        let ring: Vec<EdgeIdx> = self.side_ref(side_idx).edges.clone();
        let n = ring.len();
        debug_assert!(n >= 3);

        let mut keep = 0usize;
        let mut drop = 0usize;
        let mut undecided = 0usize;
        let mut undecided_edge = None;
        let mut split_index1: Option<usize> = None;
        let mut split_index2: Option<usize> = None;

        let mut last_mark = edge_marks[&ring[n - 1]];
        for (i, &edge_idx) in ring.iter().enumerate() {
            let mark = edge_marks[&edge_idx];
            match mark {
                EdgeMark::Split => {
                    let start = self
                        .edge_ref(edge_idx)
                        .start_vertex(side_idx)
                        .expect("ring edge is incident to its side");
                    if vertex_marks.get(&start) == Some(&VertexMark::Keep) {
                        split_index1 = Some(i);
                    } else {
                        split_index2 = Some(i);
                    }
                }
                EdgeMark::Undecided => {
                    undecided += 1;
                    undecided_edge = Some(edge_idx);
                }
                EdgeMark::Keep => {
                    if last_mark == EdgeMark::Drop {
                        split_index2 = Some(i);
                    }
                    keep += 1;
                }
                EdgeMark::Drop => {
                    if last_mark == EdgeMark::Keep {
                        split_index1 = Some(if i > 0 { i - 1 } else { n - 1 });
                    }
                    drop += 1;
                }
                EdgeMark::New => unreachable!("new edges are created after side splitting"),
            }
            last_mark = mark;
        }

        if keep == n {
            return Ok(SideSplitOutcome::Keep { undecided: None });
        }
        if undecided == 1 && keep == n - 1 {
            return Ok(SideSplitOutcome::Keep { undecided: undecided_edge });
        }
        if drop + undecided == n {
            return Ok(SideSplitOutcome::Drop);
        }

        // near-coincident planes can fail to produce a coherent split; this
        // is a data condition, not a programming error
        let (Some(index1), Some(index2)) = (split_index1, split_index2) else {
            return Err(GeometryError::InvalidSideSplit);
        };

        let start = self
            .edge_ref(ring[index1])
            .end_vertex(side_idx)
            .expect("ring edge is incident to its side");
        let end = self
            .edge_ref(ring[index2])
            .start_vertex(side_idx)
            .expect("ring edge is incident to its side");
        let new_edge = self.alloc_edge(Edge {
            start,
            end,
            left: None,
            right: Some(side_idx),
        });
        edge_marks.insert(new_edge, EdgeMark::New);
        self.replace_side_edges(side_idx, index1, index2, new_edge);
        Ok(SideSplitOutcome::Split { new_edge })
    }

    /// Replace the run of ring edges strictly between `index1` and `index2`
    /// (cyclically) with the single edge `edge_idx`, fixing the vertex ring
    /// to match.
    pub(crate) fn replace_side_edges(
        &mut self,
        side_idx: SideIdx,
        index1: usize,
        index2: usize,
        edge_idx: EdgeIdx,
    ) {
        let edge = self.edge_ref(edge_idx);
        let start = edge
            .start_vertex(side_idx)
            .expect("replacement edge is incident to its side");
        let end = edge
            .end_vertex(side_idx)
            .expect("replacement edge is incident to its side");

        let side = self.side_mut(side_idx);
        if index2 > index1 {
            side.vertices.drain(index1 + 1..=index2);
            side.edges.drain(index1 + 1..index2);
            side.vertices.insert(index1 + 1, start);
            side.vertices.insert(index1 + 2, end);
            side.edges.insert(index1 + 1, edge_idx);
        } else {
            side.vertices.drain(index1 + 1..);
            side.vertices.drain(0..=index2);
            side.edges.drain(index1 + 1..);
            side.edges.drain(0..index2);
            side.vertices.push(start);
            side.vertices.insert(0, end);
            side.edges.push(edge_idx);
        }
        debug_assert_eq!(side.vertices.len(), side.edges.len());
    }

    // STORAGE

    pub(crate) fn alloc_vertex(&mut self, vertex: Vertex) -> VertexIdx {
        if let Some(idx) = self.vertex_free.pop() {
            self.vertices[idx.0] = Some(vertex);
            idx
        } else {
            self.vertices.push(Some(vertex));
            VertexIdx(self.vertices.len() - 1)
        }
    }

    pub(crate) fn alloc_edge(&mut self, edge: Edge) -> EdgeIdx {
        if let Some(idx) = self.edge_free.pop() {
            self.edges[idx.0] = Some(edge);
            idx
        } else {
            self.edges.push(Some(edge));
            EdgeIdx(self.edges.len() - 1)
        }
    }

    pub(crate) fn alloc_side(&mut self, side: Side) -> SideIdx {
        if let Some(idx) = self.side_free.pop() {
            self.sides[idx.0] = Some(side);
            idx
        } else {
            self.sides.push(Some(side));
            SideIdx(self.sides.len() - 1)
        }
    }

    pub(crate) fn free_vertex(&mut self, idx: VertexIdx) {
        debug_assert!(self.vertices[idx.0].is_some());
        self.vertices[idx.0] = None;
        self.vertex_free.push(idx);
    }

    pub(crate) fn free_edge(&mut self, idx: EdgeIdx) {
        debug_assert!(self.edges[idx.0].is_some());
        self.edges[idx.0] = None;
        self.edge_free.push(idx);
    }

    pub(crate) fn free_side(&mut self, idx: SideIdx) {
        debug_assert!(self.sides[idx.0].is_some());
        self.sides[idx.0] = None;
        self.side_free.push(idx);
    }

    /// Build a side from edges with per-edge winding flags: an inverted edge
    /// runs backward relative to the new side (the side claims its `left`
    /// flank).
    pub(crate) fn new_side(&mut self, edges: &[EdgeIdx], inverted: &[bool], face: Option<Face>) -> SideIdx {
        debug_assert_eq!(edges.len(), inverted.len());
        let side_idx = self.alloc_side(Side {
            vertices: Vec::with_capacity(edges.len()),
            edges: Vec::with_capacity(edges.len()),
            face,
        });
        for (&edge_idx, &invert) in edges.iter().zip(inverted) {
            let vertex = {
                let edge = self.edge_mut(edge_idx);
                if invert {
                    edge.left = Some(side_idx);
                    edge.end
                } else {
                    edge.right = Some(side_idx);
                    edge.start
                }
            };
            let side = self.side_mut(side_idx);
            side.edges.push(edge_idx);
            side.vertices.push(vertex);
        }
        side_idx
    }

    // ACCESS

    /// The vertex at `idx`, or `None` if it was dropped.
    #[must_use]
    pub fn vertex(&self, idx: VertexIdx) -> Option<&Vertex> {
        self.vertices.get(idx.0).and_then(Option::as_ref)
    }

    /// The edge at `idx`, or `None` if it was dropped.
    #[must_use]
    pub fn edge(&self, idx: EdgeIdx) -> Option<&Edge> {
        self.edges.get(idx.0).and_then(Option::as_ref)
    }

    /// The side at `idx`, or `None` if it was dropped.
    #[must_use]
    pub fn side(&self, idx: SideIdx) -> Option<&Side> {
        self.sides.get(idx.0).and_then(Option::as_ref)
    }

    #[track_caller]
    pub(crate) fn vertex_ref(&self, idx: VertexIdx) -> &Vertex {
        self.vertices[idx.0].as_ref().expect("live vertex index")
    }

    #[track_caller]
    pub(crate) fn edge_ref(&self, idx: EdgeIdx) -> &Edge {
        self.edges[idx.0].as_ref().expect("live edge index")
    }

    #[track_caller]
    pub(crate) fn side_ref(&self, idx: SideIdx) -> &Side {
        self.sides[idx.0].as_ref().expect("live side index")
    }

    #[track_caller]
    pub(crate) fn vertex_mut(&mut self, idx: VertexIdx) -> &mut Vertex {
        self.vertices[idx.0].as_mut().expect("live vertex index")
    }

    #[track_caller]
    pub(crate) fn edge_mut(&mut self, idx: EdgeIdx) -> &mut Edge {
        self.edges[idx.0].as_mut().expect("live edge index")
    }

    #[track_caller]
    pub(crate) fn side_mut(&mut self, idx: SideIdx) -> &mut Side {
        self.sides[idx.0].as_mut().expect("live side index")
    }

    /// Position of a live vertex.
    #[inline]
    #[must_use]
    #[track_caller]
    pub fn position(&self, idx: VertexIdx) -> DVec3 {
        self.vertex_ref(idx).position
    }

    /// Iterate over live vertices.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexIdx, &Vertex)> {
        self.vertices
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (VertexIdx(i), v)))
    }

    /// Iterate over live edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeIdx, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (EdgeIdx(i), e)))
    }

    /// Iterate over live sides.
    pub fn sides(&self) -> impl Iterator<Item = (SideIdx, &Side)> {
        self.sides
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SideIdx(i), s)))
    }

    pub(crate) fn vertex_indices(&self) -> Vec<VertexIdx> {
        self.vertices().map(|(i, _)| i).collect()
    }

    pub(crate) fn edge_indices(&self) -> Vec<EdgeIdx> {
        self.edges().map(|(i, _)| i).collect()
    }

    pub(crate) fn side_indices(&self) -> Vec<SideIdx> {
        self.sides().map(|(i, _)| i).collect()
    }

    /// Number of side slots, live or freed; for index-stable scans that
    /// mutate the side array as they go.
    pub(crate) fn side_slot_count(&self) -> usize {
        self.sides.len()
    }

    /// Number of live vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.iter().flatten().count()
    }

    /// Number of live edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    /// Number of live sides.
    #[must_use]
    pub fn side_count(&self) -> usize {
        self.sides.iter().flatten().count()
    }

    /// All live vertex positions.
    #[must_use]
    pub fn vertex_positions(&self) -> Vec<DVec3> {
        self.vertices().map(|(_, v)| v.position).collect()
    }

    /// The side's vertex ring as positions, in winding order.
    #[must_use]
    pub fn side_positions(&self, side: SideIdx) -> Vec<DVec3> {
        self.side_ref(side)
            .vertices
            .iter()
            .map(|&v| self.position(v))
            .collect()
    }

    /// Whether every side carries a face.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.sides().all(|(_, side)| side.face.is_some())
    }

    /// The brush's axis-aligned bounds.
    #[must_use]
    pub const fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// A deep copy for feasibility tests and snapshot-based undo.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Translate the whole brush, faces included. The topology is unchanged.
    pub fn translate(&mut self, delta: DVec3) {
        for slot in self.vertices.iter_mut().flatten() {
            slot.position += delta;
        }
        for slot in self.sides.iter_mut().flatten() {
            if let Some(face) = &mut slot.face {
                face.plane = face.plane.translated(delta);
                for p in &mut face.points {
                    *p += delta;
                }
            }
        }
        self.bounds = self.bounds.translated(delta);
    }

    pub(crate) fn update_bounds(&mut self) {
        self.bounds = Bounds::of_points(self.vertices().map(|(_, v)| v.position));
    }

    // QUERIES

    /// The vertex at `position`, within [`ALMOST_ZERO`].
    #[must_use]
    pub fn find_vertex(&self, position: DVec3) -> Option<VertexIdx> {
        self.vertices()
            .find(|(_, v)| almost_equal(v.position, position, ALMOST_ZERO))
            .map(|(i, _)| i)
    }

    /// The edge connecting the two positions, in either direction.
    #[must_use]
    pub fn find_edge(&self, a: DVec3, b: DVec3) -> Option<EdgeIdx> {
        self.edges()
            .find(|(_, e)| {
                let s = self.position(e.start);
                let t = self.position(e.end);
                (almost_equal(s, a, ALMOST_ZERO) && almost_equal(t, b, ALMOST_ZERO))
                    || (almost_equal(s, b, ALMOST_ZERO) && almost_equal(t, a, ALMOST_ZERO))
            })
            .map(|(i, _)| i)
    }

    /// The side whose ring matches `positions` up to rotation (winding is
    /// significant).
    #[must_use]
    pub fn find_side(&self, positions: &[DVec3]) -> Option<SideIdx> {
        self.sides()
            .find(|(_, side)| side.has_vertex_positions(self, positions))
            .map(|(i, _)| i)
    }

    /// The fan of sides around a vertex, in winding order.
    #[must_use]
    pub fn incident_sides(&self, vertex: VertexIdx) -> Vec<SideIdx> {
        let mut edge_idx = None;
        for (idx, edge) in self.edges() {
            if edge.start == vertex || edge.end == vertex {
                edge_idx = Some(idx);
                break;
            }
        }
        let Some(mut edge_idx) = edge_idx else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut side_idx = {
            let edge = self.edge_ref(edge_idx);
            if edge.start == vertex { edge.right } else { edge.left }
        }
        .expect("every edge has two incident sides");
        loop {
            result.push(side_idx);
            let side = self.side_ref(side_idx);
            let i = side
                .edges
                .iter()
                .position(|&e| e == edge_idx)
                .expect("ring contains the incident edge");
            edge_idx = side.edges[pred(i, side.edges.len(), 1)];
            let edge = self.edge_ref(edge_idx);
            side_idx = if edge.start == vertex { edge.right } else { edge.left }
                .expect("every edge has two incident sides");
            if side_idx == result[0] {
                break;
            }
        }
        result
    }

    // VALIDATION

    /// Check the brush's topological invariants.
    ///
    /// - every ring is consistent (vertex `i` starts edge `i`, lengths match)
    /// - every edge is referenced by exactly two rings and has two distinct
    ///   flanks
    /// - no two vertices coincide, no two edges connect the same pair
    /// - the Euler characteristic V − E + F is 2
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut edge_visits: FxHashMap<EdgeIdx, usize> = FxHashMap::default();
        let mut vertex_visits: FxHashSet<VertexIdx> = FxHashSet::default();

        for (side_idx, side) in self.sides() {
            if side.vertices.len() != side.edges.len() || side.vertices.len() < 3 {
                return Err(TopologyError::RingMismatch { side: side_idx });
            }
            for (j, &edge_idx) in side.edges.iter().enumerate() {
                let Some(edge) = self.edge(edge_idx) else {
                    return Err(TopologyError::MissingIncidence { side: side_idx, edge: edge_idx });
                };
                let Some(start) = edge.start_vertex(side_idx) else {
                    return Err(TopologyError::MissingIncidence { side: side_idx, edge: edge_idx });
                };
                if start != side.vertices[j] {
                    return Err(TopologyError::RingMismatch { side: side_idx });
                }
                *edge_visits.entry(edge_idx).or_insert(0) += 1;
                vertex_visits.insert(start);
            }
        }

        for (idx, edge) in self.edges() {
            let visits = edge_visits.get(&idx).copied().unwrap_or(0);
            if visits != 2 {
                return Err(TopologyError::FreeEdge { edge: idx, visits });
            }
            if edge.left == edge.right || edge.left.is_none() || edge.right.is_none() {
                return Err(TopologyError::IdenticalFlanks { edge: idx });
            }
        }

        let mut seen_pairs: FxHashSet<(VertexIdx, VertexIdx)> = FxHashSet::default();
        for (idx, edge) in self.edges() {
            let pair = if edge.start < edge.end {
                (edge.start, edge.end)
            } else {
                (edge.end, edge.start)
            };
            if !seen_pairs.insert(pair) {
                return Err(TopologyError::DuplicateEdge { edge: idx });
            }
        }

        let mut positions = SpatialHash::new(ALMOST_ZERO);
        for (idx, vertex) in self.vertices() {
            if !vertex_visits.contains(&idx) {
                return Err(TopologyError::IsolatedVertex { vertex: idx });
            }
            if let Some(existing) = positions.insert_if_unique(vertex.position, idx) {
                return Err(TopologyError::DuplicateVertex { first: existing, second: idx });
            }
        }

        let vertices = self.vertex_count();
        let edges = self.edge_count();
        let sides = self.side_count();
        let characteristic = vertices as i64 - edges as i64 + sides as i64;
        if characteristic != 2 {
            return Err(TopologyError::EulerMismatch { vertices, edges, sides, characteristic });
        }

        Ok(())
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> Bounds {
        Bounds::new(DVec3::splat(-8192.0), DVec3::splat(8192.0))
    }

    fn axis_face(normal: DVec3, distance: f64) -> Face {
        Face::from_plane(FacePlane::new(normal, distance), FaceAttributes::default())
    }

    /// The six faces of an axis-aligned cube spanning `[-extent, extent]^3`.
    fn cube_faces(extent: f64) -> Vec<Face> {
        [
            DVec3::X,
            DVec3::NEG_X,
            DVec3::Y,
            DVec3::NEG_Y,
            DVec3::Z,
            DVec3::NEG_Z,
        ]
        .into_iter()
        .map(|normal| axis_face(normal, extent))
        .collect()
    }

    #[test]
    fn test_plane_point_status() {
        let plane = FacePlane::new(DVec3::X, 64.0);
        assert_eq!(plane.point_status(DVec3::ZERO), PointStatus::Below);
        assert_eq!(plane.point_status(DVec3::new(64.0, 3.0, -5.0)), PointStatus::Inside);
        assert_eq!(plane.point_status(DVec3::new(65.0, 0.0, 0.0)), PointStatus::Above);
    }

    #[test]
    fn test_plane_from_points_winding() {
        // map winding: (p2 - p0) x (p1 - p0)
        let plane = FacePlane::from_points(
            DVec3::new(0.0, 0.0, 64.0),
            DVec3::new(0.0, 1.0, 64.0),
            DVec3::new(1.0, 0.0, 64.0),
        )
        .unwrap();
        assert!(plane.normal.abs_diff_eq(DVec3::Z, 1e-9));
        assert!((plane.distance - 64.0).abs() < 1e-9);

        assert!(FacePlane::from_points(DVec3::ZERO, DVec3::X, DVec3::X * 2.0).is_none());
    }

    #[test]
    fn test_world_box_topology() {
        let geometry = BrushGeometry::from_bounds(world());
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(geometry.edge_count(), 12);
        assert_eq!(geometry.side_count(), 6);
        assert!(geometry.validate().is_ok());
        assert!(!geometry.closed());

        // all 8 corners are present
        for x in [-8192.0, 8192.0] {
            for y in [-8192.0, 8192.0] {
                for z in [-8192.0, 8192.0] {
                    assert!(geometry.find_vertex(DVec3::new(x, y, z)).is_some());
                }
            }
        }
    }

    #[test]
    fn test_build_with_empty_face_list() {
        let geometry = BrushGeometry::build(world(), Vec::new()).unwrap();
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(geometry.edge_count(), 12);
        assert_eq!(geometry.side_count(), 6);
        assert!(geometry.closed());
        assert!(geometry.validate().is_ok());

        // each side is a quad of 4 coplanar corners sharing one fixed axis
        // coordinate, with an outward normal; independent of ordering
        let mut outward_normals = Vec::new();
        for (idx, side) in geometry.sides() {
            assert_eq!(side.vertices.len(), 4);
            let ring = geometry.side_positions(idx);
            let plane = FacePlane::from_points(ring[0], ring[1], ring[ring.len() - 1]).unwrap();
            for p in &ring {
                assert!((plane.signed_distance(*p)).abs() < 1e-6);
            }
            outward_normals.push(plane.normal);
        }
        for expected in [
            DVec3::X,
            DVec3::NEG_X,
            DVec3::Y,
            DVec3::NEG_Y,
            DVec3::Z,
            DVec3::NEG_Z,
        ] {
            assert_eq!(
                outward_normals
                    .iter()
                    .filter(|n| n.abs_diff_eq(expected, 1e-9))
                    .count(),
                1
            );
        }
    }

    #[test]
    fn test_build_cube() {
        let geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(geometry.edge_count(), 12);
        assert_eq!(geometry.side_count(), 6);
        assert!(geometry.closed());
        assert!(geometry.validate().is_ok());
        assert_eq!(geometry.bounds(), Bounds::new(DVec3::splat(-64.0), DVec3::splat(64.0)));
        assert!(geometry.find_vertex(DVec3::new(64.0, -64.0, 64.0)).is_some());
    }

    #[test]
    fn test_clip_cube_corner() {
        let mut geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        let clip = axis_face(DVec3::new(1.0, 1.0, 1.0), 160.0);
        let plane = clip.plane;

        let result = geometry.add_face(clip).unwrap();
        assert!(matches!(result, ClipResult::Split { .. }));

        // one corner cut off: 8 - 1 + 3 vertices, 6 + 1 sides, Euler edges
        assert_eq!(geometry.vertex_count(), 10);
        assert_eq!(geometry.side_count(), 7);
        assert_eq!(geometry.edge_count(), 15);
        assert!(geometry.validate().is_ok());
        assert!(geometry.find_vertex(DVec3::new(64.0, 64.0, 64.0)).is_none());

        // the new side lies in the clip plane
        let triangle = geometry
            .sides()
            .find(|(_, s)| s.vertices.len() == 3)
            .expect("the cut leaves a triangle side");
        for p in geometry.side_positions(triangle.0) {
            assert!(plane.signed_distance(p).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clip_redundant_plane() {
        let mut geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        let result = geometry.add_face(axis_face(DVec3::X, 128.0)).unwrap();
        assert!(matches!(result, ClipResult::Redundant));
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(geometry.side_count(), 6);
        assert!(geometry.validate().is_ok());
    }

    #[test]
    fn test_clip_empty_brush() {
        let mut faces = cube_faces(64.0);
        faces.push(axis_face(DVec3::NEG_X, -128.0)); // keeps only x >= 128
        assert!(matches!(
            BrushGeometry::build(world(), faces),
            Err(GeometryError::EmptyBrush)
        ));

        // add_face on its own reports Empty and leaves the brush untouched
        let mut geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        let result = geometry.add_face(axis_face(DVec3::NEG_X, -128.0)).unwrap();
        assert!(matches!(result, ClipResult::Empty));
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(geometry.side_count(), 6);
        assert!(geometry.validate().is_ok());
    }

    #[test]
    fn test_has_vertex_positions() {
        let mut geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        geometry
            .add_face(axis_face(DVec3::new(1.0, 1.0, 1.0), 160.0))
            .unwrap();

        // the corner cut turns three quads into pentagons
        let (side_idx, _) = geometry
            .sides()
            .find(|(_, s)| s.vertices.len() == 5)
            .expect("a pentagon side");
        let mut ring = geometry.side_positions(side_idx);
        let side = geometry.side(side_idx).unwrap();

        // every cyclic rotation matches
        for _ in 0..ring.len() {
            ring.rotate_left(1);
            assert!(side.has_vertex_positions(&geometry, &ring));
        }

        // reversed winding does not
        let mut reversed = ring.clone();
        reversed.reverse();
        assert!(!side.has_vertex_positions(&geometry, &reversed));

        // neither does a swapped pair
        let mut swapped = ring.clone();
        swapped.swap(0, ring.len() - 1);
        assert!(!side.has_vertex_positions(&geometry, &swapped));

        // nor a different length
        assert!(!side.has_vertex_positions(&geometry, &ring[..ring.len() - 1]));
        let mut longer = ring.clone();
        longer.push(ring[0]);
        assert!(!side.has_vertex_positions(&geometry, &longer));
    }

    #[test]
    fn test_find_edge_and_side() {
        let geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        let a = DVec3::new(-64.0, -64.0, -64.0);
        let b = DVec3::new(-64.0, 64.0, -64.0);
        assert!(geometry.find_edge(a, b).is_some());
        assert!(geometry.find_edge(b, a).is_some());
        assert!(geometry.find_edge(a, DVec3::new(64.0, 64.0, 64.0)).is_none());

        let top = geometry
            .sides()
            .find(|(idx, _)| {
                geometry
                    .side_positions(*idx)
                    .iter()
                    .all(|p| (p.z - 64.0).abs() < 1e-9)
            })
            .map(|(idx, _)| idx)
            .expect("top side");
        let ring = geometry.side_positions(top);
        assert_eq!(geometry.find_side(&ring), Some(top));
        let mut reversed = ring;
        reversed.reverse();
        assert!(geometry.find_side(&reversed).is_none());
    }

    #[test]
    fn test_incident_sides() {
        let geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        let corner = geometry.find_vertex(DVec3::new(64.0, 64.0, 64.0)).unwrap();
        let fan = geometry.incident_sides(corner);
        assert_eq!(fan.len(), 3);
        for side in fan {
            assert!(geometry.side_ref(side).vertices.contains(&corner));
        }
    }

    #[test]
    fn test_snapshot_is_independent() {
        let geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        let mut copy = geometry.snapshot();
        copy.add_face(axis_face(DVec3::new(1.0, 1.0, 1.0), 160.0)).unwrap();
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(copy.vertex_count(), 10);
        assert!(geometry.validate().is_ok());
    }

    #[test]
    fn test_translate() {
        let mut geometry = BrushGeometry::build(world(), cube_faces(64.0)).unwrap();
        geometry.translate(DVec3::new(32.0, 0.0, -16.0));
        assert_eq!(
            geometry.bounds(),
            Bounds::new(DVec3::new(-32.0, -64.0, -80.0), DVec3::new(96.0, 64.0, 48.0))
        );
        assert!(geometry.validate().is_ok());
        for (_, side) in geometry.sides() {
            let face = side.face.as_ref().unwrap();
            for p in &face.points {
                assert!(face.plane.signed_distance(*p).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_correct_snaps_near_integers() {
        let v = DVec3::new(63.99999999, -0.0004, 10.5);
        let c = correct(v);
        assert_eq!(c.x, 64.0);
        assert_eq!(c.y, 0.0);
        assert_eq!(c.z, 10.5);
    }
}
