//! Vertex, edge and face editing operations on a [`BrushGeometry`].
//!
//! Every operation comes as a `can_*` / mutating pair: the feasibility check
//! replays the whole edit on a disposable snapshot, so an infeasible drag is
//! rejected without ever touching the live geometry. Callers are expected to
//! treat a `false` feasibility answer as "this drag frame has no effect", not
//! as an error.
//!
//! Moving a vertex is the primitive everything else is built on:
//!
//! 1. Incident sides with more than three vertices are cut into triangles —
//!    chopped when the target lies behind the side's boundary, fanned
//!    otherwise
//! 2. The vertex travels the longest feasible distance toward its target;
//!    crossing a plane spanned by neighbouring sides would make the brush
//!    non-convex, so travel stops there and continues next iteration
//! 3. Landing on an adjacent vertex merges the two (when merging is allowed);
//!    landing on a non-incident edge or a non-adjacent vertex cancels the move
//! 4. Degenerate triangles are removed, coplanar sides and collinear edges
//!    are merged back, face planes are recomputed from the new rings and each
//!    face's texture projection is refreshed
//!
//! Batch moves are ordered by decreasing `position · delta` so that vertices
//! leading in the direction of travel move first; moving a trailing vertex
//! first can wedge the brush into a transient state that wrongly rejects a
//! feasible drag.

use glam::DVec3;
use itertools::Itertools;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::brush_geometry::{
    ALMOST_ZERO, BrushGeometry, Bounds, COLINEAR_EPSILON, Edge, EdgeIdx, Face, FaceId, FacePlane,
    GeometryError, Side, SideIdx, Vertex, VertexIdx, almost_equal, correct, parallel, pred, succ,
};

/// A finite brush needs at least this many sides. Three planes cannot bound
/// a finite volume, so anything below four is rejected outright.
pub(crate) const MIN_SIDES: usize = 4;

/// Outcome of one edit operation: the new handle positions plus the faces the
/// edit created and destroyed, for callers that track selection or texture
/// state per face.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveResult<T> {
    pub new_positions: T,
    pub added_faces: Vec<FaceId>,
    pub dropped_faces: Vec<FaceId>,
}

/// Result of a vertex move: the final position of each surviving vertex.
pub type VertexMoveResult = MoveResult<Vec<DVec3>>;
/// Result of an edge move: the translated endpoint pairs.
pub type EdgeMoveResult = MoveResult<Vec<(DVec3, DVec3)>>;
/// Result of a face move: the translated polygons.
pub type SideMoveResult = MoveResult<Vec<Vec<DVec3>>>;
/// Result of an edge or face split: the final position of the new vertex.
pub type SplitResult = MoveResult<DVec3>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MoveVertexOutcome {
    Moved(VertexIdx),
    Deleted,
    Unchanged,
}

/// Nets the faces created and dropped during one operation.
///
/// A face that is created by side splitting and then destroyed again by a
/// later merge in the same operation never becomes visible to the caller, so
/// it is removed from both sets instead of being reported twice.
#[derive(Debug, Default)]
pub(crate) struct FaceTracker {
    added: FxHashSet<FaceId>,
    dropped: FxHashSet<FaceId>,
}

impl FaceTracker {
    pub(crate) fn created(&mut self, id: FaceId) {
        self.added.insert(id);
    }

    pub(crate) fn dropped(&mut self, id: FaceId) {
        if !self.added.remove(&id) {
            self.dropped.insert(id);
        }
    }

    fn into_lists(self) -> (Vec<FaceId>, Vec<FaceId>) {
        let mut added: Vec<FaceId> = self.added.into_iter().collect();
        let mut dropped: Vec<FaceId> = self.dropped.into_iter().collect();
        added.sort_unstable();
        dropped.sort_unstable();
        (added, dropped)
    }
}

/// Sort positions by decreasing dot product with the move delta, so that the
/// vertices leading in the direction of travel move first.
fn inverse_dot_order(positions: &[DVec3], delta: DVec3) -> Vec<DVec3> {
    positions
        .iter()
        .copied()
        .sorted_by(|a, b| {
            b.dot(delta)
                .partial_cmp(&a.dot(delta))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .collect()
}

/// Deduplicate positions within [`ALMOST_ZERO`], in a deterministic order.
fn unique_positions(mut positions: Vec<DVec3>) -> Vec<DVec3> {
    positions.sort_by(|a, b| {
        (a.x, a.y, a.z)
            .partial_cmp(&(b.x, b.y, b.z))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    positions.dedup_by(|a, b| almost_equal(*a, *b, ALMOST_ZERO));
    positions
}

impl BrushGeometry {
    // PUBLIC OPERATIONS
    //
    // Each feasibility check replays the identical mutation core on a
    // snapshot, so `can_* == true` guarantees the mutating call succeeds and
    // `can_* == false` guarantees it returns an error without touching
    // anything.

    /// Whether every vertex at `positions` can travel by `delta` without the
    /// brush leaving `world_bounds`, dropping below [`MIN_SIDES`] sides or
    /// becoming non-convex.
    #[must_use]
    pub fn can_move_vertices(&self, world_bounds: Bounds, positions: &[DVec3], delta: DVec3) -> bool {
        let mut test = self.snapshot();
        let mut tracker = FaceTracker::default();
        if test.batch_move_core(positions, delta, true, false, &mut tracker).is_err() {
            trace!(?delta, "vertex move rejected");
            return false;
        }
        test.within_limits(world_bounds)
    }

    /// Move every vertex at `positions` by `delta`.
    ///
    /// Vertices that merge into a neighbour during the move are dropped from
    /// the result's positions. Returns [`GeometryError::InfeasibleEdit`]
    /// without touching the geometry when the batch is not feasible.
    pub fn move_vertices(
        &mut self,
        world_bounds: Bounds,
        positions: &[DVec3],
        delta: DVec3,
    ) -> Result<VertexMoveResult, GeometryError> {
        if !self.can_move_vertices(world_bounds, positions, delta) {
            return Err(GeometryError::InfeasibleEdit);
        }

        let mut tracker = FaceTracker::default();
        let new_positions = self.batch_move_core(positions, delta, true, false, &mut tracker)?;
        let (added_faces, dropped_faces) = tracker.into_lists();
        Ok(VertexMoveResult { new_positions, added_faces, dropped_faces })
    }

    /// Whether the edges given by their endpoint positions can travel by
    /// `delta`. Every endpoint must move cleanly — merging into other
    /// vertices is not an edge move — and every translated edge must survive
    /// as an edge.
    #[must_use]
    pub fn can_move_edges(
        &self,
        world_bounds: Bounds,
        edges: &[(DVec3, DVec3)],
        delta: DVec3,
    ) -> bool {
        let endpoints = unique_positions(edges.iter().flat_map(|&(a, b)| [a, b]).collect());

        let mut test = self.snapshot();
        let mut tracker = FaceTracker::default();
        if test.batch_move_core(&endpoints, delta, false, true, &mut tracker).is_err() {
            trace!(?delta, "edge move rejected");
            return false;
        }
        edges
            .iter()
            .all(|&(a, b)| test.find_edge(a + delta, b + delta).is_some())
            && test.within_limits(world_bounds)
    }

    /// Move the given edges by `delta`, returning the translated endpoint
    /// pairs.
    pub fn move_edges(
        &mut self,
        world_bounds: Bounds,
        edges: &[(DVec3, DVec3)],
        delta: DVec3,
    ) -> Result<EdgeMoveResult, GeometryError> {
        if !self.can_move_edges(world_bounds, edges, delta) {
            return Err(GeometryError::InfeasibleEdit);
        }

        let endpoints = unique_positions(edges.iter().flat_map(|&(a, b)| [a, b]).collect());
        let mut tracker = FaceTracker::default();
        self.batch_move_core(&endpoints, delta, false, true, &mut tracker)?;

        let (added_faces, dropped_faces) = tracker.into_lists();
        Ok(EdgeMoveResult {
            new_positions: edges.iter().map(|&(a, b)| (a + delta, b + delta)).collect(),
            added_faces,
            dropped_faces,
        })
    }

    /// Whether the sides given by their vertex rings can travel by `delta`.
    ///
    /// Beyond the per-vertex checks, every dragged face must survive the move
    /// as a coherent polygon: its ring, translated by `delta`, must be found
    /// among the resulting sides by cyclic position match.
    #[must_use]
    pub fn can_move_sides(
        &self,
        world_bounds: Bounds,
        polygons: &[Vec<DVec3>],
        delta: DVec3,
    ) -> bool {
        let corners = unique_positions(polygons.iter().flatten().copied().collect());

        let mut test = self.snapshot();
        let mut tracker = FaceTracker::default();
        if test.batch_move_core(&corners, delta, false, true, &mut tracker).is_err() {
            trace!(?delta, "face move rejected");
            return false;
        }
        polygons
            .iter()
            .all(|polygon| {
                let translated: Vec<DVec3> = polygon.iter().map(|&p| p + delta).collect();
                test.find_side(&translated).is_some()
            })
            && test.within_limits(world_bounds)
    }

    /// Move whole sides by `delta`, returning the translated rings.
    pub fn move_sides(
        &mut self,
        world_bounds: Bounds,
        polygons: &[Vec<DVec3>],
        delta: DVec3,
    ) -> Result<SideMoveResult, GeometryError> {
        if !self.can_move_sides(world_bounds, polygons, delta) {
            return Err(GeometryError::InfeasibleEdit);
        }

        let corners = unique_positions(polygons.iter().flatten().copied().collect());
        let mut tracker = FaceTracker::default();
        self.batch_move_core(&corners, delta, false, true, &mut tracker)?;

        let (added_faces, dropped_faces) = tracker.into_lists();
        Ok(SideMoveResult {
            new_positions: polygons
                .iter()
                .map(|polygon| polygon.iter().map(|&p| p + delta).collect())
                .collect(),
            added_faces,
            dropped_faces,
        })
    }

    /// The shared batch core: move every handle position by `delta` in
    /// inverse-dot order. With `require_moved`, a vertex that merges away
    /// fails the batch; otherwise only a cancelled move does.
    fn batch_move_core(
        &mut self,
        positions: &[DVec3],
        delta: DVec3,
        allow_merge: bool,
        require_moved: bool,
        tracker: &mut FaceTracker,
    ) -> Result<Vec<DVec3>, GeometryError> {
        if positions.is_empty() {
            return Err(GeometryError::InfeasibleEdit);
        }
        let mut new_positions = Vec::new();
        for position in inverse_dot_order(positions, delta) {
            let vertex = self
                .find_vertex(position)
                .ok_or(GeometryError::VertexNotFound(position))?;
            match self.move_vertex_internal(vertex, allow_merge, delta, tracker)? {
                MoveVertexOutcome::Moved(vertex) => new_positions.push(self.position(vertex)),
                MoveVertexOutcome::Deleted if !require_moved => {}
                _ => return Err(GeometryError::InfeasibleEdit),
            }
        }
        Ok(new_positions)
    }

    /// Post-edit acceptance: the brush still has enough sides and sits inside
    /// the world bounds.
    fn within_limits(&self, world_bounds: Bounds) -> bool {
        if self.side_count() < MIN_SIDES {
            debug!(sides = self.side_count(), "edit rejected: too few sides");
            return false;
        }
        if !world_bounds.contains_bounds(&self.bounds()) {
            debug!("edit rejected: brush leaves world bounds");
            return false;
        }
        true
    }

    /// Whether the edge between the two positions can be split and its new
    /// vertex dragged by `delta`.
    ///
    /// Dragging into either adjacent face would fold the brush, so such
    /// deltas are rejected up front.
    #[must_use]
    pub fn can_split_edge(&self, world_bounds: Bounds, edge: (DVec3, DVec3), delta: DVec3) -> bool {
        let Some(edge_idx) = self.find_edge(edge.0, edge.1) else {
            return false;
        };
        let (left, right) = {
            let e = self.edge_ref(edge_idx);
            (e.left, e.right)
        };
        for side in [left, right] {
            let Some(side) = side else { return false };
            let Some(plane) = self.side_plane(side) else {
                return false;
            };
            if delta.dot(plane.normal) < -ALMOST_ZERO {
                trace!(?delta, "edge split rejected: drag into an adjacent face");
                return false;
            }
        }

        let mut test = self.snapshot();
        let mut tracker = FaceTracker::default();
        let test_edge = test
            .find_edge(edge.0, edge.1)
            .expect("snapshot preserves edges");
        let vertex = test.split_edge_at_center(test_edge);
        match test.move_vertex_internal(vertex, false, delta, &mut tracker) {
            Ok(MoveVertexOutcome::Moved(_)) => test.within_limits(world_bounds),
            _ => false,
        }
    }

    /// Split the edge between the two positions and drag the new vertex by
    /// `delta`. Returns the new vertex's final position.
    pub fn split_edge(
        &mut self,
        world_bounds: Bounds,
        edge: (DVec3, DVec3),
        delta: DVec3,
    ) -> Result<SplitResult, GeometryError> {
        if !self.can_split_edge(world_bounds, edge, delta) {
            return Err(GeometryError::InfeasibleEdit);
        }

        let edge_idx = self
            .find_edge(edge.0, edge.1)
            .ok_or(GeometryError::EdgeNotFound(edge.0, edge.1))?;
        let mut tracker = FaceTracker::default();
        let vertex = self.split_edge_at_center(edge_idx);
        match self.move_vertex_internal(vertex, false, delta, &mut tracker)? {
            MoveVertexOutcome::Moved(vertex) => {
                let (added_faces, dropped_faces) = tracker.into_lists();
                Ok(SplitResult {
                    new_positions: self.position(vertex),
                    added_faces,
                    dropped_faces,
                })
            }
            _ => Err(GeometryError::InfeasibleEdit),
        }
    }

    /// Whether the side with the given ring can be split at its centroid and
    /// the new vertex dragged by `delta`. Dragging parallel to the face plane
    /// is rejected.
    #[must_use]
    pub fn can_split_side(&self, world_bounds: Bounds, polygon: &[DVec3], delta: DVec3) -> bool {
        let Some(side_idx) = self.find_side(polygon) else {
            return false;
        };
        let Some(plane) = self.side_plane(side_idx) else {
            return false;
        };
        if delta.dot(plane.normal).abs() <= ALMOST_ZERO {
            trace!(?delta, "face split rejected: drag parallel to the face");
            return false;
        }

        let mut test = self.snapshot();
        let mut tracker = FaceTracker::default();
        let test_side = test.find_side(polygon).expect("snapshot preserves sides");
        let vertex = test.split_side_at_centroid(test_side, &mut tracker);
        match test.move_vertex_internal(vertex, false, delta, &mut tracker) {
            Ok(MoveVertexOutcome::Moved(_)) => test.within_limits(world_bounds),
            _ => false,
        }
    }

    /// Split the side with the given ring at its centroid and drag the new
    /// vertex by `delta`. Returns the new vertex's final position.
    pub fn split_side(
        &mut self,
        world_bounds: Bounds,
        polygon: &[DVec3],
        delta: DVec3,
    ) -> Result<SplitResult, GeometryError> {
        if !self.can_split_side(world_bounds, polygon, delta) {
            return Err(GeometryError::InfeasibleEdit);
        }

        let side_idx = self.find_side(polygon).ok_or(GeometryError::SideNotFound)?;
        let mut tracker = FaceTracker::default();
        let vertex = self.split_side_at_centroid(side_idx, &mut tracker);
        match self.move_vertex_internal(vertex, false, delta, &mut tracker)? {
            MoveVertexOutcome::Moved(vertex) => {
                let (added_faces, dropped_faces) = tracker.into_lists();
                Ok(SplitResult {
                    new_positions: self.position(vertex),
                    added_faces,
                    dropped_faces,
                })
            }
            _ => Err(GeometryError::InfeasibleEdit),
        }
    }

    /// Round every vertex onto the given grid, merging vertices that land on
    /// each other. Vertices whose individual snap is infeasible stay put.
    ///
    /// Snapping a brush that is already on the grid is a no-op. If the
    /// snapped brush would leave `world_bounds` or lose too many sides, the
    /// whole operation is rolled back.
    pub fn snap_vertices(
        &mut self,
        world_bounds: Bounds,
        grid: f64,
    ) -> Result<VertexMoveResult, GeometryError> {
        assert!(grid > 0.0, "snap grid must be positive");

        let backup = self.snapshot();
        let mut tracker = FaceTracker::default();
        for vertex in self.vertex_indices() {
            if self.vertex(vertex).is_none() {
                // merged away by an earlier snap
                continue;
            }
            let position = self.position(vertex);
            let target = (position / grid).round() * grid;
            let delta = target - position;
            if delta.length_squared() == 0.0 {
                continue;
            }
            match self.move_vertex_internal(vertex, true, delta, &mut tracker) {
                Ok(MoveVertexOutcome::Unchanged) => {
                    trace!(?position, ?target, "vertex resists snapping, left in place");
                }
                Ok(_) => {}
                Err(error) => {
                    *self = backup;
                    return Err(error);
                }
            }
        }

        if self.side_count() < MIN_SIDES || !world_bounds.contains_bounds(&self.bounds()) {
            debug!("snap rolled back: result leaves world bounds or loses sides");
            *self = backup;
            return Err(GeometryError::InfeasibleEdit);
        }

        let (added_faces, dropped_faces) = tracker.into_lists();
        Ok(VertexMoveResult {
            new_positions: self.vertex_positions(),
            added_faces,
            dropped_faces,
        })
    }

    // THE MOVE PRIMITIVE

    /// Move one vertex by `delta`, restructuring the topology as it travels.
    ///
    /// `allow_merge` controls what happens when the vertex lands exactly on
    /// an adjacent vertex: merge the two, or cancel the move.
    pub(crate) fn move_vertex_internal(
        &mut self,
        vertex: VertexIdx,
        allow_merge: bool,
        delta: DVec3,
        tracker: &mut FaceTracker,
    ) -> Result<MoveVertexOutcome, GeometryError> {
        debug_assert!(self.validate().is_ok());

        let mut delta = delta;
        loop {
            let move_dist = delta.length();
            if move_dist == 0.0 {
                return Ok(MoveVertexOutcome::Unchanged);
            }
            let origin = self.position(vertex);
            let direction = delta / move_dist;

            let incident = self.incident_sides(vertex);
            self.split_incident_sides(&incident, direction, vertex, tracker)?;

            let incident = self.incident_sides(vertex);
            let actual_dist =
                match self.min_vertex_move_dist(&incident, vertex, origin, direction, move_dist) {
                    Ok(dist) => dist,
                    Err(_) => {
                        // collinear intermediate state; stop gracefully
                        return self.cancel_move(tracker);
                    }
                };

            let new_position = origin + direction * actual_dist;
            self.vertex_mut(vertex).position = new_position;

            // dragged onto the interior of a non-incident edge: undo
            if self.lands_on_foreign_edge(vertex) {
                self.vertex_mut(vertex).position = origin;
                return self.cancel_move(tracker);
            }

            // dragged onto another vertex: merge if allowed and adjacent
            if let Some(candidate) = self.coincident_vertex(vertex) {
                let connecting = self.connecting_edge(vertex, candidate);
                if allow_merge && connecting.is_some() {
                    self.merge_vertices(vertex, candidate, tracker);
                } else {
                    self.vertex_mut(vertex).position = origin;
                    return self.cancel_move(tracker);
                }
            }

            // incident triangles that collapsed to a line fold into their
            // neighbours
            let mut incident = self.incident_sides(vertex);
            self.delete_collinear_triangles(&mut incident, tracker);

            self.merge_coplanar_sides(tracker);
            self.merge_collinear_edges();
            self.update_bounds();

            // No vertex is allocated after the merge phases, so a freed slot
            // cannot have been reused; an empty slot means the vertex is gone.
            let deleted = self.vertex(vertex).is_none();

            if deleted || actual_dist == move_dist {
                self.correct_vertices();
                self.update_face_points()?;
                debug_assert!(self.validate().is_ok());
                return Ok(if deleted {
                    MoveVertexOutcome::Deleted
                } else {
                    MoveVertexOutcome::Moved(vertex)
                });
            }

            // the drag continues from where travel stopped
            delta = direction * (move_dist - actual_dist);
        }
    }

    fn cancel_move(&mut self, tracker: &mut FaceTracker) -> Result<MoveVertexOutcome, GeometryError> {
        // the split triangles are still coplanar with their source sides, so
        // merging restores the previous shape
        self.merge_coplanar_sides(tracker);
        self.merge_collinear_edges();
        self.update_bounds();
        Ok(MoveVertexOutcome::Unchanged)
    }

    // SIDE SPLITTING AROUND THE MOVING VERTEX

    /// Cut every incident side with more than three vertices into triangles.
    ///
    /// A side whose boundary the vertex moves away from is fanned into
    /// triangles around the vertex; a side the vertex digs into only has the
    /// one triangle at the vertex chopped off.
    fn split_incident_sides(
        &mut self,
        incident: &[SideIdx],
        direction: DVec3,
        vertex: VertexIdx,
        tracker: &mut FaceTracker,
    ) -> Result<(), GeometryError> {
        for &side_idx in incident {
            if self.side_ref(side_idx).vertices.len() <= 3 {
                continue;
            }
            let ring = self.side_positions(side_idx);
            let outward = (ring[ring.len() - 1] - ring[0]).cross(ring[1] - ring[0]);

            if outward.dot(direction) < -ALMOST_ZERO {
                self.chop_side_at_vertex(side_idx, vertex, tracker);
            } else {
                self.triangulate_side(side_idx, vertex, tracker);
                let dropped = self.side_ref(side_idx).face.as_ref().map(|f| f.id);
                if let Some(id) = dropped {
                    tracker.dropped(id);
                }
                self.free_side(side_idx);
            }
        }
        Ok(())
    }

    /// Chop the triangle at `vertex` off `side_idx`, leaving the rest of the
    /// ring in place.
    fn chop_side_at_vertex(&mut self, side_idx: SideIdx, vertex: VertexIdx, tracker: &mut FaceTracker) {
        let (e0, f0, e1, f1, prev_vertex, next_vertex, n, vertex_index) = {
            let side = self.side_ref(side_idx);
            let n = side.edges.len();
            let vi = side
                .vertices
                .iter()
                .position(|&v| v == vertex)
                .expect("vertex is on the side");
            let e0 = side.edges[pred(vi, n, 1)];
            let e1 = side.edges[vi];
            (
                e0,
                self.edge_ref(e0).left == Some(side_idx),
                e1,
                self.edge_ref(e1).left == Some(side_idx),
                side.vertices[pred(vi, n, 1)],
                side.vertices[succ(vi, n, 1)],
                n,
                vi,
            )
        };

        let cut_edge = self.alloc_edge(Edge {
            start: prev_vertex,
            end: next_vertex,
            left: None,
            right: Some(side_idx),
        });
        self.replace_side_edges(
            side_idx,
            pred(vertex_index, n, 2),
            succ(vertex_index, n, 1),
            cut_edge,
        );

        let face_copy = self.copy_side_face(side_idx, tracker);
        self.new_side(&[e0, e1, cut_edge], &[f0, f1, true], face_copy);
    }

    /// Fan `side_idx` into triangles around `vertex`. The caller drops the
    /// original side afterwards; its edges are re-pointed to the fan.
    fn triangulate_side(&mut self, side_idx: SideIdx, vertex: VertexIdx, tracker: &mut FaceTracker) {
        let n = self.side_ref(side_idx).edges.len();
        let mut vi = self
            .side_ref(side_idx)
            .vertices
            .iter()
            .position(|&v| v == vertex)
            .expect("vertex is on the side");

        let mut e0 = self.side_ref(side_idx).edges[vi];
        let mut f0 = self.edge_ref(e0).left == Some(side_idx);
        let mut e1 = self.side_ref(side_idx).edges[succ(vi, n, 1)];
        let mut f1 = self.edge_ref(e1).left == Some(side_idx);

        for _ in 0..n - 3 {
            let far_vertex = self.side_ref(side_idx).vertices[succ(vi, n, 2)];
            let spoke = self.alloc_edge(Edge {
                start: far_vertex,
                end: vertex,
                left: None,
                right: None,
            });
            let face_copy = self.copy_side_face(side_idx, tracker);
            self.new_side(&[e0, e1, spoke], &[f0, f1, false], face_copy);

            e0 = spoke;
            f0 = true;
            e1 = self.side_ref(side_idx).edges[succ(vi, n, 2)];
            f1 = self.edge_ref(e1).left == Some(side_idx);
            vi = succ(vi, n, 1);
        }

        let e2 = self.side_ref(side_idx).edges[succ(vi, n, 2)];
        let f2 = self.edge_ref(e2).left == Some(side_idx);
        let face_copy = self.copy_side_face(side_idx, tracker);
        self.new_side(&[e0, e1, e2], &[f0, f1, f2], face_copy);
    }

    fn copy_side_face(&mut self, side_idx: SideIdx, tracker: &mut FaceTracker) -> Option<Face> {
        let copy = self
            .side_ref(side_idx)
            .face
            .as_ref()
            .map(Face::clone_with_new_id);
        if let Some(face) = &copy {
            tracker.created(face.id);
        }
        copy
    }

    // TRAVEL DISTANCE

    /// The longest distance the vertex can travel along `direction` before
    /// the brush stops being convex.
    ///
    /// For each incident triangle we consider the plane spanned with its
    /// successor around the vertex and the boundary of the one neighbour not
    /// incident to the vertex; crossing either is where travel must stop.
    /// Planes are taken from current vertex positions, not from stored face
    /// boundaries, which may be stale mid-operation.
    fn min_vertex_move_dist(
        &self,
        incident: &[SideIdx],
        vertex: VertexIdx,
        origin: DVec3,
        direction: DVec3,
        max_dist: f64,
    ) -> Result<f64, GeometryError> {
        let mut min_dist = max_dist;
        for (i, &side_idx) in incident.iter().enumerate() {
            let next_idx = incident[succ(i, incident.len(), 1)];
            let side = self.side_ref(side_idx);
            let next = self.side_ref(next_idx);
            debug_assert_eq!(side.vertices.len(), 3);
            debug_assert_eq!(next.vertices.len(), 3);

            let vi_side = side
                .vertices
                .iter()
                .position(|&v| v == vertex)
                .expect("vertex is on the side");
            let vi_next = next
                .vertices
                .iter()
                .position(|&v| v == vertex)
                .expect("vertex is on the side");

            let p1 = self.position(side.vertices[succ(vi_side, 3, 1)]);
            let p2 = self.position(side.vertices[succ(vi_side, 3, 2)]);
            let p3 = self.position(next.vertices[succ(vi_next, 3, 2)]);
            let plane = FacePlane::from_points(p1, p2, p3)
                .ok_or(GeometryError::InvalidPlanePoints(p1, p2, p3))?;
            if let Some(dist) = plane.intersect_ray(origin, direction)
                && dist > ALMOST_ZERO
                && dist < min_dist - ALMOST_ZERO
            {
                min_dist = dist;
            }

            let opposite_edge = side.edges[succ(vi_side, 3, 1)];
            let edge = self.edge_ref(opposite_edge);
            let neighbour_idx = if edge.left == Some(side_idx) { edge.right } else { edge.left }
                .expect("every edge has two incident sides");
            let neighbour = self.side_ref(neighbour_idx);
            let b1 = self.position(neighbour.vertices[0]);
            let b2 = self.position(neighbour.vertices[1]);
            let b3 = self.position(neighbour.vertices[2]);
            let boundary = FacePlane::from_points(b1, b2, b3)
                .ok_or(GeometryError::InvalidPlanePoints(b1, b2, b3))?;
            if let Some(dist) = boundary.intersect_ray(origin, direction)
                && dist > ALMOST_ZERO
                && dist < min_dist - ALMOST_ZERO
            {
                min_dist = dist;
            }
        }
        Ok(min_dist)
    }

    // LANDING CHECKS

    /// Whether the vertex now sits on the interior of an edge it does not
    /// belong to.
    fn lands_on_foreign_edge(&self, vertex: VertexIdx) -> bool {
        let position = self.position(vertex);
        for (_, edge) in self.edges() {
            if edge.start == vertex || edge.end == vertex {
                continue;
            }
            let v1 = position - self.position(edge.start);
            let v2 = position - self.position(edge.end);
            if v1.length() < ALMOST_ZERO || v2.length() < ALMOST_ZERO {
                continue;
            }
            if parallel(v1, v2, COLINEAR_EPSILON) {
                let along = self.position(edge.end) - self.position(edge.start);
                if (v1.dot(along) > 0.0) != (v2.dot(along) > 0.0) {
                    return true;
                }
            }
        }
        false
    }

    fn coincident_vertex(&self, vertex: VertexIdx) -> Option<VertexIdx> {
        let position = self.position(vertex);
        self.vertices()
            .find(|&(idx, v)| idx != vertex && almost_equal(v.position, position, ALMOST_ZERO))
            .map(|(idx, _)| idx)
    }

    fn connecting_edge(&self, a: VertexIdx, b: VertexIdx) -> Option<EdgeIdx> {
        self.edges()
            .find(|(_, edge)| edge.connects(a, b))
            .map(|(idx, _)| idx)
    }

    // MERGING

    /// Merge `drop` into `keep` after the two landed on the same position.
    /// The connecting edge collapses and the two triangles flanking it
    /// degenerate and fold into their neighbours.
    fn merge_vertices(&mut self, keep: VertexIdx, drop: VertexIdx, tracker: &mut FaceTracker) {
        let drop_edge = self
            .connecting_edge(keep, drop)
            .expect("merged vertices are adjacent");
        debug_assert_eq!(self.side_ref(self.edge_ref(drop_edge).left.unwrap()).vertices.len(), 3);
        debug_assert_eq!(self.side_ref(self.edge_ref(drop_edge).right.unwrap()).vertices.len(), 3);

        for edge_idx in self.edge_indices() {
            if edge_idx == drop_edge {
                continue;
            }
            let edge = *self.edge_ref(edge_idx);
            if edge.start != drop && edge.end != drop {
                continue;
            }
            {
                let edge = self.edge_mut(edge_idx);
                if edge.start == drop {
                    edge.start = keep;
                } else {
                    edge.end = keep;
                }
            }
            for side_idx in [edge.left, edge.right].into_iter().flatten() {
                for slot in &mut self.side_mut(side_idx).vertices {
                    if *slot == drop {
                        *slot = keep;
                    }
                }
            }
        }

        let (left, right) = {
            let edge = self.edge_ref(drop_edge);
            (edge.left.unwrap(), edge.right.unwrap())
        };
        self.delete_degenerate_triangle(left, drop_edge, tracker);
        self.delete_degenerate_triangle(right, drop_edge, tracker);

        self.free_edge(drop_edge);
        self.free_vertex(drop);
    }

    /// Remove a triangle that collapsed onto one of its edges, folding its
    /// surviving edge into the neighbour across the dropped edge.
    fn delete_degenerate_triangle(
        &mut self,
        side_idx: SideIdx,
        collapsed_edge: EdgeIdx,
        tracker: &mut FaceTracker,
    ) {
        debug_assert_eq!(self.side_ref(side_idx).edges.len(), 3);

        let shift = self
            .side_ref(side_idx)
            .edges
            .iter()
            .position(|&e| e == collapsed_edge)
            .expect("collapsed edge is on the side");
        self.side_mut(side_idx).shift(shift);

        let keep_edge = self.side_ref(side_idx).edges[1];
        let drop_edge = self.side_ref(side_idx).edges[2];
        let neighbour_idx = {
            let edge = self.edge_ref(drop_edge);
            if edge.left == Some(side_idx) { edge.right } else { edge.left }
        }
        .expect("every edge has two incident sides");

        {
            let edge = self.edge_mut(keep_edge);
            if edge.left == Some(side_idx) {
                edge.left = Some(neighbour_idx);
            } else {
                edge.right = Some(neighbour_idx);
            }
        }

        let neighbour_len = self.side_ref(neighbour_idx).edges.len();
        let delete_index = self
            .side_ref(neighbour_idx)
            .edges
            .iter()
            .position(|&e| e == drop_edge)
            .expect("dropped edge is on the neighbour");
        self.replace_side_edges(
            neighbour_idx,
            pred(delete_index, neighbour_len, 1),
            succ(delete_index, neighbour_len, 1),
            keep_edge,
        );

        let dropped = self.side_ref(side_idx).face.as_ref().map(|f| f.id);
        if let Some(id) = dropped {
            tracker.dropped(id);
        }
        self.free_side(side_idx);
        self.free_edge(drop_edge);
    }

    /// Fold incident triangles whose three corners became collinear into the
    /// neighbour across their longest edge.
    fn delete_collinear_triangles(&mut self, incident: &mut Vec<SideIdx>, tracker: &mut FaceTracker) {
        let mut i = 0;
        while i < incident.len() {
            let side_idx = incident[i];
            let edge_index = self.collinear_edge_index(side_idx);
            if edge_index >= self.side_ref(side_idx).edges.len() {
                i += 1;
                continue;
            }

            let side = self.side_ref(side_idx);
            let long_edge = side.edges[edge_index];
            let next = side.edges[succ(edge_index, 3, 1)];
            let next_next = side.edges[succ(edge_index, 3, 2)];
            let far_vertex = self
                .edge_ref(next)
                .end_vertex(side_idx)
                .expect("ring edge is incident to its side");
            debug_assert!(far_vertex != self.edge_ref(long_edge).start);
            debug_assert!(far_vertex != self.edge_ref(long_edge).end);

            let neighbour_idx = {
                let edge = self.edge_ref(long_edge);
                if edge.left == Some(side_idx) { edge.right } else { edge.left }
            }
            .expect("every edge has two incident sides");
            let neighbour_edge_index = self
                .side_ref(neighbour_idx)
                .edges
                .iter()
                .position(|&e| e == long_edge)
                .expect("long edge is on the neighbour");

            {
                let neighbour = self.side_mut(neighbour_idx);
                neighbour.edges.insert(neighbour_edge_index + 1, next);
                neighbour.edges.insert(neighbour_edge_index + 2, next_next);
                neighbour.edges.remove(neighbour_edge_index);
                neighbour.vertices.insert(neighbour_edge_index + 1, far_vertex);
            }

            for edge_idx in [next, next_next] {
                let edge = self.edge_mut(edge_idx);
                if edge.left == Some(side_idx) {
                    edge.left = Some(neighbour_idx);
                } else {
                    edge.right = Some(neighbour_idx);
                }
            }

            self.free_edge(long_edge);
            let dropped = self.side_ref(side_idx).face.as_ref().map(|f| f.id);
            if let Some(id) = dropped {
                tracker.dropped(id);
            }
            self.free_side(side_idx);
            incident.remove(i);
        }
    }

    /// For a triangle with collinear corners, the index of its longest edge;
    /// otherwise the ring length.
    fn collinear_edge_index(&self, side_idx: SideIdx) -> usize {
        let side = self.side_ref(side_idx);
        if side.edges.len() > 3 {
            return side.edges.len();
        }
        let vector = |edge_idx: EdgeIdx| {
            let edge = self.edge_ref(edge_idx);
            self.position(edge.end) - self.position(edge.start)
        };
        let v1 = vector(side.edges[0]);
        let v2 = vector(side.edges[1]);
        if !parallel(v1, v2, COLINEAR_EPSILON) {
            return side.edges.len();
        }
        let v3 = vector(side.edges[2]);
        let lengths = [v1.length_squared(), v2.length_squared(), v3.length_squared()];
        if lengths[0] > lengths[1] {
            if lengths[0] > lengths[2] { 0 } else { 2 }
        } else if lengths[1] > lengths[2] {
            1
        } else {
            2
        }
    }

    /// Merge sides that ended up coplanar back into one.
    fn merge_coplanar_sides(&mut self, tracker: &mut FaceTracker) {
        let mut i = 0;
        while i < self.side_slot_count() {
            let side_idx = SideIdx(i);
            let Some(side) = self.side(side_idx) else {
                i += 1;
                continue;
            };
            let ring: Vec<VertexIdx> = side.vertices.clone();
            let Some(boundary) = FacePlane::from_points(
                self.position(ring[0]),
                self.position(ring[1]),
                self.position(ring[ring.len() - 1]),
            ) else {
                i += 1;
                continue;
            };

            let mut merged = false;
            for j in 0..self.side_ref(side_idx).edges.len() {
                let edge_idx = self.side_ref(side_idx).edges[j];
                let neighbour_idx = {
                    let edge = self.edge_ref(edge_idx);
                    if edge.left == Some(side_idx) { edge.right } else { edge.left }
                }
                .expect("every edge has two incident sides");
                let neighbour = self.side_ref(neighbour_idx);
                let Some(neighbour_boundary) = FacePlane::from_points(
                    self.position(neighbour.vertices[0]),
                    self.position(neighbour.vertices[1]),
                    self.position(neighbour.vertices[neighbour.vertices.len() - 1]),
                ) else {
                    continue;
                };

                if boundary.coplanar(&neighbour_boundary, COLINEAR_EPSILON) {
                    let dropped = neighbour.face.as_ref().map(|f| f.id);
                    if let Some(id) = dropped {
                        tracker.dropped(id);
                    }
                    self.merge_neighbours(side_idx, j);
                    merged = true;
                    break;
                }
            }
            if !merged {
                i += 1;
            }
        }
    }

    /// Absorb the neighbour across `side.edges[edge_index]` into `side`,
    /// removing their shared run of edges.
    fn merge_neighbours(&mut self, side_idx: SideIdx, edge_index: usize) {
        let shared_edge = self.side_ref(side_idx).edges[edge_index];
        let neighbour_idx = {
            let edge = self.edge_ref(shared_edge);
            if edge.left != Some(side_idx) { edge.left } else { edge.right }
        }
        .expect("every edge has two incident sides");

        let side_edges: Vec<EdgeIdx> = self.side_ref(side_idx).edges.clone();
        let neighbour_edges: Vec<EdgeIdx> = self.side_ref(neighbour_idx).edges.clone();
        let side_len = side_edges.len();
        let neighbour_len = neighbour_edges.len();

        let mut si = edge_index;
        let mut ni = neighbour_edges
            .iter()
            .position(|&e| e == shared_edge)
            .expect("shared edge is on the neighbour");

        // walk forward on side / backward on neighbour past the shared run
        loop {
            si = succ(si, side_len, 1);
            ni = pred(ni, neighbour_len, 1);
            if side_edges[si] != neighbour_edges[ni] {
                break;
            }
        }
        // walk back to the start of the shared run, counting its edges
        let mut count: i64 = -1;
        loop {
            si = pred(si, side_len, 1);
            ni = succ(ni, neighbour_len, 1);
            count += 1;
            if side_edges[si] != neighbour_edges[ni] {
                break;
            }
        }
        let count = usize::try_from(count).expect("sides share at least one edge");

        // bring the shared run to the end of both rings
        self.side_mut(side_idx).shift(succ(si, side_len, count + 1));
        self.side_mut(neighbour_idx).shift(ni);

        let neighbour_edges: Vec<EdgeIdx> = self.side_ref(neighbour_idx).edges.clone();
        let neighbour_vertices: Vec<VertexIdx> = self.side_ref(neighbour_idx).vertices.clone();

        {
            let side = self.side_mut(side_idx);
            let kept = side.edges.len() - count;
            side.edges.truncate(kept);
            side.vertices.truncate(kept);
        }

        for i in 0..neighbour_len - count {
            let edge_idx = neighbour_edges[i];
            {
                let edge = self.edge_mut(edge_idx);
                if edge.left == Some(neighbour_idx) {
                    edge.left = Some(side_idx);
                } else {
                    edge.right = Some(side_idx);
                }
            }
            let side = self.side_mut(side_idx);
            side.edges.push(edge_idx);
            side.vertices.push(neighbour_vertices[i]);
        }

        for i in neighbour_len - count..neighbour_len {
            self.free_edge(neighbour_edges[i]);
            if i > neighbour_len - count {
                self.free_vertex(neighbour_vertices[i]);
            }
        }
        self.free_side(neighbour_idx);

        debug_assert_eq!(
            self.side_ref(side_idx).edges.len(),
            side_len + neighbour_len - 2 * count
        );
    }

    /// Merge consecutive collinear edges that share both flanking sides,
    /// removing the pass-through vertex between them.
    fn merge_collinear_edges(&mut self) {
        'restart: loop {
            let edge_idxs = self.edge_indices();
            for i in 0..edge_idxs.len() {
                if self.edge(edge_idxs[i]).is_none() {
                    continue;
                }
                for j in i + 1..edge_idxs.len() {
                    if self.edge(edge_idxs[i]).is_none() || self.edge(edge_idxs[j]).is_none() {
                        continue;
                    }
                    if self.try_merge_edge_pair(edge_idxs[i], edge_idxs[j]) {
                        continue 'restart;
                    }
                }
            }
            break;
        }
    }

    fn try_merge_edge_pair(&mut self, edge_idx: EdgeIdx, candidate_idx: EdgeIdx) -> bool {
        let edge = *self.edge_ref(edge_idx);
        let candidate = *self.edge_ref(candidate_idx);
        if !edge.incident_with(&candidate) {
            return false;
        }

        let vector = |e: &Edge| self.position(e.end) - self.position(e.start);
        if !parallel(vector(&edge), vector(&candidate), COLINEAR_EPSILON) {
            return false;
        }

        if edge.end == candidate.end {
            self.edge_mut(candidate_idx).flip();
        }
        let candidate = *self.edge_ref(candidate_idx);
        if edge.end == candidate.start
            && edge.start != candidate.end
            && edge.left == candidate.left
            && edge.right == candidate.right
        {
            let (left, right) = (edge.left.unwrap(), edge.right.unwrap());
            debug_assert!(self.side_ref(left).vertices.len() > 3);
            debug_assert!(self.side_ref(right).vertices.len() > 3);

            let merged = self.alloc_edge(Edge {
                start: edge.start,
                end: candidate.end,
                left: Some(left),
                right: Some(right),
            });
            let li = self.ring_index(left, candidate_idx);
            let ln = self.side_ref(left).edges.len();
            let ri = self.ring_index(right, candidate_idx);
            let rn = self.side_ref(right).edges.len();
            self.replace_side_edges(left, pred(li, ln, 1), succ(li, ln, 2), merged);
            self.replace_side_edges(right, pred(ri, rn, 2), succ(ri, rn, 1), merged);

            self.free_vertex(candidate.start);
            self.free_edge(candidate_idx);
            self.free_edge(edge_idx);
            return true;
        }

        if edge.start == candidate.start {
            self.edge_mut(candidate_idx).flip();
        }
        let candidate = *self.edge_ref(candidate_idx);
        if edge.start == candidate.end
            && edge.end != candidate.start
            && edge.left == candidate.left
            && edge.right == candidate.right
        {
            let (left, right) = (edge.left.unwrap(), edge.right.unwrap());
            debug_assert!(self.side_ref(left).vertices.len() > 3);
            debug_assert!(self.side_ref(right).vertices.len() > 3);

            let merged = self.alloc_edge(Edge {
                start: candidate.start,
                end: edge.end,
                left: Some(left),
                right: Some(right),
            });
            let li = self.ring_index(left, candidate_idx);
            let ln = self.side_ref(left).edges.len();
            let ri = self.ring_index(right, candidate_idx);
            let rn = self.side_ref(right).edges.len();
            self.replace_side_edges(left, pred(li, ln, 2), succ(li, ln, 1), merged);
            self.replace_side_edges(right, pred(ri, rn, 1), succ(ri, rn, 2), merged);

            self.free_vertex(candidate.end);
            self.free_edge(candidate_idx);
            self.free_edge(edge_idx);
            return true;
        }

        false
    }

    fn ring_index(&self, side_idx: SideIdx, edge_idx: EdgeIdx) -> usize {
        self.side_ref(side_idx)
            .edges
            .iter()
            .position(|&e| e == edge_idx)
            .expect("edge is on the side")
    }

    // SPLIT PRIMITIVES

    /// Insert a vertex at the edge's midpoint, splitting the edge in two.
    /// Both adjacent rings grow by one vertex.
    pub(crate) fn split_edge_at_center(&mut self, edge_idx: EdgeIdx) -> VertexIdx {
        let edge = *self.edge_ref(edge_idx);
        let left = edge.left.expect("every edge has two incident sides");
        let right = edge.right.expect("every edge has two incident sides");

        // rotate both rings so the split edge is last
        let li = self.ring_index(left, edge_idx);
        let ln = self.side_ref(left).edges.len();
        self.side_mut(left).shift(succ(li, ln, 1));
        let ri = self.ring_index(right, edge_idx);
        let rn = self.side_ref(right).edges.len();
        self.side_mut(right).shift(succ(ri, rn, 1));

        let center = (self.position(edge.start) + self.position(edge.end)) * 0.5;
        let vertex = self.alloc_vertex(Vertex { position: center });
        self.side_mut(left).vertices.push(vertex);
        self.side_mut(right).vertices.push(vertex);

        let first = self.alloc_edge(Edge {
            start: edge.start,
            end: vertex,
            left: Some(left),
            right: Some(right),
        });
        let second = self.alloc_edge(Edge {
            start: vertex,
            end: edge.end,
            left: Some(left),
            right: Some(right),
        });

        {
            let side = self.side_mut(left);
            side.edges.pop();
            side.edges.push(second);
            side.edges.push(first);
        }
        {
            let side = self.side_mut(right);
            side.edges.pop();
            side.edges.push(first);
            side.edges.push(second);
        }

        self.free_edge(edge_idx);
        vertex
    }

    /// Replace a side with a fan of triangles around a new vertex at its
    /// centroid.
    pub(crate) fn split_side_at_centroid(
        &mut self,
        side_idx: SideIdx,
        tracker: &mut FaceTracker,
    ) -> VertexIdx {
        let ring = self.side_positions(side_idx);
        let centroid = ring.iter().sum::<DVec3>() / ring.len() as f64;
        let vertex = self.alloc_vertex(Vertex { position: centroid });

        let side_edges: Vec<EdgeIdx> = self.side_ref(side_idx).edges.clone();
        let n = side_edges.len();

        let first_start = self
            .edge_ref(side_edges[0])
            .start_vertex(side_idx)
            .expect("ring edge is incident to its side");
        let first_spoke = self.alloc_edge(Edge {
            start: vertex,
            end: first_start,
            left: None,
            right: None,
        });

        let mut last_spoke = first_spoke;
        for (i, &ring_edge) in side_edges.iter().enumerate() {
            let spoke = if i == n - 1 {
                first_spoke
            } else {
                let end = self
                    .edge_ref(ring_edge)
                    .end_vertex(side_idx)
                    .expect("ring edge is incident to its side");
                self.alloc_edge(Edge { start: vertex, end, left: None, right: None })
            };

            let face_copy = self.copy_side_face(side_idx, tracker);
            let triangle = self.alloc_side(Side {
                vertices: Vec::with_capacity(3),
                edges: Vec::with_capacity(3),
                face: face_copy,
            });

            let last_spoke_end = self.edge_ref(last_spoke).end;
            let spoke_end = self.edge_ref(spoke).end;
            {
                let side = self.side_mut(triangle);
                side.vertices.push(vertex);
                side.edges.push(last_spoke);
                side.vertices.push(last_spoke_end);
                side.edges.push(ring_edge);
                side.vertices.push(spoke_end);
                side.edges.push(spoke);
            }
            self.edge_mut(last_spoke).right = Some(triangle);
            {
                let edge = self.edge_mut(ring_edge);
                if edge.left == Some(side_idx) {
                    edge.left = Some(triangle);
                } else {
                    edge.right = Some(triangle);
                }
            }
            self.edge_mut(spoke).left = Some(triangle);

            last_spoke = spoke;
        }

        let dropped = self.side_ref(side_idx).face.as_ref().map(|f| f.id);
        if let Some(id) = dropped {
            tracker.dropped(id);
        }
        self.free_side(side_idx);
        vertex
    }

    // BOOKKEEPING

    fn side_plane(&self, side_idx: SideIdx) -> Option<FacePlane> {
        if let Some(face) = &self.side_ref(side_idx).face {
            return Some(face.plane);
        }
        let ring = self.side_positions(side_idx);
        FacePlane::from_points(ring[0], ring[1], ring[ring.len() - 1])
    }

    pub(crate) fn correct_vertices(&mut self) {
        for idx in self.vertex_indices() {
            let position = self.position(idx);
            self.vertex_mut(idx).position = correct(position);
        }
    }

    /// Recompute every face's plane points from its current ring and refresh
    /// the texture projections.
    pub(crate) fn update_face_points(&mut self) -> Result<(), GeometryError> {
        for side_idx in self.side_indices() {
            let ring = self.side_positions(side_idx);
            if let Some(face) = self.side_mut(side_idx).face.as_mut() {
                face.update_points_from_vertices(&ring)?;
            }
        }
        Ok(())
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush_geometry::FaceAttributes;

    fn world() -> Bounds {
        Bounds::new(DVec3::splat(-8192.0), DVec3::splat(8192.0))
    }

    fn axis_face(normal: DVec3, distance: f64) -> Face {
        Face::from_plane(FacePlane::new(normal, distance), FaceAttributes::default())
    }

    fn cube(extent: f64) -> BrushGeometry {
        let faces = [
            DVec3::X,
            DVec3::NEG_X,
            DVec3::Y,
            DVec3::NEG_Y,
            DVec3::Z,
            DVec3::NEG_Z,
        ]
        .into_iter()
        .map(|normal| axis_face(normal, extent))
        .collect();
        BrushGeometry::build(world(), faces).unwrap()
    }

    fn assert_same_shape(a: &BrushGeometry, b: &BrushGeometry) {
        assert_eq!(a.vertex_count(), b.vertex_count());
        assert_eq!(a.edge_count(), b.edge_count());
        assert_eq!(a.side_count(), b.side_count());
        for (_, vertex) in a.vertices() {
            assert!(b.find_vertex(vertex.position).is_some());
        }
        for (idx, _) in a.sides() {
            assert!(b.find_side(&a.side_positions(idx)).is_some());
        }
    }

    #[test]
    fn test_move_single_vertex_up() {
        let mut brush = cube(64.0);
        let corner = DVec3::new(64.0, 64.0, 64.0);
        let delta = DVec3::new(0.0, 0.0, 16.0);

        assert!(brush.can_move_vertices(world(), &[corner], delta));
        let result = brush.move_vertices(world(), &[corner], delta).unwrap();
        assert_eq!(result.new_positions, vec![DVec3::new(64.0, 64.0, 80.0)]);
        assert!(brush.validate().is_ok());

        // the top face can no longer be planar: it splits into two triangles
        // while the four axis-aligned side faces stay planar quads
        assert_eq!(brush.vertex_count(), 8);
        assert_eq!(brush.side_count(), 7);
        assert_eq!(brush.edge_count(), 13);
        assert_eq!(brush.bounds().max.z, 80.0);
    }

    #[test]
    fn test_move_vertex_diagonal_splits_three_faces() {
        let mut brush = cube(64.0);
        let corner = DVec3::new(64.0, 64.0, 64.0);
        let delta = DVec3::new(8.0, 8.0, 8.0);

        let result = brush.move_vertices(world(), &[corner], delta).unwrap();
        assert_eq!(result.new_positions, vec![DVec3::new(72.0, 72.0, 72.0)]);
        assert!(brush.validate().is_ok());

        // each of the three faces at the corner splits into two triangles
        assert_eq!(brush.vertex_count(), 8);
        assert_eq!(brush.side_count(), 9);
        assert_eq!(brush.edge_count(), 15);
        assert_eq!(result.dropped_faces.len(), 3);
        assert_eq!(result.added_faces.len(), 6);
    }

    #[test]
    fn test_move_vertex_onto_adjacent_vertex_merges() {
        let mut brush = cube(64.0);
        let corner = DVec3::new(64.0, 64.0, 64.0);
        let delta = DVec3::new(0.0, 0.0, -128.0);

        assert!(brush.can_move_vertices(world(), &[corner], delta));
        let result = brush.move_vertices(world(), &[corner], delta).unwrap();
        // the dragged vertex absorbed the corner it landed on
        assert_eq!(result.new_positions, vec![DVec3::new(64.0, 64.0, -64.0)]);
        assert!(brush.validate().is_ok());
        assert_eq!(brush.vertex_count(), 7);
        assert_eq!(brush.side_count(), 7);
        assert_eq!(brush.edge_count(), 12);
        assert!(brush.find_vertex(corner).is_none());
    }

    #[test]
    fn test_move_out_of_world_bounds_is_rejected() {
        let tight = Bounds::new(DVec3::splat(-64.0), DVec3::splat(64.0));
        let mut brush = cube(64.0);
        let corner = DVec3::new(64.0, 64.0, 64.0);
        let delta = DVec3::new(0.0, 0.0, 16.0);

        assert!(!brush.can_move_vertices(tight, &[corner], delta));
        let before = brush.snapshot();
        assert_eq!(
            brush.move_vertices(tight, &[corner], delta),
            Err(GeometryError::InfeasibleEdit)
        );
        assert_same_shape(&before, &brush);
    }

    #[test]
    fn test_zero_delta_is_rejected() {
        let brush = cube(64.0);
        assert!(!brush.can_move_vertices(world(), &[DVec3::new(64.0, 64.0, 64.0)], DVec3::ZERO));
    }

    #[test]
    fn test_batch_move_order_does_not_matter() {
        let top: Vec<DVec3> = [
            (64.0, 64.0),
            (64.0, -64.0),
            (-64.0, 64.0),
            (-64.0, -64.0),
        ]
        .into_iter()
        .map(|(x, y)| DVec3::new(x, y, 64.0))
        .collect();
        let delta = DVec3::new(0.0, 0.0, 16.0);

        let mut first = cube(64.0);
        first.move_vertices(world(), &top, delta).unwrap();

        let mut shuffled = top.clone();
        shuffled.reverse();
        shuffled.swap(0, 1);
        let mut second = cube(64.0);
        second.move_vertices(world(), &shuffled, delta).unwrap();

        // moving the whole top face up keeps the brush a cuboid
        assert!(first.validate().is_ok());
        assert_eq!(first.side_count(), 6);
        assert_eq!(first.vertex_count(), 8);
        assert_eq!(first.bounds().max.z, 80.0);
        assert_same_shape(&first, &second);
    }

    #[test]
    fn test_feasibility_symmetry() {
        let mut brush = cube(64.0);
        let corner = DVec3::new(64.0, 64.0, 64.0);

        let feasible = DVec3::new(16.0, 0.0, 0.0);
        assert!(brush.can_move_vertices(world(), &[corner], feasible));
        let result = brush.move_vertices(world(), &[corner], feasible).unwrap();
        assert!(!result.new_positions.is_empty());
        assert!(world().contains_bounds(&brush.bounds()));
        assert!(brush.side_count() >= MIN_SIDES);

        // collapsing the brush below the minimal side count must be rejected
        // and leave it untouched
        let mut brush = cube(64.0);
        let infeasible = DVec3::new(0.0, 0.0, -300.0);
        let before = brush.snapshot();
        if !brush.can_move_vertices(world(), &[corner], infeasible) {
            assert_eq!(
                brush.move_vertices(world(), &[corner], infeasible),
                Err(GeometryError::InfeasibleEdit)
            );
            assert_same_shape(&before, &brush);
        }
    }

    #[test]
    fn test_move_edge() {
        let mut brush = cube(64.0);
        let edge = (DVec3::new(-64.0, -64.0, 64.0), DVec3::new(64.0, -64.0, 64.0));
        let delta = DVec3::new(0.0, 0.0, 16.0);

        assert!(brush.can_move_edges(world(), &[edge], delta));
        let result = brush.move_edges(world(), &[edge], delta).unwrap();
        assert_eq!(
            result.new_positions,
            vec![(DVec3::new(-64.0, -64.0, 80.0), DVec3::new(64.0, -64.0, 80.0))]
        );
        assert!(brush.validate().is_ok());

        // the top face tilts but stays planar; the brush stays a hexahedron
        assert_eq!(brush.side_count(), 6);
        assert_eq!(brush.vertex_count(), 8);
        assert!(brush.find_edge(edge.0 + delta, edge.1 + delta).is_some());
    }

    #[test]
    fn test_move_side() {
        let mut brush = cube(64.0);
        let top = brush
            .sides()
            .find(|(idx, _)| {
                brush
                    .side_positions(*idx)
                    .iter()
                    .all(|p| (p.z - 64.0).abs() < 1e-9)
            })
            .map(|(idx, _)| idx)
            .unwrap();
        let polygon = brush.side_positions(top);
        let delta = DVec3::new(0.0, 0.0, 32.0);

        assert!(brush.can_move_sides(world(), &[polygon.clone()], delta));
        let result = brush.move_sides(world(), &[polygon.clone()], delta).unwrap();
        assert!(brush.validate().is_ok());
        assert_eq!(brush.side_count(), 6);
        assert_eq!(brush.bounds().max.z, 96.0);
        assert!(brush.find_side(&result.new_positions[0]).is_some());
    }

    #[test]
    fn test_split_edge() {
        let mut brush = cube(64.0);
        let edge = (DVec3::new(-64.0, -64.0, -64.0), DVec3::new(64.0, -64.0, -64.0));
        let delta = DVec3::new(0.0, 0.0, -16.0);

        assert!(brush.can_split_edge(world(), edge, delta));
        let result = brush.split_edge(world(), edge, delta).unwrap();
        assert_eq!(result.new_positions, DVec3::new(0.0, -64.0, -80.0));
        assert!(brush.validate().is_ok());
        assert_eq!(brush.vertex_count(), 9);
        assert!(brush.side_count() > 6);
        assert_eq!(brush.bounds().min.z, -80.0);
        assert!(brush.find_vertex(DVec3::new(0.0, -64.0, -80.0)).is_some());

        // dragging into an adjacent face is rejected up front
        let mut brush = cube(64.0);
        assert!(!brush.can_split_edge(world(), edge, DVec3::new(0.0, 0.0, 16.0)));
        assert!(
            brush
                .split_edge(world(), edge, DVec3::new(0.0, 0.0, 16.0))
                .is_err()
        );
    }

    #[test]
    fn test_split_side() {
        let mut brush = cube(64.0);
        let top = brush
            .sides()
            .find(|(idx, _)| {
                brush
                    .side_positions(*idx)
                    .iter()
                    .all(|p| (p.z - 64.0).abs() < 1e-9)
            })
            .map(|(idx, _)| idx)
            .unwrap();
        let polygon = brush.side_positions(top);

        // a drag parallel to the face cannot split it
        assert!(!brush.can_split_side(world(), &polygon, DVec3::new(16.0, 0.0, 0.0)));

        let delta = DVec3::new(0.0, 0.0, 16.0);
        assert!(brush.can_split_side(world(), &polygon, delta));
        let result = brush.split_side(world(), &polygon, delta).unwrap();
        assert_eq!(result.new_positions, DVec3::new(0.0, 0.0, 80.0));
        assert!(brush.validate().is_ok());

        // the quad becomes a four-triangle pyramid roof
        assert_eq!(brush.vertex_count(), 9);
        assert_eq!(brush.side_count(), 9);
        assert_eq!(brush.edge_count(), 16);
    }

    #[test]
    fn test_snap_is_idempotent_on_grid() {
        let mut brush = cube(64.0);
        let before = brush.snapshot();
        let result = brush.snap_vertices(world(), 8.0).unwrap();
        assert_eq!(result.added_faces, Vec::new());
        assert_eq!(result.dropped_faces, Vec::new());
        assert_same_shape(&before, &brush);
        assert!(brush.validate().is_ok());
    }

    #[test]
    fn test_snap_rounds_off_grid_vertices() {
        let mut brush = cube(64.0);
        let corner = DVec3::new(64.0, 64.0, 64.0);
        brush
            .move_vertices(world(), &[corner], DVec3::new(5.0, 0.0, 0.0))
            .unwrap();
        assert!(brush.find_vertex(DVec3::new(69.0, 64.0, 64.0)).is_some());

        brush.snap_vertices(world(), 8.0).unwrap();
        assert!(brush.validate().is_ok());
        assert!(brush.find_vertex(DVec3::new(72.0, 64.0, 64.0)).is_some());
        assert!(brush.find_vertex(DVec3::new(64.0, -64.0, 64.0)).is_some());
    }

    #[test]
    fn test_face_planes_follow_the_move() {
        let mut brush = cube(64.0);
        let corner = DVec3::new(64.0, 64.0, 64.0);
        brush
            .move_vertices(world(), &[corner], DVec3::new(0.0, 0.0, 16.0))
            .unwrap();

        for (idx, side) in brush.sides() {
            let face = side.face.as_ref().unwrap();
            for position in brush.side_positions(idx) {
                assert!(
                    face.plane.signed_distance(position).abs() < 1e-6,
                    "face plane out of date after move"
                );
            }
        }
    }
}
