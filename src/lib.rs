//! # `brush_forge`
//!
//! A convex **brush geometry engine** for Quake-style map editing. Brushes
//! are convex solids defined as the intersection of half-spaces; this crate
//! owns the explicit vertex/edge/face topology of one brush, the clipping
//! that constructs it inside world bounds, and the editing operations a
//! level editor drives: vertex/edge/face dragging, edge and face splitting,
//! and grid snapping, plus the paraxial/parallel texture projections and the
//! on-disk face record shape.
//!
//! ## Quick Start
//!
//! ```rust
//! use brush_forge::{Bounds, BrushGeometry, Face, FaceAttributes, FacePlane};
//! use brush_forge::math::DVec3;
//!
//! let world = Bounds::new(DVec3::splat(-8192.0), DVec3::splat(8192.0));
//!
//! // Six axis-aligned faces of a cube spanning [-64, 64]^3.
//! let faces: Vec<Face> = [
//!     DVec3::X,
//!     DVec3::NEG_X,
//!     DVec3::Y,
//!     DVec3::NEG_Y,
//!     DVec3::Z,
//!     DVec3::NEG_Z,
//! ]
//! .into_iter()
//! .map(|normal| Face::from_plane(FacePlane::new(normal, 64.0), FaceAttributes::default()))
//! .collect();
//!
//! let mut brush = BrushGeometry::build(world, faces).expect("a cube is a valid brush");
//! assert_eq!(brush.vertex_count(), 8);
//! assert_eq!(brush.edge_count(), 12);
//! assert_eq!(brush.side_count(), 6);
//!
//! // Drag the top north-east corner upward. Infeasible drags report `false`
//! // from the feasibility check and leave the brush untouched.
//! let corner = DVec3::new(64.0, 64.0, 64.0);
//! let delta = DVec3::new(0.0, 0.0, 16.0);
//! assert!(brush.can_move_vertices(world, &[corner], delta));
//! let result = brush.move_vertices(world, &[corner], delta).expect("feasible move");
//! assert_eq!(result.new_positions, vec![DVec3::new(64.0, 64.0, 80.0)]);
//! assert!(brush.validate().is_ok());
//! ```
//!
//! ## Key Properties
//!
//! - **Two-phase edits**: every operation has a `can_*` feasibility check
//!   that replays the edit on a snapshot; the live geometry is never left
//!   half-mutated
//! - **Explicit topology**: vertices, edges and sides live in index arenas
//!   owned by one [`BrushGeometry`]; no hidden shared state between brushes
//! - **Stable face identity**: sides carry [`Face`] payloads with stable
//!   [`FaceId`]s, and every edit reports the faces it added and dropped
//! - **Texture lock**: face planes recomputed after an edit refresh their
//!   texture projection instead of abandoning it

mod brush_geometry;
mod face_record;
mod spatial_hash;
mod tex_coords;
mod vertex_move;

pub use brush_geometry::{
    ALMOST_ZERO, Bounds, BrushGeometry, COLINEAR_EPSILON, CORRECT_EPSILON, ClipResult, Edge,
    EdgeIdx, Face, FaceAttributes, FaceId, FacePlane, GeometryError, POINT_STATUS_EPSILON,
    PointStatus, Side, SideIdx, TopologyError, Vertex, VertexIdx,
};
pub use face_record::{
    FaceRecord, FaceRecordError, FaceRecordFormat, parse_face_record, write_face_record,
};
pub use spatial_hash::SpatialHash;
pub use tex_coords::{
    ParallelTexCoords, ParaxialTexCoords, TexCoordSystem, axes, plane_normal_index, rotate_axes,
};
pub use vertex_move::{
    EdgeMoveResult, MoveResult, SideMoveResult, SplitResult, VertexMoveResult,
};

/// Re-exported math types used throughout the public API.
pub mod math {
    pub use glam::{DQuat, DVec2, DVec3};
}
