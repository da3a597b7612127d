//! Texture projection bases for brush faces.
//!
//! A face maps 3D points into 2D texture space through a pair of texture
//! axes. Two strategies exist, matching the two map-format families:
//!
//! - **Paraxial** (standard Quake): the axis pair is picked from a fixed
//!   table by the dominant axis of the face normal, then rotated by the
//!   face's rotation attribute. Pure function of the normal, but snaps
//!   discontinuously when a dragged face's normal crosses a dominant-axis
//!   boundary.
//! - **Parallel** (Valve220): the axis pair is captured once when the face
//!   is created and only re-rotated about the current normal afterwards.
//!   Needs explicit storage, but is stable under any plane change.
//!
//! Both systems expose the current axes, the axes projected onto the face
//! plane (for rendering texture-aligned guides), UV computation, and
//! `update` for plane changes (texture lock).

use glam::{DQuat, DVec2, DVec3};

use crate::brush_geometry::{FaceAttributes, correct};

/// The six paraxial entries: projection normal, U axis, V axis.
///
/// Entry order matters: `plane_normal_index` picks the row with the largest
/// positive dot against the face normal, and the rotation axis is derived
/// from the row's own axis pair, which flips the effective rotation sign
/// between opposing rows.
const BASE_AXES: [[DVec3; 3]; 6] = [
    [DVec3::Z, DVec3::X, DVec3::NEG_Y],
    [DVec3::NEG_Z, DVec3::X, DVec3::NEG_Y],
    [DVec3::X, DVec3::Y, DVec3::NEG_Z],
    [DVec3::NEG_X, DVec3::Y, DVec3::NEG_Z],
    [DVec3::Y, DVec3::X, DVec3::NEG_Z],
    [DVec3::NEG_Y, DVec3::X, DVec3::NEG_Z],
];

/// Index of the base-axis row whose projection normal best matches the face
/// normal.
#[must_use]
pub fn plane_normal_index(normal: DVec3) -> usize {
    let mut best_index = 0;
    let mut best_dot = 0.0;
    for (index, row) in BASE_AXES.iter().enumerate() {
        let dot = normal.dot(row[0]);
        if dot > best_dot {
            best_dot = dot;
            best_index = index;
        }
    }
    best_index
}

/// The unrotated `(u, v, projection normal)` triple for a base-axis row.
///
/// Opposing rows share one projection normal; that is what makes the
/// paraxial projection independent of which side of a wall a face is on.
#[must_use]
pub fn axes(index: usize) -> (DVec3, DVec3, DVec3) {
    (
        BASE_AXES[index][1],
        BASE_AXES[index][2],
        BASE_AXES[(index / 2) * 2][0],
    )
}

/// Rotate a paraxial axis pair by `radians`.
///
/// The rotation axis is `v × u` of the selected row, not the face normal, so
/// the apparent rotation direction depends on the chosen row.
#[must_use]
pub fn rotate_axes(u: DVec3, v: DVec3, radians: f64, index: usize) -> (DVec3, DVec3) {
    let rotation_axis = BASE_AXES[index][2].cross(BASE_AXES[index][1]);
    let rotation = DQuat::from_axis_angle(rotation_axis, radians);
    (correct(rotation * u), correct(rotation * v))
}

/// Project `axis` along `along` onto the plane through the origin with the
/// given normal.
fn project_onto_plane(axis: DVec3, plane_normal: DVec3, along: DVec3) -> DVec3 {
    let denom = plane_normal.dot(along);
    if denom.abs() < f64::EPSILON {
        return axis;
    }
    axis - along * (plane_normal.dot(axis) / denom)
}

fn scaled(axis: DVec3, scale: f64) -> DVec3 {
    axis / if scale == 0.0 { 1.0 } else { scale }
}

/// The paraxial (standard Quake) texture projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParaxialTexCoords {
    index: usize,
    u_axis: DVec3,
    v_axis: DVec3,
}

impl ParaxialTexCoords {
    /// Derive the projection for a face normal and rotation (degrees).
    #[must_use]
    pub fn from_normal(normal: DVec3, rotation: f64) -> Self {
        let index = plane_normal_index(normal);
        let (u, v, _) = axes(index);
        let (u_axis, v_axis) = rotate_axes(u, v, rotation.to_radians(), index);
        Self { index, u_axis, v_axis }
    }

    /// Recompute after a plane change; paraxial axes are a pure function of
    /// the normal and rotation.
    pub fn update(&mut self, normal: DVec3, rotation: f64) {
        *self = Self::from_normal(normal, rotation);
    }

    #[must_use]
    pub fn x_axis(&self) -> DVec3 {
        self.u_axis
    }

    #[must_use]
    pub fn y_axis(&self) -> DVec3 {
        self.v_axis
    }

    /// The projection normal of the selected base-axis row.
    #[must_use]
    pub fn projection_normal(&self) -> DVec3 {
        BASE_AXES[(self.index / 2) * 2][0]
    }

    /// Texture coordinates of a point under the face attributes.
    #[must_use]
    pub fn uv_coords(&self, point: DVec3, attributes: &FaceAttributes) -> DVec2 {
        DVec2::new(
            point.dot(scaled(self.u_axis, attributes.x_scale)) + attributes.x_offset,
            point.dot(scaled(self.v_axis, attributes.y_scale)) + attributes.y_offset,
        )
    }

    /// The texture axes projected onto the face plane along the projection
    /// normal, for rendering texture-aligned guides on the face itself.
    #[must_use]
    pub fn projected_axes(&self, face_normal: DVec3) -> (DVec3, DVec3) {
        let along = self.projection_normal();
        (
            project_onto_plane(self.u_axis, face_normal, along),
            project_onto_plane(self.v_axis, face_normal, along),
        )
    }
}

/// The parallel (Valve220) texture projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParallelTexCoords {
    initial_u: DVec3,
    initial_v: DVec3,
    u_axis: DVec3,
    v_axis: DVec3,
}

impl ParallelTexCoords {
    /// Capture the initial axis pair from a face normal.
    #[must_use]
    pub fn from_normal(normal: DVec3, rotation: f64) -> Self {
        let arbitrary = if normal.z.abs() < 0.9 { DVec3::Z } else { DVec3::Y };
        let initial_u = normal.cross(arbitrary).normalize();
        let initial_v = normal.cross(initial_u).normalize();
        let mut system = Self {
            initial_u,
            initial_v,
            u_axis: initial_u,
            v_axis: initial_v,
        };
        system.update(normal, rotation);
        system
    }

    /// Adopt explicitly supplied axes (from a Valve220 face record).
    #[must_use]
    pub const fn from_axes(u: DVec3, v: DVec3) -> Self {
        Self { initial_u: u, initial_v: v, u_axis: u, v_axis: v }
    }

    /// Rotate the stored initial axes about the current normal. A rotation of
    /// zero returns exactly the initial axes; repeated updates cannot drift.
    pub fn update(&mut self, normal: DVec3, rotation: f64) {
        let quat = DQuat::from_axis_angle(normal.normalize(), rotation.to_radians());
        self.u_axis = quat * self.initial_u;
        self.v_axis = quat * self.initial_v;
    }

    #[must_use]
    pub fn x_axis(&self) -> DVec3 {
        self.u_axis
    }

    #[must_use]
    pub fn y_axis(&self) -> DVec3 {
        self.v_axis
    }

    /// The stored, rotation-free axis pair.
    #[must_use]
    pub const fn initial_axes(&self) -> (DVec3, DVec3) {
        (self.initial_u, self.initial_v)
    }

    /// Texture coordinates of a point under the face attributes.
    #[must_use]
    pub fn uv_coords(&self, point: DVec3, attributes: &FaceAttributes) -> DVec2 {
        DVec2::new(
            point.dot(scaled(self.u_axis, attributes.x_scale)) + attributes.x_offset,
            point.dot(scaled(self.v_axis, attributes.y_scale)) + attributes.y_offset,
        )
    }

    /// The texture axes projected onto the face plane along its normal.
    #[must_use]
    pub fn projected_axes(&self, face_normal: DVec3) -> (DVec3, DVec3) {
        (
            project_onto_plane(self.u_axis, face_normal, face_normal),
            project_onto_plane(self.v_axis, face_normal, face_normal),
        )
    }
}

/// A face's texture projection, either strategy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TexCoordSystem {
    Paraxial(ParaxialTexCoords),
    Parallel(ParallelTexCoords),
}

impl TexCoordSystem {
    #[must_use]
    pub fn paraxial(normal: DVec3, rotation: f64) -> Self {
        Self::Paraxial(ParaxialTexCoords::from_normal(normal, rotation))
    }

    #[must_use]
    pub fn parallel(normal: DVec3, rotation: f64) -> Self {
        Self::Parallel(ParallelTexCoords::from_normal(normal, rotation))
    }

    #[must_use]
    pub const fn parallel_from_axes(u: DVec3, v: DVec3) -> Self {
        Self::Parallel(ParallelTexCoords::from_axes(u, v))
    }

    #[must_use]
    pub fn x_axis(&self) -> DVec3 {
        match self {
            Self::Paraxial(system) => system.x_axis(),
            Self::Parallel(system) => system.x_axis(),
        }
    }

    #[must_use]
    pub fn y_axis(&self) -> DVec3 {
        match self {
            Self::Paraxial(system) => system.y_axis(),
            Self::Parallel(system) => system.y_axis(),
        }
    }

    /// Recompute the axes after the face's plane changed (texture lock).
    pub fn update(&mut self, normal: DVec3, rotation: f64) {
        match self {
            Self::Paraxial(system) => system.update(normal, rotation),
            Self::Parallel(system) => system.update(normal, rotation),
        }
    }

    #[must_use]
    pub fn uv_coords(&self, point: DVec3, attributes: &FaceAttributes) -> DVec2 {
        match self {
            Self::Paraxial(system) => system.uv_coords(point, attributes),
            Self::Parallel(system) => system.uv_coords(point, attributes),
        }
    }

    #[must_use]
    pub fn projected_axes(&self, face_normal: DVec3) -> (DVec3, DVec3) {
        match self {
            Self::Paraxial(system) => system.projected_axes(face_normal),
            Self::Parallel(system) => system.projected_axes(face_normal),
        }
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: DVec3, b: DVec3) -> bool {
        (a - b).length() < 1e-9
    }

    #[test]
    fn test_paraxial_base_axis_selection() {
        // the six canonical normals select the six documented axis pairs
        let cases = [
            (DVec3::Z, DVec3::X, DVec3::NEG_Y),
            (DVec3::NEG_Z, DVec3::X, DVec3::NEG_Y),
            (DVec3::X, DVec3::Y, DVec3::NEG_Z),
            (DVec3::NEG_X, DVec3::Y, DVec3::NEG_Z),
            (DVec3::Y, DVec3::X, DVec3::NEG_Z),
            (DVec3::NEG_Y, DVec3::X, DVec3::NEG_Z),
        ];
        for (i, (normal, u, v)) in cases.into_iter().enumerate() {
            assert_eq!(plane_normal_index(normal), i);
            let system = ParaxialTexCoords::from_normal(normal, 0.0);
            assert!(close(system.x_axis(), u));
            assert!(close(system.y_axis(), v));
        }
    }

    #[test]
    fn test_paraxial_dominant_axis_tiebreak_is_stable() {
        // a tilted wall normal still projects through its dominant axis
        let system = ParaxialTexCoords::from_normal(DVec3::new(0.9, 0.1, 0.2).normalize(), 0.0);
        assert!(close(system.x_axis(), DVec3::Y));
        assert!(close(system.y_axis(), DVec3::NEG_Z));
    }

    #[test]
    fn test_paraxial_rotation() {
        // on a floor face the rotation axis is +Z: rotating 90 degrees takes
        // +X into +Y
        let system = ParaxialTexCoords::from_normal(DVec3::Z, 90.0);
        assert!(close(system.x_axis(), DVec3::Y));
        assert!(close(system.y_axis(), DVec3::X));

        // the ceiling row shares the rotation axis while its normal points
        // the other way, so the apparent rotation sense flips
        let system = ParaxialTexCoords::from_normal(DVec3::NEG_Z, 90.0);
        assert!(close(system.x_axis(), DVec3::Y));
        assert!(close(system.y_axis(), DVec3::X));
    }

    #[test]
    fn test_paraxial_uv_coords() {
        let system = ParaxialTexCoords::from_normal(DVec3::Z, 0.0);
        let attributes = FaceAttributes {
            x_offset: 8.0,
            y_offset: -4.0,
            x_scale: 2.0,
            y_scale: 1.0,
            ..FaceAttributes::default()
        };
        let uv = system.uv_coords(DVec3::new(32.0, 16.0, 64.0), &attributes);
        assert!((uv.x - (32.0 / 2.0 + 8.0)).abs() < 1e-9);
        assert!((uv.y - (-16.0 - 4.0)).abs() < 1e-9);
    }

    #[test]
    fn test_paraxial_zero_scale_is_treated_as_one() {
        let system = ParaxialTexCoords::from_normal(DVec3::Z, 0.0);
        let attributes = FaceAttributes { x_scale: 0.0, ..FaceAttributes::default() };
        let uv = system.uv_coords(DVec3::new(32.0, 0.0, 0.0), &attributes);
        assert!((uv.x - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_paraxial_projected_axes_lie_on_face() {
        let normal = DVec3::new(0.2, 0.3, 0.93).normalize();
        let system = ParaxialTexCoords::from_normal(normal, 15.0);
        let (u, v) = system.projected_axes(normal);
        assert!(normal.dot(u).abs() < 1e-9);
        assert!(normal.dot(v).abs() < 1e-9);
    }

    #[test]
    fn test_parallel_zero_rotation_returns_initial_axes_exactly() {
        let normal = DVec3::new(0.3, -0.5, 0.8).normalize();
        let mut system = ParallelTexCoords::from_normal(normal, 0.0);
        let (initial_u, initial_v) = system.initial_axes();
        system.update(normal, 0.0);
        assert_eq!(system.x_axis(), initial_u);
        assert_eq!(system.y_axis(), initial_v);
    }

    #[test]
    fn test_parallel_full_turn_returns_to_start() {
        let normal = DVec3::new(0.1, 0.2, 0.97).normalize();
        let mut system = ParallelTexCoords::from_normal(normal, 0.0);
        let (initial_u, initial_v) = system.initial_axes();
        system.update(normal, 360.0);
        assert!(close(system.x_axis(), initial_u));
        assert!(close(system.y_axis(), initial_v));
    }

    #[test]
    fn test_parallel_axes_survive_normal_drift() {
        // unlike paraxial, a parallel system keeps its axes when the face
        // normal crosses a dominant-axis boundary
        let before = DVec3::new(0.71, 0.69, 0.0).normalize();
        let after = DVec3::new(0.69, 0.71, 0.0).normalize();

        let mut parallel = ParallelTexCoords::from_normal(before, 0.0);
        let u_before = parallel.x_axis();
        parallel.update(after, 0.0);
        assert!(close(parallel.x_axis(), u_before));

        let mut paraxial = ParaxialTexCoords::from_normal(before, 0.0);
        let u_paraxial = paraxial.x_axis();
        paraxial.update(after, 0.0);
        assert!(!close(paraxial.x_axis(), u_paraxial));
    }

    #[test]
    fn test_parallel_from_axes_round_trip() {
        let u = DVec3::new(1.0, 0.0, 0.0);
        let v = DVec3::new(0.0, -1.0, 0.0);
        let system = ParallelTexCoords::from_axes(u, v);
        assert_eq!(system.x_axis(), u);
        assert_eq!(system.y_axis(), v);
    }
}
