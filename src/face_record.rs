//! Reading and writing brush-face records.
//!
//! A brush face is stored on disk as one line: three plane-defining points,
//! a texture name and the UV parameters. Two shapes exist:
//!
//! ```text
//! ( x y z ) ( x y z ) ( x y z ) texture xOff yOff rot xScale yScale
//! ( x y z ) ( x y z ) ( x y z ) texture [ ux uy uz xOff ] [ vx vy vz yOff ] rot xScale yScale
//! ```
//!
//! The first is the standard (paraxial) format, the second the Valve220
//! (parallel) format with explicit texture axes. Either may end with the
//! Quake2 content/surface/value triple. This module owns only the record
//! shape — whole-map parsing lives with the document layer.

use glam::DVec3;
use thiserror::Error;

use crate::brush_geometry::{Face, FaceAttributes, GeometryError};
use crate::tex_coords::TexCoordSystem;

/// The two on-disk face record shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceRecordFormat {
    /// Paraxial UVs: offsets, rotation and scales only.
    Standard,
    /// Valve220: explicit texture axes carrying the offsets.
    Valve,
}

/// Errors from parsing a face record line.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum FaceRecordError {
    #[error("unexpected end of face record")]
    UnexpectedEnd,
    #[error("expected {expected}, found `{found}`")]
    Unexpected { expected: &'static str, found: String },
    #[error("`{token}` is not a number")]
    InvalidNumber { token: String },
}

/// A parsed face record, not yet validated as a face.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceRecord {
    pub points: [DVec3; 3],
    pub attributes: FaceAttributes,
    /// Valve220 texture axes as `(axis, offset)` pairs; `None` for standard
    /// records.
    pub uv_axes: Option<((DVec3, f64), (DVec3, f64))>,
}

impl FaceRecord {
    /// Turn the record into a [`Face`]. Valve records get a parallel texture
    /// projection built from their explicit axes.
    pub fn into_face(self) -> Result<Face, GeometryError> {
        let mut attributes = self.attributes;
        if let Some(((_, u_offset), (_, v_offset))) = self.uv_axes {
            attributes.x_offset = u_offset;
            attributes.y_offset = v_offset;
        }
        let mut face = Face::new(self.points[0], self.points[1], self.points[2], attributes)?;
        if let Some(((u, _), (v, _))) = self.uv_axes {
            face.uv = TexCoordSystem::parallel_from_axes(u, v);
        }
        Ok(face)
    }
}

/// Format a coordinate the way map writers do: integers without a fraction,
/// everything else with just enough digits to round-trip.
fn format_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn write_point(out: &mut String, point: DVec3) {
    out.push_str("( ");
    out.push_str(&format_number(point.x));
    out.push(' ');
    out.push_str(&format_number(point.y));
    out.push(' ');
    out.push_str(&format_number(point.z));
    out.push_str(" )");
}

/// Serialize one face as a record line (no trailing newline).
#[must_use]
pub fn write_face_record(face: &Face, format: FaceRecordFormat) -> String {
    let mut out = String::new();
    for (i, point) in face.points.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_point(&mut out, *point);
    }

    out.push(' ');
    let attributes = &face.attributes;
    if attributes.texture_name.is_empty() {
        out.push_str("__TB_empty");
    } else {
        out.push_str(&attributes.texture_name);
    }

    match format {
        FaceRecordFormat::Standard => {
            for value in [attributes.x_offset, attributes.y_offset] {
                out.push(' ');
                out.push_str(&format_number(value));
            }
        }
        FaceRecordFormat::Valve => {
            for (axis, offset) in [
                (face.uv.x_axis(), attributes.x_offset),
                (face.uv.y_axis(), attributes.y_offset),
            ] {
                out.push_str(" [ ");
                out.push_str(&format_number(axis.x));
                out.push(' ');
                out.push_str(&format_number(axis.y));
                out.push(' ');
                out.push_str(&format_number(axis.z));
                out.push(' ');
                out.push_str(&format_number(offset));
                out.push_str(" ]");
            }
        }
    }

    for value in [attributes.rotation, attributes.x_scale, attributes.y_scale] {
        out.push(' ');
        out.push_str(&format_number(value));
    }

    if let Some((content, surface, value)) = attributes.extra {
        out.push(' ');
        out.push_str(&content.to_string());
        out.push(' ');
        out.push_str(&surface.to_string());
        out.push(' ');
        out.push_str(&format_number(value));
    }

    out
}

struct Tokens<'a> {
    iter: std::iter::Peekable<std::str::SplitWhitespace<'a>>,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Self {
        Self { iter: line.split_whitespace().peekable() }
    }

    fn next(&mut self) -> Result<&'a str, FaceRecordError> {
        self.iter.next().ok_or(FaceRecordError::UnexpectedEnd)
    }

    fn peek(&mut self) -> Option<&'a str> {
        self.iter.peek().copied()
    }

    fn expect(&mut self, token: &'static str) -> Result<(), FaceRecordError> {
        let found = self.next()?;
        if found == token {
            Ok(())
        } else {
            Err(FaceRecordError::Unexpected { expected: token, found: found.to_string() })
        }
    }

    fn number(&mut self) -> Result<f64, FaceRecordError> {
        let token = self.next()?;
        token
            .parse()
            .map_err(|_| FaceRecordError::InvalidNumber { token: token.to_string() })
    }

    fn point(&mut self) -> Result<DVec3, FaceRecordError> {
        self.expect("(")?;
        let x = self.number()?;
        let y = self.number()?;
        let z = self.number()?;
        self.expect(")")?;
        Ok(DVec3::new(x, y, z))
    }

    fn axis(&mut self) -> Result<(DVec3, f64), FaceRecordError> {
        self.expect("[")?;
        let x = self.number()?;
        let y = self.number()?;
        let z = self.number()?;
        let offset = self.number()?;
        self.expect("]")?;
        Ok((DVec3::new(x, y, z), offset))
    }
}

/// Parse one face record line, auto-detecting the format. Tokens must be
/// whitespace separated, as both this writer and the reference writers emit
/// them.
pub fn parse_face_record(line: &str) -> Result<FaceRecord, FaceRecordError> {
    let mut tokens = Tokens::new(line);

    let points = [tokens.point()?, tokens.point()?, tokens.point()?];
    let texture = tokens.next()?;
    let mut attributes = FaceAttributes {
        texture_name: if texture == "__TB_empty" { String::new() } else { texture.to_string() },
        ..FaceAttributes::default()
    };

    let uv_axes = if tokens.peek() == Some("[") {
        let u = tokens.axis()?;
        let v = tokens.axis()?;
        attributes.x_offset = u.1;
        attributes.y_offset = v.1;
        Some((u, v))
    } else {
        attributes.x_offset = tokens.number()?;
        attributes.y_offset = tokens.number()?;
        None
    };

    attributes.rotation = tokens.number()?;
    attributes.x_scale = tokens.number()?;
    attributes.y_scale = tokens.number()?;

    if tokens.peek().is_some() {
        let content = tokens.number()? as i64;
        let surface = tokens.number()? as i64;
        let value = tokens.number()?;
        attributes.extra = Some((content, surface, value));
    }

    Ok(FaceRecord { points, attributes, uv_axes })
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_face() -> Face {
        Face::new(
            DVec3::new(-64.0, -64.0, 64.0),
            DVec3::new(-64.0, 64.0, 64.0),
            DVec3::new(64.0, -64.0, 64.0),
            FaceAttributes {
                texture_name: "city2_5".to_string(),
                x_offset: 16.0,
                y_offset: -8.0,
                rotation: 45.0,
                x_scale: 1.0,
                y_scale: 2.5,
                extra: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_write_standard_record() {
        let line = write_face_record(&quad_face(), FaceRecordFormat::Standard);
        assert_eq!(
            line,
            "( -64 -64 64 ) ( -64 64 64 ) ( 64 -64 64 ) city2_5 16 -8 45 1 2.5"
        );
    }

    #[test]
    fn test_standard_round_trip() {
        let face = quad_face();
        let line = write_face_record(&face, FaceRecordFormat::Standard);
        let record = parse_face_record(&line).unwrap();
        assert_eq!(record.points, face.points);
        assert_eq!(record.attributes, face.attributes);
        assert_eq!(record.uv_axes, None);

        let reparsed = record.into_face().unwrap();
        assert_eq!(reparsed.points, face.points);
        // three non-collinear points reproduce the same half-space
        assert!(reparsed.plane.normal.abs_diff_eq(face.plane.normal, 1e-12));
        assert!((reparsed.plane.distance - face.plane.distance).abs() < 1e-9);
    }

    #[test]
    fn test_valve_round_trip() {
        let mut face = quad_face();
        face.uv = TexCoordSystem::parallel_from_axes(
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, -1.0, 0.0),
        );
        let line = write_face_record(&face, FaceRecordFormat::Valve);
        assert_eq!(
            line,
            "( -64 -64 64 ) ( -64 64 64 ) ( 64 -64 64 ) city2_5 [ 1 0 0 16 ] [ 0 -1 0 -8 ] 45 1 2.5"
        );

        let record = parse_face_record(&line).unwrap();
        let axes = record.uv_axes.unwrap();
        assert_eq!(axes.0, (DVec3::new(1.0, 0.0, 0.0), 16.0));
        assert_eq!(axes.1, (DVec3::new(0.0, -1.0, 0.0), -8.0));

        let reparsed = record.into_face().unwrap();
        assert_eq!(reparsed.uv.x_axis(), DVec3::new(1.0, 0.0, 0.0));
        assert_eq!(reparsed.attributes.x_offset, 16.0);
    }

    #[test]
    fn test_quake2_extra_triple() {
        let line = "( 0 0 0 ) ( 0 1 0 ) ( 1 0 0 ) e1u1/floor1_1 0 0 0 1 1 134217728 0 0";
        let record = parse_face_record(line).unwrap();
        assert_eq!(record.attributes.extra, Some((134_217_728, 0, 0.0)));

        let face = record.clone().into_face().unwrap();
        let rewritten = write_face_record(&face, FaceRecordFormat::Standard);
        assert_eq!(rewritten, line);
    }

    #[test]
    fn test_empty_texture_name_placeholder() {
        let mut face = quad_face();
        face.attributes.texture_name.clear();
        let line = write_face_record(&face, FaceRecordFormat::Standard);
        let record = parse_face_record(&line).unwrap();
        assert_eq!(record.attributes.texture_name, "");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_face_record("( 0 0 0 ) ( 0 1 0 )"),
            Err(FaceRecordError::UnexpectedEnd)
        );
        assert!(matches!(
            parse_face_record("( 0 0 x ) ( 0 1 0 ) ( 1 0 0 ) tex 0 0 0 1 1"),
            Err(FaceRecordError::InvalidNumber { .. })
        ));
        assert!(matches!(
            parse_face_record("0 0 0 ) ( 0 1 0 ) ( 1 0 0 ) tex 0 0 0 1 1"),
            Err(FaceRecordError::Unexpected { .. })
        ));
    }

    #[test]
    fn test_collinear_record_is_rejected_as_face() {
        let record =
            parse_face_record("( 0 0 0 ) ( 1 0 0 ) ( 2 0 0 ) tex 0 0 0 1 1").unwrap();
        assert!(record.into_face().is_err());
    }
}
