//! Conversion of [`PointCloud2`] messages into point matrices.
//!
//! A point matrix is an `N × 3` [`Array2<f64>`] whose rows are the XYZ
//! coordinates of the points, in the row-major order of the message
//! (row by row, column by column).

use agimus_types::{AgimusError, PointCloud2, PointField, PointFieldDatatype};
use ndarray::Array2;

/// Names the first three fields of a cloud must carry, in order.
const XYZ: [&str; 3] = ["x", "y", "z"];

/// Check that the message has at least three fields and that the first three
/// are literally named `"x"`, `"y"` and `"z"`.
///
/// Later fields (intensity, rgb, …) are not inspected.
pub fn check_fields(fields: &[PointField]) -> Result<(), AgimusError> {
    if fields.len() < 3 {
        return Err(AgimusError::MalformedMessage(format!(
            "Wrong number of fields. Expected at least 3, got {}.",
            fields.len()
        )));
    }
    for (field, expected) in fields.iter().zip(XYZ) {
        if field.name != expected {
            return Err(AgimusError::MalformedMessage(format!(
                "Wrong field. Expected \"{expected}\", got \"{}\".",
                field.name
            )));
        }
    }
    Ok(())
}

/// Convert `msg` into an `N × 3` point matrix with `N = height × width`.
///
/// # Errors
///
/// [`AgimusError::MalformedMessage`] when the field names are wrong, a
/// coordinate field is not `FLOAT32`/`FLOAT64`, a field does not fit in
/// `point_step`, or `data` is shorter than the layout requires.
pub fn to_point_matrix(msg: &PointCloud2) -> Result<Array2<f64>, AgimusError> {
    check_fields(&msg.fields)?;

    let point_step = msg.point_step as usize;
    let width = msg.width as usize;
    let height = msg.height as usize;

    let mut layout = [(0usize, PointFieldDatatype::Float32); 3];
    for (slot, field) in layout.iter_mut().zip(&msg.fields) {
        if !matches!(
            field.datatype,
            PointFieldDatatype::Float32 | PointFieldDatatype::Float64
        ) {
            return Err(AgimusError::MalformedMessage(format!(
                "Field \"{}\" has datatype {:?}; expected FLOAT32 or FLOAT64.",
                field.name, field.datatype
            )));
        }
        let offset = field.offset as usize;
        if offset + field.datatype.size() > point_step {
            return Err(AgimusError::MalformedMessage(format!(
                "Field \"{}\" at offset {} does not fit in a point step of {} bytes.",
                field.name, offset, point_step
            )));
        }
        *slot = (offset, field.datatype);
    }

    let packed_row = width
        .checked_mul(point_step)
        .ok_or_else(|| layout_overflow(msg))?;
    let row_step = match msg.row_step as usize {
        0 => packed_row,
        r if r < packed_row => {
            return Err(AgimusError::MalformedMessage(format!(
                "Row step {r} is smaller than width × point step ({packed_row})."
            )));
        }
        r => r,
    };
    let n_points = height.checked_mul(width).ok_or_else(|| layout_overflow(msg))?;
    if n_points > 0 {
        let required = (height - 1)
            .checked_mul(row_step)
            .and_then(|rows| rows.checked_add(packed_row))
            .ok_or_else(|| layout_overflow(msg))?;
        if msg.data.len() < required {
            return Err(AgimusError::MalformedMessage(format!(
                "Point buffer holds {} bytes; {height}×{width} points need {required}.",
                msg.data.len()
            )));
        }
    }

    let mut points = Array2::<f64>::zeros((n_points, 3));
    let mut i_point = 0;
    for row in 0..height {
        let mut base = row * row_step;
        for _ in 0..width {
            for (axis, &(offset, datatype)) in layout.iter().enumerate() {
                points[[i_point, axis]] =
                    read_coordinate(&msg.data[base + offset..], datatype, msg.is_bigendian);
            }
            i_point += 1;
            base += point_step;
        }
    }
    Ok(points)
}

fn layout_overflow(msg: &PointCloud2) -> AgimusError {
    AgimusError::MalformedMessage(format!(
        "Cloud layout {}×{} with point step {} and row step {} exceeds addressable memory.",
        msg.height, msg.width, msg.point_step, msg.row_step
    ))
}

/// Decode one coordinate.  The caller guarantees `bytes` is long enough.
fn read_coordinate(bytes: &[u8], datatype: PointFieldDatatype, big_endian: bool) -> f64 {
    match datatype {
        PointFieldDatatype::Float64 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            if big_endian {
                f64::from_be_bytes(buf)
            } else {
                f64::from_le_bytes(buf)
            }
        }
        _ => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[..4]);
            let v = if big_endian {
                f32::from_be_bytes(buf)
            } else {
                f32::from_le_bytes(buf)
            };
            v as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agimus_types::Header;

    fn field(name: &str, offset: u32) -> PointField {
        PointField::new(name, offset, PointFieldDatatype::Float32)
    }

    /// Organized 2×3 cloud with 16-byte records: x, y, z, intensity.
    fn organized_cloud() -> PointCloud2 {
        let mut data = Vec::new();
        for row in 0..2 {
            for col in 0..3 {
                let x = row as f32 * 10.0 + col as f32;
                for v in [x, -x, 0.5 * x, 99.0] {
                    data.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        PointCloud2 {
            header: Header::default(),
            height: 2,
            width: 3,
            fields: vec![field("x", 0), field("y", 4), field("z", 8), field("intensity", 12)],
            is_bigendian: false,
            point_step: 16,
            row_step: 48,
            data,
            is_dense: true,
        }
    }

    #[test]
    fn converts_height_times_width_points_in_row_major_order() {
        let points = to_point_matrix(&organized_cloud()).unwrap();
        assert_eq!(points.shape(), &[6, 3]);
        let expected_x = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        for (i, x) in expected_x.iter().enumerate() {
            assert_eq!(points[[i, 0]], *x, "row {i}");
            assert_eq!(points[[i, 1]], -*x);
            assert_eq!(points[[i, 2]], 0.5 * *x);
        }
    }

    #[test]
    fn honours_row_padding() {
        let mut cloud = organized_cloud();
        // Insert 8 padding bytes after the first row.
        let mut data = cloud.data[..48].to_vec();
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&cloud.data[48..]);
        cloud.data = data;
        cloud.row_step = 56;

        let points = to_point_matrix(&cloud).unwrap();
        assert_eq!(points[[3, 0]], 10.0);
        assert_eq!(points[[5, 0]], 12.0);
    }

    #[test]
    fn decodes_big_endian_float64() {
        let mut data = Vec::new();
        for v in [1.5f64, -2.25, 3.0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let cloud = PointCloud2 {
            header: Header::default(),
            height: 1,
            width: 1,
            fields: vec![
                PointField::new("x", 0, PointFieldDatatype::Float64),
                PointField::new("y", 8, PointFieldDatatype::Float64),
                PointField::new("z", 16, PointFieldDatatype::Float64),
            ],
            is_bigendian: true,
            point_step: 24,
            row_step: 24,
            data,
            is_dense: true,
        };
        let points = to_point_matrix(&cloud).unwrap();
        assert_eq!(points.row(0).to_vec(), vec![1.5, -2.25, 3.0]);
    }

    #[test]
    fn empty_cloud_yields_empty_matrix() {
        let cloud = PointCloud2::from_xyz("camera", &[]);
        let points = to_point_matrix(&cloud).unwrap();
        assert_eq!(points.shape(), &[0, 3]);
    }

    #[test]
    fn rejects_too_few_fields() {
        let err = check_fields(&[field("x", 0), field("y", 4)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Wrong number of fields. Expected at least 3, got 2."
        );
    }

    #[test]
    fn rejects_misordered_xyz_regardless_of_later_fields() {
        let cases = [
            (vec!["y", "x", "z", "intensity"], "Expected \"x\", got \"y\""),
            (vec!["x", "z", "y"], "Expected \"y\", got \"z\""),
            (vec!["x", "y", "rgb", "z"], "Expected \"z\", got \"rgb\""),
            (vec!["intensity", "x", "y", "z"], "Expected \"x\", got \"intensity\""),
            (vec!["X", "Y", "Z"], "Expected \"x\", got \"X\""),
        ];
        for (names, message) in cases {
            let fields: Vec<PointField> = names
                .iter()
                .enumerate()
                .map(|(i, n)| field(n, 4 * i as u32))
                .collect();
            let err = check_fields(&fields).unwrap_err();
            assert!(
                err.to_string().contains(message),
                "{names:?}: {err}"
            );
        }
    }

    #[test]
    fn accepts_extra_trailing_fields() {
        let fields = vec![field("x", 0), field("y", 4), field("z", 8), field("x", 12)];
        assert!(check_fields(&fields).is_ok());
    }

    #[test]
    fn rejects_integer_coordinates() {
        let mut cloud = organized_cloud();
        cloud.fields[1].datatype = PointFieldDatatype::Int32;
        assert!(matches!(
            to_point_matrix(&cloud),
            Err(AgimusError::MalformedMessage(_))
        ));
    }

    #[test]
    fn rejects_short_buffer() {
        let mut cloud = organized_cloud();
        cloud.data.truncate(80);
        let err = to_point_matrix(&cloud).unwrap_err();
        assert!(err.to_string().contains("need 96"), "{err}");
    }

    #[test]
    fn rejects_field_outside_point_step() {
        let mut cloud = organized_cloud();
        cloud.fields[2].offset = 14;
        assert!(to_point_matrix(&cloud).is_err());
    }

    #[test]
    fn rejects_layout_overflowing_the_address_space() {
        let mut cloud = organized_cloud();
        cloud.height = 3;
        cloud.width = u32::MAX;
        cloud.point_step = u32::MAX;
        cloud.row_step = 0;
        let err = to_point_matrix(&cloud).unwrap_err();
        assert!(matches!(err, AgimusError::MalformedMessage(_)));
        assert!(err.to_string().contains("exceeds addressable memory"), "{err}");
    }

    #[test]
    fn rejects_huge_width_with_short_buffer() {
        let mut cloud = organized_cloud();
        cloud.height = 1;
        cloud.width = u32::MAX;
        cloud.row_step = 0;
        assert!(matches!(
            to_point_matrix(&cloud),
            Err(AgimusError::MalformedMessage(_))
        ));
    }
}
