use std::io::Cursor;

use copc_rs::{BoundsSelection, CopcReader, LodSelection};
use las::Reader;
use lascloud::{center_and_swap, decode_las, height_ramp, rgb16_to_rgb8, PointBuffer};

use crate::error::ExtractError;
use crate::resolve::ArtifactFormat;

/// Node hierarchies deeper than this are not walked further; a COPC tree
/// this deep would hold far more points than any `max_points` cap.
const MAX_HIERARCHY_DEPTH: i32 = 24;

/// Decode LAS or LAZ bytes into a centered point buffer holding at most
/// `max_points` points.
///
/// Plain LAS goes through the hand-rolled fixed-offset parser. LAZ cannot
/// be parsed that way; it runs through an ordered strategy list instead,
/// returning the first success and the collected failure reasons if every
/// strategy fails.
pub fn decode(
    bytes: &[u8],
    format: ArtifactFormat,
    max_points: usize,
) -> Result<PointBuffer, ExtractError> {
    match format {
        ArtifactFormat::Las => {
            decode_las(bytes, max_points).map_err(|e| ExtractError::Decode(e.to_string()))
        }
        ArtifactFormat::Laz => {
            let strategies: &[&dyn LazStrategy] = &[&CopcHierarchy, &SequentialLaz];
            let mut failures = Vec::with_capacity(strategies.len());

            for strategy in strategies {
                match strategy.decode(bytes, max_points) {
                    Ok(buffer) if !buffer.is_empty() => {
                        tracing::debug!(
                            strategy = strategy.name(),
                            points = buffer.len(),
                            "Decoded compressed point cloud"
                        );
                        return Ok(buffer);
                    }
                    Ok(_) => failures.push(format!("{}: produced no points", strategy.name())),
                    Err(e) => failures.push(format!("{}: {}", strategy.name(), e)),
                }
            }

            Err(ExtractError::Decode(format!(
                "all laz strategies failed: {}",
                failures.join("; ")
            )))
        }
        other => Err(ExtractError::Unsupported(other.as_str().to_string())),
    }
}

/// One way of turning LAZ bytes into points. Strategies are tried in
/// declared order by [`decode`].
trait LazStrategy: Sync {
    fn name(&self) -> &'static str;
    fn decode(&self, bytes: &[u8], max_points: usize) -> anyhow::Result<PointBuffer>;
}

/// Treat the file as COPC: walk the node hierarchy level by level,
/// shallowest first, accumulating points across nodes until the cap is
/// reached. Centering subtracts the running mean of the collected points,
/// since a spatially-indexed read may never see the global bounds.
struct CopcHierarchy;

impl LazStrategy for CopcHierarchy {
    fn name(&self) -> &'static str {
        "copc hierarchy"
    }

    fn decode(&self, bytes: &[u8], max_points: usize) -> anyhow::Result<PointBuffer> {
        let mut reader = CopcReader::new(Cursor::new(bytes))?;

        let mut positions: Vec<[f32; 3]> = Vec::new();
        let mut colors: Vec<Option<[u8; 3]>> = Vec::new();

        'levels: for level in 0..MAX_HIERARCHY_DEPTH {
            let points = match reader.points(LodSelection::Level(level), BoundsSelection::All) {
                Ok(points) => points,
                // A missing deeper level just means the tree ends here.
                Err(e) if level > 0 => {
                    tracing::debug!(level, error = %e, "Hierarchy exhausted");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            let before = positions.len();
            for point in points {
                if positions.len() >= max_points {
                    break 'levels;
                }
                positions.push(center_and_swap([point.x, point.y, point.z], [0.0; 3]));
                colors.push(
                    point
                        .color
                        .map(|c| rgb16_to_rgb8(c.red, c.green, c.blue)),
                );
            }
            if positions.len() == before {
                break;
            }
        }

        anyhow::ensure!(!positions.is_empty(), "no points in any hierarchy node");

        // Ramp colors come from the height spread of what was actually
        // collected; axis swap has already moved height into Y.
        let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &positions {
            y_min = y_min.min(p[1] as f64);
            y_max = y_max.max(p[1] as f64);
        }

        let mut buffer = PointBuffer::with_capacity(positions.len());
        for (position, color) in positions.into_iter().zip(colors) {
            let color =
                color.unwrap_or_else(|| height_ramp(position[1] as f64, y_min, y_max));
            buffer.push(position, color);
        }

        buffer.recenter();
        Ok(buffer)
    }
}

/// Plain sequential LAZ decompression. The header is available up front
/// here, so centering and the color ramp use the same bounding-box rules
/// as the uncompressed LAS path.
struct SequentialLaz;

impl LazStrategy for SequentialLaz {
    fn name(&self) -> &'static str {
        "sequential laz"
    }

    fn decode(&self, bytes: &[u8], max_points: usize) -> anyhow::Result<PointBuffer> {
        let mut reader = Reader::new(Cursor::new(bytes.to_vec()))?;

        let bounds = reader.header().bounds();
        let center = [
            0.5 * (bounds.min.x + bounds.max.x),
            0.5 * (bounds.min.y + bounds.max.y),
            0.5 * (bounds.min.z + bounds.max.z),
        ];
        let (z_min, z_max) = (bounds.min.z, bounds.max.z);

        let mut buffer = PointBuffer::with_capacity(max_points.min(1 << 20));
        for point in reader.points() {
            if buffer.len() >= max_points {
                break;
            }
            let point = point?;
            let color = match point.color {
                Some(c) => rgb16_to_rgb8(c.red, c.green, c.blue),
                None => height_ramp(point.z, z_min, z_max),
            };
            buffer.push(center_and_swap([point.x, point.y, point.z], center), color);
        }

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal uncompressed LAS 1.2: format 0 records, unit scale.
    fn make_las(points: &[[i32; 3]], min: [f64; 3], max: [f64; 3]) -> Vec<u8> {
        let mut buf = vec![0u8; 227];
        buf[0..4].copy_from_slice(b"LASF");
        buf[24] = 1;
        buf[25] = 2;
        buf[94..96].copy_from_slice(&227u16.to_le_bytes());
        buf[96..100].copy_from_slice(&227u32.to_le_bytes());
        buf[104] = 0;
        buf[105..107].copy_from_slice(&20u16.to_le_bytes());
        buf[107..111].copy_from_slice(&(points.len() as u32).to_le_bytes());
        for i in 0..3 {
            buf[131 + i * 8..139 + i * 8].copy_from_slice(&1.0f64.to_le_bytes());
        }
        for axis in 0..3 {
            buf[179 + axis * 16..187 + axis * 16].copy_from_slice(&max[axis].to_le_bytes());
            buf[187 + axis * 16..195 + axis * 16].copy_from_slice(&min[axis].to_le_bytes());
        }
        for p in points {
            let mut rec = [0u8; 20];
            rec[0..4].copy_from_slice(&p[0].to_le_bytes());
            rec[4..8].copy_from_slice(&p[1].to_le_bytes());
            rec[8..12].copy_from_slice(&p[2].to_le_bytes());
            buf.extend_from_slice(&rec);
        }
        buf
    }

    #[test]
    fn las_dispatch_decodes_and_caps() {
        let las = make_las(
            &[[0, 0, 0], [1, 1, 1], [2, 2, 2]],
            [0.0; 3],
            [2.0; 3],
        );
        let buffer = decode(&las, ArtifactFormat::Las, 2).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.positions().len(), 6);
    }

    #[test]
    fn laz_failure_reports_every_strategy() {
        let err = decode(&[0u8; 128], ArtifactFormat::Laz, 1000).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("copc hierarchy"), "missing copc reason: {msg}");
        assert!(msg.contains("sequential laz"), "missing laz reason: {msg}");
    }

    #[test]
    fn non_cloud_formats_are_unsupported() {
        let err = decode(&[], ArtifactFormat::Tif, 10).unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }
}
