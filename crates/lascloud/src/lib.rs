//! lascloud: reader for uncompressed ASPRS LAS point clouds.
//!
//! - Parses the fixed-offset public header block (LAS 1.0 .. 1.4).
//! - Decodes fixed-point i32 coordinates via `value * scale + offset`.
//! - Emits a [`PointBuffer`]: flat f32 positions + u8 colors, sized for
//!   direct GPU upload, centered on the header bounding-box midpoint with
//!   the Z-up axis remapped to Y-up.
//!
//! Public header block layout (little-endian, offsets in bytes):
//!   000 : [u8;4]  magic = b"LASF"
//!   004 : u16     file source id
//!   006 : u16     global encoding
//!   008 : [u8;16] project GUID
//!   024 : u8      version major
//!   025 : u8      version minor
//!   026 : [u8;32] system identifier
//!   058 : [u8;32] generating software
//!   090 : u16     creation day of year
//!   092 : u16     creation year
//!   094 : u16     header size
//!   096 : u32     offset to point data
//!   100 : u32     number of VLRs
//!   104 : u8      point data record format (bits 6..7: compression markers)
//!   105 : u16     point data record length
//!   107 : u32     legacy number of point records
//!   111 : u32[5]  legacy number of points by return
//!   131 : f64[3]  x/y/z scale factor
//!   155 : f64[3]  x/y/z offset
//!   179 : f64[6]  max x, min x, max y, min y, max z, min z
//!   227 : ...     (1.3+: waveform offset; 1.4: extended VLRs and the
//!                  u64 point count at offset 247)
//!
//! Point records follow at `offset_to_point_data`, each `record_length`
//! bytes; X/Y/Z are the first three i32 fields. Formats 2, 3, 5, 7, 8 and
//! 10 carry u16 R/G/B at a format-specific offset inside the record.

use std::io::{self, ErrorKind};

pub const LAS_MAGIC: [u8; 4] = *b"LASF";

/// Offset of the u64 record count in a 1.4 header.
const EXTENDED_COUNT_OFFSET: usize = 247;

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated LAS"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u16(buf: &mut &[u8]) -> io::Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_u64(buf: &mut &[u8]) -> io::Result<u64> {
    let b = take(buf, 8)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

#[inline(always)]
fn le_i32_at(rec: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([rec[off], rec[off + 1], rec[off + 2], rec[off + 3]])
}

#[inline(always)]
fn le_u16_at(rec: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([rec[off], rec[off + 1]])
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parsed public header block. Never mutated after parsing; the derived
/// bounding-box center is computed on demand, not stored back.
#[derive(Debug, Clone)]
pub struct LasHeader {
    pub version: (u8, u8),
    /// Record format with the compression marker bits already masked off.
    pub point_format: u8,
    pub record_length: u16,
    pub header_size: u16,
    pub offset_to_point_data: u32,
    /// Legacy u32 count; zero in 1.4 files that exceed it.
    pub legacy_point_count: u32,
    /// The 1.4 extended u64 count, when the header is long enough to carry it.
    pub extended_point_count: Option<u64>,
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl LasHeader {
    /// Parse the public header block from the start of a LAS buffer.
    pub fn parse(bytes: &[u8]) -> io::Result<Self> {
        let mut p = bytes;

        if take(&mut p, 4)? != LAS_MAGIC {
            return Err(bad("bad LAS magic"));
        }

        let _file_source_id = le_u16(&mut p)?;
        let _global_encoding = le_u16(&mut p)?;
        take(&mut p, 16)?; // project GUID

        let version_major = le_u8(&mut p)?;
        let version_minor = le_u8(&mut p)?;
        if version_major != 1 {
            return Err(bad("unsupported LAS major version"));
        }

        take(&mut p, 32)?; // system identifier
        take(&mut p, 32)?; // generating software
        let _day = le_u16(&mut p)?;
        let _year = le_u16(&mut p)?;

        let header_size = le_u16(&mut p)?;
        let offset_to_point_data = le_u32(&mut p)?;
        let _vlr_count = le_u32(&mut p)?;

        // Bits 6..7 mark LAZ compression; the format id lives in the low bits.
        let point_format = le_u8(&mut p)? & 0x3f;
        let record_length = le_u16(&mut p)?;
        let legacy_point_count = le_u32(&mut p)?;
        take(&mut p, 20)?; // legacy points by return

        let scale = [le_f64(&mut p)?, le_f64(&mut p)?, le_f64(&mut p)?];
        let offset = [le_f64(&mut p)?, le_f64(&mut p)?, le_f64(&mut p)?];

        let max_x = le_f64(&mut p)?;
        let min_x = le_f64(&mut p)?;
        let max_y = le_f64(&mut p)?;
        let min_y = le_f64(&mut p)?;
        let max_z = le_f64(&mut p)?;
        let min_z = le_f64(&mut p)?;

        // 1.4 headers carry the u64 record count past the legacy block.
        let extended_point_count = if version_minor >= 4
            && header_size as usize >= EXTENDED_COUNT_OFFSET + 8
            && bytes.len() >= EXTENDED_COUNT_OFFSET + 8
        {
            let mut q = &bytes[EXTENDED_COUNT_OFFSET..];
            Some(le_u64(&mut q)?)
        } else {
            None
        };

        if (offset_to_point_data as usize) < header_size as usize {
            return Err(bad("point data offset inside header"));
        }
        if record_length < 12 {
            return Err(bad("record length too short for XYZ"));
        }
        if scale.iter().any(|s| *s == 0.0) {
            return Err(bad("zero scale factor"));
        }

        Ok(Self {
            version: (version_major, version_minor),
            point_format,
            record_length,
            header_size,
            offset_to_point_data,
            legacy_point_count,
            extended_point_count,
            scale,
            offset,
            min: [min_x, min_y, min_z],
            max: [max_x, max_y, max_z],
        })
    }

    /// Total record count, preferring the 1.4 extended field when the
    /// legacy u32 has overflowed to zero.
    pub fn point_count(&self) -> u64 {
        match (self.legacy_point_count, self.extended_point_count) {
            (0, Some(n)) => n,
            (n, _) => n as u64,
        }
    }

    /// Midpoint of the header bounding box, per axis.
    pub fn center(&self) -> [f64; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    /// Whether this record format stores u16 R/G/B.
    pub fn has_rgb(&self) -> bool {
        rgb_offset(self.point_format).is_some()
    }
}

/// Byte offset of the u16 R/G/B triple inside a point record, for the
/// formats that carry one.
pub fn rgb_offset(point_format: u8) -> Option<usize> {
    match point_format {
        2 => Some(20),
        3 | 5 => Some(28),
        7 | 8 | 10 => Some(30),
        _ => None,
    }
}

/// Subtract the per-axis center and remap axes: the cloud's Z (up) becomes
/// the output Y, and the output Z is the negated centered Y.
#[inline]
pub fn center_and_swap(p: [f64; 3], center: [f64; 3]) -> [f32; 3] {
    [
        (p[0] - center[0]) as f32,
        (p[2] - center[2]) as f32,
        -((p[1] - center[1]) as f32),
    ]
}

/// Deterministic blue-to-red ramp over height normalized to [z_min, z_max].
/// Identical input always yields identical output; no randomness.
#[inline]
pub fn height_ramp(z: f64, z_min: f64, z_max: f64) -> [u8; 3] {
    let span = z_max - z_min;
    let t = if span > 0.0 {
        ((z - z_min) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    [(t * 255.0).round() as u8, 0, ((1.0 - t) * 255.0).round() as u8]
}

/// Scale a 16-bit LAS color channel triple down to 8 bits.
#[inline]
pub fn rgb16_to_rgb8(r: u16, g: u16, b: u16) -> [u8; 3] {
    [(r / 256) as u8, (g / 256) as u8, (b / 256) as u8]
}

/// Flat position/color buffer ready for GPU upload.
///
/// Invariants: `positions.len() == 3 * len()` and `colors.len() == 3 * len()`.
/// Wire encoding: `[len:u32 LE][positions as f32 LE][colors as u8]`, no
/// padding between the three sections.
#[derive(Debug, Clone, Default)]
pub struct PointBuffer {
    positions: Vec<f32>,
    colors: Vec<u8>,
}

impl PointBuffer {
    pub fn with_capacity(points: usize) -> Self {
        Self {
            positions: Vec::with_capacity(points * 3),
            colors: Vec::with_capacity(points * 3),
        }
    }

    #[inline]
    pub fn push(&mut self, position: [f32; 3], color: [u8; 3]) {
        self.positions.extend_from_slice(&position);
        self.colors.extend_from_slice(&color);
    }

    pub fn len(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn colors(&self) -> &[u8] {
        &self.colors
    }

    /// Mean of the stored positions, per axis.
    pub fn centroid(&self) -> [f32; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        let mut sum = [0.0f64; 3];
        for p in self.positions.chunks_exact(3) {
            sum[0] += p[0] as f64;
            sum[1] += p[1] as f64;
            sum[2] += p[2] as f64;
        }
        let inv_n = 1.0 / self.len() as f64;
        [
            (sum[0] * inv_n) as f32,
            (sum[1] * inv_n) as f32,
            (sum[2] * inv_n) as f32,
        ]
    }

    /// Subtract the centroid from every position, returning the centroid
    /// that was removed. Used when no global bound is known up front.
    pub fn recenter(&mut self) -> [f32; 3] {
        let c = self.centroid();
        for p in self.positions.chunks_exact_mut(3) {
            p[0] -= c[0];
            p[1] -= c[1];
            p[2] -= c[2];
        }
        c
    }

    /// Encode to the wire format: `[len:u32][positions][colors]`.
    pub fn encode(&self) -> Vec<u8> {
        let count = self.len() as u32;
        let mut out = Vec::with_capacity(4 + self.positions.len() * 4 + self.colors.len());
        out.extend_from_slice(&count.to_le_bytes());

        #[cfg(target_endian = "little")]
        {
            // f32 slices are already little-endian bytes on this target.
            out.extend_from_slice(bytemuck::cast_slice(&self.positions));
        }

        #[cfg(not(target_endian = "little"))]
        {
            for v in &self.positions {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }

        out.extend_from_slice(&self.colors);
        out
    }
}

/// Decode an uncompressed LAS buffer into a centered, axis-swapped
/// [`PointBuffer`], emitting at most `max_points` points.
///
/// Formats without RGB get ramp colors from height normalized over the
/// header's Z bounds. A buffer holding fewer records than the header claims
/// is truncated to what is actually present rather than rejected.
pub fn decode_las(bytes: &[u8], max_points: usize) -> io::Result<PointBuffer> {
    let header = LasHeader::parse(bytes)?;

    let start = header.offset_to_point_data as usize;
    let rec_len = header.record_length as usize;
    need(bytes, start)?;

    let available = (bytes.len() - start) / rec_len;
    let claimed = header.point_count() as usize;
    let count = claimed.min(available).min(max_points);

    let center = header.center();
    let rgb_off = rgb_offset(header.point_format)
        // A short record cannot actually hold the triple its format promises.
        .filter(|off| off + 6 <= rec_len);
    let (z_min, z_max) = (header.min[2], header.max[2]);

    let [sx, sy, sz] = header.scale;
    let [ox, oy, oz] = header.offset;

    let mut out = PointBuffer::with_capacity(count);
    for i in 0..count {
        let rec = &bytes[start + i * rec_len..start + (i + 1) * rec_len];

        let x = le_i32_at(rec, 0) as f64 * sx + ox;
        let y = le_i32_at(rec, 4) as f64 * sy + oy;
        let z = le_i32_at(rec, 8) as f64 * sz + oz;

        let color = match rgb_off {
            Some(off) => rgb16_to_rgb8(
                le_u16_at(rec, off),
                le_u16_at(rec, off + 2),
                le_u16_at(rec, off + 4),
            ),
            None => height_ramp(z, z_min, z_max),
        };

        out.push(center_and_swap([x, y, z], center), color);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a minimal LAS 1.2 buffer: 227-byte header followed by
    /// point records built from raw integer triples (and optional RGB).
    fn make_las(
        point_format: u8,
        record_length: u16,
        points: &[([i32; 3], Option<[u16; 3]>)],
        scale: [f64; 3],
        offset: [f64; 3],
        min: [f64; 3],
        max: [f64; 3],
    ) -> Vec<u8> {
        let header_size = 227u16;
        let mut buf = vec![0u8; header_size as usize];
        buf[0..4].copy_from_slice(b"LASF");
        buf[24] = 1; // version major
        buf[25] = 2; // version minor
        buf[94..96].copy_from_slice(&header_size.to_le_bytes());
        buf[96..100].copy_from_slice(&(header_size as u32).to_le_bytes());
        buf[104] = point_format;
        buf[105..107].copy_from_slice(&record_length.to_le_bytes());
        buf[107..111].copy_from_slice(&(points.len() as u32).to_le_bytes());
        for (i, s) in scale.iter().enumerate() {
            buf[131 + i * 8..139 + i * 8].copy_from_slice(&s.to_le_bytes());
        }
        for (i, o) in offset.iter().enumerate() {
            buf[155 + i * 8..163 + i * 8].copy_from_slice(&o.to_le_bytes());
        }
        // max/min interleaved per axis: max_x, min_x, max_y, min_y, ...
        for axis in 0..3 {
            buf[179 + axis * 16..187 + axis * 16].copy_from_slice(&max[axis].to_le_bytes());
            buf[187 + axis * 16..195 + axis * 16].copy_from_slice(&min[axis].to_le_bytes());
        }

        for (raw, rgb) in points {
            let mut rec = vec![0u8; record_length as usize];
            rec[0..4].copy_from_slice(&raw[0].to_le_bytes());
            rec[4..8].copy_from_slice(&raw[1].to_le_bytes());
            rec[8..12].copy_from_slice(&raw[2].to_le_bytes());
            if let (Some(rgb), Some(off)) = (rgb, rgb_offset(point_format)) {
                rec[off..off + 2].copy_from_slice(&rgb[0].to_le_bytes());
                rec[off + 2..off + 4].copy_from_slice(&rgb[1].to_le_bytes());
                rec[off + 4..off + 6].copy_from_slice(&rgb[2].to_le_bytes());
            }
            buf.extend_from_slice(&rec);
        }
        buf
    }

    fn unit_scale() -> ([f64; 3], [f64; 3]) {
        ([1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
    }

    #[test]
    fn header_round_trips_fixed_offsets() {
        let (scale, offset) = unit_scale();
        let las = make_las(
            0,
            20,
            &[([1, 2, 3], None)],
            scale,
            offset,
            [0.0, 0.0, 0.0],
            [10.0, 20.0, 30.0],
        );
        let h = LasHeader::parse(&las).unwrap();
        assert_eq!(h.version, (1, 2));
        assert_eq!(h.point_format, 0);
        assert_eq!(h.record_length, 20);
        assert_eq!(h.point_count(), 1);
        assert_eq!(h.center(), [5.0, 10.0, 15.0]);
        assert!(!h.has_rgb());
    }

    #[test]
    fn buffer_lengths_match_point_count() {
        let (scale, offset) = unit_scale();
        let pts: Vec<_> = (0..7).map(|i| ([i, i, i], None)).collect();
        let las = make_las(0, 20, &pts, scale, offset, [0.0; 3], [6.0; 3]);
        let buf = decode_las(&las, usize::MAX).unwrap();
        assert_eq!(buf.len(), 7);
        assert_eq!(buf.positions().len(), 3 * buf.len());
        assert_eq!(buf.colors().len(), 3 * buf.len());
    }

    #[test]
    fn wire_encoding_frames_count_and_sections() {
        let (scale, offset) = unit_scale();
        let las = make_las(
            0,
            20,
            &[([0, 0, 0], None), ([4, 4, 4], None)],
            scale,
            offset,
            [0.0; 3],
            [4.0; 3],
        );
        let buf = decode_las(&las, usize::MAX).unwrap();
        let wire = buf.encode();
        let n = u32::from_le_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        assert_eq!(n, 2);
        assert_eq!(wire.len(), 4 + n * 12 + n * 3);
    }

    #[test]
    fn centering_zeroes_the_mean_for_symmetric_input() {
        let (scale, offset) = unit_scale();
        // Two points at the bbox extremes: the bbox midpoint equals the mean.
        let las = make_las(
            0,
            20,
            &[([0, 0, 0], None), ([10, 10, 10], None)],
            scale,
            offset,
            [0.0; 3],
            [10.0; 3],
        );
        let buf = decode_las(&las, usize::MAX).unwrap();
        let c = buf.centroid();
        for axis in c {
            assert!(axis.abs() < 1e-5, "centroid axis {axis} not near zero");
        }
    }

    #[test]
    fn axis_swap_maps_z_up_to_y_up() {
        let (scale, offset) = unit_scale();
        let las = make_las(
            0,
            20,
            &[([2, 4, 6], None)],
            scale,
            offset,
            [0.0; 3],
            [0.0; 3], // zero-size bbox: center at origin
        );
        let buf = decode_las(&las, usize::MAX).unwrap();
        assert_eq!(buf.positions(), &[2.0, 6.0, -4.0]);
    }

    #[test]
    fn max_points_caps_exactly() {
        let (scale, offset) = unit_scale();
        let pts: Vec<_> = (0..50).map(|i| ([i, 0, 0], None)).collect();
        let las = make_las(0, 20, &pts, scale, offset, [0.0; 3], [49.0, 0.0, 0.0]);
        let buf = decode_las(&las, 12).unwrap();
        assert_eq!(buf.len(), 12);
    }

    #[test]
    fn rgb_formats_divide_channels_by_256() {
        let (scale, offset) = unit_scale();
        let las = make_las(
            2,
            26,
            &[([0, 0, 0], Some([65535, 512, 0]))],
            scale,
            offset,
            [0.0; 3],
            [0.0; 3],
        );
        let buf = decode_las(&las, usize::MAX).unwrap();
        assert_eq!(buf.colors(), &[255, 2, 0]);
    }

    #[test]
    fn ramp_colors_are_deterministic_and_distinguish_extremes() {
        let (scale, offset) = unit_scale();
        let las = make_las(
            0,
            20,
            &[([0, 0, 0], None), ([0, 0, 100], None)],
            scale,
            offset,
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 100.0],
        );
        let a = decode_las(&las, usize::MAX).unwrap();
        let b = decode_las(&las, usize::MAX).unwrap();
        assert_eq!(a.colors(), b.colors());

        let low = &a.colors()[0..3];
        let high = &a.colors()[3..6];
        assert_ne!(low, high);
        assert_eq!(low, &[0, 0, 255]); // min height: blue
        assert_eq!(high, &[255, 0, 0]); // max height: red
    }

    #[test]
    fn scale_and_offset_reach_world_units() {
        let las = make_las(
            0,
            20,
            &[([1000, 2000, 3000], None)],
            [0.01, 0.01, 0.01],
            [100.0, 200.0, 300.0],
            [0.0; 3],
            [0.0; 3],
        );
        let buf = decode_las(&las, usize::MAX).unwrap();
        // world = raw * 0.01 + offset, centered on the zero bbox midpoint
        assert_eq!(buf.positions(), &[110.0, 330.0, -220.0]);
    }

    #[test]
    fn extended_count_read_from_1_4_header() {
        let (scale, offset) = unit_scale();
        let mut las = make_las(6, 30, &[], scale, offset, [0.0; 3], [0.0; 3]);
        // Rewrite the header as 1.4 with a zero legacy count.
        las[25] = 4;
        let header_size = 375u16;
        las[94..96].copy_from_slice(&header_size.to_le_bytes());
        las[107..111].copy_from_slice(&0u32.to_le_bytes());
        las.resize(375, 0);
        las[96..100].copy_from_slice(&375u32.to_le_bytes());
        las[247..255].copy_from_slice(&9_000_000_000u64.to_le_bytes());
        let h = LasHeader::parse(&las).unwrap();
        assert_eq!(h.point_count(), 9_000_000_000);
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(LasHeader::parse(b"LASF").is_err());
        assert!(LasHeader::parse(b"NOPE").is_err());
    }

    #[test]
    fn compression_marker_bits_are_masked() {
        let (scale, offset) = unit_scale();
        let mut las = make_las(0, 20, &[([0, 0, 0], None)], scale, offset, [0.0; 3], [0.0; 3]);
        las[104] = 0x80 | 2;
        let h = LasHeader::parse(&las).unwrap();
        assert_eq!(h.point_format, 2);
    }
}
