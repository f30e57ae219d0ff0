use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use tiff::decoder::{Decoder, DecodingResult};

use crate::error::ExtractError;
use crate::resolve::ArtifactFormat;

/// Transcode an orthomosaic raster to RGBA8 PNG.
///
/// The primary path re-encodes through the general image pipeline. GeoTIFFs
/// using compression it cannot handle fall back to a raw sample decode that
/// rebuilds the RGBA buffer by hand. Both paths emit the same color model,
/// so downstream consumers cannot tell which one ran.
pub fn to_png(bytes: &[u8], format: ArtifactFormat) -> Result<Vec<u8>, ExtractError> {
    let hint = match format {
        ArtifactFormat::Tif => ImageFormat::Tiff,
        ArtifactFormat::Jpg => ImageFormat::Jpeg,
        ArtifactFormat::Png => ImageFormat::Png,
        other => return Err(ExtractError::Unsupported(other.as_str().to_string())),
    };

    let primary = match reencode(bytes, hint) {
        Ok(png) => return Ok(png),
        Err(e) => e,
    };

    if format != ArtifactFormat::Tif {
        return Err(ExtractError::Decode(format!(
            "{} re-encode failed: {}",
            format.as_str(),
            primary
        )));
    }

    match decode_geotiff_samples(bytes) {
        Ok(png) => Ok(png),
        Err(fallback) => Err(ExtractError::Decode(format!(
            "tiff re-encode failed ({}); geotiff sample decode failed ({})",
            primary, fallback
        ))),
    }
}

fn reencode(bytes: &[u8], format: ImageFormat) -> anyhow::Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    encode_rgba_png(decoded.to_rgba8())
}

/// Fallback: pull raw samples out with the GeoTIFF-aware decoder and
/// reconstruct RGBA ourselves. Handles 1-sample grayscale and 3/4-sample
/// RGB[A] rasters at 8 or 16 bits per sample.
fn decode_geotiff_samples(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions()?;
    let pixels = width as usize * height as usize;

    let samples: Vec<u8> = match decoder.read_image()? {
        DecodingResult::U8(data) => data,
        DecodingResult::U16(data) => data.into_iter().map(|v| (v >> 8) as u8).collect(),
        _ => anyhow::bail!("unsupported sample type"),
    };

    if pixels == 0 || samples.len() % pixels != 0 {
        anyhow::bail!(
            "sample count {} does not divide into {} pixels",
            samples.len(),
            pixels
        );
    }

    let per_pixel = samples.len() / pixels;
    let mut rgba = Vec::with_capacity(pixels * 4);
    match per_pixel {
        1 => {
            for gray in samples {
                rgba.extend_from_slice(&[gray, gray, gray, 255]);
            }
        }
        3 => {
            for px in samples.chunks_exact(3) {
                rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        4 => rgba = samples,
        n => anyhow::bail!("unsupported samples per pixel: {}", n),
    }

    let img = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow::anyhow!("rgba buffer does not match dimensions"))?;
    encode_rgba_png(img)
}

fn encode_rgba_png(img: image::RgbaImage) -> anyhow::Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_rgba() -> image::RgbaImage {
        image::RgbaImage::from_fn(2, 2, |x, y| {
            image::Rgba([(x * 100) as u8, (y * 100) as u8, 50, 255])
        })
    }

    fn encode_as(format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(tiny_rgba());
        // The jpeg encoder refuses alpha input.
        let img = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(img.to_rgb8())
        } else {
            img
        };
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn tiff_primary_path_produces_rgba_png() {
        let tiff_bytes = encode_as(ImageFormat::Tiff);
        let png = to_png(&tiff_bytes, ArtifactFormat::Tif).unwrap();
        let round = image::load_from_memory(&png).unwrap();
        assert_eq!(round.color(), image::ColorType::Rgba8);
        assert_eq!(round.to_rgba8(), tiny_rgba());
    }

    #[test]
    fn jpeg_transcodes_to_png() {
        let jpg_bytes = encode_as(ImageFormat::Jpeg);
        let png = to_png(&jpg_bytes, ArtifactFormat::Jpg).unwrap();
        assert_eq!(
            image::guess_format(&png).unwrap(),
            ImageFormat::Png
        );
    }

    #[test]
    fn fallback_path_matches_primary_color_model() {
        let tiff_bytes = encode_as(ImageFormat::Tiff);
        let png = decode_geotiff_samples(&tiff_bytes).unwrap();
        let round = image::load_from_memory(&png).unwrap();
        assert_eq!(round.color(), image::ColorType::Rgba8);
        assert_eq!(round.to_rgba8(), tiny_rgba());
    }

    #[test]
    fn both_paths_failing_names_both_strategies() {
        let err = to_png(&[0u8; 32], ArtifactFormat::Tif).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("re-encode failed"));
        assert!(msg.contains("sample decode failed"));
    }
}
