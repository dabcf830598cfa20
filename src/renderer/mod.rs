//! Renderer - Annotated Frame Overlays
//!
//! ## Responsibilities
//!
//! - Composite zone polygons (filled + stroked), labels, and blob boxes
//!   onto a fetched JPEG
//! - Re-encode at quality 85
//!
//! With no overlays the source JPEG passes through untouched.

mod glyphs;

use crate::detector::Detection;
use crate::error::{Error, Result};
use crate::imaging::{polygon_mask, Vertex};
use glyphs::{glyph, GLYPH_HEIGHT, GLYPH_WIDTH};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

/// JPEG re-encode quality
const JPEG_QUALITY: u8 = 85;
/// Polygon fill opacity
const FILL_ALPHA: f32 = 0.3;
/// Label scale factor over the 5x7 glyph grid
const LABEL_SCALE: u32 = 2;

const COLOR_ALARM: Rgb<u8> = Rgb([220, 40, 40]);
const COLOR_OK: Rgb<u8> = Rgb([40, 200, 60]);
const COLOR_BLOB: Rgb<u8> = Rgb([255, 220, 0]);
const COLOR_CENTROID: Rgb<u8> = Rgb([220, 40, 40]);

/// Everything needed to draw one zone
#[derive(Debug, Clone)]
pub struct ZoneOverlay {
    pub polygon: Vec<Vertex>,
    /// Rendered near the first polygon vertex, e.g. `"dock a: 2"`
    pub label: String,
    pub alarm: bool,
    pub blobs: Vec<Detection>,
}

/// Composite overlays onto a JPEG and re-encode it.
pub fn annotate(jpeg: &[u8], overlays: &[ZoneOverlay]) -> Result<Vec<u8>> {
    if overlays.is_empty() {
        return Ok(jpeg.to_vec());
    }

    let decoded = image::load_from_memory(jpeg)
        .map_err(|e| Error::Validation(format!("invalid image: {}", e)))?;
    let mut img = decoded.to_rgb8();

    for overlay in overlays {
        let color = if overlay.alarm { COLOR_ALARM } else { COLOR_OK };

        fill_polygon(&mut img, &overlay.polygon, color);
        stroke_polygon(&mut img, &overlay.polygon, color);

        if let Some(&(x0, y0)) = overlay.polygon.first() {
            let lx = (x0.max(0.0) as u32).saturating_add(4);
            let ly = (y0.max(0.0) as u32).saturating_add(4);
            draw_label(&mut img, &overlay.label, lx, ly, color);
        }

        for blob in &overlay.blobs {
            draw_blob(&mut img, blob);
        }
    }

    encode_jpeg(&img)
}

/// Blend the polygon interior at `FILL_ALPHA`.
fn fill_polygon(img: &mut RgbImage, polygon: &[Vertex], color: Rgb<u8>) {
    let mask = polygon_mask(polygon, img.width(), img.height());
    for y in 0..img.height() {
        for x in 0..img.width() {
            if mask.get(x, y) != 255 {
                continue;
            }
            let px = img.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended =
                    (1.0 - FILL_ALPHA) * px.0[c] as f32 + FILL_ALPHA * color.0[c] as f32;
                px.0[c] = blended.round() as u8;
            }
        }
    }
}

/// Stroke every polygon edge at roughly 2px.
fn stroke_polygon(img: &mut RgbImage, polygon: &[Vertex], color: Rgb<u8>) {
    let n = polygon.len();
    for i in 0..n {
        let (x0, y0) = polygon[i];
        let (x1, y1) = polygon[(i + 1) % n];
        for (dx, dy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
            draw_line_segment_mut(
                img,
                ((x0 + dx) as f32, (y0 + dy) as f32),
                ((x1 + dx) as f32, (y1 + dy) as f32),
                color,
            );
        }
    }
}

/// Yellow 2px bounding box plus a red centroid disk.
fn draw_blob(img: &mut RgbImage, blob: &Detection) {
    let bbox = blob.bbox;
    if bbox.width == 0 || bbox.height == 0 {
        return;
    }

    let outer = Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.width, bbox.height);
    draw_hollow_rect_mut(img, outer, COLOR_BLOB);
    if bbox.width > 2 && bbox.height > 2 {
        let inner =
            Rect::at(bbox.x as i32 + 1, bbox.y as i32 + 1).of_size(bbox.width - 2, bbox.height - 2);
        draw_hollow_rect_mut(img, inner, COLOR_BLOB);
    }

    if let Some((cx, cy)) = blob.centroid {
        draw_filled_circle_mut(img, (cx as i32, cy as i32), 4, COLOR_CENTROID);
    }
}

/// Render bitmap-font text at `LABEL_SCALE`.
fn draw_label(img: &mut RgbImage, text: &str, x: u32, y: u32, color: Rgb<u8>) {
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(bits) = glyph(ch) else {
            cursor_x += (GLYPH_WIDTH + 1) * LABEL_SCALE;
            continue;
        };
        for (col, column_bits) in bits.iter().enumerate() {
            for row in 0..GLYPH_HEIGHT {
                if (column_bits >> row) & 1 == 0 {
                    continue;
                }
                for sx in 0..LABEL_SCALE {
                    for sy in 0..LABEL_SCALE {
                        let px = cursor_x + col as u32 * LABEL_SCALE + sx;
                        let py = y + row * LABEL_SCALE + sy;
                        if px < img.width() && py < img.height() {
                            img.put_pixel(px, py, color);
                        }
                    }
                }
            }
        }
        cursor_x += (GLYPH_WIDTH + 1) * LABEL_SCALE;
    }
}

fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    img.write_with_encoder(encoder)
        .map_err(|e| Error::Internal(format!("jpeg encode failed: {}", e)))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::BoundingBox;

    fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
        encode_jpeg(&img).unwrap()
    }

    #[test]
    fn no_overlays_passes_jpeg_through() {
        let jpeg = test_jpeg(64, 64);
        let out = annotate(&jpeg, &[]).unwrap();
        assert_eq!(out, jpeg);
    }

    #[test]
    fn annotated_output_is_decodable_jpeg() {
        let jpeg = test_jpeg(120, 90);
        let overlays = vec![ZoneOverlay {
            polygon: vec![(10.0, 10.0), (80.0, 10.0), (80.0, 60.0), (10.0, 60.0)],
            label: "dock a: 1".to_string(),
            alarm: true,
            blobs: vec![Detection {
                label: "object".to_string(),
                confidence: 1.0,
                bbox: BoundingBox {
                    x: 20,
                    y: 20,
                    width: 30,
                    height: 20,
                },
                centroid: Some((35, 30)),
                area: Some(600),
            }],
        }];

        let out = annotate(&jpeg, &overlays).unwrap();
        assert_ne!(out, jpeg);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 120);
        assert_eq!(decoded.height(), 90);
    }

    #[test]
    fn invalid_jpeg_is_a_validation_error() {
        let overlays = vec![ZoneOverlay {
            polygon: vec![(0.0, 0.0), (5.0, 0.0), (5.0, 5.0)],
            label: "z".to_string(),
            alarm: false,
            blobs: vec![],
        }];
        assert!(matches!(
            annotate(b"not a jpeg", &overlays),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn fill_blends_inside_only() {
        let mut img = RgbImage::from_pixel(40, 40, Rgb([100, 100, 100]));
        let polygon = vec![(5.0, 5.0), (20.0, 5.0), (20.0, 20.0), (5.0, 20.0)];
        fill_polygon(&mut img, &polygon, Rgb([0, 255, 0]));

        assert_ne!(img.get_pixel(10, 10), &Rgb([100, 100, 100]));
        assert_eq!(img.get_pixel(30, 30), &Rgb([100, 100, 100]));
    }
}
