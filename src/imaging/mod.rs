//! Imaging - Grayscale Primitives for Background Subtraction
//!
//! ## Responsibilities
//!
//! - JPEG decode to 8-bit luma planes
//! - Absolute-difference thresholding against a background plane
//! - Morphological cleanup (3x3 erode/dilate)
//! - Polygon rasterization and masking
//! - Connected-component extraction with area gating
//! - Running-mean background maintenance
//!
//! All functions operate on row-major 8-bit planes with explicit dimensions.
//! A frame and its background must match exactly; mismatches are
//! `DimensionMismatch` errors.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default absolute-difference threshold
pub const DEFAULT_DIFF_THRESHOLD: u8 = 30;
/// Default morphology pass count
pub const DEFAULT_MORPH_PASSES: usize = 2;
/// Default running-mean coefficient
pub const DEFAULT_ALPHA: f64 = 0.1;

/// Polygon vertex in image pixel space
pub type Vertex = (f64, f64);

/// A single-channel 8-bit image plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayPlane {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GrayPlane {
    /// Create a plane from raw bytes; length must equal `width * height`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if data.len() != (width as usize) * (height as usize) {
            return Err(Error::Internal(format!(
                "plane buffer length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// All-zero plane of the given dimensions.
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; (width as usize) * (height as usize)],
            width,
            height,
        }
    }

    #[inline]
    fn idx(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Pixel accessor without bounds checks beyond the slice's own.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[self.idx(x, y)]
    }

    fn same_dims(&self, other: &GrayPlane) -> Result<()> {
        if self.width != other.width || self.height != other.height {
            return Err(Error::DimensionMismatch(format!(
                "{}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        Ok(())
    }

    /// Mean luma of the plane, truncated to u8.
    pub fn mean(&self) -> u8 {
        if self.data.is_empty() {
            return 0;
        }
        let sum: u64 = self.data.iter().map(|&p| p as u64).sum();
        (sum / self.data.len() as u64) as u8
    }
}

/// Axis-aligned bounding box, inclusive on all sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Connected component of changed pixels inside a zone mask
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: u32,
    pub area: u32,
    pub centroid: (u32, u32),
    pub bbox: BoundingBox,
}

/// Decode a JPEG (or any supported image) into a luma plane.
pub fn to_gray(bytes: &[u8]) -> Result<GrayPlane> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::Validation(format!("invalid image: {}", e)))?;
    let luma = img.to_luma8();
    let (width, height) = (luma.width(), luma.height());
    GrayPlane::new(luma.into_raw(), width, height)
}

/// Binarize `|a - b| > t` into 255/0.
pub fn abs_diff_threshold(a: &GrayPlane, b: &GrayPlane, t: u8) -> Result<GrayPlane> {
    a.same_dims(b)?;
    let data = a
        .data
        .iter()
        .zip(b.data.iter())
        .map(|(&pa, &pb)| if pa.abs_diff(pb) > t { 255 } else { 0 })
        .collect();
    GrayPlane::new(data, a.width, a.height)
}

/// Binarize `|pixel - mean| > t` into 255/0.
///
/// Degraded fallback used when no background plane exists.
pub fn mean_diff_threshold(plane: &GrayPlane, t: u8) -> GrayPlane {
    let mean = plane.mean();
    let data = plane
        .data
        .iter()
        .map(|&p| if p.abs_diff(mean) > t { 255 } else { 0 })
        .collect();
    GrayPlane {
        data,
        width: plane.width,
        height: plane.height,
    }
}

/// Erode with a 3x3 square structuring element, `passes` times.
///
/// Pixels within the 1-pixel border come out as 0.
pub fn erode(bin: &GrayPlane, passes: usize) -> GrayPlane {
    let mut current = bin.clone();
    for _ in 0..passes {
        let mut out = GrayPlane::zeroed(current.width, current.height);
        if current.width >= 3 && current.height >= 3 {
            for y in 1..current.height - 1 {
                for x in 1..current.width - 1 {
                    let mut keep = true;
                    'probe: for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let nx = (x as i64 + dx) as u32;
                            let ny = (y as i64 + dy) as u32;
                            if current.get(nx, ny) != 255 {
                                keep = false;
                                break 'probe;
                            }
                        }
                    }
                    if keep {
                        let i = out.idx(x, y);
                        out.data[i] = 255;
                    }
                }
            }
        }
        current = out;
    }
    current
}

/// Dilate with a 3x3 square structuring element, `passes` times.
///
/// Border pixels are carried over unchanged.
pub fn dilate(bin: &GrayPlane, passes: usize) -> GrayPlane {
    let mut current = bin.clone();
    for _ in 0..passes {
        let mut out = current.clone();
        if current.width >= 3 && current.height >= 3 {
            for y in 1..current.height - 1 {
                for x in 1..current.width - 1 {
                    let mut hit = false;
                    'probe: for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let nx = (x as i64 + dx) as u32;
                            let ny = (y as i64 + dy) as u32;
                            if current.get(nx, ny) == 255 {
                                hit = true;
                                break 'probe;
                            }
                        }
                    }
                    let i = out.idx(x, y);
                    out.data[i] = if hit { 255 } else { 0 };
                }
            }
        }
        current = out;
    }
    current
}

/// Speckle removal: erode `passes` times, then dilate the same amount.
pub fn morph_clean(bin: &GrayPlane, passes: usize) -> GrayPlane {
    dilate(&erode(bin, passes), passes)
}

/// Even-odd ray-casting membership test.
///
/// Pixels on horizontal edges at a vertex y are decided by the strict
/// `yi > y` vs `yj > y` comparison, so shared vertices are not counted twice.
pub fn point_in_polygon(p: (f64, f64), polygon: &[Vertex]) -> bool {
    let (px, py) = p;
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > py) != (yj > py) {
            let x_cross = (xj - xi) * (py - yi) / (yj - yi) + xi;
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Rasterize a polygon into a 255/0 mask.
pub fn polygon_mask(polygon: &[Vertex], width: u32, height: u32) -> GrayPlane {
    let mut mask = GrayPlane::zeroed(width, height);
    for y in 0..height {
        for x in 0..width {
            if point_in_polygon((x as f64, y as f64), polygon) {
                let i = mask.idx(x, y);
                mask.data[i] = 255;
            }
        }
    }
    mask
}

/// Gate a binary plane by a mask: pixels survive only where mask == 255.
pub fn apply_mask(bin: &GrayPlane, mask: &GrayPlane) -> Result<GrayPlane> {
    bin.same_dims(mask)?;
    let data = bin
        .data
        .iter()
        .zip(mask.data.iter())
        .map(|(&b, &m)| if m == 255 { b } else { 0 })
        .collect();
    GrayPlane::new(data, bin.width, bin.height)
}

/// Extract 4-connected components within `[min_area, max_area]`.
///
/// Components are discovered in row-major scan order; centroids are the
/// truncated integer mean of member coordinates and bounding boxes are
/// inclusive on all sides.
pub fn connected_components(
    bin: &GrayPlane,
    min_area: u32,
    max_area: u32,
) -> Vec<Blob> {
    let w = bin.width as usize;
    let h = bin.height as usize;
    let mut visited = vec![false; w * h];
    let mut blobs = Vec::new();
    let mut next_id: u32 = 0;
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for sy in 0..h {
        for sx in 0..w {
            let start = sy * w + sx;
            if visited[start] || bin.data[start] != 255 {
                continue;
            }

            let mut area: u32 = 0;
            let mut sum_x: u64 = 0;
            let mut sum_y: u64 = 0;
            let (mut min_x, mut min_y) = (sx, sy);
            let (mut max_x, mut max_y) = (sx, sy);

            visited[start] = true;
            stack.push((sx, sy));
            while let Some((x, y)) = stack.pop() {
                area += 1;
                sum_x += x as u64;
                sum_y += y as u64;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let mut visit = |nx: usize, ny: usize, stack: &mut Vec<(usize, usize)>| {
                    let ni = ny * w + nx;
                    if !visited[ni] && bin.data[ni] == 255 {
                        visited[ni] = true;
                        stack.push((nx, ny));
                    }
                };
                if x > 0 {
                    visit(x - 1, y, &mut stack);
                }
                if x + 1 < w {
                    visit(x + 1, y, &mut stack);
                }
                if y > 0 {
                    visit(x, y - 1, &mut stack);
                }
                if y + 1 < h {
                    visit(x, y + 1, &mut stack);
                }
            }

            if area < min_area || area > max_area {
                continue;
            }

            blobs.push(Blob {
                id: next_id,
                area,
                centroid: ((sum_x / area as u64) as u32, (sum_y / area as u64) as u32),
                bbox: BoundingBox {
                    x: min_x as u32,
                    y: min_y as u32,
                    width: (max_x - min_x + 1) as u32,
                    height: (max_y - min_y + 1) as u32,
                },
            });
            next_id += 1;
        }
    }

    blobs
}

/// Encode a plane as PNG, the self-describing storage form for
/// background blobs.
pub fn encode_gray_png(plane: &GrayPlane) -> Result<Vec<u8>> {
    let img: image::GrayImage =
        image::ImageBuffer::from_raw(plane.width, plane.height, plane.data.clone())
            .ok_or_else(|| Error::Internal("plane buffer does not match dimensions".into()))?;
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| Error::Internal(format!("png encode failed: {}", e)))?;
    Ok(buf)
}

/// Running-mean update: `round((1 - alpha) * bg + alpha * cur)` per pixel.
pub fn running_mean_update(bg: &GrayPlane, cur: &GrayPlane, alpha: f64) -> Result<GrayPlane> {
    bg.same_dims(cur)?;
    let data = bg
        .data
        .iter()
        .zip(cur.data.iter())
        .map(|(&b, &c)| {
            let blended = (1.0 - alpha) * b as f64 + alpha * c as f64;
            blended.round().clamp(0.0, 255.0) as u8
        })
        .collect();
    GrayPlane::new(data, bg.width, bg.height)
}
