//! Image normalization ahead of OCR.
//!
//! Uploaded schedules are usually phone photos: rotated, unevenly lit,
//! speckled, and slightly skewed. Every stage here is a pure image
//! transform, so the whole step is deterministic and testable without an
//! OCR engine.

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageOutputFormat, Luma};
use tracing::debug;

use super::PipelineError;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Inputs larger than this on their longest edge are downscaled before
/// the stages run. Phone cameras produce far more pixels than OCR needs.
const MAX_INPUT_DIMENSION: u32 = 4096;

/// Deskew never rotates beyond this, so an already-level page with one
/// slanted annotation cannot be over-corrected.
const MAX_DESKEW_DEG: f32 = 15.0;

/// Candidate angle step for the skew search.
const DESKEW_STEP_DEG: f32 = 0.5;

/// Detected angles below this are treated as already level.
const MIN_DESKEW_DEG: f32 = 0.5;

/// Minimum ink coverage for skew detection to be meaningful.
const MIN_INK_RATIO: f32 = 0.02;

/// Skew detection runs on a copy no larger than this on its longest edge.
const DESKEW_DETECT_MAX_DIM: u32 = 1200;

/// Gray level below which a pixel counts as ink in the projection profile.
const INK_THRESHOLD: u8 = 128;

// ═══════════════════════════════════════════════════════════
// Preprocessor
// ═══════════════════════════════════════════════════════════

/// Per-stage toggles. All stages default to enabled; a degraded upload
/// can be retried with a different combination.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    pub binarize: bool,
    pub denoise: bool,
    pub deskew: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            binarize: true,
            denoise: true,
            deskew: true,
        }
    }
}

/// Pure image-to-image transform that maximizes OCR legibility.
///
/// Stage order: EXIF orientation fix, grayscale, oversized-input
/// downscale, Otsu binarization, 3x3 median denoise, projection-profile
/// deskew.
pub struct ImagePreprocessor {
    options: PreprocessOptions,
}

impl ImagePreprocessor {
    pub fn new(options: PreprocessOptions) -> Self {
        Self { options }
    }

    /// Input: raw image bytes (PNG, JPEG, TIFF). Output: PNG bytes.
    ///
    /// Fails only with `InvalidImage` (undecodable bytes or zero
    /// dimensions); every later stage is total.
    pub fn preprocess(&self, image_bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        validate_image_bytes(image_bytes)?;

        let decoded = image::load_from_memory(image_bytes)
            .map_err(|e| PipelineError::InvalidImage(format!("failed to decode image: {e}")))?;
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidImage("zero-dimension image".to_string()));
        }

        // Phone photos carry their rotation in EXIF; fix it before any
        // geometry-sensitive stage.
        let oriented = apply_orientation(decoded, read_exif_orientation(image_bytes));

        let mut gray = fit_input(oriented.to_luma8(), MAX_INPUT_DIMENSION);

        if self.options.binarize {
            // Threshold estimated on a lightly blurred copy so sensor noise
            // does not fragment the histogram; applied to the sharp image.
            let threshold = otsu_threshold(&box_blur_3x3(&gray));
            gray = binarize_with(&gray, threshold);
        }

        if self.options.denoise {
            gray = median_filter_3x3(&gray);
        }

        if self.options.deskew {
            if let Some(angle) = detect_skew_angle(&gray) {
                debug!(angle, "Deskewing page");
                gray = rotate_by_degrees(&gray, -angle);
            }
        }

        encode_gray_png(&gray)
    }
}

/// Reject byte streams that cannot be a real image before decoding.
fn validate_image_bytes(bytes: &[u8]) -> Result<(), PipelineError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(PipelineError::InvalidImage(
            "image data too small to be valid".to_string(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PipelineError::InvalidImage(format!(
            "image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Shrink the image so its longest edge fits `max_dim`, aspect ratio
/// preserved. Small images pass through untouched, never upscaled.
fn fit_input(gray: GrayImage, max_dim: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let largest = w.max(h);
    if largest <= max_dim {
        return gray;
    }
    let scale = max_dim as f32 / largest as f32;
    let nw = ((w as f32 * scale).round() as u32).max(1);
    let nh = ((h as f32 * scale).round() as u32).max(1);
    debug!(width = w, height = h, fit_width = nw, fit_height = nh, "Downscaling oversized page");
    image::imageops::resize(&gray, nw, nh, FilterType::Triangle)
}

// ═══════════════════════════════════════════════════════════
// EXIF orientation
// ═══════════════════════════════════════════════════════════

/// Read the EXIF orientation tag (0x0112) from raw image bytes.
/// Returns 1 (normal) if no EXIF data or the tag is absent.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation transform.
///
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ═══════════════════════════════════════════════════════════
// Binarization
// ═══════════════════════════════════════════════════════════

/// Otsu's method: the threshold that maximizes between-class variance of
/// the black/white split of the histogram.
pub fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in img.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 128;
    }

    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * count as f64)
        .sum();

    let mut background_count = 0u64;
    let mut background_sum = 0.0f64;
    let mut best_threshold = 128u8;
    let mut best_variance = 0.0f64;

    for threshold in 0..256usize {
        background_count += histogram[threshold];
        if background_count == 0 {
            continue;
        }
        let foreground_count = total - background_count;
        if foreground_count == 0 {
            break;
        }

        background_sum += threshold as f64 * histogram[threshold] as f64;
        let mean_background = background_sum / background_count as f64;
        let mean_foreground = (weighted_total - background_sum) / foreground_count as f64;
        let separation = mean_background - mean_foreground;
        let variance =
            background_count as f64 * foreground_count as f64 * separation * separation;

        if variance > best_variance {
            best_variance = variance;
            best_threshold = threshold as u8;
        }
    }

    best_threshold
}

/// Map every pixel to pure black or white around the threshold.
pub fn binarize_with(img: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > threshold { 255 } else { 0 };
    }
    out
}

/// Light 3x3 box blur, borders clamped. Only used to stabilize the
/// histogram before threshold estimation.
fn box_blur_3x3(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            let mut count = 0u32;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx >= 0 && ny >= 0 && (nx as u32) < w && (ny as u32) < h {
                        sum += img.get_pixel(nx as u32, ny as u32).0[0] as u32;
                        count += 1;
                    }
                }
            }
            out.put_pixel(x, y, Luma([(sum / count) as u8]));
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Denoise
// ═══════════════════════════════════════════════════════════

/// 3x3 median filter. Removes salt-and-pepper speckle while keeping
/// character edges, which plain blurring would soften.
pub fn median_filter_3x3(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return img.clone();
    }

    let mut out = img.clone();
    let mut window = [0u8; 9];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut i = 0;
            for dy in 0..3u32 {
                for dx in 0..3u32 {
                    window[i] = img.get_pixel(x + dx - 1, y + dy - 1).0[0];
                    i += 1;
                }
            }
            window.sort_unstable();
            out.put_pixel(x, y, Luma([window[4]]));
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Deskew
// ═══════════════════════════════════════════════════════════

/// Estimate the dominant text-line angle via the projection profile
/// method: ink is summed along rays of each candidate slope, and the
/// angle whose profile has the crispest row transitions wins.
///
/// Returns `None` for near-level pages (< 0.5 deg), tiny images, and
/// pages without enough ink to measure. The result is the angle the page
/// is rotated BY; rotating by its negative levels the text.
pub fn detect_skew_angle(img: &GrayImage) -> Option<f32> {
    let detect = detection_copy(img);
    let (w, h) = detect.dimensions();
    if w < 50 || h < 50 {
        return None;
    }

    let ink = detect.pixels().filter(|p| p.0[0] < INK_THRESHOLD).count();
    if (ink as f32 / (w as f32 * h as f32)) < MIN_INK_RATIO {
        return None;
    }

    let mut best_angle = 0.0f32;
    let mut best_score = f64::NEG_INFINITY;
    let mut angle = -MAX_DESKEW_DEG;
    while angle <= MAX_DESKEW_DEG {
        let score = projection_variance(&detect, angle);
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
        angle += DESKEW_STEP_DEG;
    }

    if best_angle.abs() < MIN_DESKEW_DEG {
        None
    } else {
        Some(best_angle)
    }
}

/// Detection subsamples to keep the angle sweep cheap on full-resolution
/// pages. `Cow` avoids the copy when the image is already small.
fn detection_copy(img: &GrayImage) -> Cow<'_, GrayImage> {
    let (w, h) = img.dimensions();
    let largest = w.max(h);
    if largest <= DESKEW_DETECT_MAX_DIM {
        return Cow::Borrowed(img);
    }
    let scale = DESKEW_DETECT_MAX_DIM as f32 / largest as f32;
    let nw = ((w as f32 * scale) as u32).max(1);
    let nh = ((h as f32 * scale) as u32).max(1);
    Cow::Owned(image::imageops::resize(img, nw, nh, FilterType::Triangle))
}

/// Score one candidate angle: bin ink along rays of that slope, then sum
/// squared differences between adjacent bins. A page skewed by exactly
/// the candidate angle drops each text line into a single bin, producing
/// sharp transitions and a high score.
fn projection_variance(img: &GrayImage, angle_deg: f32) -> f64 {
    let (w, h) = img.dimensions();
    let tan_a = (angle_deg * std::f32::consts::PI / 180.0).tan();
    let center_x = w as f32 / 2.0;
    let mut projection = vec![0u32; h as usize];

    // Subsample every 4th column for speed
    let mut x = 0u32;
    while x < w {
        let offset = ((x as f32 - center_x) * tan_a).round() as i32;
        for bin in 0..h {
            let sy = bin as i32 + offset;
            if sy >= 0
                && (sy as u32) < h
                && img.get_pixel(x, sy as u32).0[0] < INK_THRESHOLD
            {
                projection[bin as usize] += 1;
            }
        }
        x += 4;
    }

    let mut score = 0.0f64;
    for i in 1..projection.len() {
        let diff = projection[i] as f64 - projection[i - 1] as f64;
        score += diff * diff;
    }
    score
}

/// Rotate around the image center, nearest-neighbor, white background.
/// Output keeps the input dimensions; content that rotates past a corner
/// is cropped, acceptable at the small angles deskew produces.
pub fn rotate_by_degrees(img: &GrayImage, angle_deg: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let center_x = w as f32 / 2.0;
    let center_y = h as f32 / 2.0;

    let mut out = GrayImage::from_pixel(w, h, Luma([255]));
    for y in 0..h {
        for x in 0..w {
            // Inverse mapping: which source pixel lands here?
            let dx = x as f32 - center_x;
            let dy = y as f32 - center_y;
            let sx = (cos * dx + sin * dy + center_x).round() as i32;
            let sy = (-sin * dx + cos * dy + center_y).round() as i32;
            if sx >= 0 && sy >= 0 && (sx as u32) < w && (sy as u32) < h {
                out.put_pixel(x, y, *img.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    out
}

/// Encode a grayscale image as PNG bytes.
fn encode_gray_png(img: &GrayImage) -> Result<Vec<u8>, PipelineError> {
    let dynamic = DynamicImage::ImageLuma8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| PipelineError::InvalidImage(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}
