use crate::raster::{InvalidImageError, PreprocessedImage, RawImage};
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use staffsplit_ports::settings::PreprocessSettings;
use tracing::{debug, info, instrument};

/// Contrast-stretch, smooth and binarize a page so staff lines and glyphs are
/// black on a white background.
#[instrument(skip_all, fields(width = raw.width(), height = raw.height()))]
pub fn preprocess(
    raw: RawImage,
    settings: &PreprocessSettings,
) -> Result<PreprocessedImage, InvalidImageError> {
    let (width, height) = (raw.width(), raw.height());
    if width == 0 || height == 0 {
        return Err(InvalidImageError::Empty { width, height });
    }
    debug!(bits_per_pixel = raw.bits_per_pixel(), "decoded page");

    let mut gray = raw.into_luma8();
    stretch_contrast(
        &mut gray,
        settings.stretch_low.get(),
        settings.stretch_high.get(),
    );

    let smoothed = if settings.blur_sigma > 0.0 && settings.blur_sigma.is_finite() {
        gaussian_blur_f32(&gray, settings.blur_sigma)
    } else {
        gray
    };

    let level = otsu_level(&smoothed);
    let mut binary = GrayImage::from_fn(width, height, |x, y| {
        if smoothed.get_pixel(x, y).0[0] > level {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let inverted = mean_intensity(&binary) < 127.0;
    if inverted {
        image::imageops::invert(&mut binary);
    }

    info!(otsu_level = level, inverted, "page binarized");
    Ok(PreprocessedImage::from_gray(binary))
}

/// Linearly map the `low`..`high` percentile range of intensities onto 0..=255.
fn stretch_contrast(image: &mut GrayImage, low: f32, high: f32) {
    let histogram = intensity_histogram(image);
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return;
    }

    let lo = percentile_value(&histogram, total, low.min(high));
    let hi = percentile_value(&histogram, total, high.max(low));
    if hi <= lo {
        return;
    }

    let span = (hi - lo) as u32;
    for pixel in image.pixels_mut() {
        let v = pixel.0[0].clamp(lo, hi);
        pixel.0[0] = (((v - lo) as u32 * 255 + span / 2) / span) as u8;
    }
    debug!(lo, hi, "contrast stretched");
}

fn intensity_histogram(image: &GrayImage) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    histogram
}

fn percentile_value(histogram: &[u64; 256], total: u64, fraction: f32) -> u8 {
    let target = ((total as f64) * f64::from(fraction.clamp(0.0, 1.0))).ceil() as u64;
    let target = target.max(1);
    let mut seen = 0u64;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= target {
            return value as u8;
        }
    }
    255
}

fn mean_intensity(image: &GrayImage) -> f64 {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / count as f64
}
