use crate::raster::{PreprocessedImage, Strip};
use image::imageops;
use staffsplit_ports::settings::SegmentationSettings;
use staffsplit_ports::types::PixelRow;
use tracing::{debug, info, instrument, warn};

#[derive(thiserror::Error, Debug)]
pub enum SegmentationError {
    #[error("image has degenerate dimensions {width}x{height}")]
    DegenerateDimensions { width: u32, height: u32 },
}

/// One detected staff: the center rows of its lines, top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaffSystem {
    pub line_rows: Vec<PixelRow>,
    pub spacing: u32,
}

impl StaffSystem {
    pub fn top_line(&self) -> PixelRow {
        self.line_rows.first().copied().unwrap_or(0)
    }

    pub fn bottom_line(&self) -> PixelRow {
        self.line_rows.last().copied().unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Band {
    start: PixelRow,
    end: PixelRow, // inclusive
}

impl Band {
    fn thickness(self) -> u32 {
        self.end - self.start + 1
    }

    fn center(self) -> PixelRow {
        (self.start + self.end) / 2
    }
}

/// Cut the page into one strip per staff system, ordered top to bottom.
///
/// Falls back to a single whole-page strip when no staff is found.
#[instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn segment(
    image: &PreprocessedImage,
    settings: &SegmentationSettings,
) -> Result<Vec<Strip>, SegmentationError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(SegmentationError::DegenerateDimensions { width, height });
    }

    let systems = detect_staff_systems(image, settings);
    if systems.is_empty() {
        warn!("no staff systems detected, using whole page");
        return Ok(vec![Strip {
            index: 0,
            top: 0,
            image: image.as_gray().clone(),
        }]);
    }

    let bounds = strip_bounds(&systems, height, settings.margin_spacings);
    let strips: Vec<Strip> = bounds
        .into_iter()
        .enumerate()
        .map(|(index, (top, bottom))| Strip {
            index,
            top,
            image: imageops::crop_imm(image.as_gray(), 0, top, width, bottom - top).to_image(),
        })
        .collect();

    info!(strips = strips.len(), "page segmented");
    Ok(strips)
}

/// Locate staff systems from the row-wise ink density profile.
pub fn detect_staff_systems(
    image: &PreprocessedImage,
    settings: &SegmentationSettings,
) -> Vec<StaffSystem> {
    let lines_per_staff = settings.lines_per_staff.max(2);
    let density = row_density(image);
    let peak = density.iter().copied().fold(0.0f32, f32::max);
    if peak < settings.min_ink_density {
        debug!(peak, "page too light for staff detection");
        return Vec::new();
    }

    let threshold = settings
        .min_row_density
        .max(percentile(&density, 0.9) * settings.percentile_factor);
    let line_rows = density
        .iter()
        .enumerate()
        .filter(|(_, d)| **d >= threshold)
        .map(|(row, _)| row as PixelRow);
    let bands = reject_thick_bands(group_consecutive(line_rows));
    let centers: Vec<PixelRow> = bands.iter().map(|b| b.center()).collect();
    debug!(threshold, bands = bands.len(), "line candidates");

    if centers.len() < lines_per_staff {
        return Vec::new();
    }

    let diffs: Vec<u32> = centers.windows(2).map(|w| w[1] - w[0]).collect();
    let spacing = median(&diffs);
    if spacing == 0 {
        return Vec::new();
    }

    let allowed = spacing as f32 * settings.spacing_tolerance;
    let mut systems = Vec::new();
    let mut i = 0;
    while i + lines_per_staff <= centers.len() {
        let group = &centers[i..i + lines_per_staff];
        let regular = group
            .windows(2)
            .all(|w| ((w[1] - w[0]) as f32 - spacing as f32).abs() <= allowed);
        if regular {
            systems.push(StaffSystem {
                line_rows: group.to_vec(),
                spacing,
            });
            i += lines_per_staff;
        } else {
            i += 1;
        }
    }

    debug!(spacing, systems = systems.len(), "staff systems detected");
    systems
}

/// Strip row ranges `(top, bottom_exclusive)`: outer edges get the margin,
/// neighbours meet halfway between systems.
fn strip_bounds(
    systems: &[StaffSystem],
    height: u32,
    margin_spacings: f32,
) -> Vec<(PixelRow, PixelRow)> {
    let margin_for = |system: &StaffSystem| (system.spacing as f32 * margin_spacings.max(0.0)) as u32;

    let mut bounds = Vec::with_capacity(systems.len());
    let mut top = systems
        .first()
        .map(|s| s.top_line().saturating_sub(margin_for(s)))
        .unwrap_or(0);

    for (idx, system) in systems.iter().enumerate() {
        let bottom = match systems.get(idx + 1) {
            Some(next) => {
                let gap = next.top_line() - system.bottom_line();
                system.bottom_line() + (gap + 1) / 2
            }
            None => system
                .bottom_line()
                .saturating_add(margin_for(system))
                .saturating_add(1)
                .min(height),
        };
        bounds.push((top, bottom));
        top = bottom;
    }
    bounds
}

fn row_density(image: &PreprocessedImage) -> Vec<f32> {
    let width = image.width();
    (0..image.height())
        .map(|y| {
            let ink = (0..width).filter(|&x| image.is_ink(x, y)).count();
            ink as f32 / width as f32
        })
        .collect()
}

fn group_consecutive(rows: impl Iterator<Item = PixelRow>) -> Vec<Band> {
    let mut bands: Vec<Band> = Vec::new();
    for row in rows {
        match bands.last_mut() {
            Some(band) if band.end + 1 == row => band.end = row,
            _ => bands.push(Band {
                start: row,
                end: row,
            }),
        }
    }
    bands
}

// Solid blocks (page borders, dense text) are far thicker than a staff line.
fn reject_thick_bands(bands: Vec<Band>) -> Vec<Band> {
    let thicknesses: Vec<u32> = bands.iter().map(|b| b.thickness()).collect();
    let typical = median(&thicknesses);
    let limit = typical.saturating_mul(3).max(2);
    bands
        .into_iter()
        .filter(|b| b.thickness() <= limit)
        .collect()
}

fn median(values: &[u32]) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2
    } else {
        sorted[mid]
    }
}

fn percentile(values: &[f32], fraction: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (sorted.len() - 1) as f32 * fraction.clamp(0.0, 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let weight = rank - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * weight
}
