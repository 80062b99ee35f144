use crate::types::*;
use serde::{Deserialize, Serialize};

fn default_worker_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(1)
}

fn default_strip_timeout_ms() -> u64 {
    120_000
}

fn default_engine() -> EngineKind {
    EngineKind::Audiveris
}

fn default_stretch_low() -> Fraction01 {
    Fraction01::new(0.01)
}

fn default_stretch_high() -> Fraction01 {
    Fraction01::new(0.99)
}

fn default_blur_sigma() -> f32 {
    0.8
}

fn default_min_ink_density() -> f32 {
    0.05
}

fn default_min_row_density() -> f32 {
    0.2
}

fn default_percentile_factor() -> f32 {
    0.7
}

fn default_lines_per_staff() -> usize {
    5
}

fn default_spacing_tolerance() -> f32 {
    0.6
}

fn default_margin_spacings() -> f32 {
    3.0
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// How many failed strips a conversion may lose before the whole request fails.
/// A request where every strip failed always fails.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum FailureTolerance {
    #[default]
    AllButTotal,
    Strict,
    MaxFraction(Fraction01),
}

impl FailureTolerance {
    pub fn is_exceeded(self, failed: usize, total: usize) -> bool {
        if failed == 0 {
            return false;
        }
        if failed >= total {
            return true;
        }
        match self {
            FailureTolerance::AllButTotal => false,
            FailureTolerance::Strict => true,
            FailureTolerance::MaxFraction(limit) => failed as f32 / total as f32 > limit.get(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    #[serde(default = "default_stretch_low")]
    pub stretch_low: Fraction01,
    #[serde(default = "default_stretch_high")]
    pub stretch_high: Fraction01,
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            stretch_low: default_stretch_low(),
            stretch_high: default_stretch_high(),
            blur_sigma: default_blur_sigma(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Pages whose darkest row is lighter than this have no staves.
    #[serde(default = "default_min_ink_density")]
    pub min_ink_density: f32,
    #[serde(default = "default_min_row_density")]
    pub min_row_density: f32,
    #[serde(default = "default_percentile_factor")]
    pub percentile_factor: f32,
    #[serde(default = "default_lines_per_staff")]
    pub lines_per_staff: usize,
    #[serde(default = "default_spacing_tolerance")]
    pub spacing_tolerance: f32,
    #[serde(default = "default_margin_spacings")]
    pub margin_spacings: f32,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            min_ink_density: default_min_ink_density(),
            min_row_density: default_min_row_density(),
            percentile_factor: default_percentile_factor(),
            lines_per_staff: default_lines_per_staff(),
            spacing_tolerance: default_spacing_tolerance(),
            margin_spacings: default_margin_spacings(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    #[serde(default = "default_strip_timeout_ms")]
    pub strip_timeout_ms: u64,
    pub failure_tolerance: FailureTolerance,
    #[serde(default = "default_engine")]
    pub engine: EngineKind,
    pub engine_path: Option<String>,
    pub keep_diagnostics: bool,
    pub repair_durations: bool,
    pub preprocess: PreprocessSettings,
    pub segmentation: SegmentationSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_limit: default_worker_limit(),
            strip_timeout_ms: default_strip_timeout_ms(),
            failure_tolerance: FailureTolerance::default(),
            engine: default_engine(),
            engine_path: None,
            keep_diagnostics: false,
            repair_durations: false,
            preprocess: PreprocessSettings::default(),
            segmentation: SegmentationSettings::default(),
        }
    }
}

pub trait SettingsPort: Send + Sync {
    fn load_settings(&self) -> Result<PipelineSettings, StorageError>;
    fn save_settings(&self, s: &PipelineSettings) -> Result<(), StorageError>;
}
