use crate::recognizer::{CancelToken, DispatchConfig, EngineLog, RecognitionAdapter};
use serde::Serialize;
use staffsplit_domain_image::{
    preprocess, segment, InvalidImageError, PreprocessedImage, RawImage, SegmentationError,
    Strip,
};
use staffsplit_domain_score::{
    export_musicxml_bytes, merge, quality_score, repair_measure_durations, MergeError,
    PartialScore, StripFailure,
};
use staffsplit_ports::omr::OmrPort;
use staffsplit_ports::settings::PipelineSettings;
use staffsplit_ports::types::{PixelRow, StripIndex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Preprocessing,
    Segmenting,
    Recognizing,
    Merging,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Preprocessing => "preprocessing",
            Stage::Segmenting => "segmenting",
            Stage::Recognizing => "recognizing",
            Stage::Merging => "merging",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineCause {
    #[error(transparent)]
    InvalidImage(#[from] InvalidImageError),
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("conversion cancelled with {pending} strip(s) not dispatched")]
    Cancelled { pending: usize },
}

/// A conversion that ended in `Failed`.
#[derive(thiserror::Error, Debug)]
#[error("conversion failed while {stage}: {cause}")]
pub struct PipelineError {
    /// The stage that was running when the request failed.
    pub stage: Stage,
    /// Every strip-level failure observed before the request failed.
    pub failed_strips: Vec<StripFailure>,
    #[source]
    pub cause: PipelineCause,
}

impl PipelineError {
    fn new(stage: Stage, cause: impl Into<PipelineCause>) -> Self {
        Self {
            stage,
            failed_strips: Vec::new(),
            cause: cause.into(),
        }
    }

    pub fn failed_indices(&self) -> Vec<StripIndex> {
        self.failed_strips.iter().map(|f| f.strip_index).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StripSummary {
    pub index: StripIndex,
    pub top: PixelRow,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversionReport {
    pub engine: String,
    pub strips: Vec<StripSummary>,
    /// Strips that failed and were left out of the merged score.
    pub dropped_strips: Vec<StripFailure>,
    pub measure_count: usize,
    pub repaired_measures: usize,
    pub quality: f32,
    /// Engine logs kept when diagnostics are enabled.
    pub engine_logs: Vec<EngineLog>,
}

impl ConversionReport {
    pub fn dropped_indices(&self) -> Vec<StripIndex> {
        self.dropped_strips.iter().map(|f| f.strip_index).collect()
    }
}

#[derive(Clone, Debug)]
pub struct ConversionOutcome {
    pub musicxml: Vec<u8>,
    pub report: ConversionReport,
}

/// Image in, MusicXML out. One instance may serve many independent requests.
pub struct Pipeline {
    settings: PipelineSettings,
    adapter: RecognitionAdapter,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn OmrPort>, settings: PipelineSettings) -> Self {
        let adapter = RecognitionAdapter::new(engine)
            .with_engine_path(settings.engine_path.clone())
            .with_diagnostics(settings.keep_diagnostics);
        Self { settings, adapter }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn convert(&self, image: &[u8]) -> Result<ConversionOutcome, PipelineError> {
        self.convert_with_progress(image, &CancelToken::new(), |_| {})
    }

    /// Run every stage, reporting each transition to `progress`. The last
    /// stage reported is always `Done` or `Failed`.
    pub fn convert_with_progress(
        &self,
        image: &[u8],
        cancel: &CancelToken,
        mut progress: impl FnMut(Stage),
    ) -> Result<ConversionOutcome, PipelineError> {
        let started = Instant::now();
        progress(Stage::Received);
        match self.run(image, cancel, &mut progress) {
            Ok(outcome) => {
                progress(Stage::Done);
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    measures = outcome.report.measure_count,
                    dropped = outcome.report.dropped_strips.len(),
                    "conversion done"
                );
                Ok(outcome)
            }
            Err(err) => {
                progress(Stage::Failed);
                warn!(
                    stage = %err.stage,
                    failed_strips = ?err.failed_indices(),
                    %err,
                    "conversion failed"
                );
                Err(err)
            }
        }
    }

    /// Decode, preprocess and segment without running recognition.
    pub fn strips(&self, image: &[u8]) -> Result<Vec<Strip>, PipelineError> {
        let page = self.preprocess(image)?;
        segment(&page, &self.settings.segmentation)
            .map_err(|e| PipelineError::new(Stage::Segmenting, e))
    }

    fn preprocess(&self, image: &[u8]) -> Result<PreprocessedImage, PipelineError> {
        RawImage::decode(image)
            .and_then(|raw| preprocess(raw, &self.settings.preprocess))
            .map_err(|e| PipelineError::new(Stage::Preprocessing, e))
    }

    #[instrument(skip_all, fields(engine = self.adapter.engine_name(), bytes = image.len()))]
    fn run(
        &self,
        image: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Stage),
    ) -> Result<ConversionOutcome, PipelineError> {
        progress(Stage::Preprocessing);
        let page = self.preprocess(image)?;

        progress(Stage::Segmenting);
        let strips = segment(&page, &self.settings.segmentation)
            .map_err(|e| PipelineError::new(Stage::Segmenting, e))?;
        let summaries: Vec<StripSummary> = strips
            .iter()
            .map(|s| StripSummary {
                index: s.index,
                top: s.top,
                height: s.height(),
            })
            .collect();

        progress(Stage::Recognizing);
        let config = DispatchConfig {
            worker_limit: self.settings.worker_limit,
            strip_timeout: Duration::from_millis(self.settings.strip_timeout_ms),
        };
        let dispatch = self.adapter.recognize_all(&strips, config, cancel);
        let failures: Vec<StripFailure> = dispatch
            .partials
            .iter()
            .filter_map(|p| match p {
                PartialScore::Failed(failure) => Some(failure.clone()),
                PartialScore::Recognized(_) => None,
            })
            .collect();

        if !dispatch.undispatched.is_empty() {
            return Err(PipelineError {
                stage: Stage::Recognizing,
                failed_strips: failures,
                cause: PipelineCause::Cancelled {
                    pending: dispatch.undispatched.len(),
                },
            });
        }

        progress(Stage::Merging);
        let total = dispatch.partials.len();
        let partials: Vec<PartialScore> =
            if self.settings.failure_tolerance.is_exceeded(failures.len(), total) {
                // Handed to merge as-is so the unrecovered strips are named.
                dispatch.partials
            } else {
                dispatch
                    .partials
                    .into_iter()
                    .map(|p| match p {
                        PartialScore::Failed(failure) => PartialScore::empty(failure.strip_index),
                        recognized => recognized,
                    })
                    .collect()
            };

        let mut merged = match merge(&partials) {
            Ok(merged) => merged,
            Err(cause) => {
                return Err(PipelineError {
                    stage: Stage::Merging,
                    failed_strips: failures,
                    cause: cause.into(),
                })
            }
        };

        let repaired_measures = if self.settings.repair_durations {
            repair_measure_durations(&mut merged)
        } else {
            0
        };

        let report = ConversionReport {
            engine: self.adapter.engine_name().to_string(),
            strips: summaries,
            dropped_strips: failures,
            measure_count: merged.measures.len(),
            repaired_measures,
            quality: quality_score(&merged),
            engine_logs: dispatch.engine_logs,
        };
        Ok(ConversionOutcome {
            musicxml: export_musicxml_bytes(&merged),
            report,
        })
    }
}
