use crate::types::StripIndex;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct OmrOptions {
    pub strip_index: StripIndex,
    pub enable_diagnostics: bool,
    pub engine_path: Option<String>,
    /// Upper bound for a single engine invocation. Engines that own a child
    /// process kill it once this elapses.
    pub deadline: Option<Duration>,
}

/// MusicXML as produced by an engine: plain text or a compressed `.mxl` archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MusicXmlPayload {
    Plain(String),
    Compressed(Vec<u8>),
}

#[derive(Clone, Debug)]
pub struct OmrOutput {
    pub musicxml: MusicXmlPayload,
    pub diagnostics_path: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum OmrError {
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),
    #[error("engine timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend error: {0}")]
    Backend(String),
}

/// A music recognition engine. One call recognizes one staff strip, encoded as
/// PNG, and returns the engine's MusicXML for it.
pub trait OmrPort: Send + Sync {
    fn recognize_png(&self, png: &[u8], options: &OmrOptions) -> Result<OmrOutput, OmrError>;

    fn name(&self) -> &str;
}
