use serde::{Deserialize, Serialize};
use std::fmt;

pub type StripIndex = usize; // position of a strip in top-to-bottom page order
pub type PixelRow = u32; // row offset in the source page

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Audiveris,
    Oemer,
}

/// A fraction clamped to `0.0..=1.0`, also when deserialized.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "f32")]
pub struct Fraction01(pub f32);

impl From<f32> for Fraction01 {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl Fraction01 {
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl EngineKind {
    pub fn default_binary(self) -> &'static str {
        match self {
            EngineKind::Audiveris => "audiveris",
            EngineKind::Oemer => "oemer",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Audiveris => write!(f, "audiveris"),
            EngineKind::Oemer => write!(f, "oemer"),
        }
    }
}
