pub mod diagnostics;
pub mod pipeline;
pub mod recognizer;

pub use diagnostics::*;
pub use pipeline::*;
pub use recognizer::*;
