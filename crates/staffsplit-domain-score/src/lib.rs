pub mod merge;
pub mod model;
pub mod musicxml_export;
pub mod musicxml_import;
pub mod quality;
pub mod repair;

pub use merge::*;
pub use model::*;
pub use musicxml_export::*;
pub use musicxml_import::*;
pub use quality::*;
pub use repair::*;
