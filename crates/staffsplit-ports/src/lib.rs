pub mod omr;
pub mod settings;
pub mod types;

pub use omr::*;
pub use settings::*;
pub use types::*;
