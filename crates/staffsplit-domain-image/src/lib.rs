pub mod preprocess;
pub mod raster;
pub mod segment;

pub use preprocess::*;
pub use raster::*;
pub use segment::*;
