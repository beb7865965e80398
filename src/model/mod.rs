// External segmentation model: capability trait and the command line adapter.

pub mod cli;
pub mod traits;

pub use cli::TotalSegmentatorCli;
pub use traits::{Device, SegmentRequest, Segmenter};
