// Engine: mask extraction, anatomical ordering, model cache and inference orchestration.

pub mod cache;
pub mod downloader;
pub mod extract;
pub mod inference;
pub mod ordering;
pub mod registry;
pub mod stats;
