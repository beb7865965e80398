// HTTP boundary: axum routes over the inference engine and model cache.

pub mod handler;

pub use handler::{router, AppState, LandmarkServer};
