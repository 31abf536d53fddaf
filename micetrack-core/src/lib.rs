pub mod background;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod record;
pub mod rendering;
pub mod report;
pub mod selection;
pub mod tracking;
pub mod video;

// Core failures; orchestration layers wrap these in `anyhow` and can downcast back
pub use error::{Result, TrackError};
