//! Utility modules

pub mod video_export;

pub use video_export::{extract_video, save_video_from_json};
