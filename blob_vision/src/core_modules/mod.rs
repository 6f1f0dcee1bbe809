pub mod blob_detector;
pub mod blob_forest;
pub mod blob_stats;
pub mod color_run;
pub mod overlay;
pub mod utils;
pub mod yuv_frame;
