pub mod app;
pub mod board;
pub mod file_source;

pub use crate::app::{run, AppConfig, Monitor};
