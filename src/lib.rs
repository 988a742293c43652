#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod archive;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod status;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
