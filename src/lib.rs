#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod extract;
pub mod patreon;
pub mod storage;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
