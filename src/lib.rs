#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod archive;
pub mod config;
pub mod data;
pub mod feed;
pub mod html;
pub mod logging;
pub mod media;
pub mod normalize;
pub mod page;
pub mod post;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
