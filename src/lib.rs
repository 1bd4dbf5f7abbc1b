#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod cache;
pub mod config;
pub mod content;
pub mod data;
pub mod floors;
pub mod forum;
pub mod jump;
pub mod logging;
pub mod paging;
pub mod scroll;
pub mod session;
pub mod storage;
pub mod thread_view;
pub mod transient;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{login, logout, run, RunOptions};
