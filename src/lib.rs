pub mod api;
pub mod board;
pub mod config;
pub mod error;

pub use error::{BoardError, Result};
