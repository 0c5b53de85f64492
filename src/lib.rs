#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod provider;

pub use error::{Error, Result};
