pub mod checkpoint;
pub mod config;
pub mod error;
pub mod git;
pub mod io;
pub mod navigator;
pub mod paths;
pub mod prerequisite;
pub mod progress;
pub mod project;
pub mod resume;
pub mod schema;
pub mod store;
pub mod types;
pub mod vcs;

#[cfg(test)]
mod testing;

pub use error::{DevflowError, ErrorKind, Result};
