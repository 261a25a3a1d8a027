//! Data types for the activity pipeline.

pub mod checkpoint;
pub mod config;
pub mod page;
pub mod record;
pub mod summary;
pub mod target;
