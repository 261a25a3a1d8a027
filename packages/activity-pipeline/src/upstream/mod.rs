//! Upstream implementations.

pub mod geo;
pub mod tripadvisor;

pub use tripadvisor::TripAdvisorUpstream;
