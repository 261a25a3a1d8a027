//! Trait seams between the pipeline and the outside world.

pub mod checkpoint;
pub mod sink;
pub mod upstream;
