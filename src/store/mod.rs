pub mod hash;
pub mod storage;

pub use hash::compute_hash;
pub use storage::{LocalFileStorage, spawn_sweeper};
