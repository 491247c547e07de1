pub mod classifier;
pub mod fleet;
pub mod queue;
pub mod storage;
