pub mod instance;
pub mod job;
