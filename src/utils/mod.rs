pub mod checkpoint;
pub mod file_ops;
pub mod parallel;
pub mod reporting;
