pub mod core;
pub mod dataset;
pub mod filters;
pub mod report;
pub mod sessions;
