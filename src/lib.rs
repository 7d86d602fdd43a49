pub mod config;
pub mod ingest;
pub mod model;
pub mod report;
pub mod store;
pub mod upload;
