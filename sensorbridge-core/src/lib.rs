pub mod batch_parser;
pub mod calibration;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod partition;
pub mod reading;
pub mod summary;
pub mod tool;
