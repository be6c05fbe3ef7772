pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod progress;
pub mod schedule;
pub mod service;
pub mod sheet;
pub mod targets;
pub mod types;
