pub mod bot;
pub mod config;
pub mod error;
pub mod execution;
pub mod feeds;
pub mod models;
pub mod strategies;
pub mod telemetry;
