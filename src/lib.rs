//! Stock forecast proxy: serves cached price forecasts over HTTP and refreshes
//! them on a daily schedule.

pub mod api;
pub mod cache;
pub mod config;
pub mod data_structures;
pub mod engine;
pub mod error;
pub mod features;
pub mod lock;
pub mod news;
pub mod scheduler;
pub mod store;
pub mod workflow;
pub mod yahoo;
