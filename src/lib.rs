pub mod clients;
pub mod config;
pub mod dataset;
pub mod geo;
pub mod server;
