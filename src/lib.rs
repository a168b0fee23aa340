pub mod api;
pub mod cli;
pub mod config;
pub mod docker;
pub mod registry;
pub mod utils;
