pub mod config;
pub mod render;
pub mod tasks;
pub mod types;
