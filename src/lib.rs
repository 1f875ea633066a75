pub mod config;
pub mod features;
pub mod models;
pub mod mood;
pub mod render;
pub mod visuals;

/// Application name for XDG paths
pub const APP_NAME: &str = "moodviz";
