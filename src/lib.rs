pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod render;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod viewport;
pub mod watcher;
