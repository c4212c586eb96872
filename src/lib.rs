// Core modules
pub mod accounting;
pub mod db;
pub mod engine;
pub mod execution;
pub mod instrumentation;
pub mod models;
pub mod persistence;
pub mod planner;
pub mod risk;
pub mod settings;

// Re-export commonly used types
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
