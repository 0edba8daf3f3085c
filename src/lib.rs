pub mod analyzer;
pub mod assign;
pub mod config;
pub mod db;
pub mod engine;
pub mod model;
pub mod normalize;
pub mod scanner;

/// Audio file extensions we can decode natively
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "flac"];

/// Application name for XDG paths
pub const APP_NAME: &str = "genrescope";
