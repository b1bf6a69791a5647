// Library exports for the CLI and integration tests

pub mod api;
pub mod config;
pub mod extract;
pub mod geo;
pub mod models;
pub mod prefs;
pub mod token_store;
pub mod upload;

pub use config::Config;
pub use models::{ImageId, ImageMetadata};

// Test support (unit tests, and integration tests via the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
