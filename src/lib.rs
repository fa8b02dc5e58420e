// Library exports for the server binary and integration tests

pub mod api;
pub mod config;
pub mod import;
pub mod library;
pub mod metadata;
pub mod transform;
