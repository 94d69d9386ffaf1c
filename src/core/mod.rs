pub mod backoff;
pub mod clean;
pub mod diff;
pub mod errors;
pub mod models;
pub mod settings;
pub mod store;
