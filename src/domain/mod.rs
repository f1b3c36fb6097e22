pub mod config_store;
pub mod models;
pub mod observers;
pub mod pacing;
pub mod settings;
