pub mod display;
pub mod error;
pub mod models;
pub mod service_kind;
pub mod settings;
