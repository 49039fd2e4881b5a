pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use config::AppConfig;
pub use error::{TavernError, TavernResult};
