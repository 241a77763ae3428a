pub mod config;
pub mod contexts;

pub use config::*;
pub use contexts::*;
