pub mod config;
pub mod conversion;
pub mod provider;
