pub mod blockchain;
pub mod conversion;
pub mod error;
pub mod types;
