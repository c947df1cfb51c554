pub mod config;
pub mod log;
pub mod solidity;
pub mod sync;
