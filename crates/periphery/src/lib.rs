pub mod abi;
pub mod conversion;
pub mod gateway;
pub mod helper;
pub mod proxy;
pub mod vault;
