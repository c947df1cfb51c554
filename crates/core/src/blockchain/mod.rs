pub mod client;
pub mod transaction;
