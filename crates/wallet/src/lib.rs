pub mod account;
pub mod builder;
pub mod fee;
