//! A single-account, one-transaction-per-block chain held in memory.
//!
//! Contracts are not EVM bytecode but behavioral models of the gateway, the
//! vault and the helper. Transactions are real signed EIP-1559 envelopes, so
//! nonce, fee and signature handling are exercised exactly as against a node.

pub mod chain;
pub mod exec;
pub mod gateway;
pub mod helper;
pub mod vault;
pub mod world;

pub use chain::MemoryChain;
pub use world::GuardMode;
