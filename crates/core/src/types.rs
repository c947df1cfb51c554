/// This module defines a set of types that are used throughout the library.
/// Most of types are re-exported from alloy-primitives.

// Low level types
pub type Uint<const BITS: usize, const LIMBS: usize> =
    alloy_primitives::ruint::Uint<BITS, LIMBS>;
pub type Signed<const BITS: usize, const LIMBS: usize> =
    alloy_primitives::Signed<BITS, LIMBS>;
pub type U64 = alloy_primitives::ruint::Uint<64, 1>;
pub type U128 = alloy_primitives::ruint::Uint<128, 2>;
pub type U256 = alloy_primitives::U256;
pub type I256 = alloy_primitives::I256;
pub type B256 = alloy_primitives::B256;

// High level types
pub type Address = alloy_primitives::Address;
pub type Hash = alloy_primitives::B256;
pub type Bytes = alloy_primitives::Bytes;
pub type TxHash = alloy_primitives::TxHash;
pub type ChainId = alloy_primitives::ChainId;
pub type BlockNumber = alloy_primitives::BlockNumber;

pub use alloy_primitives::keccak256;

// Units, in wei
pub const GWEI: u128 = 1_000_000_000;
pub const ETHER: u128 = 1_000_000_000_000_000_000;

/// Balance difference `after - before`, which may be negative.
pub fn balance_delta(before: U256, after: U256) -> I256 {
    I256::from_raw(after).wrapping_sub(I256::from_raw(before))
}
