//! Conversions between ethers' wire types and the alloy types used by libexo.

use ethers::types as eth;
use libexo_core::{
    blockchain::transaction::Receipt,
    types::{Address, Bytes, TxHash, U256},
};

pub trait JsonRpcConvertTo<T> {
    fn cvt2(&self) -> T;
}

impl JsonRpcConvertTo<eth::H160> for Address {
    fn cvt2(&self) -> eth::H160 {
        eth::H160::from_slice(self.as_slice())
    }
}
impl JsonRpcConvertTo<Address> for eth::H160 {
    fn cvt2(&self) -> Address {
        Address::from_slice(self.as_bytes())
    }
}

impl JsonRpcConvertTo<eth::H256> for TxHash {
    fn cvt2(&self) -> eth::H256 {
        eth::H256::from_slice(self.as_slice())
    }
}
impl JsonRpcConvertTo<TxHash> for eth::H256 {
    fn cvt2(&self) -> TxHash {
        TxHash::from_slice(self.as_bytes())
    }
}

impl JsonRpcConvertTo<eth::U256> for U256 {
    fn cvt2(&self) -> eth::U256 {
        eth::U256::from_big_endian(&self.to_be_bytes::<32>())
    }
}
impl JsonRpcConvertTo<U256> for eth::U256 {
    fn cvt2(&self) -> U256 {
        let mut buf = [0u8; 32];
        self.to_big_endian(&mut buf);
        U256::from_be_bytes(buf)
    }
}

impl JsonRpcConvertTo<eth::Bytes> for Bytes {
    fn cvt2(&self) -> eth::Bytes {
        eth::Bytes::from(self.to_vec())
    }
}
impl JsonRpcConvertTo<Bytes> for eth::Bytes {
    fn cvt2(&self) -> Bytes {
        Bytes::from(self.to_vec())
    }
}

impl JsonRpcConvertTo<Receipt> for eth::TransactionReceipt {
    fn cvt2(&self) -> Receipt {
        Receipt {
            tx_hash: self.transaction_hash.cvt2(),
            success: self.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            contract_address: self.contract_address.map(|a| a.cvt2()),
            block_number: self.block_number.map(|n| n.as_u64()),
            gas_used: self.gas_used.map(|g| g.low_u64()).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use ethers::types as eth;
    use libexo_core::types::{Address, U256};

    use super::JsonRpcConvertTo;

    #[test]
    fn test_u256_conversion() {
        let v = U256::from(0x1234_5678_9abc_def0u64) << 100usize;
        let e: eth::U256 = v.cvt2();
        let back: U256 = e.cvt2();
        assert_eq!(v, back);
    }

    #[test]
    fn test_address_conversion() {
        let a = Address::repeat_byte(0xab);
        let e: eth::H160 = a.cvt2();
        assert_eq!(e, eth::H160::repeat_byte(0xab));
    }

    #[test]
    fn test_receipt_status() {
        let receipt = eth::TransactionReceipt {
            status: Some(eth::U64::from(0)),
            gas_used: Some(eth::U256::from(21_000)),
            ..Default::default()
        };
        let r: libexo_core::blockchain::transaction::Receipt = receipt.cvt2();
        assert!(!r.success);
        assert_eq!(r.gas_used, 21_000);
    }
}
