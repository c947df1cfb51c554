use alloy_dyn_abi::DynSolValue;
use libexo_core::{
    error::ExoError,
    types::{Address, Bytes, B256, U256},
};

pub trait PeripheryConvertTo<T> {
    fn cvt2(&self) -> T;
}

pub trait PeripheryConvertFrom<F> {
    fn cvt2(from: F) -> Self;
}

impl<T: PeripheryConvertTo<U>, U> PeripheryConvertFrom<T> for U {
    fn cvt2(from: T) -> Self {
        from.cvt2()
    }
}

impl PeripheryConvertTo<DynSolValue> for Address {
    fn cvt2(&self) -> DynSolValue {
        DynSolValue::Address(*self)
    }
}

impl PeripheryConvertTo<DynSolValue> for U256 {
    fn cvt2(&self) -> DynSolValue {
        DynSolValue::Uint(*self, 256)
    }
}

impl PeripheryConvertTo<DynSolValue> for Bytes {
    fn cvt2(&self) -> DynSolValue {
        DynSolValue::Bytes(self.to_vec())
    }
}

impl PeripheryConvertTo<DynSolValue> for &str {
    fn cvt2(&self) -> DynSolValue {
        DynSolValue::String(self.to_string())
    }
}

impl<T> PeripheryConvertTo<DynSolValue> for Vec<T>
where
    T: PeripheryConvertTo<DynSolValue>,
{
    fn cvt2(&self) -> DynSolValue {
        DynSolValue::Array(self.iter().map(|v| v.cvt2()).collect())
    }
}

/// Typed views of decoded return values.
pub(crate) fn ret_bool(
    values: &[DynSolValue],
    idx: usize,
    func: &str,
) -> Result<bool, ExoError> {
    values
        .get(idx)
        .and_then(|v| v.as_bool())
        .ok_or(unexpected_return(func, idx, "bool"))
}

pub(crate) fn ret_uint(
    values: &[DynSolValue],
    idx: usize,
    func: &str,
) -> Result<U256, ExoError> {
    values
        .get(idx)
        .and_then(|v| v.as_uint())
        .map(|(v, _)| v)
        .ok_or(unexpected_return(func, idx, "uint"))
}

pub(crate) fn ret_address(
    values: &[DynSolValue],
    idx: usize,
    func: &str,
) -> Result<Address, ExoError> {
    values
        .get(idx)
        .and_then(|v| v.as_address())
        .ok_or(unexpected_return(func, idx, "address"))
}

pub(crate) fn ret_b256(
    values: &[DynSolValue],
    idx: usize,
    func: &str,
) -> Result<B256, ExoError> {
    values
        .get(idx)
        .and_then(|v| v.as_fixed_bytes())
        .filter(|(_, size)| *size == 32)
        .map(|(b, _)| B256::from_slice(b))
        .ok_or(unexpected_return(func, idx, "bytes32"))
}

fn unexpected_return(
    func: &str,
    idx: usize,
    expected: &str,
) -> ExoError {
    ExoError::Abi(format!(
        "return value #{} of {} is not a {}",
        idx, func, expected
    ))
}
