use crate::types::{Signed, Uint};

pub trait ConvertTo<T> {
    fn cvt(&self) -> T;
}

pub trait ConvertFrom<F> {
    fn cvt(from: F) -> Self;
}

impl<T: ConvertTo<U>, U> ConvertFrom<T> for U {
    fn cvt(from: T) -> Self {
        from.cvt()
    }
}

//*** Convert To String */
impl<const BITS: usize, const LIMBS: usize> ConvertTo<String>
    for Uint<BITS, LIMBS>
{
    fn cvt(&self) -> String {
        self.to_string() // decimal string
    }
}
impl<const BITS: usize, const LIMBS: usize> ConvertTo<String>
    for Signed<BITS, LIMBS>
{
    fn cvt(&self) -> String {
        self.to_dec_string() // decimal string, with sign
    }
}
