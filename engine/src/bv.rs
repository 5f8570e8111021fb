//! Fixed-width bit-vector values.
//!
//! Every operation wraps modulo `2^width`. Signed operations interpret the
//! value in two's complement.

use std::{cmp::Ordering, fmt};

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};

use crate::{
    error::{Error, Result},
    utils::{low_u64, try_u64},
};

pub const MIN_WIDTH: u32 = 1;
pub const MAX_WIDTH: u32 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitVector {
    value: BigUint,
    width: u32,
}

pub(crate) fn check_width(width: u32) -> Result<()> {
    if (MIN_WIDTH..=MAX_WIDTH).contains(&width) {
        Ok(())
    } else {
        Err(Error::range(format!(
            "width {width} is out of the supported range [{MIN_WIDTH}, {MAX_WIDTH}]"
        )))
    }
}

fn modulus(width: u32) -> BigUint {
    BigUint::one() << width
}

fn mask(width: u32) -> BigUint {
    modulus(width) - BigUint::one()
}

impl BitVector {
    /// Creates a bit-vector, failing if `value` does not fit in `width` bits.
    pub fn new(value: impl Into<BigUint>, width: u32) -> Result<Self> {
        check_width(width)?;
        let value = value.into();
        if value.bits() > u64::from(width) {
            return Err(Error::range(format!(
                "value {value} does not fit in {width} bits"
            )));
        }
        Ok(Self { value, width })
    }

    /// Creates a bit-vector from the lowest `width` bits of `value`.
    pub fn truncating(value: impl Into<BigUint>, width: u32) -> Result<Self> {
        check_width(width)?;
        Ok(Self::masked(value.into(), width))
    }

    /// Assumes `width` is already validated.
    pub(crate) fn masked(value: BigUint, width: u32) -> Self {
        let value = if value.bits() > u64::from(width) {
            value & mask(width)
        } else {
            value
        };
        Self { value, width }
    }

    pub(crate) fn from_u64(value: u64, width: u32) -> Self {
        Self::masked(BigUint::from(value), width)
    }

    pub(crate) fn from_bool(value: bool) -> Self {
        Self::from_u64(value as u64, 1)
    }

    fn from_signed(value: BigInt, width: u32) -> Self {
        let modulus = BigInt::from(modulus(width));
        let mut value = value % &modulus;
        if value.sign() == Sign::Minus {
            value += modulus;
        }
        Self::masked(value.magnitude().clone(), width)
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// The value as `u64` if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        try_u64(&self.value)
    }

    /// The lowest 64 bits of the value.
    pub fn low_u64(&self) -> u64 {
        low_u64(&self.value)
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn bit(&self, index: u32) -> bool {
        index < self.width && self.value.bit(u64::from(index))
    }

    pub fn msb(&self) -> bool {
        self.bit(self.width - 1)
    }

    /// The value interpreted in two's complement.
    pub fn to_signed(&self) -> BigInt {
        if self.msb() {
            BigInt::from(self.value.clone()) - BigInt::from(modulus(self.width))
        } else {
            BigInt::from(self.value.clone())
        }
    }

    fn check_same_width(&self, other: &Self, op: &str) -> Result<()> {
        if self.width == other.width {
            Ok(())
        } else {
            Err(Error::range(format!(
                "{op} expects operands of the same width, got {} and {}",
                self.width, other.width
            )))
        }
    }

    fn check_divisor(divisor: &Self, op: &str) -> Result<()> {
        if divisor.is_zero() {
            Err(Error::arithmetic(format!("{op} by zero")))
        } else {
            Ok(())
        }
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvadd")?;
        Ok(Self::masked(&self.value + &other.value, self.width))
    }

    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvsub")?;
        Ok(Self::masked(
            &self.value + modulus(self.width) - &other.value,
            self.width,
        ))
    }

    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvmul")?;
        Ok(Self::masked(&self.value * &other.value, self.width))
    }

    pub fn udiv(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvudiv")?;
        Self::check_divisor(other, "bvudiv")?;
        Ok(Self::masked(&self.value / &other.value, self.width))
    }

    pub fn urem(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvurem")?;
        Self::check_divisor(other, "bvurem")?;
        Ok(Self::masked(&self.value % &other.value, self.width))
    }

    /// Signed division truncating toward zero.
    pub fn sdiv(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvsdiv")?;
        Self::check_divisor(other, "bvsdiv")?;
        Ok(Self::from_signed(
            self.to_signed() / other.to_signed(),
            self.width,
        ))
    }

    /// Signed remainder, the sign follows the dividend.
    pub fn srem(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvsrem")?;
        Self::check_divisor(other, "bvsrem")?;
        Ok(Self::from_signed(
            self.to_signed() % other.to_signed(),
            self.width,
        ))
    }

    /// Signed modulo, the sign follows the divisor.
    pub fn smod(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvsmod")?;
        Self::check_divisor(other, "bvsmod")?;
        let divisor = other.to_signed();
        let mut remainder = self.to_signed() % &divisor;
        if !remainder.is_zero() && remainder.sign() != divisor.sign() {
            remainder += divisor;
        }
        Ok(Self::from_signed(remainder, self.width))
    }

    pub fn neg(&self) -> Self {
        Self::masked(modulus(self.width) - &self.value, self.width)
    }

    pub fn not(&self) -> Self {
        Self::masked(&self.value ^ mask(self.width), self.width)
    }

    pub fn and(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvand")?;
        Ok(Self::masked(&self.value & &other.value, self.width))
    }

    pub fn or(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvor")?;
        Ok(Self::masked(&self.value | &other.value, self.width))
    }

    pub fn xor(&self, other: &Self) -> Result<Self> {
        self.check_same_width(other, "bvxor")?;
        Ok(Self::masked(&self.value ^ &other.value, self.width))
    }

    pub fn nand(&self, other: &Self) -> Result<Self> {
        self.and(other).map(|v| v.not())
    }

    pub fn nor(&self, other: &Self) -> Result<Self> {
        self.or(other).map(|v| v.not())
    }

    pub fn xnor(&self, other: &Self) -> Result<Self> {
        self.xor(other).map(|v| v.not())
    }

    /// The shift amount, or `None` if it shifts every bit out.
    fn shift_amount(&self, amount: &Self) -> Option<u32> {
        try_u64(&amount.value)
            .filter(|a| *a < u64::from(self.width))
            .map(|a| a as u32)
    }

    pub fn shl(&self, amount: &Self) -> Result<Self> {
        self.check_same_width(amount, "bvshl")?;
        Ok(match self.shift_amount(amount) {
            Some(a) => Self::masked(&self.value << a, self.width),
            None => Self::from_u64(0, self.width),
        })
    }

    pub fn lshr(&self, amount: &Self) -> Result<Self> {
        self.check_same_width(amount, "bvlshr")?;
        Ok(match self.shift_amount(amount) {
            Some(a) => Self::masked(&self.value >> a, self.width),
            None => Self::from_u64(0, self.width),
        })
    }

    pub fn ashr(&self, amount: &Self) -> Result<Self> {
        self.check_same_width(amount, "bvashr")?;
        let fill = if self.msb() {
            mask(self.width)
        } else {
            BigUint::zero()
        };
        Ok(match self.shift_amount(amount) {
            Some(0) => self.clone(),
            Some(a) => {
                let shifted = &self.value >> a;
                let fill = fill & (mask(a) << (self.width - a));
                Self::masked(shifted | fill, self.width)
            }
            None => Self::masked(fill, self.width),
        })
    }

    pub fn rol(&self, amount: u32) -> Self {
        let amount = amount % self.width;
        if amount == 0 {
            return self.clone();
        }
        let high = &self.value << amount;
        let low = &self.value >> (self.width - amount);
        Self::masked(high | low, self.width)
    }

    pub fn ror(&self, amount: u32) -> Self {
        let amount = amount % self.width;
        self.rol(self.width - amount)
    }

    pub fn ult(&self, other: &Self) -> Result<bool> {
        self.check_same_width(other, "bvult")?;
        Ok(self.value < other.value)
    }

    pub fn ule(&self, other: &Self) -> Result<bool> {
        self.check_same_width(other, "bvule")?;
        Ok(self.value <= other.value)
    }

    pub fn ugt(&self, other: &Self) -> Result<bool> {
        other.ult(self)
    }

    pub fn uge(&self, other: &Self) -> Result<bool> {
        other.ule(self)
    }

    fn signed_cmp(&self, other: &Self, op: &str) -> Result<Ordering> {
        self.check_same_width(other, op)?;
        Ok(self.to_signed().cmp(&other.to_signed()))
    }

    pub fn slt(&self, other: &Self) -> Result<bool> {
        self.signed_cmp(other, "bvslt").map(Ordering::is_lt)
    }

    pub fn sle(&self, other: &Self) -> Result<bool> {
        self.signed_cmp(other, "bvsle").map(Ordering::is_le)
    }

    pub fn sgt(&self, other: &Self) -> Result<bool> {
        self.signed_cmp(other, "bvsgt").map(Ordering::is_gt)
    }

    pub fn sge(&self, other: &Self) -> Result<bool> {
        self.signed_cmp(other, "bvsge").map(Ordering::is_ge)
    }

    pub fn zero_extend(&self, extra: u32) -> Result<Self> {
        check_width(self.width + extra)?;
        Ok(Self::masked(self.value.clone(), self.width + extra))
    }

    pub fn sign_extend(&self, extra: u32) -> Result<Self> {
        let width = self.width + extra;
        check_width(width)?;
        let value = if self.msb() {
            &self.value | (mask(extra) << self.width)
        } else {
            self.value.clone()
        };
        Ok(Self::masked(value, width))
    }

    /// Bits `high..=low` of the value.
    pub fn extract(&self, high: u32, low: u32) -> Result<Self> {
        if high < low || high >= self.width {
            return Err(Error::range(format!(
                "invalid extract [{high}:{low}] on a {}-bit vector",
                self.width
            )));
        }
        Ok(Self::masked(&self.value >> low, high - low + 1))
    }

    /// `self` becomes the most significant part.
    pub fn concat(&self, low: &Self) -> Result<Self> {
        let width = self.width + low.width;
        check_width(width)?;
        Ok(Self::masked(
            (&self.value << low.width) | &low.value,
            width,
        ))
    }
}

impl fmt::Display for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(_ bv{} {})", self.value, self.width)
    }
}
