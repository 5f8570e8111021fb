pub(crate) mod logging;

use num_bigint::BigUint;
use num_traits::ToPrimitive;

/// Lower 64 bits of `value`.
pub(crate) fn low_u64(value: &BigUint) -> u64 {
    value.iter_u64_digits().next().unwrap_or(0)
}

/// `value` as `u64` if it fits.
pub(crate) fn try_u64(value: &BigUint) -> Option<u64> {
    value.to_u64()
}
