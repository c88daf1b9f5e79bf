/// Rounds `value` up to the next multiple of `alignment`.
/// `alignment` has to be a power of two, zero leaves the value untouched.
pub fn align_up_64(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

pub fn align_down_64(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    (value / alignment) * alignment
}

#[inline(always)]
pub fn is_aligned_64(value: u64, alignment: u64) -> bool {
    alignment == 0 || value % alignment == 0
}

/// Number of `granularity` sized units needed to cover `value` bytes.
#[inline(always)]
pub fn div_round_up_64(value: u64, granularity: u64) -> u64 {
    debug_assert_ne!(granularity, 0);
    (value + granularity - 1) / granularity
}
