use crate::util::constants::*;
use crate::util::Address;

/* Alignment */

pub fn is_address_aligned(addr: Address) -> bool {
    addr.is_aligned_to(BYTES_IN_ADDRESS)
}

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/* Conversion */

/// The index of the card covering `addr`, for cards of `1 << card_shift` bytes.
pub const fn address_to_card_index(addr: Address, card_shift: u8) -> usize {
    addr.as_usize() >> card_shift
}

/// The index of the region containing `addr`, for regions of `1 << region_shift` bytes.
pub const fn address_to_region_index(addr: Address, region_shift: u8) -> usize {
    addr.as_usize() >> region_shift
}

/// Mask with the low `bits` bits set.
pub const fn low_bits_mask(bits: u8) -> usize {
    if bits as usize >= BITS_IN_WORD {
        usize::MAX
    } else {
        (1usize << bits) - 1
    }
}
