/// The number of bytes in a byte
pub const BYTES_IN_BYTE: usize = 1;
/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;

/// log2 of the number of bytes in an int. Compressed references are stored in int-sized slots.
pub const LOG_BYTES_IN_INT: u8 = 2;
/// The number of bytes in an int
pub const BYTES_IN_INT: usize = 1 << LOG_BYTES_IN_INT;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;
/// log2 of the number of bits in an address
pub const LOG_BITS_IN_ADDRESS: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_ADDRESS as usize;
/// The number of bits in an address
pub const BITS_IN_ADDRESS: usize = 1 << LOG_BITS_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
/// The number of bits in a word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the default card size (512 bytes).
pub const LOG_BYTES_IN_CARD: u8 = 9;

/// log2 of the default region size (4 MB).
pub const LOG_BYTES_IN_REGION: u8 = 22;
/// The default region size in bytes
pub const BYTES_IN_REGION: usize = 1 << LOG_BYTES_IN_REGION;

/// log2 of the minimal object alignment in bytes.
pub const LOG_MIN_OBJECT_ALIGNMENT: u8 = LOG_BYTES_IN_WORD;

/// The card value that marks a card dirty.
pub const DIRTY_CARD: u8 = 0;
/// The card value of a clean card.
pub const CLEAN_CARD: u8 = 0xff;

const_assert!(LOG_BYTES_IN_CARD < LOG_BYTES_IN_REGION);
const_assert!(DIRTY_CARD != CLEAN_CARD);
