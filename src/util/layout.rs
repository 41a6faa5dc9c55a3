//! Barrier configuration supplied by the host runtime: where the collector keeps the data that
//! barriers touch, and how references are represented.

use std::fmt;

use crate::util::constants::*;
use crate::util::object_forwarding::{HeaderLayoutError, ObjectHeaderLayout};
use crate::util::{Address, ByteOffset};

/// Where the card table base comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardTableBase {
    /// The card table is at a fixed address, known at synthesis time. This is the biased base,
    /// i.e. the card for `addr` is at `base + (addr >> card_shift)`.
    Fixed(Address),
    /// The (biased) base is loaded from a thread-local slot at this offset from the thread
    /// pointer. Collectors that swap card tables between cycles use this.
    ThreadLocal(ByteOffset),
}

/// Compressed reference encoding: `narrow = (addr - heap_base) >> shift`, and null is zero.
/// The heap base is a context value, see [`ContextValue::HeapBase`](crate::codegen::ContextValue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedReferences {
    pub shift: u8,
}

impl Default for CompressedReferences {
    fn default() -> Self {
        CompressedReferences {
            shift: LOG_MIN_OBJECT_ALIGNMENT,
        }
    }
}

impl CompressedReferences {
    /// Encode an uncompressed reference value.
    pub fn encode(&self, heap_base: Address, value: usize) -> usize {
        if value == 0 {
            0
        } else {
            debug_assert!(
                value >= heap_base.as_usize(),
                "{:#x} is below the heap base {}",
                value,
                heap_base
            );
            (value - heap_base.as_usize()) >> self.shift
        }
    }

    /// Decode a narrow reference value.
    pub fn decode(&self, heap_base: Address, narrow: usize) -> usize {
        if narrow == 0 {
            0
        } else {
            heap_base.as_usize() + (narrow << self.shift)
        }
    }
}

/// Everything a barrier needs to know about the heap and the thread-local data of the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierConfig {
    /// Object header layout and forwarding encoding.
    pub header: ObjectHeaderLayout,
    /// Offset of the heap-state byte from the thread pointer.
    pub heap_state_offset: ByteOffset,
    /// Offset of the SATB queue index (a byte offset into the buffer) from the thread pointer.
    pub satb_index_offset: ByteOffset,
    /// Offset of the SATB queue buffer pointer from the thread pointer.
    pub satb_buffer_offset: ByteOffset,
    /// log2 of the region size. The collection-set map is indexed by `address >> region_shift`.
    pub region_shift: u8,
    /// (Biased) base of the collection-set byte map. A non-zero byte means the region is being
    /// evacuated.
    pub cset_map_base: Address,
    /// log2 of the card size. The card table is indexed by `address >> card_shift`.
    pub card_shift: u8,
    /// Card table base.
    pub card_table_base: CardTableBase,
    /// The value written to dirty a card.
    pub dirty_card: u8,
    /// Compressed reference encoding, used by accesses with compressed references.
    pub compressed: CompressedReferences,
}

impl Default for BarrierConfig {
    /// A layout suitable for the reference executor. Real hosts fill in their own offsets.
    fn default() -> Self {
        BarrierConfig {
            header: ObjectHeaderLayout::default(),
            heap_state_offset: 0x20,
            satb_index_offset: 0x28,
            satb_buffer_offset: 0x30,
            region_shift: LOG_BYTES_IN_REGION,
            cset_map_base: Address::from_usize(0x0700_0000),
            card_shift: LOG_BYTES_IN_CARD,
            card_table_base: CardTableBase::Fixed(Address::from_usize(0x0800_0000)),
            dirty_card: DIRTY_CARD,
            compressed: CompressedReferences::default(),
        }
    }
}

/// A configuration the barriers cannot work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Header(HeaderLayoutError),
    /// Two thread-local fields overlap.
    OverlappingThreadLocals { first: ByteOffset, second: ByteOffset },
    /// A shift is too large for the address width.
    ShiftTooLarge { name: &'static str, shift: u8 },
    /// Cards must not be larger than regions.
    CardLargerThanRegion { card_shift: u8, region_shift: u8 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Header(e) => write!(f, "invalid object header layout: {}", e),
            ConfigError::OverlappingThreadLocals { first, second } => write!(
                f,
                "thread-local fields at offsets {} and {} overlap",
                first, second
            ),
            ConfigError::ShiftTooLarge { name, shift } => {
                write!(f, "{} of {} exceeds the address width", name, shift)
            }
            ConfigError::CardLargerThanRegion {
                card_shift,
                region_shift,
            } => write!(
                f,
                "card shift {} is larger than region shift {}",
                card_shift, region_shift
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<HeaderLayoutError> for ConfigError {
    fn from(e: HeaderLayoutError) -> Self {
        ConfigError::Header(e)
    }
}

impl BarrierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.header.validate()?;

        for (name, shift) in [
            ("region shift", self.region_shift),
            ("card shift", self.card_shift),
            ("compressed reference shift", self.compressed.shift),
        ] {
            if shift as usize >= BITS_IN_ADDRESS {
                return Err(ConfigError::ShiftTooLarge { name, shift });
            }
        }
        if self.card_shift > self.region_shift {
            return Err(ConfigError::CardLargerThanRegion {
                card_shift: self.card_shift,
                region_shift: self.region_shift,
            });
        }

        // (offset, size) of every thread-local field a barrier reads or writes.
        let mut fields = vec![
            (self.heap_state_offset, BYTES_IN_BYTE),
            (self.satb_index_offset, BYTES_IN_WORD),
            (self.satb_buffer_offset, BYTES_IN_WORD),
        ];
        if let CardTableBase::ThreadLocal(offset) = self.card_table_base {
            fields.push((offset, BYTES_IN_WORD));
        }
        use itertools::Itertools;
        for ((a, a_size), (b, b_size)) in fields.iter().copied().tuple_combinations() {
            let overlaps = a < b + b_size as isize && b < a + a_size as isize;
            if overlaps {
                return Err(ConfigError::OverlappingThreadLocals {
                    first: a,
                    second: b,
                });
            }
        }
        Ok(())
    }
}
