//! Object header layout and the forwarding state encoded in it.
//!
//! A relocated object keeps its from-space copy alive until every reference to it has been
//! updated. The collector marks the from-space copy as forwarded by installing the to-space
//! address in the header word, with the lock bits set to a reserved pattern. Barriers decode the
//! header to find the to-space copy.
//!
//! The bit layout is a property of the managed runtime, not of the barriers. It is described by
//! [`ObjectHeaderLayout`] and passed in; nothing here assumes a particular encoding.

use std::fmt;

use crate::util::constants::*;
use crate::util::conversions::low_bits_mask;
use crate::util::{Address, ByteOffset, ObjectReference};

/// Where the forwarding indicator lives in an object header, and how it is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeaderLayout {
    /// Offset of the header word from the object reference.
    pub header_offset: ByteOffset,
    /// The lock bits in the header word. The remaining bits hold the forwardee when the object is
    /// forwarded.
    pub lock_mask: usize,
    /// The value of the lock bits that means "forwarded". Must be a non-zero subset of
    /// `lock_mask`.
    pub forwarded_pattern: usize,
    /// log2 of the minimal object alignment. Forwardees are aligned, so the lock bits must fit
    /// below this alignment.
    pub log_min_alignment: u8,
}

impl Default for ObjectHeaderLayout {
    /// A mark word with a two-bit lock field at offset zero, where `0b11` means forwarded.
    fn default() -> Self {
        ObjectHeaderLayout {
            header_offset: 0,
            lock_mask: 0b11,
            forwarded_pattern: 0b11,
            log_min_alignment: LOG_MIN_OBJECT_ALIGNMENT,
        }
    }
}

/// A header layout that cannot encode forwarding unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayoutError {
    /// The lock mask is empty.
    EmptyLockMask,
    /// The forwarded pattern is zero or has bits outside the lock mask.
    PatternOutsideMask { pattern: usize, mask: usize },
    /// The lock bits overlap the bits of an aligned forwardee.
    MaskOverlapsPointer { mask: usize, log_min_alignment: u8 },
    /// The header offset is not word aligned.
    UnalignedHeader(ByteOffset),
}

impl fmt::Display for HeaderLayoutError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeaderLayoutError::EmptyLockMask => write!(f, "the header lock mask is empty"),
            HeaderLayoutError::PatternOutsideMask { pattern, mask } => write!(
                f,
                "forwarded pattern {:#x} must be a non-zero subset of lock mask {:#x}",
                pattern, mask
            ),
            HeaderLayoutError::MaskOverlapsPointer {
                mask,
                log_min_alignment,
            } => write!(
                f,
                "lock mask {:#x} overlaps forwardee bits (objects are {}-byte aligned)",
                mask,
                1usize << log_min_alignment
            ),
            HeaderLayoutError::UnalignedHeader(offset) => {
                write!(f, "header offset {} is not word aligned", offset)
            }
        }
    }
}

impl std::error::Error for HeaderLayoutError {}

impl ObjectHeaderLayout {
    pub fn validate(&self) -> Result<(), HeaderLayoutError> {
        if self.lock_mask == 0 {
            return Err(HeaderLayoutError::EmptyLockMask);
        }
        if self.forwarded_pattern == 0 || self.forwarded_pattern & !self.lock_mask != 0 {
            return Err(HeaderLayoutError::PatternOutsideMask {
                pattern: self.forwarded_pattern,
                mask: self.lock_mask,
            });
        }
        if self.lock_mask & !low_bits_mask(self.log_min_alignment) != 0 {
            return Err(HeaderLayoutError::MaskOverlapsPointer {
                mask: self.lock_mask,
                log_min_alignment: self.log_min_alignment,
            });
        }
        if self.header_offset.unsigned_abs() % BYTES_IN_WORD != 0 {
            return Err(HeaderLayoutError::UnalignedHeader(self.header_offset));
        }
        Ok(())
    }

    /// Forwarded iff all lock bits are set. In that case the header can be decoded by inverting
    /// it and testing the lock bits for zero, which saves loading the pattern into a register.
    pub fn uses_inverted_test(&self) -> bool {
        self.forwarded_pattern == self.lock_mask
    }

    /// The address of the header word of `object`.
    pub fn header_address(&self, object: ObjectReference) -> Address {
        object.to_raw_address().offset(self.header_offset)
    }

    /// The header word for an object forwarded to `forwardee`.
    pub fn forwarding_header(&self, forwardee: ObjectReference) -> usize {
        debug_assert!(
            forwardee.value() & self.lock_mask == 0,
            "forwardee {} is not aligned enough for lock mask {:#x}",
            forwardee,
            self.lock_mask
        );
        forwardee.value() | self.forwarded_pattern
    }

    /// A header word that is guaranteed not to decode as forwarded. `payload` supplies the
    /// non-lock bits (hash, age, ...), its lock bits are ignored.
    pub fn plain_header(&self, payload: usize) -> usize {
        let lock_bits = !self.forwarded_pattern & self.lock_mask;
        (payload & !self.lock_mask) | lock_bits
    }
}

/// The forwarding state of an object, decoded from its header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingRecord {
    NotForwarded,
    ForwardedTo(ObjectReference),
}

impl ForwardingRecord {
    /// Decode a header word. This is what the emitted decode sequence computes, so the reference
    /// executor and the tests use it as the ground truth.
    pub fn decode(header: usize, layout: &ObjectHeaderLayout) -> ForwardingRecord {
        if header & layout.lock_mask == layout.forwarded_pattern {
            let forwardee = header & !layout.lock_mask;
            ForwardingRecord::ForwardedTo(ObjectReference::from_raw_address(Address::from_usize(
                forwardee,
            )))
        } else {
            ForwardingRecord::NotForwarded
        }
    }

    /// The canonical reference for an object whose header decoded to `self`.
    pub fn resolve(self, object: ObjectReference) -> ObjectReference {
        match self {
            ForwardingRecord::NotForwarded => object,
            ForwardingRecord::ForwardedTo(to) => to,
        }
    }

    pub fn is_forwarded(self) -> bool {
        matches!(self, ForwardingRecord::ForwardedTo(_))
    }
}
