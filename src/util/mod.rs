//! Utilities shared by the code generator, the barriers and the reference executor.

/// Address and object reference types.
pub mod address;
/// Constants for sizes, shifts and card values.
pub mod constants;
/// Address and index conversions.
pub mod conversions;
/// Collector phase flags.
pub mod heap_state;
/// Heap and thread-local layout that barriers depend on.
pub mod layout;
/// Logger initialization.
pub mod logger;
/// Object header layout and forwarding decode.
pub mod object_forwarding;
/// Barrier synthesis options.
pub mod options;

pub use self::address::{Address, ByteOffset, ByteSize, ObjectReference};
pub use self::heap_state::HeapStateFlags;
pub use self::layout::{BarrierConfig, CardTableBase, CompressedReferences, ConfigError};
pub use self::object_forwarding::{ForwardingRecord, ObjectHeaderLayout};
pub use self::options::BarrierOptions;
