/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = BYTES_IN_ADDRESS;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_ADDRESS as usize;
/// The number of bits in a word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// log2 of the number of heap bytes covered by one card
pub const LOG_BYTES_IN_CARD: usize = 12;
/// The number of heap bytes covered by one card
pub const BYTES_IN_CARD: usize = 1 << LOG_BYTES_IN_CARD;

/// Objects are word aligned. The mark bitmaps keep one bit per word.
pub const LOG_MIN_OBJECT_ALIGNMENT: usize = LOG_BYTES_IN_ADDRESS as usize;
/// The minimal object alignment
pub const MIN_OBJECT_ALIGNMENT: usize = 1 << LOG_MIN_OBJECT_ALIGNMENT;

/// The first word of every object is owned by the collector and holds the forwarding state.
pub const GC_HEADER_BYTES: usize = BYTES_IN_WORD;
/// The smallest object the collector can move: a header word plus one more word.
pub const MIN_OBJECT_SIZE: usize = 2 * BYTES_IN_WORD;
