//! Native messaging framing.
//!
//! Each message is a UTF-8 JSON document preceded by its byte length as a
//! 32-bit unsigned integer in the host's native byte order.

use tokio_util::codec::LengthDelimitedCodec;

/// Bytes in the length prefix.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Default cap on a single incoming message (64 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Codec for reading and writing native messaging frames.
pub fn codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_BYTES)
        .native_endian()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}
