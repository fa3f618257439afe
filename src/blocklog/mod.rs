//! Append-only block log with a recoverable committed head.
//!
//! Layout:
//! - head.rs — durable head record (`blk.jbmeta`), CBOR map with CRC,
//!   double-buffered through tmp + rename with a `.old` fallback.
//! - log.rs  — the log itself (`blk.jblog`): buffered appends, explicit
//!   commit protocol, positional reads, committed-range iteration.
//!
//! Entry framing: `varint(mh_len + payload_len) || multihash || payload`.
//! Entry offsets are not stored in the log; the index (mutable or static)
//! owns them. Bytes past the committed head are discarded on open.

mod head;
mod log;

pub use head::{load_head, read_head_file, write_head, LogHead};
pub use log::BlockLog;
