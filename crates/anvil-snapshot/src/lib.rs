// SPDX-License-Identifier: Apache-2.0
//! Versioned binary snapshot codec for Anvil configured target graphs.
//!
//! A snapshot captures every target considered during one build — identity,
//! metadata, deps, and typed attribute buckets — as a single self-contained
//! blob for offline inspection tooling (graph diffing, dependency lookup).
//! The producer encodes once via [`encode`]; consumers open the blob with
//! [`Snapshot::open`] and query it without mutating anything.
//!
//! Layering:
//!
//! * [`wire`] — envelope framing (magic, version, length, blake3 checksum)
//! * `codec` — CBOR payload body (one entry per target node)
//! * [`encode`] / [`GraphCollector`] — producer side
//! * [`Snapshot`] — consumer side (indexed lookups, lazy iteration)
//!
//! # Example
//!
//! ```
//! use anvil_graph::{AttrKind, RawAttr, TargetSpec};
//! use anvil_snapshot::{encode, EncodeOptions, Snapshot};
//!
//! let mut spec = TargetSpec::new("cell//app:bin", "rust_binary");
//! spec.deps.push("cell//lib:core".to_owned());
//! spec.attrs.push(("owner".to_owned(), RawAttr::Str("infra".to_owned())));
//!
//! let out = encode(vec![spec], &EncodeOptions::default())?;
//! let snapshot = Snapshot::open(&out.bytes)?;
//!
//! let node = snapshot.lookup("cell//app:bin").expect("encoded above");
//! assert_eq!(node.deps, vec!["cell//lib:core".to_owned()]);
//! assert_eq!(node.attr("owner", AttrKind::Str)?.kind(), AttrKind::Str);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod codec;
mod encode;
mod reader;
pub mod wire;

pub use anvil_graph::{
    AttrError, AttrKind, AttrValue, NodeError, RawAttr, TargetGraph, TargetNode, TargetSpec,
};
pub use codec::{MAX_ITEMS, MAX_TARGETS};
pub use encode::{
    encode, DroppedAttr, EncodeError, EncodeOptions, EncodeOutput, GraphCollector,
    OnUnsupportedAttr,
};
pub use reader::{Snapshot, Targets};

/// Structural decode failures: the buffer is not a well-formed snapshot.
///
/// Any of these aborts [`Snapshot::open`] entirely — there is no
/// partially-populated handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Buffer is smaller than the fixed envelope (header + checksum).
    #[error("truncated snapshot: need at least {need} bytes, got {got}")]
    Truncated {
        /// Minimum bytes required.
        need: usize,
        /// Bytes available.
        got: usize,
    },

    /// Magic bytes do not match "AVS!".
    #[error("bad magic: expected AVS!, got {0:?}")]
    BadMagic([u8; 4]),

    /// The header's payload length exceeds the buffer bounds.
    #[error("payload length {length} exceeds buffer bounds ({available} bytes available)")]
    LengthOutOfBounds {
        /// Declared payload length.
        length: usize,
        /// Payload bytes actually available.
        available: usize,
    },

    /// Bytes remain after the envelope (or after the payload body).
    #[error("{extra} trailing bytes after snapshot")]
    TrailingBytes {
        /// Number of unexpected bytes.
        extra: usize,
    },

    /// blake3 checksum over header and payload does not verify.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Payload does not fit the envelope's u32 length field (encode side).
    #[error("payload too large for envelope: {bytes} bytes")]
    PayloadTooLarge {
        /// Payload size in bytes.
        bytes: usize,
    },

    /// Target count exceeds [`MAX_TARGETS`].
    #[error("too many targets: {count} exceeds max {MAX_TARGETS}")]
    TooManyTargets {
        /// Declared target count.
        count: u64,
    },

    /// A per-node collection exceeds [`MAX_ITEMS`].
    #[error("too many {what}: {count} exceeds max {MAX_ITEMS}")]
    TooManyItems {
        /// Which collection overflowed.
        what: &'static str,
        /// Declared entry count.
        count: u64,
    },

    /// Two nodes in one container share a name.
    #[error("duplicate target name in snapshot: {name}")]
    DuplicateTargetName {
        /// The repeated name.
        name: String,
    },

    /// Payload structure violates the schema (field counts, tags, lengths).
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Low-level CBOR decode failure (truncated or invalid items).
    #[error("invalid CBOR: {0}")]
    Cbor(String),
}

impl From<minicbor::decode::Error> for ParseError {
    fn from(err: minicbor::decode::Error) -> Self {
        ParseError::Cbor(err.to_string())
    }
}

/// Failures opening a snapshot buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    /// The buffer is structurally invalid.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The version marker is not one this reader understands.
    #[error("unsupported snapshot version: {found} (reader supports {})", wire::VERSION)]
    Version {
        /// The version recorded in the buffer.
        found: u16,
    },
}
