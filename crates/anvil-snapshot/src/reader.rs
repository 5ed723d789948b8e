// SPDX-License-Identifier: Apache-2.0
//! Read-only snapshot handle with typed queries.
//!
//! [`Snapshot::open`] validates the entire buffer up front (envelope,
//! checksum, full structural walk of every node) and records each target's
//! payload byte range plus a name index. Queries decode single nodes on
//! demand from those ranges — no linear scan per lookup, no re-parse per
//! iteration.
//!
//! The handle is immutable; concurrent reads from multiple threads need no
//! synchronization.

use std::collections::HashMap;
use std::ops::Range;

use anvil_graph::{AttrError, AttrKind, AttrValue, TargetGraph, TargetNode};
use minicbor::Decoder;
use tracing::debug;

use crate::{codec, wire, OpenError, ParseError};

/// A decoded, read-only snapshot of a configured target graph.
#[derive(Debug, Clone)]
pub struct Snapshot {
    payload: Vec<u8>,
    ranges: Vec<Range<usize>>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    /// Open a snapshot buffer, validating it completely.
    ///
    /// Walks every node once: a buffer that is truncated, corrupt, or
    /// structurally inconsistent anywhere fails here, never later — there
    /// is no partially-populated handle.
    ///
    /// # Errors
    ///
    /// [`OpenError::Version`] for an unrecognized version marker;
    /// [`OpenError::Parse`] for everything else (truncation, bad magic,
    /// checksum mismatch, malformed CBOR, duplicate target names, cap
    /// violations).
    pub fn open(bytes: &[u8]) -> Result<Self, OpenError> {
        let payload = wire::unseal(bytes)?.to_vec();

        let mut ranges = Vec::new();
        let mut index = HashMap::new();
        {
            let mut d = Decoder::new(&payload);
            let count = codec::def_array(&mut d, "targets")?;
            if count > codec::MAX_TARGETS {
                return Err(ParseError::TooManyTargets { count }.into());
            }
            ranges.reserve(count as usize);
            index.reserve(count as usize);
            for i in 0..count as usize {
                let start = d.position();
                let node = codec::decode_node(&mut d)?;
                let end = d.position();
                if index.insert(node.name.clone(), i).is_some() {
                    return Err(ParseError::DuplicateTargetName { name: node.name }.into());
                }
                ranges.push(start..end);
            }
            if d.position() != payload.len() {
                return Err(ParseError::TrailingBytes {
                    extra: payload.len() - d.position(),
                }
                .into());
            }
        }

        debug!(targets = ranges.len(), bytes = bytes.len(), "opened target graph snapshot");
        Ok(Snapshot {
            payload,
            ranges,
            index,
        })
    }

    /// Number of targets in the snapshot.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the snapshot holds no targets.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    fn node_at(&self, idx: usize) -> Option<TargetNode> {
        let range = self.ranges.get(idx)?.clone();
        let mut d = Decoder::new(&self.payload[range]);
        // Ranges come from a successful open-time decode of these same
        // bytes; this re-decode cannot fail.
        codec::decode_node(&mut d).ok()
    }

    /// Look up a target by its fully-qualified name.
    ///
    /// O(1) via the index built at open time; decodes only the one node.
    /// `None` means the snapshot records no such target.
    pub fn lookup(&self, name: &str) -> Option<TargetNode> {
        self.index.get(name).and_then(|&idx| self.node_at(idx))
    }

    /// Declared deps of a target, verbatim and in declaration order.
    ///
    /// Deps are not validated against the snapshot — referencing a target
    /// absent from this snapshot is normal for partial graphs. `None` means
    /// the named target itself is not in the snapshot.
    pub fn deps_of(&self, name: &str) -> Option<Vec<String>> {
        self.lookup(name).map(|node| node.deps)
    }

    /// Typed attribute lookup on a node of this snapshot.
    ///
    /// Delegates to [`TargetNode::attr`]: a key recorded under a different
    /// kind is a distinct [`AttrError::TypeMismatch`], never a coercion.
    ///
    /// # Errors
    ///
    /// [`AttrError::NotFound`] or [`AttrError::TypeMismatch`], per call;
    /// query misses never invalidate the handle.
    pub fn attr(
        &self,
        node: &TargetNode,
        key: &str,
        kind: AttrKind,
    ) -> Result<AttrValue, AttrError> {
        node.attr(key, kind)
    }

    /// Iterate all targets in encoding order.
    ///
    /// Lazy (one node decoded per step) and restartable — calling this
    /// again yields a fresh iterator without re-parsing the envelope.
    pub fn list_targets(&self) -> Targets<'_> {
        Targets {
            snapshot: self,
            next: 0,
        }
    }

    /// Decode every node into an owned [`TargetGraph`] container.
    pub fn materialize(&self) -> TargetGraph {
        TargetGraph {
            targets: self.list_targets().collect(),
        }
    }
}

/// Lazy iterator over a snapshot's targets, in encoding order.
#[derive(Debug, Clone)]
pub struct Targets<'a> {
    snapshot: &'a Snapshot,
    next: usize,
}

impl Iterator for Targets<'_> {
    type Item = TargetNode;

    fn next(&mut self) -> Option<TargetNode> {
        let node = self.snapshot.node_at(self.next)?;
        self.next += 1;
        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.snapshot.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Targets<'_> {}
