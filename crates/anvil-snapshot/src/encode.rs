// SPDX-License-Identifier: Apache-2.0
//! Snapshot encoder: finalized target specs in, sealed byte buffer out.
//!
//! Encoding is all-or-nothing: any validation failure aborts with no
//! partial artifact. Persistence of the returned buffer is the caller's
//! concern.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use anvil_graph::{NodeError, TargetSpec};
use tracing::{debug, warn};

use crate::{codec, wire};

/// Encode-time errors. Any of these aborts encoding entirely.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// Two descriptors in the batch share a `name`.
    #[error("duplicate target: {name}")]
    DuplicateTarget {
        /// The repeated target name.
        name: String,
    },

    /// An attribute value kind outside the closed set, in reject mode.
    #[error("unsupported attribute value for {key} on {target}")]
    UnsupportedAttribute {
        /// Target carrying the attribute.
        target: String,
        /// Attribute key.
        key: String,
    },

    /// A descriptor failed per-node validation.
    #[error("invalid target {target}: {source}")]
    Node {
        /// Target that failed validation.
        target: String,
        /// The underlying validation failure.
        source: NodeError,
    },

    /// The encoded payload exceeds the envelope's u32 length field.
    #[error("snapshot payload too large: {bytes} bytes")]
    SnapshotTooLarge {
        /// Payload size in bytes.
        bytes: usize,
    },
}

/// Policy for attribute value kinds outside the closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnUnsupportedAttr {
    /// Drop the attribute, record it in the returned summary, and emit a
    /// `tracing` warning. Matches the producer's historical behavior.
    #[default]
    Drop,
    /// Fail encoding with [`EncodeError::UnsupportedAttribute`].
    Reject,
}

/// Encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOptions {
    /// What to do with unsupported attribute value kinds.
    pub on_unsupported: OnUnsupportedAttr,
}

/// One attribute dropped in [`OnUnsupportedAttr::Drop`] mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedAttr {
    /// Target the attribute was declared on.
    pub target: String,
    /// Attribute key.
    pub key: String,
}

/// Result of a successful encode: the sealed buffer plus the drop summary.
///
/// `dropped` is empty in reject mode (rejection aborts instead) and lists
/// every dropped attribute in drop mode — nothing is discarded invisibly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOutput {
    /// The self-contained, versioned snapshot blob.
    pub bytes: Vec<u8>,
    /// Attributes dropped because their value kind is outside the closed
    /// set.
    pub dropped: Vec<DroppedAttr>,
}

/// Encode a finalized batch of target descriptors into a sealed snapshot.
///
/// Targets are written in batch order. Deps are recorded verbatim and may
/// reference targets outside the batch; closure is not enforced.
///
/// # Errors
///
/// [`EncodeError::DuplicateTarget`] if two descriptors share a name,
/// [`EncodeError::Node`] on per-node invariant violations,
/// [`EncodeError::UnsupportedAttribute`] in reject mode, and
/// [`EncodeError::SnapshotTooLarge`] if the payload overflows the length
/// field. No partial buffer is ever produced.
pub fn encode(
    specs: Vec<TargetSpec>,
    options: &EncodeOptions,
) -> Result<EncodeOutput, EncodeError> {
    let mut seen = HashSet::with_capacity(specs.len());
    let mut nodes = Vec::with_capacity(specs.len());
    let mut dropped = Vec::new();

    for spec in specs {
        if !seen.insert(spec.name.clone()) {
            return Err(EncodeError::DuplicateTarget { name: spec.name });
        }
        let target = spec.name.clone();
        let (node, opaque_keys) = spec.into_node().map_err(|source| EncodeError::Node {
            target: target.clone(),
            source,
        })?;
        for key in opaque_keys {
            match options.on_unsupported {
                OnUnsupportedAttr::Reject => {
                    return Err(EncodeError::UnsupportedAttribute { target, key });
                }
                OnUnsupportedAttr::Drop => {
                    warn!(target_name = %target, attr = %key, "dropping unsupported attribute value");
                    dropped.push(DroppedAttr {
                        target: target.clone(),
                        key,
                    });
                }
            }
        }
        nodes.push(node);
    }

    let payload = codec::encode_targets(&nodes);
    let bytes = wire::seal(&payload)
        .map_err(|_| EncodeError::SnapshotTooLarge { bytes: payload.len() })?;

    debug!(
        targets = nodes.len(),
        bytes = bytes.len(),
        dropped = dropped.len(),
        "encoded target graph snapshot"
    );
    Ok(EncodeOutput { bytes, dropped })
}

/// Thread-safe collector for target specs contributed by a parallel
/// analysis pass.
///
/// Analysis workers call [`add`](GraphCollector::add) concurrently; once the
/// pass settles, [`into_specs`](GraphCollector::into_specs) yields the batch
/// for the single sequential [`encode`] pass. Order is contribution order.
#[derive(Debug, Default)]
pub struct GraphCollector {
    specs: Mutex<Vec<TargetSpec>>,
}

impl GraphCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        GraphCollector::default()
    }

    /// Append one target descriptor. Callable from any thread.
    pub fn add(&self, spec: TargetSpec) {
        let mut specs = self.specs.lock().unwrap_or_else(PoisonError::into_inner);
        specs.push(spec);
    }

    /// Number of specs collected so far.
    pub fn len(&self) -> usize {
        self.specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finalize the batch, consuming the collector.
    pub fn into_specs(self) -> Vec<TargetSpec> {
        self.specs
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_graph::RawAttr;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn duplicate_target_name_always_aborts() {
        let specs = vec![
            TargetSpec {
                attrs: vec![("owner".to_owned(), RawAttr::Str("x".into()))],
                ..TargetSpec::new("cell//a:a", "rule_one")
            },
            TargetSpec::new("cell//a:a", "rule_two"),
        ];
        assert_eq!(
            encode(specs, &EncodeOptions::default()).unwrap_err(),
            EncodeError::DuplicateTarget {
                name: "cell//a:a".to_owned()
            }
        );
    }

    #[test]
    fn reject_mode_fails_on_unsupported_attr() {
        let specs = vec![TargetSpec {
            attrs: vec![("visibility".to_owned(), RawAttr::Opaque("select(...)".into()))],
            ..TargetSpec::new("cell//a:a", "rule")
        }];
        let options = EncodeOptions {
            on_unsupported: OnUnsupportedAttr::Reject,
        };
        assert_eq!(
            encode(specs, &options).unwrap_err(),
            EncodeError::UnsupportedAttribute {
                target: "cell//a:a".to_owned(),
                key: "visibility".to_owned(),
            }
        );
    }

    #[test]
    fn drop_mode_reports_every_dropped_attr() {
        let specs = vec![
            TargetSpec {
                attrs: vec![
                    ("visibility".to_owned(), RawAttr::Opaque("select(...)".into())),
                    ("owner".to_owned(), RawAttr::Str("x".into())),
                ],
                ..TargetSpec::new("cell//a:a", "rule")
            },
            TargetSpec {
                attrs: vec![("labels".to_owned(), RawAttr::Opaque("{...}".into()))],
                ..TargetSpec::new("cell//b:b", "rule")
            },
        ];
        let out = encode(specs, &EncodeOptions::default()).unwrap();
        assert_eq!(
            out.dropped,
            vec![
                DroppedAttr {
                    target: "cell//a:a".to_owned(),
                    key: "visibility".to_owned(),
                },
                DroppedAttr {
                    target: "cell//b:b".to_owned(),
                    key: "labels".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn node_validation_failure_aborts_whole_batch() {
        let specs = vec![
            TargetSpec::new("cell//a:a", "rule"),
            TargetSpec {
                deps: vec!["cell//x:x".into(), "cell//x:x".into()],
                ..TargetSpec::new("cell//b:b", "rule")
            },
        ];
        let err = encode(specs, &EncodeOptions::default()).unwrap_err();
        assert!(matches!(err, EncodeError::Node { .. }));
    }

    #[test]
    fn collector_accepts_concurrent_contributions() {
        let collector = Arc::new(GraphCollector::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let c = Arc::clone(&collector);
            handles.push(thread::spawn(move || {
                c.add(TargetSpec::new(format!("cell//gen:t{i}"), "rule"));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let collector = Arc::try_unwrap(collector).unwrap();
        assert_eq!(collector.len(), 8);

        let specs = collector.into_specs();
        let out = encode(specs, &EncodeOptions::default()).unwrap();
        assert!(out.dropped.is_empty());
    }
}
