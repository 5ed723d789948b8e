// SPDX-License-Identifier: Apache-2.0
//! Configured target graph model for Anvil explain snapshots.
//!
//! Pure data: target descriptors as the build engine hands them over
//! ([`TargetSpec`] with dynamically-kinded [`RawAttr`] values), validated
//! nodes with per-kind attribute buckets ([`TargetNode`]), and the
//! [`TargetGraph`] container. Serialization lives in `anvil-snapshot`;
//! this crate stays IO-free.
//!
//! # Attribute Model
//!
//! Build rules declare attributes of runtime-determined kind. The snapshot
//! schema closes that set to five kinds (bool, int, string, string list,
//! string dict), one bucket per kind. Partitioning happens once, at
//! [`TargetSpec::into_node`] time; anything outside the closed set is
//! reported back to the caller so the encoder can drop or reject it.
//!
//! # Absence Semantics
//!
//! Optional scalar metadata (`package`, `oncall`, ...) uses `Option<String>`:
//! `None` means "not recorded", which is distinct from a recorded empty
//! string. The wire format preserves that distinction.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

/// The closed set of attribute value kinds the snapshot schema can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    /// Boolean attribute.
    Bool,
    /// 64-bit signed integer attribute.
    Int,
    /// String attribute.
    Str,
    /// Ordered list of strings.
    StrList,
    /// String-keyed string map (unique keys).
    StrMap,
}

impl std::fmt::Display for AttrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrKind::Bool => "bool",
            AttrKind::Int => "int",
            AttrKind::Str => "string",
            AttrKind::StrList => "string list",
            AttrKind::StrMap => "string dict",
        };
        f.write_str(name)
    }
}

/// A typed attribute value tagged with its originating key.
///
/// Exactly one payload kind per value; `key` is non-empty (enforced when
/// specs are converted to nodes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Boolean attribute.
    Bool {
        /// Attribute key.
        key: String,
        /// Attribute value.
        value: bool,
    },
    /// Integer attribute.
    Int {
        /// Attribute key.
        key: String,
        /// Attribute value.
        value: i64,
    },
    /// String attribute.
    Str {
        /// Attribute key.
        key: String,
        /// Attribute value.
        value: String,
    },
    /// String list attribute (order is semantically relevant).
    StrList {
        /// Attribute key.
        key: String,
        /// Attribute value.
        value: Vec<String>,
    },
    /// String dict attribute (keys unique within the map).
    StrMap {
        /// Attribute key.
        key: String,
        /// Attribute value.
        value: BTreeMap<String, String>,
    },
}

impl AttrValue {
    /// The originating attribute key.
    pub fn key(&self) -> &str {
        match self {
            AttrValue::Bool { key, .. }
            | AttrValue::Int { key, .. }
            | AttrValue::Str { key, .. }
            | AttrValue::StrList { key, .. }
            | AttrValue::StrMap { key, .. } => key,
        }
    }

    /// The value kind of this attribute.
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Bool { .. } => AttrKind::Bool,
            AttrValue::Int { .. } => AttrKind::Int,
            AttrValue::Str { .. } => AttrKind::Str,
            AttrValue::StrList { .. } => AttrKind::StrList,
            AttrValue::StrMap { .. } => AttrKind::StrMap,
        }
    }
}

/// A producer-side attribute value, before bucket partitioning.
///
/// The build engine's attribute system is open-ended; this type carries the
/// five supported kinds plus [`RawAttr::Opaque`] for everything else (a
/// rendered form of a value kind the schema cannot represent). Opaque values
/// never reach the wire — the encoder drops or rejects them per its
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawAttr {
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer value.
    Int(i64),
    /// String value.
    Str(String),
    /// Ordered list of strings.
    StrList(Vec<String>),
    /// String-keyed string map.
    StrMap(BTreeMap<String, String>),
    /// Rendered form of a value kind outside the closed set.
    Opaque(String),
}

impl RawAttr {
    /// The schema kind this value partitions into, or `None` for opaque
    /// values.
    pub fn kind(&self) -> Option<AttrKind> {
        match self {
            RawAttr::Bool(_) => Some(AttrKind::Bool),
            RawAttr::Int(_) => Some(AttrKind::Int),
            RawAttr::Str(_) => Some(AttrKind::Str),
            RawAttr::StrList(_) => Some(AttrKind::StrList),
            RawAttr::StrMap(_) => Some(AttrKind::StrMap),
            RawAttr::Opaque(_) => None,
        }
    }
}

/// Per-node validation errors raised while converting a [`TargetSpec`] into
/// a [`TargetNode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// The same dep label appears twice in `deps`.
    #[error("duplicate dep: {dep}")]
    DuplicateDep {
        /// The repeated dep label.
        dep: String,
    },

    /// The same plugin label appears twice in `plugins`.
    #[error("duplicate plugin: {plugin}")]
    DuplicatePlugin {
        /// The repeated plugin label.
        plugin: String,
    },

    /// An attribute was declared with an empty key.
    #[error("empty attribute key")]
    EmptyAttributeKey,

    /// The same key appears twice under one value kind.
    #[error("duplicate attribute key: {key}")]
    DuplicateAttribute {
        /// The repeated attribute key.
        key: String,
    },

    /// The same key appears under two different value kinds.
    #[error("attribute {key} declared as both {first} and {second}")]
    ShadowedAttribute {
        /// The shadowed attribute key.
        key: String,
        /// Kind of the first declaration.
        first: AttrKind,
        /// Kind of the conflicting declaration.
        second: AttrKind,
    },
}

/// Query errors for typed attribute lookup on a node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttrError {
    /// No attribute with this key exists on the node, under any kind.
    #[error("no attribute named {key}")]
    NotFound {
        /// The key that was queried.
        key: String,
    },

    /// The key exists, but under a different kind than requested. Never
    /// coerced.
    #[error("attribute {key} is a {found} attribute, not {requested}")]
    TypeMismatch {
        /// The key that was queried.
        key: String,
        /// The kind the caller asked for.
        requested: AttrKind,
        /// The kind the attribute actually has.
        found: AttrKind,
    },
}

/// An in-memory target descriptor, as contributed by the build engine's
/// analysis pass.
///
/// `name` and `rule_type` are required; everything else defaults to
/// empty/absent. Attribute values are still raw (unpartitioned) here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetSpec {
    /// Fully-qualified configured target label (unique per snapshot).
    pub name: String,
    /// The rule kind that produced this target.
    pub rule_type: String,
    /// Declared deps, in resolution order. Duplicates are a spec error.
    pub deps: Vec<String>,
    /// Build file package, if recorded.
    pub package: Option<String>,
    /// Owning oncall, if recorded.
    pub oncall: Option<String>,
    /// Target configuration, if recorded.
    pub target_configuration: Option<String>,
    /// Resolved execution platform, if recorded.
    pub execution_platform: Option<String>,
    /// Configured target label rendering, if recorded.
    pub configured_target_label: Option<String>,
    /// Plugin labels, in order. Duplicates are a spec error.
    pub plugins: Vec<String>,
    /// Raw attribute key/value pairs, in declaration order.
    pub attrs: Vec<(String, RawAttr)>,
}

impl TargetSpec {
    /// Create a descriptor with the two required fields; the rest default to
    /// empty/absent.
    pub fn new(name: impl Into<String>, rule_type: impl Into<String>) -> Self {
        TargetSpec {
            name: name.into(),
            rule_type: rule_type.into(),
            ..TargetSpec::default()
        }
    }

    /// Convert into a validated [`TargetNode`], partitioning raw attributes
    /// into the five typed buckets.
    ///
    /// Returns the node plus the keys of opaque attributes that were
    /// partitioned out; the caller decides whether those are dropped with a
    /// summary or rejected outright.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] on duplicate deps/plugins, empty attribute
    /// keys, a key repeated within one kind, or a key declared under two
    /// kinds (shadowing is a validation error, not a merge).
    pub fn into_node(self) -> Result<(TargetNode, Vec<String>), NodeError> {
        let mut seen_deps = HashSet::new();
        for dep in &self.deps {
            if !seen_deps.insert(dep.as_str()) {
                return Err(NodeError::DuplicateDep { dep: dep.clone() });
            }
        }
        let mut seen_plugins = HashSet::new();
        for plugin in &self.plugins {
            if !seen_plugins.insert(plugin.as_str()) {
                return Err(NodeError::DuplicatePlugin {
                    plugin: plugin.clone(),
                });
            }
        }

        let mut kinds: HashMap<String, AttrKind> = HashMap::new();
        let mut register = |key: &str, kind: AttrKind| -> Result<(), NodeError> {
            match kinds.insert(key.to_owned(), kind) {
                None => Ok(()),
                Some(first) if first == kind => Err(NodeError::DuplicateAttribute {
                    key: key.to_owned(),
                }),
                Some(first) => Err(NodeError::ShadowedAttribute {
                    key: key.to_owned(),
                    first,
                    second: kind,
                }),
            }
        };

        let mut bool_attrs = Vec::new();
        let mut int_attrs = Vec::new();
        let mut string_attrs = Vec::new();
        let mut string_list_attrs = Vec::new();
        let mut string_dict_attrs = Vec::new();
        let mut opaque_keys = Vec::new();

        for (key, value) in self.attrs {
            if key.is_empty() {
                return Err(NodeError::EmptyAttributeKey);
            }
            match value {
                RawAttr::Bool(v) => {
                    register(&key, AttrKind::Bool)?;
                    bool_attrs.push((key, v));
                }
                RawAttr::Int(v) => {
                    register(&key, AttrKind::Int)?;
                    int_attrs.push((key, v));
                }
                RawAttr::Str(v) => {
                    register(&key, AttrKind::Str)?;
                    string_attrs.push((key, v));
                }
                RawAttr::StrList(v) => {
                    register(&key, AttrKind::StrList)?;
                    string_list_attrs.push((key, v));
                }
                RawAttr::StrMap(v) => {
                    register(&key, AttrKind::StrMap)?;
                    string_dict_attrs.push((key, v));
                }
                RawAttr::Opaque(_) => opaque_keys.push(key),
            }
        }

        Ok((
            TargetNode {
                name: self.name,
                rule_type: self.rule_type,
                deps: self.deps,
                package: self.package,
                oncall: self.oncall,
                target_configuration: self.target_configuration,
                execution_platform: self.execution_platform,
                configured_target_label: self.configured_target_label,
                plugins: self.plugins,
                bool_attrs,
                int_attrs,
                string_attrs,
                string_list_attrs,
                string_dict_attrs,
            },
            opaque_keys,
        ))
    }
}

/// One configured target: identity, metadata, and per-kind attribute
/// buckets.
///
/// Within each bucket keys are unique, and a key never appears in two
/// buckets of the same node (both enforced by [`TargetSpec::into_node`]).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetNode {
    /// Fully-qualified configured target label.
    pub name: String,
    /// The rule kind that produced this target (wire name: `type`).
    pub rule_type: String,
    /// Declared deps, in resolution order. Not required to resolve within
    /// the same snapshot.
    pub deps: Vec<String>,
    /// Build file package; `None` = not recorded.
    pub package: Option<String>,
    /// Owning oncall; `None` = not recorded.
    pub oncall: Option<String>,
    /// Target configuration; `None` = not recorded.
    pub target_configuration: Option<String>,
    /// Resolved execution platform; `None` = not recorded.
    pub execution_platform: Option<String>,
    /// Configured target label rendering; `None` = not recorded.
    pub configured_target_label: Option<String>,
    /// Plugin labels, in order.
    pub plugins: Vec<String>,
    /// Boolean attributes.
    pub bool_attrs: Vec<(String, bool)>,
    /// Integer attributes.
    pub int_attrs: Vec<(String, i64)>,
    /// String attributes.
    pub string_attrs: Vec<(String, String)>,
    /// String list attributes.
    pub string_list_attrs: Vec<(String, Vec<String>)>,
    /// String dict attributes.
    pub string_dict_attrs: Vec<(String, BTreeMap<String, String>)>,
}

impl TargetNode {
    /// Typed attribute lookup.
    ///
    /// Looks for `key` in the bucket for `kind`. A key present under a
    /// different kind is a [`AttrError::TypeMismatch`] naming the actual
    /// kind — never a silent coercion.
    ///
    /// # Errors
    ///
    /// [`AttrError::NotFound`] if no bucket holds `key`;
    /// [`AttrError::TypeMismatch`] if a different bucket does.
    pub fn attr(&self, key: &str, kind: AttrKind) -> Result<AttrValue, AttrError> {
        let hit = match kind {
            AttrKind::Bool => {
                self.bool_attrs
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(k, v)| AttrValue::Bool {
                        key: k.clone(),
                        value: *v,
                    })
            }
            AttrKind::Int => {
                self.int_attrs
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(k, v)| AttrValue::Int {
                        key: k.clone(),
                        value: *v,
                    })
            }
            AttrKind::Str => {
                self.string_attrs
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(k, v)| AttrValue::Str {
                        key: k.clone(),
                        value: v.clone(),
                    })
            }
            AttrKind::StrList => self
                .string_list_attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(k, v)| AttrValue::StrList {
                    key: k.clone(),
                    value: v.clone(),
                }),
            AttrKind::StrMap => self
                .string_dict_attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(k, v)| AttrValue::StrMap {
                    key: k.clone(),
                    value: v.clone(),
                }),
        };
        if let Some(value) = hit {
            return Ok(value);
        }
        match self.attr_kind(key) {
            Some(found) => Err(AttrError::TypeMismatch {
                key: key.to_owned(),
                requested: kind,
                found,
            }),
            None => Err(AttrError::NotFound {
                key: key.to_owned(),
            }),
        }
    }

    /// The kind `key` is recorded under, if any bucket holds it.
    pub fn attr_kind(&self, key: &str) -> Option<AttrKind> {
        if self.bool_attrs.iter().any(|(k, _)| k == key) {
            Some(AttrKind::Bool)
        } else if self.int_attrs.iter().any(|(k, _)| k == key) {
            Some(AttrKind::Int)
        } else if self.string_attrs.iter().any(|(k, _)| k == key) {
            Some(AttrKind::Str)
        } else if self.string_list_attrs.iter().any(|(k, _)| k == key) {
            Some(AttrKind::StrList)
        } else if self.string_dict_attrs.iter().any(|(k, _)| k == key) {
            Some(AttrKind::StrMap)
        } else {
            None
        }
    }

    /// Total attribute count across all five buckets.
    pub fn attr_count(&self) -> usize {
        self.bool_attrs.len()
            + self.int_attrs.len()
            + self.string_attrs.len()
            + self.string_list_attrs.len()
            + self.string_dict_attrs.len()
    }
}

/// One build snapshot: an ordered collection of target nodes.
///
/// Order reflects encoding order, not topology. Deps may reference targets
/// outside the snapshot — closure is explicitly not an invariant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetGraph {
    /// Nodes, in encoding order.
    pub targets: Vec<TargetNode>,
}

impl TargetGraph {
    /// Number of targets in the snapshot.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the snapshot holds no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
