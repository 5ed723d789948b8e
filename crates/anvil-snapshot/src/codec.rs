// SPDX-License-Identifier: Apache-2.0
//! CBOR payload codec for target nodes.
//!
//! Conventions: definite-length arrays only, positional fields, options as
//! 0/1-length arrays (absent vs recorded), strict length/tag validation on
//! decode. A target node is a 14-field array:
//!
//! ```text
//! [name, type, deps, package?, oncall?, target_configuration?,
//!  execution_platform?, configured_target_label?, plugins,
//!  bool_attrs, int_attrs, string_attrs, list_of_strings_attrs,
//!  dict_of_strings_attrs]
//! ```
//!
//! Attribute buckets are arrays of `[key, value]` pairs; dict values are
//! arrays of `[k, v]` pairs sorted by `k`, keeping the byte output
//! deterministic for cross-build diffing.

use std::collections::BTreeMap;

use anvil_graph::TargetNode;
use minicbor::{Decoder, Encoder};

use crate::ParseError;

/// Maximum targets per snapshot (decode DoS guard).
pub const MAX_TARGETS: u64 = 1_000_000;
/// Maximum entries per collection (deps, plugins, attr buckets, lists,
/// dicts) within one node (decode DoS guard).
pub const MAX_ITEMS: u64 = 65_536;

const NODE_FIELDS: u64 = 14;

// --- Encoding -------------------------------------------------------------

type EncResult<W> = Result<(), minicbor::encode::Error<W>>;

fn encode_str_vec<W: minicbor::encode::Write>(
    e: &mut Encoder<W>,
    items: &[String],
) -> EncResult<W::Error> {
    e.array(items.len() as u64)?;
    for item in items {
        e.str(item)?;
    }
    Ok(())
}

fn encode_opt_str<W: minicbor::encode::Write>(
    e: &mut Encoder<W>,
    value: &Option<String>,
) -> EncResult<W::Error> {
    match value {
        Some(v) => {
            e.array(1)?;
            e.str(v)?;
        }
        None => {
            e.array(0)?;
        }
    }
    Ok(())
}

fn encode_node<W: minicbor::encode::Write>(
    e: &mut Encoder<W>,
    node: &TargetNode,
) -> EncResult<W::Error> {
    e.array(NODE_FIELDS)?;
    e.str(&node.name)?;
    e.str(&node.rule_type)?;
    encode_str_vec(e, &node.deps)?;
    encode_opt_str(e, &node.package)?;
    encode_opt_str(e, &node.oncall)?;
    encode_opt_str(e, &node.target_configuration)?;
    encode_opt_str(e, &node.execution_platform)?;
    encode_opt_str(e, &node.configured_target_label)?;
    encode_str_vec(e, &node.plugins)?;

    e.array(node.bool_attrs.len() as u64)?;
    for (key, value) in &node.bool_attrs {
        e.array(2)?;
        e.str(key)?;
        e.bool(*value)?;
    }

    e.array(node.int_attrs.len() as u64)?;
    for (key, value) in &node.int_attrs {
        e.array(2)?;
        e.str(key)?;
        e.i64(*value)?;
    }

    e.array(node.string_attrs.len() as u64)?;
    for (key, value) in &node.string_attrs {
        e.array(2)?;
        e.str(key)?;
        e.str(value)?;
    }

    e.array(node.string_list_attrs.len() as u64)?;
    for (key, value) in &node.string_list_attrs {
        e.array(2)?;
        e.str(key)?;
        encode_str_vec(e, value)?;
    }

    e.array(node.string_dict_attrs.len() as u64)?;
    for (key, value) in &node.string_dict_attrs {
        e.array(2)?;
        e.str(key)?;
        // BTreeMap iterates sorted by key: deterministic bytes.
        e.array(value.len() as u64)?;
        for (k, v) in value {
            e.array(2)?;
            e.str(k)?;
            e.str(v)?;
        }
    }

    Ok(())
}

/// Encode the full target list payload (outer array + one entry per node).
pub fn encode_targets(nodes: &[TargetNode]) -> Vec<u8> {
    fn encode_all<W: minicbor::encode::Write>(
        e: &mut Encoder<W>,
        nodes: &[TargetNode],
    ) -> EncResult<W::Error> {
        e.array(nodes.len() as u64)?;
        for node in nodes {
            encode_node(e, node)?;
        }
        Ok(())
    }

    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);
    encode_all(&mut encoder, nodes).expect("encoding should not fail");
    buf
}

// --- Decoding -------------------------------------------------------------

/// Read a definite-length array header; indefinite lengths are a corruption.
pub fn def_array(d: &mut Decoder<'_>, what: &'static str) -> Result<u64, ParseError> {
    d.array()?
        .ok_or_else(|| ParseError::Malformed(format!("indefinite length array in {what}")))
}

fn capped_array(d: &mut Decoder<'_>, what: &'static str) -> Result<u64, ParseError> {
    let len = def_array(d, what)?;
    if len > MAX_ITEMS {
        return Err(ParseError::TooManyItems { what, count: len });
    }
    Ok(len)
}

fn decode_pair_header(
    d: &mut Decoder<'_>,
    what: &'static str,
) -> Result<(), ParseError> {
    let len = def_array(d, what)?;
    if len != 2 {
        return Err(ParseError::Malformed(format!(
            "{what} entry expected 2 fields, got {len}"
        )));
    }
    Ok(())
}

fn decode_str_vec(d: &mut Decoder<'_>, what: &'static str) -> Result<Vec<String>, ParseError> {
    let len = capped_array(d, what)?;
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(d.str()?.to_owned());
    }
    Ok(items)
}

fn decode_opt_str(d: &mut Decoder<'_>, what: &'static str) -> Result<Option<String>, ParseError> {
    let len = def_array(d, what)?;
    match len {
        0 => Ok(None),
        1 => Ok(Some(d.str()?.to_owned())),
        n => Err(ParseError::Malformed(format!(
            "{what} expected array of length 0 or 1, got {n}"
        ))),
    }
}

fn decode_str_map(d: &mut Decoder<'_>, what: &'static str) -> Result<BTreeMap<String, String>, ParseError> {
    let len = capped_array(d, what)?;
    let mut map = BTreeMap::new();
    for _ in 0..len {
        decode_pair_header(d, what)?;
        let k = d.str()?.to_owned();
        let v = d.str()?.to_owned();
        if map.insert(k.clone(), v).is_some() {
            return Err(ParseError::Malformed(format!(
                "duplicate key {k} in {what}"
            )));
        }
    }
    Ok(map)
}

/// Decode one target node (14-field array).
pub fn decode_node(d: &mut Decoder<'_>) -> Result<TargetNode, ParseError> {
    let len = def_array(d, "target node")?;
    if len != NODE_FIELDS {
        return Err(ParseError::Malformed(format!(
            "target node expected {NODE_FIELDS} fields, got {len}"
        )));
    }

    let name = d.str()?.to_owned();
    let rule_type = d.str()?.to_owned();
    let deps = decode_str_vec(d, "deps")?;
    let package = decode_opt_str(d, "package")?;
    let oncall = decode_opt_str(d, "oncall")?;
    let target_configuration = decode_opt_str(d, "target_configuration")?;
    let execution_platform = decode_opt_str(d, "execution_platform")?;
    let configured_target_label = decode_opt_str(d, "configured_target_label")?;
    let plugins = decode_str_vec(d, "plugins")?;

    let len = capped_array(d, "bool_attrs")?;
    let mut bool_attrs = Vec::with_capacity(len as usize);
    for _ in 0..len {
        decode_pair_header(d, "bool_attrs")?;
        let key = d.str()?.to_owned();
        bool_attrs.push((key, d.bool()?));
    }

    let len = capped_array(d, "int_attrs")?;
    let mut int_attrs = Vec::with_capacity(len as usize);
    for _ in 0..len {
        decode_pair_header(d, "int_attrs")?;
        let key = d.str()?.to_owned();
        int_attrs.push((key, d.i64()?));
    }

    let len = capped_array(d, "string_attrs")?;
    let mut string_attrs = Vec::with_capacity(len as usize);
    for _ in 0..len {
        decode_pair_header(d, "string_attrs")?;
        let key = d.str()?.to_owned();
        string_attrs.push((key, d.str()?.to_owned()));
    }

    let len = capped_array(d, "list_of_strings_attrs")?;
    let mut string_list_attrs = Vec::with_capacity(len as usize);
    for _ in 0..len {
        decode_pair_header(d, "list_of_strings_attrs")?;
        let key = d.str()?.to_owned();
        string_list_attrs.push((key, decode_str_vec(d, "list_of_strings_attrs value")?));
    }

    let len = capped_array(d, "dict_of_strings_attrs")?;
    let mut string_dict_attrs = Vec::with_capacity(len as usize);
    for _ in 0..len {
        decode_pair_header(d, "dict_of_strings_attrs")?;
        let key = d.str()?.to_owned();
        string_dict_attrs.push((key, decode_str_map(d, "dict_of_strings_attrs value")?));
    }

    Ok(TargetNode {
        name,
        rule_type,
        deps,
        package,
        oncall,
        target_configuration,
        execution_platform,
        configured_target_label,
        plugins,
        bool_attrs,
        int_attrs,
        string_attrs,
        string_list_attrs,
        string_dict_attrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_graph::{RawAttr, TargetSpec};

    fn sample_node() -> TargetNode {
        let spec = TargetSpec {
            deps: vec!["cell//b:b".into(), "cell//c:c".into()],
            package: Some("cell//pkg:BUCK".into()),
            oncall: None,
            plugins: vec!["plugin//p:p".into()],
            attrs: vec![
                ("enabled".to_owned(), RawAttr::Bool(true)),
                ("jobs".to_owned(), RawAttr::Int(-3)),
                ("owner".to_owned(), RawAttr::Str("x".into())),
                (
                    "srcs".to_owned(),
                    RawAttr::StrList(vec!["a.c".into(), "b.c".into()]),
                ),
                (
                    "env".to_owned(),
                    RawAttr::StrMap(BTreeMap::from([
                        ("B".to_owned(), "2".to_owned()),
                        ("A".to_owned(), "1".to_owned()),
                    ])),
                ),
            ],
            ..TargetSpec::new("cell//pkg:foo", "foo_lib")
        };
        spec.into_node().unwrap().0
    }

    #[test]
    fn node_roundtrip() {
        let node = sample_node();
        let bytes = encode_targets(std::slice::from_ref(&node));

        let mut d = Decoder::new(&bytes);
        assert_eq!(def_array(&mut d, "targets").unwrap(), 1);
        let decoded = decode_node(&mut d).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(d.position(), bytes.len());
    }

    #[test]
    fn empty_node_roundtrip_preserves_empty_not_absent() {
        let node = TargetSpec::new("cell//pkg:empty", "rule")
            .into_node()
            .unwrap()
            .0;
        let bytes = encode_targets(std::slice::from_ref(&node));

        let mut d = Decoder::new(&bytes);
        def_array(&mut d, "targets").unwrap();
        let decoded = decode_node(&mut d).unwrap();
        assert!(decoded.deps.is_empty());
        assert!(decoded.plugins.is_empty());
        assert!(decoded.bool_attrs.is_empty());
        assert_eq!(decoded.package, None);
        assert_eq!(decoded, node);
    }

    #[test]
    fn recorded_empty_string_stays_distinct_from_absent() {
        let node = TargetSpec {
            oncall: Some(String::new()),
            ..TargetSpec::new("cell//pkg:foo", "rule")
        }
        .into_node()
        .unwrap()
        .0;
        let bytes = encode_targets(std::slice::from_ref(&node));

        let mut d = Decoder::new(&bytes);
        def_array(&mut d, "targets").unwrap();
        let decoded = decode_node(&mut d).unwrap();
        assert_eq!(decoded.oncall, Some(String::new()));
        assert_eq!(decoded.package, None);
    }

    #[test]
    fn dict_entries_are_written_sorted() {
        let node = sample_node();
        let bytes = encode_targets(std::slice::from_ref(&node));
        let mut d = Decoder::new(&bytes);
        def_array(&mut d, "targets").unwrap();
        let decoded = decode_node(&mut d).unwrap();
        let (_, env) = &decoded.string_dict_attrs[0];
        let keys: Vec<_> = env.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn reject_wrong_field_count() {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        e.array(1).unwrap();
        e.array(3).unwrap();
        e.str("cell//pkg:foo").unwrap();
        e.str("rule").unwrap();
        e.array(0).unwrap();

        let mut d = Decoder::new(&buf);
        def_array(&mut d, "targets").unwrap();
        let err = decode_node(&mut d).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn reject_duplicate_dict_key() {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        e.array(2).unwrap();
        e.array(2).unwrap();
        e.str("K").unwrap();
        e.str("1").unwrap();
        e.array(2).unwrap();
        e.str("K").unwrap();
        e.str("2").unwrap();

        let mut d = Decoder::new(&buf);
        let err = decode_str_map(&mut d, "dict").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn reject_oversized_collection() {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        e.array(MAX_ITEMS + 1).unwrap();

        let mut d = Decoder::new(&buf);
        let err = decode_str_vec(&mut d, "deps").unwrap_err();
        assert!(matches!(err, ParseError::TooManyItems { what: "deps", .. }));
    }

    #[test]
    fn truncated_node_fails_decode() {
        let node = sample_node();
        let bytes = encode_targets(std::slice::from_ref(&node));
        for len in 1..bytes.len() {
            let mut d = Decoder::new(&bytes[..len]);
            let header = def_array(&mut d, "targets");
            let failed = match header {
                Err(_) => true,
                Ok(_) => decode_node(&mut d).is_err(),
            };
            assert!(failed, "decoding should fail for truncated input of length {len}");
        }
    }
}
