//! Literal values of a document as JSON, for variable defaults and inline mutation payloads.

use query_document::{NodeArena, NodeId, NodeKind};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;

/// Converts the value tree rooted at `root`. Variables become `"$name"` strings.
pub(crate) fn node_to_json(nodes: &NodeArena<'_>, root: NodeId) -> Value {
    let mut stack = vec![(root, false)];
    let mut done: Vec<Value> = Vec::new();

    while let Some((id, expanded)) = stack.pop() {
        let node = &nodes[id];

        match node.kind {
            NodeKind::Obj | NodeKind::List if !expanded => {
                stack.push((id, true));
                stack.extend(node.children.iter().rev().map(|&child| (child, false)));
            }
            NodeKind::Obj => {
                let values = done.split_off(done.len() - node.children.len());

                let map: Map<String, Value> = node
                    .children
                    .iter()
                    .zip(values)
                    .map(|(&child, value)| (nodes[child].name.to_owned(), value))
                    .collect();

                done.push(Value::Object(map));
            }
            NodeKind::List => {
                let values = done.split_off(done.len() - node.children.len());
                done.push(Value::Array(values));
            }
            NodeKind::Num => done.push(number(node.value)),
            NodeKind::Bool => done.push(Value::Bool(node.value.eq_ignore_ascii_case("true"))),
            NodeKind::Var => done.push(Value::String(format!("${}", node.value))),
            NodeKind::Str => done.push(Value::String(unescape(node.value).into_owned())),
            NodeKind::Label => done.push(Value::String(node.value.to_owned())),
        }
    }

    done.pop().unwrap_or(Value::Null)
}

fn number(text: &str) -> Value {
    if let Ok(n) = text.parse::<i64>() {
        return Value::Number(n.into());
    }

    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_owned()))
}

fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('\\') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    Cow::Owned(out)
}
