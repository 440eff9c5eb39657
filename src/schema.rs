//! Structural schema rules.
//!
//! A rule pins a path to an element kind. When a document carries rules,
//! every local update re-validates the speculative state before it is
//! allowed to touch the authoritative root; violations reject the whole
//! batch with one message per failed rule.

use crate::crdt::primitive::Primitive;
use crate::crdt::root::CrdtRoot;
use crate::crdt::Content;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Object,
    Array,
    Text,
    Counter,
    String,
    Boolean,
    Integer,
    Long,
    Double,
    Date,
    Bytes,
    Null,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub path: String,
    pub kind: RuleKind,
}

impl Rule {
    pub fn new(path: &str, kind: RuleKind) -> Self {
        Rule { path: path.into(), kind }
    }
}

fn kind_matches(content: &Content, kind: RuleKind) -> bool {
    match (content, kind) {
        (Content::Object(_), RuleKind::Object) => true,
        (Content::Array(_), RuleKind::Array) => true,
        (Content::Text(_), RuleKind::Text) => true,
        (Content::Counter(_), RuleKind::Counter) => true,
        (Content::Primitive(p), kind) => matches!(
            (p, kind),
            (Primitive::Str(_), RuleKind::String)
                | (Primitive::Boolean(_), RuleKind::Boolean)
                | (Primitive::Integer(_), RuleKind::Integer)
                | (Primitive::Long(_), RuleKind::Long)
                | (Primitive::Double(_), RuleKind::Double)
                | (Primitive::Date(_), RuleKind::Date)
                | (Primitive::Bytes(_), RuleKind::Bytes)
                | (Primitive::Null, RuleKind::Null)
        ),
        _ => false,
    }
}

/// Check every rule against `root`. Err carries one message per violation.
pub fn validate(root: &CrdtRoot, rules: &[Rule]) -> Result<(), Vec<String>> {
    let mut violations = Vec::new();
    for rule in rules {
        match root.resolve_path(&rule.path) {
            Err(_) => violations.push(format!("{}: missing", rule.path)),
            Ok(id) => {
                let content = &root.elem(id).content;
                if !kind_matches(content, rule.kind) {
                    violations.push(format!(
                        "{}: expected {:?}, found {}",
                        rule.path,
                        rule.kind,
                        content.kind()
                    ));
                }
            }
        }
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}
