//! Storage-agnostic row filter.
//!
//! A `Predicate` is an AND/OR tree of `(path, operator, value)` leaves plus the
//! two constants `Always` and `Never`. Storage backends translate it; two
//! translations ship here: a document-store filter (`to_document`) and an
//! in-process evaluator over JSON records (`matches`).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

/// `_id` value no stored record can carry; used to render `Never`.
pub const NEVER_MATCH_ID: &str = "000000000000000000000000";

/// Leaf comparison operator.
///
/// Text operators (`Contains`, `StartsWith`, `EndsWith`) are case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    StartsWith,
    EndsWith,
}

impl CompareOp {
    pub fn is_text(self) -> bool {
        matches!(
            self,
            CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    /// Physical storage path (dotted), e.g. `data.owner`.
    pub path: String,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// No restriction.
    Always,
    /// Matches no row.
    Never,
    Leaf(Leaf),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn leaf(path: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Leaf(Leaf {
            path: path.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(path, CompareOp::Eq, value)
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Predicate::Never)
    }

    /// Render as a document-store query filter.
    pub fn to_document(&self) -> Value {
        match self {
            Predicate::Always => json!({}),
            Predicate::Never => json!({ "_id": NEVER_MATCH_ID }),
            Predicate::Leaf(leaf) => leaf_document(leaf),
            Predicate::And(parts) => {
                json!({ "$and": parts.iter().map(Predicate::to_document).collect::<Vec<_>>() })
            }
            Predicate::Or(parts) => {
                json!({ "$or": parts.iter().map(Predicate::to_document).collect::<Vec<_>>() })
            }
        }
    }

    /// Evaluate against a single record.
    ///
    /// Paths walk nested objects. When the stored value is an array, equality
    /// and text operators match if any element matches.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::Leaf(leaf) => leaf_matches(leaf, lookup(record, &leaf.path)),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(record)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(record)),
        }
    }
}

fn leaf_document(leaf: &Leaf) -> Value {
    let condition = match leaf.op {
        // Composite values are wrapped so the store never reads them as operators.
        CompareOp::Eq if leaf.value.is_object() || leaf.value.is_array() => {
            json!({ "$eq": leaf.value })
        }
        CompareOp::Eq => leaf.value.clone(),
        CompareOp::Ne => json!({ "$ne": leaf.value }),
        CompareOp::Gt => json!({ "$gt": leaf.value }),
        CompareOp::Gte => json!({ "$gte": leaf.value }),
        CompareOp::Lt => json!({ "$lt": leaf.value }),
        CompareOp::Lte => json!({ "$lte": leaf.value }),
        CompareOp::In => json!({ "$in": leaf.value }),
        CompareOp::Nin => json!({ "$nin": leaf.value }),
        CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
            let escaped = regex::escape(&text_of(&leaf.value));
            let pattern = match leaf.op {
                CompareOp::StartsWith => format!("^{escaped}"),
                CompareOp::EndsWith => format!("{escaped}$"),
                _ => escaped,
            };
            json!({ "$regex": pattern, "$options": "i" })
        }
    };

    let mut doc = Map::new();
    doc.insert(leaf.path.clone(), condition);
    Value::Object(doc)
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.as_object()?.get(segment))
}

fn leaf_matches(leaf: &Leaf, stored: Option<&Value>) -> bool {
    match leaf.op {
        CompareOp::Eq => field_equals(stored, &leaf.value),
        CompareOp::Ne => !field_equals(stored, &leaf.value),
        CompareOp::Gt => compare(stored, &leaf.value).is_some_and(|o| o == Ordering::Greater),
        CompareOp::Gte => compare(stored, &leaf.value).is_some_and(|o| o != Ordering::Less),
        CompareOp::Lt => compare(stored, &leaf.value).is_some_and(|o| o == Ordering::Less),
        CompareOp::Lte => compare(stored, &leaf.value).is_some_and(|o| o != Ordering::Greater),
        CompareOp::In => in_list(stored, &leaf.value),
        CompareOp::Nin => !in_list(stored, &leaf.value),
        CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
            let needle = text_of(&leaf.value).to_lowercase();
            let test = |s: &str| {
                let hay = s.to_lowercase();
                match leaf.op {
                    CompareOp::StartsWith => hay.starts_with(&needle),
                    CompareOp::EndsWith => hay.ends_with(&needle),
                    _ => hay.contains(&needle),
                }
            };
            match stored {
                Some(Value::String(s)) => test(s),
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).any(test),
                _ => false,
            }
        }
    }
}

/// Integers compare exactly; floats fall back to `f64`.
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    if !a.is_f64() && !b.is_f64() {
        // one negative, the other above i64::MAX
        return Some(if a.as_u64().is_some() {
            Ordering::Greater
        } else {
            Ordering::Less
        });
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

fn scalar_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn field_equals(stored: Option<&Value>, expected: &Value) -> bool {
    match stored {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| scalar_equals(item, expected))
        }
        Some(value) => scalar_equals(value, expected),
    }
}

fn in_list(stored: Option<&Value>, candidates: &Value) -> bool {
    candidates
        .as_array()
        .is_some_and(|list| list.iter().any(|c| field_equals(stored, c)))
}

fn compare(stored: Option<&Value>, bound: &Value) -> Option<Ordering> {
    match (stored?, bound) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> Value {
        json!({
            "_id": "rec-1",
            "created_by": "u1",
            "data": {
                "owner": "u1",
                "company": "Acme Industries",
                "amount": 1200,
                "tags": ["hot", "enterprise"],
                "team": "g2"
            }
        })
    }

    #[test]
    fn constants_render_and_evaluate() {
        assert_eq!(Predicate::Always.to_document(), json!({}));
        assert_eq!(
            Predicate::Never.to_document(),
            json!({ "_id": NEVER_MATCH_ID })
        );
        assert!(Predicate::Always.matches(&lead()));
        assert!(!Predicate::Never.matches(&lead()));
    }

    #[test]
    fn text_operators_render_anchored_case_insensitive_regex() {
        let p = Predicate::leaf("data.company", CompareOp::StartsWith, "acme.");
        assert_eq!(
            p.to_document(),
            json!({ "data.company": { "$regex": "^acme\\.", "$options": "i" } })
        );
        let p = Predicate::leaf("data.company", CompareOp::EndsWith, "inc");
        assert_eq!(
            p.to_document(),
            json!({ "data.company": { "$regex": "inc$", "$options": "i" } })
        );
    }

    #[test]
    fn boolean_nodes_render_nested() {
        let p = Predicate::Or(vec![
            Predicate::eq("data.owner", "u1"),
            Predicate::And(vec![
                Predicate::leaf("data.amount", CompareOp::Gte, 1000),
                Predicate::leaf("data.team", CompareOp::In, json!(["g1", "g2"])),
            ]),
        ]);
        assert_eq!(
            p.to_document(),
            json!({ "$or": [
                { "data.owner": "u1" },
                { "$and": [
                    { "data.amount": { "$gte": 1000 } },
                    { "data.team": { "$in": ["g1", "g2"] } }
                ]}
            ]})
        );
    }

    #[test]
    fn evaluates_comparisons_against_records() {
        let record = lead();
        assert!(Predicate::eq("data.owner", "u1").matches(&record));
        assert!(!Predicate::eq("data.owner", "u2").matches(&record));
        assert!(Predicate::leaf("data.amount", CompareOp::Gt, 1000.5).matches(&record));
        assert!(!Predicate::leaf("data.amount", CompareOp::Lt, 1200).matches(&record));
        assert!(Predicate::leaf("data.amount", CompareOp::Lte, 1200).matches(&record));
        assert!(Predicate::leaf("data.team", CompareOp::In, json!(["g2"])).matches(&record));
        assert!(Predicate::leaf("data.team", CompareOp::Nin, json!(["g9"])).matches(&record));
        assert!(Predicate::leaf("data.company", CompareOp::Contains, "INDUS").matches(&record));
        assert!(Predicate::leaf("data.company", CompareOp::EndsWith, "tries").matches(&record));
    }

    #[test]
    fn array_fields_match_any_element() {
        let record = lead();
        assert!(Predicate::eq("data.tags", "hot").matches(&record));
        assert!(Predicate::leaf("data.tags", CompareOp::StartsWith, "ENT").matches(&record));
        assert!(!Predicate::eq("data.tags", "cold").matches(&record));
    }

    #[test]
    fn missing_fields_only_equal_null() {
        let record = lead();
        assert!(!Predicate::eq("data.region", "emea").matches(&record));
        assert!(Predicate::eq("data.region", Value::Null).matches(&record));
        assert!(Predicate::leaf("data.region", CompareOp::Ne, "emea").matches(&record));
        assert!(!Predicate::leaf("data.region", CompareOp::Gt, 1).matches(&record));
    }

    #[test]
    fn composite_equality_renders_as_a_value_not_an_operator() {
        let p = Predicate::eq("data.owner", json!({ "$ne": null }));
        assert_eq!(
            p.to_document(),
            json!({ "data.owner": { "$eq": { "$ne": null } } })
        );
        assert!(!p.matches(&json!({ "data": { "owner": "someone-else" } })));
        assert!(p.matches(&json!({ "data": { "owner": { "$ne": null } } })));

        let p = Predicate::eq("data.tags", json!(["hot"]));
        assert_eq!(p.to_document(), json!({ "data.tags": { "$eq": ["hot"] } }));
        assert_eq!(
            Predicate::eq("data.owner", "u1").to_document(),
            json!({ "data.owner": "u1" })
        );
    }

    #[test]
    fn large_integers_compare_exactly() {
        let record = json!({ "data": { "n": 9007199254740992u64, "m": u64::MAX } });
        assert!(!Predicate::eq("data.n", 9007199254740993u64).matches(&record));
        assert!(Predicate::eq("data.n", 9007199254740992u64).matches(&record));
        assert!(Predicate::leaf("data.n", CompareOp::Lt, 9007199254740993u64).matches(&record));
        assert!(Predicate::leaf("data.m", CompareOp::Gt, -1).matches(&record));
        assert!(Predicate::eq("data.n", 9007199254740992.0).matches(&record));
    }
}
