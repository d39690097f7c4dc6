use crate::store::QueryError;
use models::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextMatch {
    Contains,
    StartsWith,
    EndsWith,
}

/// Closed-form query algebra over documents. `Empty` is the identity:
/// `And(x, Empty) == x`, collapsed at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Empty,
    Compare {
        op: CompareOp,
        field: String,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    Text {
        mode: TextMatch,
        field: String,
        needle: String,
        case_sensitive: bool,
    },
    Regex {
        field: String,
        pattern: String,
        case_sensitive: bool,
    },
    Exists(String),
    NotExists(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(op: CompareOp, field: &str, value: impl Into<Value>) -> Filter {
        Filter::Compare {
            op,
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Filter {
        Filter::compare(CompareOp::Eq, field, value)
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Filter {
        Filter::compare(CompareOp::Ne, field, value)
    }

    pub fn is_in(field: &str, values: impl IntoIterator<Item = impl Into<Value>>) -> Filter {
        Filter::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn text(mode: TextMatch, field: &str, needle: &str, case_sensitive: bool) -> Filter {
        Filter::Text {
            mode,
            field: field.to_string(),
            needle: needle.to_string(),
            case_sensitive,
        }
    }

    pub fn regex(field: &str, pattern: &str, case_sensitive: bool) -> Filter {
        Filter::Regex {
            field: field.to_string(),
            pattern: pattern.to_string(),
            case_sensitive,
        }
    }

    pub fn exists(field: &str) -> Filter {
        Filter::Exists(field.to_string())
    }

    pub fn not_exists(field: &str) -> Filter {
        Filter::NotExists(field.to_string())
    }

    /// Conjunction; `Empty` members collapse away at construction.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Self::combine(filters, true)
    }

    /// Disjunction; `Empty` members collapse away at construction.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Self::combine(filters, false)
    }

    pub fn negate(self) -> Filter {
        match self {
            Filter::Empty => Filter::Empty,
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    fn combine(filters: impl IntoIterator<Item = Filter>, conjunction: bool) -> Filter {
        let mut members: Vec<Filter> = filters
            .into_iter()
            .filter(|f| !matches!(f, Filter::Empty))
            .collect();
        match members.len() {
            0 => Filter::Empty,
            1 => members.pop().unwrap(),
            _ if conjunction => Filter::And(members),
            _ => Filter::Or(members),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::Empty)
    }

    /// Evaluate against a document. Fails only on an invalid regex pattern,
    /// reported as `BadExpression` before considering any further documents.
    pub fn matches(&self, doc: &Document) -> Result<bool, QueryError> {
        Ok(match self {
            Filter::Empty => true,
            Filter::Compare { op, field, value } => compare_values(*op, doc.get(field), value),
            Filter::In { field, values } => match doc.get(field) {
                Some(actual) => values.iter().any(|v| values_equal(actual, v)),
                None => false,
            },
            Filter::Text {
                mode,
                field,
                needle,
                case_sensitive,
            } => match doc.get(field) {
                Some(Value::String(s)) => {
                    let (s, needle) = if *case_sensitive {
                        (s.clone(), needle.clone())
                    } else {
                        (s.to_lowercase(), needle.to_lowercase())
                    };
                    match mode {
                        TextMatch::Contains => s.contains(&needle),
                        TextMatch::StartsWith => s.starts_with(&needle),
                        TextMatch::EndsWith => s.ends_with(&needle),
                    }
                }
                _ => false,
            },
            Filter::Regex {
                field,
                pattern,
                case_sensitive,
            } => {
                let re = regex::RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|err| QueryError::BadExpression(err.to_string()))?;
                match doc.get(field) {
                    Some(Value::String(s)) => re.is_match(s),
                    _ => false,
                }
            }
            Filter::Exists(field) => doc.contains_key(field),
            Filter::NotExists(field) => !doc.contains_key(field),
            Filter::And(members) => {
                for member in members {
                    if !member.matches(doc)? {
                        return Ok(false);
                    }
                }
                true
            }
            Filter::Or(members) => {
                for member in members {
                    if member.matches(doc)? {
                        return Ok(true);
                    }
                }
                false
            }
            Filter::Not(inner) => !inner.matches(doc)?,
        })
    }
}

fn compare_values(op: CompareOp, actual: Option<&Value>, expected: &Value) -> bool {
    use CompareOp::*;

    // Equality treats an absent field like null; ordering comparisons
    // require a present, type-compatible value.
    let actual = actual.unwrap_or(&Value::Null);
    match op {
        Eq => values_equal(actual, expected),
        Ne => !values_equal(actual, expected),
        Gt | Ge | Lt | Le => match value_cmp(actual, expected) {
            Some(ord) => match op {
                Gt => ord == Ordering::Greater,
                Ge => ord != Ordering::Less,
                Lt => ord == Ordering::Less,
                Le => ord != Ordering::Greater,
                _ => unreachable!(),
            },
            None => false,
        },
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering over same-kind values; cross-kind comparisons are undefined.
pub(crate) fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
