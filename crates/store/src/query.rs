//! Query language for indexed attributes.
//!
//! A query is a conjunction of `(attribute, expression)` clauses. An
//! expression is either a naked value (implicit `$eq`) or an encoded
//! operator:
//!
//! ```text
//! agtuuid = some-uuid            naked, same as $eq:some-uuid
//! weight  = $lt:3600             ordered compare with coercion
//! url     = $!eq:null            ! negates any operator
//! path    = $startswith:/etc/
//! name    = $regex:^agent-\d+$
//! ```
//!
//! Ordered operators coerce both sides: integer first, then float, then
//! plain string comparison. Mixed text/number comparisons do not match.

use std::cmp::Ordering;

use regex::Regex;
use serde::Serialize;

use crate::StoreError;

/// The operator set. `Eq` is selected implicitly for naked expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Inside,
    StartsWith,
    EndsWith,
    Regex,
}

impl Operator {
    fn parse(name: &str) -> Option<Operator> {
        match name {
            "eq" => Some(Operator::Eq),
            "gt" => Some(Operator::Gt),
            "gte" => Some(Operator::Gte),
            "lt" => Some(Operator::Lt),
            "lte" => Some(Operator::Lte),
            "contains" => Some(Operator::Contains),
            "inside" => Some(Operator::Inside),
            "startswith" => Some(Operator::StartsWith),
            "endswith" => Some(Operator::EndsWith),
            "regex" => Some(Operator::Regex),
            _ => None,
        }
    }
}

/// One parsed clause: attribute, operator, negation flag, and subject.
#[derive(Debug, Clone)]
pub(crate) struct Condition {
    pub attribute: String,
    pub operator: Operator,
    pub negated: bool,
    pub subject: String,
}

impl Condition {
    /// Parse `expression` for `attribute`, e.g. `$!lt:10`.
    pub(crate) fn parse(attribute: &str, expression: &str) -> Result<Condition, StoreError> {
        let (negated, rest) = if let Some(rest) = expression.strip_prefix("$!") {
            (true, Some(rest))
        } else if let Some(rest) = expression.strip_prefix('$') {
            (false, Some(rest))
        } else {
            (false, None)
        };

        let (operator, subject) = match rest {
            Some(rest) => {
                let Some((name, subject)) = rest.split_once(':') else {
                    return Err(StoreError::InvalidQuery(format!(
                        "operator without separator: {attribute}=\"{expression}\""
                    )));
                };
                let Some(operator) = Operator::parse(name) else {
                    return Err(StoreError::InvalidQuery(format!(
                        "invalid operator in query clause: {attribute}=\"{expression}\""
                    )));
                };
                (operator, subject.to_string())
            }
            None => (Operator::Eq, expression.to_string()),
        };

        Ok(Condition {
            attribute: attribute.to_string(),
            operator,
            negated,
            subject,
        })
    }

    /// Whether the indexed `value` satisfies this clause.
    ///
    /// Comparison failures (coercion mismatch, bad regex) exclude the
    /// object regardless of negation, matching the skip-and-log
    /// behavior of the original store.
    pub(crate) fn matches(&self, value: &str) -> bool {
        let outcome = match self.operator {
            Operator::Eq => Some(value == self.subject),
            Operator::Contains => Some(value.contains(&self.subject)),
            Operator::StartsWith => Some(value.starts_with(&self.subject)),
            Operator::EndsWith => Some(value.ends_with(&self.subject)),
            Operator::Inside => Some(self.subject.contains(value)),
            Operator::Gt => compare(value, &self.subject).map(|o| o == Ordering::Greater),
            Operator::Gte => compare(value, &self.subject).map(|o| o != Ordering::Less),
            Operator::Lt => compare(value, &self.subject).map(|o| o == Ordering::Less),
            Operator::Lte => compare(value, &self.subject).map(|o| o != Ordering::Greater),
            Operator::Regex => match Regex::new(&self.subject) {
                Ok(re) => Some(re.is_match(value)),
                Err(error) => {
                    tracing::warn!(pattern = %self.subject, %error, "invalid regex in query");
                    None
                }
            },
        };

        match outcome {
            Some(matched) => matched != self.negated,
            None => false,
        }
    }
}

/// A conjunction of clauses. An empty query matches every object.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub(crate) clauses: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    /// Add a clause. The expression may be a naked value or an encoded
    /// operator; non-string values are stringified the same way the
    /// index stringifies them, so `filter("weight", 3)` matches an
    /// indexed integer 3.
    pub fn filter(mut self, attribute: impl Into<String>, expression: impl Serialize) -> Self {
        let expression = match serde_json::to_value(expression) {
            Ok(serde_json::Value::String(s)) => s,
            Ok(other) => crate::index_string(&other),
            Err(_) => String::new(),
        };
        self.clauses.push((attribute.into(), expression));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub(crate) fn conditions(&self) -> Result<Vec<Condition>, StoreError> {
        self.clauses
            .iter()
            .map(|(attribute, expression)| Condition::parse(attribute, expression))
            .collect()
    }
}

/// Coerced comparison: integer, then float, then string. `None` when
/// the operands live in different domains.
fn compare(left: &str, right: &str) -> Option<Ordering> {
    if let (Ok(l), Ok(r)) = (left.parse::<i64>(), right.parse::<i64>()) {
        return Some(l.cmp(&r));
    }
    if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return l.partial_cmp(&r);
    }
    // Both text, or one text and one number: compare only like kinds
    let left_numeric = left.parse::<f64>().is_ok();
    let right_numeric = right.parse::<f64>().is_ok();
    if left_numeric != right_numeric {
        return None;
    }
    Some(left.cmp(right))
}
