//! Attribute access, sort comparison and filter evaluation.

use crate::error::ProviderError;
use crate::models::{SortCriterion, SortDirection};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Named attribute access used by sort criteria and attribute filters.
pub trait Attributes {
    /// Value of `name`, or `None` when the attribute is absent.
    fn attribute(&self, name: &str) -> Option<Value>;
}

impl Attributes for Value {
    /// Dotted names (`owner.name`) walk nested objects.
    fn attribute(&self, name: &str) -> Option<Value> {
        let mut current = self;
        for segment in name.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }
}

impl Attributes for BTreeMap<String, Value> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
///
/// Missing attributes sort like `null`.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(Some(left), Some(right));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compare two payloads by a list of sort criteria, first criterion first.
///
/// An empty criteria list treats everything as equal so stable sorts keep
/// the incoming order.
pub fn compare_by_criteria<D: Attributes>(a: &D, b: &D, criteria: &[SortCriterion]) -> Ordering {
    for criterion in criteria {
        let left = a.attribute(&criterion.attribute);
        let right = b.attribute(&criterion.attribute);
        let ordering = compare_values(left.as_ref(), right.as_ref());
        let ordering = match criterion.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Row predicate applied by sources and by the merge engine.
pub trait DataFilter<D>: Send + Sync {
    fn filter(&self, data: &D) -> bool;
}

impl<D, F> DataFilter<D> for F
where
    F: Fn(&D) -> bool + Send + Sync,
{
    fn filter(&self, data: &D) -> bool {
        self(data)
    }
}

/// Comparison operator of an [`AttributeFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StartsWith,
    EndsWith,
    Contains,
}

impl FromStr for FilterOperator {
    type Err = ProviderError;

    /// Accepts `$eq` style names with or without the leading `$`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = value.trim().trim_start_matches('$').to_ascii_lowercase();
        match name.as_str() {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "lt" => Ok(Self::Lt),
            "le" => Ok(Self::Le),
            "gt" => Ok(Self::Gt),
            "ge" => Ok(Self::Ge),
            "sw" => Ok(Self::StartsWith),
            "ew" => Ok(Self::EndsWith),
            "co" => Ok(Self::Contains),
            _ => Err(ProviderError::Config(format!(
                "unknown filter operator '{}'",
                value
            ))),
        }
    }
}

/// Declarative filter over named attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeFilter {
    Compare {
        attribute: String,
        op: FilterOperator,
        value: Value,
    },
    And(Vec<AttributeFilter>),
    Or(Vec<AttributeFilter>),
}

impl AttributeFilter {
    pub fn compare(attribute: impl Into<String>, op: FilterOperator, value: Value) -> Self {
        Self::Compare {
            attribute: attribute.into(),
            op,
            value,
        }
    }

    /// Parse `attribute:op:value`.
    ///
    /// The value is read as JSON when it parses as JSON and as a plain string
    /// otherwise, so `age:$gt:30` compares numbers and `name:$sw:Al` strings.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] for malformed expressions or unknown
    /// operators.
    pub fn parse(expression: &str) -> Result<Self, ProviderError> {
        let mut parts = expression.splitn(3, ':');
        let (Some(attribute), Some(op), Some(raw)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ProviderError::Config(format!(
                "filter '{}' must look like attribute:op:value",
                expression
            )));
        };
        if attribute.trim().is_empty() {
            return Err(ProviderError::Config(format!(
                "filter '{}' has an empty attribute",
                expression
            )));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(Self::compare(attribute.trim(), op.parse()?, value))
    }

    /// Evaluate against any attribute-bearing payload.
    pub fn matches<D: Attributes>(&self, data: &D) -> bool {
        match self {
            Self::Compare {
                attribute,
                op,
                value,
            } => {
                let actual = data.attribute(attribute);
                evaluate(*op, actual.as_ref(), value)
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(data)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(data)),
        }
    }
}

fn evaluate(op: FilterOperator, actual: Option<&Value>, expected: &Value) -> bool {
    let ordering = || compare_values(actual, Some(expected));
    match op {
        FilterOperator::Eq => actual.unwrap_or(&Value::Null) == expected,
        FilterOperator::Ne => actual.unwrap_or(&Value::Null) != expected,
        FilterOperator::Lt => actual.is_some() && ordering() == Ordering::Less,
        FilterOperator::Le => actual.is_some() && ordering() != Ordering::Greater,
        FilterOperator::Gt => actual.is_some() && ordering() == Ordering::Greater,
        FilterOperator::Ge => actual.is_some() && ordering() != Ordering::Less,
        FilterOperator::StartsWith => text_test(actual, expected, |a, e| a.starts_with(e)),
        FilterOperator::EndsWith => text_test(actual, expected, |a, e| a.ends_with(e)),
        FilterOperator::Contains => text_test(actual, expected, |a, e| a.contains(e)),
    }
}

fn text_test(actual: Option<&Value>, expected: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (actual.and_then(Value::as_str), expected.as_str()) {
        (Some(actual), Some(expected)) => test(actual, expected),
        _ => false,
    }
}

impl<D: Attributes> DataFilter<D> for AttributeFilter {
    fn filter(&self, data: &D) -> bool {
        self.matches(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_attribute_walks_nested_objects() {
        let row = json!({"owner": {"name": "ada"}, "id": 1});
        assert_eq!(row.attribute("owner.name"), Some(json!("ada")));
        assert_eq!(row.attribute("owner.age"), None);
        assert_eq!(row.attribute("id"), Some(json!(1)));
    }

    #[test]
    fn compare_values_orders_mixed_types() {
        assert_eq!(
            compare_values(None, Some(&json!(false))),
            Ordering::Less,
            "missing sorts first"
        );
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!("b")), Some(&json!(3))),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(Some(&json!([1, 2])), Some(&json!([1, 3]))),
            Ordering::Less
        );
    }

    #[test]
    fn compare_by_criteria_uses_later_keys_as_tie_breakers() {
        let a = json!({"team": "x", "score": 3});
        let b = json!({"team": "x", "score": 5});
        let criteria = vec![
            SortCriterion::ascending("team"),
            SortCriterion::descending("score"),
        ];
        assert_eq!(compare_by_criteria(&a, &b, &criteria), Ordering::Greater);
        assert_eq!(compare_by_criteria(&a, &b, &[]), Ordering::Equal);
    }

    #[test]
    fn parse_reads_json_or_string_values() {
        let numeric = AttributeFilter::parse("age:$gt:30").expect("parse");
        assert!(numeric.matches(&json!({"age": 31})));
        assert!(!numeric.matches(&json!({"age": 30})));
        assert!(!numeric.matches(&json!({"name": "no age"})));

        let text = AttributeFilter::parse("name:sw:Al").expect("parse");
        assert!(text.matches(&json!({"name": "Alice"})));
        assert!(!text.matches(&json!({"name": "Bob"})));
    }

    #[test]
    fn parse_rejects_malformed_expressions() {
        assert!(AttributeFilter::parse("age:$gt").is_err());
        assert!(AttributeFilter::parse(":eq:1").is_err());
        assert!(AttributeFilter::parse("age:$between:1").is_err());
    }

    #[test]
    fn composite_filters_combine_results() {
        let filter = AttributeFilter::Or(vec![
            AttributeFilter::compare("status", FilterOperator::Eq, json!("open")),
            AttributeFilter::And(vec![
                AttributeFilter::compare("status", FilterOperator::Eq, json!("closed")),
                AttributeFilter::compare("title", FilterOperator::Contains, json!("urgent")),
            ]),
        ]);
        assert!(filter.matches(&json!({"status": "open"})));
        assert!(filter.matches(&json!({"status": "closed", "title": "an urgent fix"})));
        assert!(!filter.matches(&json!({"status": "closed", "title": "later"})));
    }

    #[test]
    fn closures_act_as_filters() {
        let even = |row: &Value| row["n"].as_i64().is_some_and(|n| n % 2 == 0);
        assert!(DataFilter::filter(&even, &json!({"n": 4})));
        assert!(!DataFilter::filter(&even, &json!({"n": 5})));
    }
}
