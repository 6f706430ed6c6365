//! # Notification Filters
//!
//! Backend-neutral WHERE clauses for notification searches.
//!
//! A [`NotificationFilter`] is a keyed set of [`Clause`]s combined with AND. Keys let a
//! caller replace one clause in place between poll iterations (the `trigger_date` bound and
//! the `id` cursor move forward every iteration) without rebuilding the rest.
//!
//! Stores either render a filter to SQL with bound parameters (see
//! [`crate::store::postgres`]) or evaluate it in process with SQL NULL semantics via
//! [`NotificationFilter::matches`].

pub mod condition;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{NotifierError, Result};
use crate::models::Notification;

pub use condition::{negate_operator, Condition};

/// Comparison operators usable in a [`Predicate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Lte => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Gte => ordering != Ordering::Less,
            // handled separately, never reached through an ordering
            Operator::Like => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Typed value bound into a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Integer(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FilterValue {
    fn type_name(&self) -> &'static str {
        match self {
            FilterValue::Integer(_) => "integer",
            FilterValue::Bool(_) => "bool",
            FilterValue::Timestamp(_) => "timestamp",
            FilterValue::Text(_) => "text",
        }
    }

    fn compare(&self, other: &FilterValue) -> Result<Ordering> {
        match (self, other) {
            (FilterValue::Integer(a), FilterValue::Integer(b)) => Ok(a.cmp(b)),
            (FilterValue::Bool(a), FilterValue::Bool(b)) => Ok(a.cmp(b)),
            (FilterValue::Timestamp(a), FilterValue::Timestamp(b)) => Ok(a.cmp(b)),
            (FilterValue::Text(a), FilterValue::Text(b)) => Ok(a.cmp(b)),
            (a, b) => Err(NotifierError::query_failed(
                "filter",
                format!("cannot compare {} with {}", a.type_name(), b.type_name()),
            )),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Integer(value) => write!(f, "{value}"),
            FilterValue::Bool(value) => write!(f, "{value}"),
            FilterValue::Timestamp(value) => write!(f, "'{}'", value.format("%Y-%m-%d %H:%M:%S")),
            FilterValue::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Integer(i64::from(value))
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

/// `column <operator> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Predicate {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<FilterValue>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// Evaluate against a column value; a NULL column never matches
    fn evaluate(&self, actual: Option<&FilterValue>) -> Result<bool> {
        let Some(actual) = actual else {
            return Ok(false);
        };
        if self.operator == Operator::Like {
            return match (actual, &self.value) {
                (FilterValue::Text(text), FilterValue::Text(pattern)) => {
                    Ok(like_matches(text.as_bytes(), pattern.as_bytes()))
                }
                (a, b) => Err(NotifierError::query_failed(
                    "filter",
                    format!("LIKE needs text operands, got {} and {}", a.type_name(), b.type_name()),
                )),
            };
        }
        Ok(self.operator.accepts(actual.compare(&self.value)?))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.operator, self.value)
    }
}

/// One AND-ed element of a [`NotificationFilter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    Compare(Predicate),
    In {
        column: String,
        values: Vec<FilterValue>,
    },
    IsNull {
        column: String,
    },
    IsNotNull {
        column: String,
    },
    /// OR group
    AnyOf(Vec<Clause>),
}

impl Clause {
    pub fn compare(column: impl Into<String>, operator: Operator, value: impl Into<FilterValue>) -> Self {
        Clause::Compare(Predicate::new(column, operator, value))
    }

    pub fn equals(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(column, Operator::Eq, value)
    }

    pub fn one_of<V: Into<FilterValue>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Clause::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Clause::IsNull {
            column: column.into(),
        }
    }

    /// Columns referenced by this clause, in order of appearance
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Clause::Compare(predicate) => vec![predicate.column.as_str()],
            Clause::In { column, .. } | Clause::IsNull { column } | Clause::IsNotNull { column } => {
                vec![column.as_str()]
            }
            Clause::AnyOf(clauses) => clauses.iter().flat_map(Clause::columns).collect(),
        }
    }

    /// Evaluate against a notification with SQL NULL semantics
    pub fn matches(&self, notification: &Notification) -> Result<bool> {
        match self {
            Clause::Compare(predicate) => {
                let actual = notification.column_value(&predicate.column)?;
                predicate.evaluate(actual.as_ref())
            }
            Clause::In { column, values } => {
                let Some(actual) = notification.column_value(column)? else {
                    return Ok(false);
                };
                for value in values {
                    if actual.compare(value)? == Ordering::Equal {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Clause::IsNull { column } => Ok(notification.column_value(column)?.is_none()),
            Clause::IsNotNull { column } => Ok(notification.column_value(column)?.is_some()),
            Clause::AnyOf(clauses) => {
                for clause in clauses {
                    if clause.matches(notification)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

impl From<Predicate> for Clause {
    fn from(predicate: Predicate) -> Self {
        Clause::Compare(predicate)
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Compare(predicate) => write!(f, "{predicate}"),
            Clause::In { column, values } => {
                let values = values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{column} IN ({values})")
            }
            Clause::IsNull { column } => write!(f, "{column} IS NULL"),
            Clause::IsNotNull { column } => write!(f, "{column} IS NOT NULL"),
            Clause::AnyOf(clauses) => {
                let clauses = clauses
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" OR ");
                write!(f, "({clauses})")
            }
        }
    }
}

/// Keyed conjunction of clauses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationFilter {
    clauses: BTreeMap<String, Clause>,
}

impl NotificationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the clause stored under `key`
    pub fn insert(&mut self, key: impl Into<String>, clause: impl Into<Clause>) -> &mut Self {
        self.clauses.insert(key.into(), clause.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, clause: impl Into<Clause>) -> Self {
        self.insert(key, clause);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Clause> {
        self.clauses.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Clause> {
        self.clauses.get(key)
    }

    /// Merge `other` into this filter; existing keys are kept
    pub fn merge_distinct(&mut self, other: NotificationFilter) {
        for (key, clause) in other.clauses {
            self.clauses.entry(key).or_insert(clause);
        }
    }

    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.values()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, notification: &Notification) -> Result<bool> {
        for clause in self.clauses.values() {
            if !clause.matches(notification)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for NotificationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("TRUE");
        }
        let clauses = self
            .clauses
            .values()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" AND ");
        f.write_str(&clauses)
    }
}

/// Row window `[begin, end)` of an ordered search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub begin: usize,
    pub end: usize,
}

impl Page {
    pub fn new(begin: usize, end: usize) -> Self {
        Self {
            begin,
            end: end.max(begin),
        }
    }

    /// First `size` rows
    pub fn first(size: usize) -> Self {
        Self::new(0, size)
    }

    pub fn offset(&self) -> usize {
        self.begin
    }

    pub fn limit(&self) -> usize {
        self.end - self.begin
    }
}

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && name.len() <= 63 {
        Ok(())
    } else {
        Err(NotifierError::invalid_argument(format!(
            "'{name}' is not a valid identifier"
        )))
    }
}

/// SQL LIKE: `%` matches any run, `_` one character
fn like_matches(text: &[u8], pattern: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'%', rest)) => (0..=text.len()).any(|skip| like_matches(&text[skip..], rest)),
        Some((b'_', rest)) => !text.is_empty() && like_matches(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like_matches(&text[1..], rest),
    }
}
