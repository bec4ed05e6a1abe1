//! Filter types for scoping rows of an entity type.
//!
//! A [`Filter`] is the composable predicate a persistence layer keeps as the
//! default query filter of an entity type. The tenant engine only ever
//! captures, composes and re-installs these values, so `Clone` is a deep copy
//! and `PartialEq` is structural equality.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A filter value that can be used in comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// JSON value.
    Json(serde_json::Value),
    /// List of values.
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compare two values of compatible kinds.
    ///
    /// Integers and floats compare numerically; strings and booleans compare
    /// with their natural order. Anything else (including null) is unordered.
    pub fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Loose equality used when evaluating filters: numeric kinds compare by
    /// value, null never equals anything.
    pub(crate) fn loosely_eq(&self, other: &FilterValue) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        match self.compare(other) {
            Some(ordering) => ordering == Ordering::Equal,
            None => self == other,
        }
    }
}

impl std::fmt::Display for FilterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "'{}'", v),
            Self::Json(v) => write!(f, "{}", v),
            Self::List(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<uuid::Uuid> for FilterValue {
    fn from(v: uuid::Uuid) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// Read access to the named fields of an instance.
///
/// Implemented by row types a collaborator can evaluate filters against.
/// Returning `None` means the instance has no such field.
pub trait FieldAccess {
    /// Get the value of a field by name.
    fn field_value(&self, field: &str) -> Option<FilterValue>;
}

/// A complete filter that can be converted to SQL.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Filter {
    /// No filter (always true).
    #[default]
    None,

    /// Equals comparison.
    Equals(SmolStr, FilterValue),
    /// Not equals comparison.
    NotEquals(SmolStr, FilterValue),

    /// Less than comparison.
    Lt(SmolStr, FilterValue),
    /// Less than or equal comparison.
    Lte(SmolStr, FilterValue),
    /// Greater than comparison.
    Gt(SmolStr, FilterValue),
    /// Greater than or equal comparison.
    Gte(SmolStr, FilterValue),

    /// In a list of values.
    In(SmolStr, Vec<FilterValue>),
    /// Not in a list of values.
    NotIn(SmolStr, Vec<FilterValue>),

    /// Contains (LIKE %value%).
    Contains(SmolStr, FilterValue),
    /// Starts with (LIKE value%).
    StartsWith(SmolStr, FilterValue),
    /// Ends with (LIKE %value).
    EndsWith(SmolStr, FilterValue),

    /// Is null check.
    IsNull(SmolStr),
    /// Is not null check.
    IsNotNull(SmolStr),

    /// Logical AND of multiple filters.
    And(Vec<Filter>),
    /// Logical OR of multiple filters.
    Or(Vec<Filter>),
    /// Logical NOT of a filter.
    Not(Box<Filter>),
}

impl Filter {
    /// Create an empty filter (matches everything).
    pub fn none() -> Self {
        Self::None
    }

    /// Check if this filter is empty.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Create an equality filter.
    pub fn eq(column: impl Into<SmolStr>, value: impl Into<FilterValue>) -> Self {
        Self::Equals(column.into(), value.into())
    }

    /// Create an AND filter.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut filters: Vec<_> = filters.into_iter().filter(|f| !f.is_none()).collect();
        match filters.len() {
            0 => Self::None,
            1 => filters.remove(0),
            _ => Self::And(filters),
        }
    }

    /// Create an OR filter.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut filters: Vec<_> = filters.into_iter().filter(|f| !f.is_none()).collect();
        match filters.len() {
            0 => Self::None,
            1 => filters.remove(0),
            _ => Self::Or(filters),
        }
    }

    /// Create a NOT filter.
    pub fn not(filter: Filter) -> Self {
        if filter.is_none() {
            return Self::None;
        }
        Self::Not(Box::new(filter))
    }

    /// Combine with another filter using AND.
    ///
    /// The receiver is kept intact as the leading term, so an existing
    /// default filter `F` composed with `key = v` reads `F AND key = v`.
    pub fn and_then(self, other: Filter) -> Self {
        if self.is_none() {
            return other;
        }
        if other.is_none() {
            return self;
        }
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            _ => Self::And(vec![self, other]),
        }
    }

    /// Top-level `field = value` terms of this filter.
    ///
    /// Only equalities reachable through conjunctions count; a term under
    /// `Or` or `Not` does not pin the field. Null equalities are skipped.
    /// Later terms win when the same field appears twice.
    pub fn equality_terms(&self) -> Vec<(SmolStr, FilterValue)> {
        let mut terms: Vec<(SmolStr, FilterValue)> = Vec::new();
        self.collect_equalities(&mut terms);
        terms
    }

    fn collect_equalities(&self, terms: &mut Vec<(SmolStr, FilterValue)>) {
        match self {
            Self::Equals(col, val) if !val.is_null() => {
                terms.retain(|(existing, _)| existing != col);
                terms.push((col.clone(), val.clone()));
            }
            Self::And(filters) => {
                for filter in filters {
                    filter.collect_equalities(terms);
                }
            }
            _ => {}
        }
    }

    /// Evaluate this filter against an in-memory instance.
    ///
    /// Missing fields behave like SQL NULL: comparisons fail and only
    /// `IsNull` matches.
    pub fn matches<R: FieldAccess + ?Sized>(&self, row: &R) -> bool {
        let value = |col: &SmolStr| row.field_value(col).unwrap_or(FilterValue::Null);
        let ordered = |col: &SmolStr, rhs: &FilterValue, accept: fn(Ordering) -> bool| {
            value(col).compare(rhs).is_some_and(accept)
        };
        let text = |col: &SmolStr, rhs: &FilterValue, test: fn(&str, &str) -> bool| match (
            value(col),
            rhs,
        ) {
            (FilterValue::String(lhs), FilterValue::String(rhs)) => test(&lhs, rhs),
            _ => false,
        };

        match self {
            Self::None => true,
            Self::Equals(col, val) => {
                if val.is_null() {
                    value(col).is_null()
                } else {
                    value(col).loosely_eq(val)
                }
            }
            Self::NotEquals(col, val) => {
                let actual = value(col);
                if val.is_null() {
                    !actual.is_null()
                } else {
                    !actual.is_null() && !actual.loosely_eq(val)
                }
            }
            Self::Lt(col, val) => ordered(col, val, |o| o == Ordering::Less),
            Self::Lte(col, val) => ordered(col, val, |o| o != Ordering::Greater),
            Self::Gt(col, val) => ordered(col, val, |o| o == Ordering::Greater),
            Self::Gte(col, val) => ordered(col, val, |o| o != Ordering::Less),
            Self::In(col, values) => {
                let actual = value(col);
                values.iter().any(|v| actual.loosely_eq(v))
            }
            Self::NotIn(col, values) => {
                let actual = value(col);
                !actual.is_null() && !values.iter().any(|v| actual.loosely_eq(v))
            }
            Self::Contains(col, val) => text(col, val, |lhs, rhs| lhs.contains(rhs)),
            Self::StartsWith(col, val) => text(col, val, |lhs, rhs| lhs.starts_with(rhs)),
            Self::EndsWith(col, val) => text(col, val, |lhs, rhs| lhs.ends_with(rhs)),
            Self::IsNull(col) => value(col).is_null(),
            Self::IsNotNull(col) => !value(col).is_null(),
            Self::And(filters) => filters.iter().all(|f| f.matches(row)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(row)),
            Self::Not(filter) => !filter.matches(row),
        }
    }

    /// Generate SQL for this filter with parameter placeholders.
    /// Returns (sql, params) where params are the values to bind.
    pub fn to_sql(&self, param_offset: usize) -> (String, Vec<FilterValue>) {
        let mut params = Vec::new();
        let sql = self.to_sql_with_params(param_offset, &mut params);
        (sql, params)
    }

    fn push_param(param_offset: usize, params: &mut Vec<FilterValue>, value: FilterValue) -> usize {
        params.push(value);
        param_offset + params.len()
    }

    fn to_sql_with_params(&self, param_offset: usize, params: &mut Vec<FilterValue>) -> String {
        match self {
            Self::None => "TRUE".to_string(),

            Self::Equals(col, val) => {
                if val.is_null() {
                    format!("{} IS NULL", col)
                } else {
                    let idx = Self::push_param(param_offset, params, val.clone());
                    format!("{} = ${}", col, idx)
                }
            }
            Self::NotEquals(col, val) => {
                if val.is_null() {
                    format!("{} IS NOT NULL", col)
                } else {
                    let idx = Self::push_param(param_offset, params, val.clone());
                    format!("{} != ${}", col, idx)
                }
            }

            Self::Lt(col, val) => {
                let idx = Self::push_param(param_offset, params, val.clone());
                format!("{} < ${}", col, idx)
            }
            Self::Lte(col, val) => {
                let idx = Self::push_param(param_offset, params, val.clone());
                format!("{} <= ${}", col, idx)
            }
            Self::Gt(col, val) => {
                let idx = Self::push_param(param_offset, params, val.clone());
                format!("{} > ${}", col, idx)
            }
            Self::Gte(col, val) => {
                let idx = Self::push_param(param_offset, params, val.clone());
                format!("{} >= ${}", col, idx)
            }

            Self::In(col, values) => {
                if values.is_empty() {
                    return "FALSE".to_string();
                }
                let placeholders: Vec<_> = values
                    .iter()
                    .map(|v| format!("${}", Self::push_param(param_offset, params, v.clone())))
                    .collect();
                format!("{} IN ({})", col, placeholders.join(", "))
            }
            Self::NotIn(col, values) => {
                if values.is_empty() {
                    return "TRUE".to_string();
                }
                let placeholders: Vec<_> = values
                    .iter()
                    .map(|v| format!("${}", Self::push_param(param_offset, params, v.clone())))
                    .collect();
                format!("{} NOT IN ({})", col, placeholders.join(", "))
            }

            Self::Contains(col, val) => {
                let param = match val {
                    FilterValue::String(s) => FilterValue::String(format!("%{}%", s)),
                    other => other.clone(),
                };
                let idx = Self::push_param(param_offset, params, param);
                format!("{} LIKE ${}", col, idx)
            }
            Self::StartsWith(col, val) => {
                let param = match val {
                    FilterValue::String(s) => FilterValue::String(format!("{}%", s)),
                    other => other.clone(),
                };
                let idx = Self::push_param(param_offset, params, param);
                format!("{} LIKE ${}", col, idx)
            }
            Self::EndsWith(col, val) => {
                let param = match val {
                    FilterValue::String(s) => FilterValue::String(format!("%{}", s)),
                    other => other.clone(),
                };
                let idx = Self::push_param(param_offset, params, param);
                format!("{} LIKE ${}", col, idx)
            }

            Self::IsNull(col) => format!("{} IS NULL", col),
            Self::IsNotNull(col) => format!("{} IS NOT NULL", col),

            Self::And(filters) => {
                if filters.is_empty() {
                    return "TRUE".to_string();
                }
                let parts: Vec<_> = filters
                    .iter()
                    .map(|f| f.to_sql_with_params(param_offset, params))
                    .collect();
                format!("({})", parts.join(" AND "))
            }
            Self::Or(filters) => {
                if filters.is_empty() {
                    return "FALSE".to_string();
                }
                let parts: Vec<_> = filters
                    .iter()
                    .map(|f| f.to_sql_with_params(param_offset, params))
                    .collect();
                format!("({})", parts.join(" OR "))
            }
            Self::Not(filter) => {
                let inner = filter.to_sql_with_params(param_offset, params);
                format!("NOT ({})", inner)
            }
        }
    }
}
