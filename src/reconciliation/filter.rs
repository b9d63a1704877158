//! Typed candidate filters over a whitelist of purchase fields.
//!
//! A [`FilterExpr`] can only be built through its constructors, which reject
//! unknown field names and values of the wrong kind. A filter that exists is
//! therefore always safe to evaluate in memory or to render as SQL.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use std::cmp::Ordering;

use crate::reconciliation::records::PurchaseRecord;
use crate::types::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    OrderCode,
    Status,
    Channel,
    Store,
    TotalAmount,
    CreatedAt,
    ShippedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Amount,
    Timestamp,
}

impl FilterField {
    /// Resolve a caller supplied field name against the whitelist
    pub fn parse(name: &str) -> LedgerResult<Self> {
        match name {
            "order_code" => Ok(FilterField::OrderCode),
            "status" => Ok(FilterField::Status),
            "channel" => Ok(FilterField::Channel),
            "store" => Ok(FilterField::Store),
            "total_amount" => Ok(FilterField::TotalAmount),
            "created_at" => Ok(FilterField::CreatedAt),
            "shipped_at" => Ok(FilterField::ShippedAt),
            other => Err(LedgerError::Validation(format!(
                "Field '{}' cannot be filtered on",
                other
            ))),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            FilterField::OrderCode => "purchases.order_code",
            FilterField::Status => "purchases.status",
            FilterField::Channel => "purchases.channel",
            FilterField::Store => "purchases.store",
            FilterField::TotalAmount => "purchases.total_amount",
            FilterField::CreatedAt => "purchases.created_at",
            FilterField::ShippedAt => "purchases.shipped_at",
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            FilterField::OrderCode | FilterField::Status | FilterField::Channel | FilterField::Store => {
                ValueKind::Text
            }
            FilterField::TotalAmount => ValueKind::Amount,
            FilterField::CreatedAt | FilterField::ShippedAt => ValueKind::Timestamp,
        }
    }

    fn is_nullable(&self) -> bool {
        matches!(self, FilterField::ShippedAt)
    }

    fn value_of(&self, purchase: &PurchaseRecord) -> Option<FilterValue> {
        match self {
            FilterField::OrderCode => Some(FilterValue::Text(purchase.order_code.clone())),
            FilterField::Status => Some(FilterValue::Text(purchase.status.clone())),
            FilterField::Channel => Some(FilterValue::Text(purchase.channel.clone())),
            FilterField::Store => Some(FilterValue::Text(purchase.store.clone())),
            FilterField::TotalAmount => Some(FilterValue::Amount(purchase.total_amount.clone())),
            FilterField::CreatedAt => Some(FilterValue::Timestamp(purchase.created_at)),
            FilterField::ShippedAt => purchase.shipped_at.map(FilterValue::Timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Amount(BigDecimal),
    Timestamp(NaiveDateTime),
}

impl FilterValue {
    fn kind(&self) -> ValueKind {
        match self {
            FilterValue::Text(_) => ValueKind::Text,
            FilterValue::Amount(_) => ValueKind::Amount,
            FilterValue::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (FilterValue::Text(a), FilterValue::Text(b)) => Some(a.cmp(b)),
            (FilterValue::Amount(a), FilterValue::Amount(b)) => Some(a.cmp(b)),
            (FilterValue::Timestamp(a), FilterValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<BigDecimal> for FilterValue {
    fn from(value: BigDecimal) -> Self {
        FilterValue::Amount(value)
    }
}

impl From<NaiveDateTime> for FilterValue {
    fn from(value: NaiveDateTime) -> Self {
        FilterValue::Timestamp(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Eq(FilterField, FilterValue),
    Range {
        field: FilterField,
        min: Option<FilterValue>,
        max: Option<FilterValue>,
    },
    In(FilterField, Vec<FilterValue>),
    IsNull(FilterField),
    And(Vec<Node>),
}

/// Validated filter expression
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr(Node);

fn check_kind(field: FilterField, value: &FilterValue) -> LedgerResult<()> {
    if field.kind() == value.kind() {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "Value {:?} does not fit field '{}'",
            value,
            field.column()
        )))
    }
}

impl FilterExpr {
    pub fn eq(field: &str, value: impl Into<FilterValue>) -> LedgerResult<Self> {
        let field = FilterField::parse(field)?;
        let value = value.into();
        check_kind(field, &value)?;
        Ok(Self(Node::Eq(field, value)))
    }

    /// Inclusive range; at least one bound is required
    pub fn range(field: &str, min: Option<FilterValue>, max: Option<FilterValue>) -> LedgerResult<Self> {
        let field = FilterField::parse(field)?;
        for bound in min.iter().chain(max.iter()) {
            check_kind(field, bound)?;
        }
        match (&min, &max) {
            (None, None) => {
                return Err(LedgerError::Validation(format!(
                    "Range on '{}' needs at least one bound",
                    field.column()
                )))
            }
            (Some(lo), Some(hi)) if lo.compare(hi) == Some(Ordering::Greater) => {
                return Err(LedgerError::Validation(format!(
                    "Range on '{}' has min above max",
                    field.column()
                )))
            }
            _ => {}
        }
        Ok(Self(Node::Range { field, min, max }))
    }

    pub fn one_of(field: &str, values: Vec<FilterValue>) -> LedgerResult<Self> {
        let field = FilterField::parse(field)?;
        if values.is_empty() {
            return Err(LedgerError::Validation(format!(
                "IN filter on '{}' needs at least one value",
                field.column()
            )));
        }
        for value in &values {
            check_kind(field, value)?;
        }
        Ok(Self(Node::In(field, values)))
    }

    pub fn is_null(field: &str) -> LedgerResult<Self> {
        let field = FilterField::parse(field)?;
        if !field.is_nullable() {
            return Err(LedgerError::Validation(format!(
                "Field '{}' is never null",
                field.column()
            )));
        }
        Ok(Self(Node::IsNull(field)))
    }

    pub fn and(exprs: impl IntoIterator<Item = FilterExpr>) -> Self {
        Self(Node::And(exprs.into_iter().map(|e| e.0).collect()))
    }

    pub fn matches(&self, purchase: &PurchaseRecord) -> bool {
        self.0.matches(purchase)
    }

    /// Render as a SQL predicate with `$n` placeholders, appending the bound
    /// values to `params` in placeholder order
    pub fn to_sql(&self, params: &mut Vec<FilterValue>) -> String {
        self.0.to_sql(params)
    }
}

impl Node {
    fn matches(&self, purchase: &PurchaseRecord) -> bool {
        match self {
            Node::Eq(field, value) => field.value_of(purchase).as_ref() == Some(value),
            Node::Range { field, min, max } => match field.value_of(purchase) {
                Some(actual) => {
                    let above_min = min
                        .as_ref()
                        .is_none_or(|lo| actual.compare(lo) != Some(Ordering::Less));
                    let below_max = max
                        .as_ref()
                        .is_none_or(|hi| actual.compare(hi) != Some(Ordering::Greater));
                    above_min && below_max
                }
                None => false,
            },
            Node::In(field, values) => field
                .value_of(purchase)
                .is_some_and(|actual| values.contains(&actual)),
            Node::IsNull(field) => field.value_of(purchase).is_none(),
            Node::And(nodes) => nodes.iter().all(|node| node.matches(purchase)),
        }
    }

    fn to_sql(&self, params: &mut Vec<FilterValue>) -> String {
        let bind = |value: &FilterValue, params: &mut Vec<FilterValue>| {
            params.push(value.clone());
            format!("${}", params.len())
        };
        match self {
            Node::Eq(field, value) => format!("{} = {}", field.column(), bind(value, params)),
            Node::Range { field, min, max } => {
                let mut parts = Vec::new();
                if let Some(lo) = min {
                    parts.push(format!("{} >= {}", field.column(), bind(lo, params)));
                }
                if let Some(hi) = max {
                    parts.push(format!("{} <= {}", field.column(), bind(hi, params)));
                }
                format!("({})", parts.join(" AND "))
            }
            Node::In(field, values) => {
                let placeholders: Vec<String> = values.iter().map(|v| bind(v, params)).collect();
                format!("{} IN ({})", field.column(), placeholders.join(", "))
            }
            Node::IsNull(field) => format!("{} IS NULL", field.column()),
            Node::And(nodes) if nodes.is_empty() => "TRUE".to_string(),
            Node::And(nodes) => {
                let parts: Vec<String> = nodes.iter().map(|node| node.to_sql(params)).collect();
                format!("({})", parts.join(" AND "))
            }
        }
    }
}
