//! Turning debuggee values into DAP `variables` entries.
//!
//! Children are never walked eagerly: rendering a value registers a handle for
//! it, and its children are produced only when the client asks for that
//! handle.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::pin_cache::ExpiringLruCache;
use crate::runtime::{DebugException, DebugValue, Inspection, ValueRef};
use crate::values::{ValueTracker, NO_CHILDREN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub variables_reference: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub named_variables: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariablesFilter {
    All,
    Named,
    Indexed,
}

impl VariablesFilter {
    pub fn parse(filter: Option<&str>) -> Self {
        match filter {
            Some("named") => VariablesFilter::Named,
            Some("indexed") => VariablesFilter::Indexed,
            _ => VariablesFilter::All,
        }
    }
}

/// Values built by the inspector itself (table rows, exception details).
///
/// Nothing in the debuggee references these, so whoever creates one must pin
/// it until the client is done with it.
pub enum Synthetic {
    Text(String),
    Array(Vec<ValueRef>),
    Struct(Vec<(String, ValueRef)>),
}

impl DebugValue for Synthetic {
    fn inspect(&self) -> Inspection {
        match self {
            Synthetic::Text(text) => Inspection::String(text.clone()),
            Synthetic::Array(items) => Inspection::Array(items.clone()),
            Synthetic::Struct(fields) => Inspection::Struct(fields.clone()),
        }
    }
}

impl Synthetic {
    /// Reshape a table into an array of row structs keyed by column name.
    pub fn table_rows(columns: &[String], rows: &[Vec<ValueRef>]) -> Self {
        let rows = rows
            .iter()
            .map(|row| {
                let fields = columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Vec<_>>();
                Arc::new(Synthetic::Struct(fields)) as ValueRef
            })
            .collect();
        Synthetic::Array(rows)
    }

    pub fn exception(exception: &DebugException) -> Self {
        let text = |s: &str| Arc::new(Synthetic::Text(s.to_string())) as ValueRef;
        let mut fields = vec![
            ("type".to_string(), text(&exception.type_name)),
            ("message".to_string(), text(&exception.message)),
        ];
        if let Some(detail) = &exception.detail {
            fields.push(("detail".to_string(), text(detail)));
        }
        if !exception.stack_trace.is_empty() {
            fields.push(("stackTrace".to_string(), text(&exception.stack_trace)));
        }
        if let Some(inner) = &exception.inner {
            fields.push(("innerException".to_string(), text(inner)));
        }
        Synthetic::Struct(fields)
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

pub struct Inspector<'a> {
    values: &'a ValueTracker,
    pins: &'a ExpiringLruCache<u64, ValueRef>,
}

impl<'a> Inspector<'a> {
    pub fn new(values: &'a ValueTracker, pins: &'a ExpiringLruCache<u64, ValueRef>) -> Self {
        Self { values, pins }
    }

    /// Register a value the inspector created and keep it alive in the pin
    /// cache.
    pub fn pin(&self, value: ValueRef) -> u64 {
        let id = self.values.register_or_get_id(&value);
        self.pins.put(id, value);
        id
    }

    pub fn variable(&self, name: impl Into<String>, value: &ValueRef) -> Variable {
        let name = name.into();
        let scalar = |value: String, type_name: &str| Variable {
            name: name.clone(),
            value,
            type_name: type_name.to_string(),
            variables_reference: NO_CHILDREN,
            named_variables: None,
            indexed_variables: None,
        };

        match value.inspect() {
            Inspection::Null => scalar("null".to_string(), "null"),
            Inspection::Bool(b) => scalar(b.to_string(), "boolean"),
            Inspection::Number(text) => scalar(text, "number"),
            Inspection::String(text) => scalar(format!("{text:?}"), "string"),
            Inspection::Other { type_name, summary } => scalar(summary, &type_name),
            Inspection::Array(items) => {
                let len = items.len();
                Variable {
                    variables_reference: self.reference_for(value, len),
                    indexed_variables: Some(len),
                    ..scalar(format!("Array ({len})"), "array")
                }
            }
            Inspection::Struct(fields) => {
                let len = fields.len();
                Variable {
                    variables_reference: self.reference_for(value, len),
                    named_variables: Some(len),
                    ..scalar(format!("{{}} ({len} members)"), "struct")
                }
            }
            Inspection::Table { columns, rows } => {
                let len = rows.len();
                let reference = if len == 0 {
                    NO_CHILDREN
                } else {
                    self.pin(Arc::new(Synthetic::table_rows(&columns, &rows)))
                };
                Variable {
                    variables_reference: reference,
                    indexed_variables: Some(len),
                    ..scalar(format!("Table ({len} rows)"), "table")
                }
            }
        }
    }

    fn reference_for(&self, value: &ValueRef, child_count: usize) -> u64 {
        if child_count == 0 {
            NO_CHILDREN
        } else {
            self.values.register_or_get_id(value)
        }
    }

    /// Children of handle `id`. Unknown or reclaimed handles yield nothing.
    pub fn children(
        &self,
        id: u64,
        filter: VariablesFilter,
        start: Option<usize>,
        count: Option<usize>,
    ) -> Vec<Variable> {
        let Some(value) = self.values.get_by_id(id) else {
            tracing::debug!(id, "variables requested for unknown handle");
            return Vec::new();
        };
        // Touch the pin so an expanded synthetic value stays alive.
        let _ = self.pins.get(&id);

        match value.inspect() {
            Inspection::Struct(mut fields) if filter != VariablesFilter::Indexed => {
                fields.sort_by(|(a, _), (b, _)| compare_names(a, b));
                fields
                    .iter()
                    .map(|(name, child)| self.variable(name.clone(), child))
                    .collect()
            }
            Inspection::Array(items) if filter != VariablesFilter::Named => {
                self.indexed(&items, start, count)
            }
            Inspection::Table { columns, rows } if filter != VariablesFilter::Named => {
                let Synthetic::Array(rows) = Synthetic::table_rows(&columns, &rows) else {
                    return Vec::new();
                };
                for row in &rows {
                    self.pin(row.clone());
                }
                self.indexed(&rows, start, count)
            }
            _ => Vec::new(),
        }
    }

    fn indexed(&self, items: &[ValueRef], start: Option<usize>, count: Option<usize>) -> Vec<Variable> {
        let start = start.unwrap_or(0);
        let count = count.filter(|&c| c > 0).unwrap_or(usize::MAX);
        items
            .iter()
            .enumerate()
            .skip(start)
            .take(count)
            .map(|(idx, child)| self.variable(format!("[{}]", idx + 1), child))
            .collect()
    }
}
