use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::syntax::FunctionDef;
use crate::runtime::{DebugValue, Inspection, ValueRef};

pub type DemoRef = Arc<DemoValue>;

#[derive(Debug)]
pub enum DemoValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<DemoRef>),
    Record(Vec<(String, DemoRef)>),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<DemoRef>>,
    },
    /// `fields` describe the function to the inspector and are built once.
    Function {
        def: Arc<FunctionDef>,
        fields: Vec<(String, DemoRef)>,
    },
}

impl DemoValue {
    pub fn function(def: Arc<FunctionDef>) -> Self {
        let params = def
            .params
            .iter()
            .map(|param| Arc::new(DemoValue::Str(param.clone())))
            .collect();
        let fields = vec![
            ("name".to_string(), Arc::new(DemoValue::Str(def.name.clone()))),
            ("line".to_string(), Arc::new(DemoValue::Int(i64::from(def.line)))),
            ("parameters".to_string(), Arc::new(DemoValue::List(params))),
        ];
        DemoValue::Function { def, fields }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DemoValue::Null => "null",
            DemoValue::Bool(_) => "boolean",
            DemoValue::Int(_) | DemoValue::Float(_) => "number",
            DemoValue::Str(_) => "string",
            DemoValue::List(_) => "list",
            DemoValue::Record(_) => "record",
            DemoValue::Table { .. } => "table",
            DemoValue::Function { .. } => "function",
        }
    }

    /// Truthiness for `if`/`while`.
    pub fn is_truthy(&self) -> bool {
        match self {
            DemoValue::Null => false,
            DemoValue::Bool(b) => *b,
            DemoValue::Int(n) => *n != 0,
            DemoValue::Float(f) => *f != 0.0,
            DemoValue::Str(s) => !s.is_empty(),
            DemoValue::List(items) => !items.is_empty(),
            DemoValue::Record(fields) => !fields.is_empty(),
            DemoValue::Table { rows, .. } => !rows.is_empty(),
            DemoValue::Function { .. } => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            DemoValue::Int(n) => Some(*n as f64),
            DemoValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn loose_eq(&self, other: &DemoValue) -> bool {
        match (self, other) {
            (DemoValue::Null, DemoValue::Null) => true,
            (DemoValue::Bool(a), DemoValue::Bool(b)) => a == b,
            (DemoValue::Str(a), DemoValue::Str(b)) => a == b,
            (DemoValue::Int(a), DemoValue::Int(b)) => a == b,
            (DemoValue::List(a), DemoValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (DemoValue::Function { def: a, .. }, DemoValue::Function { def: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for DemoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[DemoRef]) -> fmt::Result {
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            DemoValue::Null => f.write_str("null"),
            DemoValue::Bool(b) => write!(f, "{b}"),
            DemoValue::Int(n) => write!(f, "{n}"),
            DemoValue::Float(x) => write!(f, "{x}"),
            DemoValue::Str(s) => f.write_str(s),
            DemoValue::List(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            DemoValue::Record(fields) => {
                f.write_str("{")?;
                for (idx, (key, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            DemoValue::Table { rows, .. } => write!(f, "table({} rows)", rows.len()),
            DemoValue::Function { def, .. } => write!(f, "function {}", def.name),
        }
    }
}

fn handle(value: &DemoRef) -> ValueRef {
    value.clone()
}

impl DebugValue for DemoValue {
    fn inspect(&self) -> Inspection {
        match self {
            DemoValue::Null => Inspection::Null,
            DemoValue::Bool(b) => Inspection::Bool(*b),
            DemoValue::Int(n) => Inspection::Number(n.to_string()),
            DemoValue::Float(x) => Inspection::Number(x.to_string()),
            DemoValue::Str(s) => Inspection::String(s.clone()),
            DemoValue::List(items) => Inspection::Array(items.iter().map(handle).collect()),
            DemoValue::Record(fields) => Inspection::Struct(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), handle(value)))
                    .collect(),
            ),
            DemoValue::Table { columns, rows } => Inspection::Table {
                columns: columns.clone(),
                rows: rows
                    .iter()
                    .map(|row| row.iter().map(handle).collect())
                    .collect(),
            },
            DemoValue::Function { fields, .. } => Inspection::Struct(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), handle(value)))
                    .collect(),
            ),
        }
    }

    fn source_path(&self) -> Option<String> {
        match self {
            DemoValue::Function { def, .. } => Some(def.file.clone()),
            _ => None,
        }
    }
}

/// A mutable variable scope. Its identity is stable for the life of the
/// frame; its contents are read live on every inspection.
#[derive(Debug, Default)]
pub struct DemoScope {
    vars: RwLock<Vec<(String, DemoRef)>>,
}

impl DemoScope {
    pub fn with_vars(vars: Vec<(String, DemoRef)>) -> Self {
        Self {
            vars: RwLock::new(vars),
        }
    }

    pub fn get(&self, name: &str) -> Option<DemoRef> {
        self.vars
            .read()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.read().iter().any(|(key, _)| key == name)
    }

    pub fn set(&self, name: &str, value: DemoRef) {
        let mut vars = self.vars.write();
        match vars.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => vars.push((name.to_string(), value)),
        }
    }
}

impl DebugValue for DemoScope {
    fn inspect(&self) -> Inspection {
        Inspection::Struct(
            self.vars
                .read()
                .iter()
                .map(|(key, value)| (key.clone(), handle(value)))
                .collect(),
        )
    }
}
