//! Scalar values and their text codec.
//!
//! Every persisted value is a single nullable TEXT column. The class kind
//! decides how that text is read back.

use crate::{ObjId, ScipionError};
use serde::{Deserialize, Serialize};

/// The storage shape of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassKind {
    Integer,
    Float,
    Boolean,
    String,
    /// Comma separated list of scalars in one column.
    CsvList,
    /// Reference to another stored object.
    Pointer,
    /// Ordered items stored as child rows.
    List,
    /// Named attributes only, no value of its own.
    Composite,
}

impl ClassKind {
    /// Name of the built-in class with this kind.
    #[must_use]
    pub const fn base_class(self) -> &'static str {
        match self {
            Self::Integer => "Integer",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
            Self::String => "String",
            Self::CsvList => "CsvList",
            Self::Pointer => "Pointer",
            Self::List => "List",
            Self::Composite => "OrderedObject",
        }
    }

    /// Whether objects of this kind carry a value column.
    #[must_use]
    pub const fn has_value(self) -> bool {
        !matches!(self, Self::List | Self::Composite)
    }

    /// The empty value for this kind.
    #[must_use]
    pub fn empty_value(self) -> Value {
        match self {
            Self::CsvList => Value::CsvList(Vec::new()),
            Self::Pointer => Value::Pointer(None),
            _ => Value::Null,
        }
    }

    /// Parse the stored text of an object of this kind.
    pub fn parse_value(self, class_name: &str, raw: Option<&str>) -> Result<Value, ScipionError> {
        let invalid = |text: &str| ScipionError::InvalidValue {
            class: class_name.to_string(),
            value: text.to_string(),
        };

        match self {
            Self::List | Self::Composite => Ok(Value::Null),
            Self::CsvList => Ok(Value::CsvList(match raw {
                None | Some("") => Vec::new(),
                Some(text) => text.split(',').map(|s| s.trim().to_string()).collect(),
            })),
            Self::Pointer => match raw {
                None | Some("") => Ok(Value::Pointer(None)),
                Some(text) => text
                    .trim()
                    .parse::<i64>()
                    .map(|id| Value::Pointer(Some(ObjId(id))))
                    .map_err(|_| invalid(text)),
            },
            Self::Integer => match raw {
                None | Some("") => Ok(Value::Null),
                Some(text) => text
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| invalid(text)),
            },
            Self::Float => match raw {
                None | Some("") => Ok(Value::Null),
                Some(text) => text
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| invalid(text)),
            },
            Self::Boolean => match raw {
                None | Some("") => Ok(Value::Null),
                Some(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Boolean(true)),
                    "false" | "0" => Ok(Value::Boolean(false)),
                    _ => Err(invalid(text)),
                },
            },
            Self::String => Ok(raw.map_or(Value::Null, |s| Value::String(s.to_string()))),
        }
    }
}

/// The value carried by an object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    CsvList(Vec<String>),
    Pointer(Option<ObjId>),
}

impl Value {
    /// Whether this value may be held by an object of `kind`.
    #[must_use]
    pub fn fits(&self, kind: ClassKind) -> bool {
        match self {
            Self::Null => !matches!(kind, ClassKind::CsvList | ClassKind::Pointer),
            Self::Integer(_) => kind == ClassKind::Integer,
            Self::Float(_) => kind == ClassKind::Float,
            Self::Boolean(_) => kind == ClassKind::Boolean,
            Self::String(_) => kind == ClassKind::String,
            Self::CsvList(_) => kind == ClassKind::CsvList,
            Self::Pointer(_) => kind == ClassKind::Pointer,
        }
    }

    /// Short name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Boolean(_) => "Boolean",
            Self::String(_) => "String",
            Self::CsvList(_) => "CsvList",
            Self::Pointer(_) => "Pointer",
        }
    }

    /// Whether this is the empty value (`Null`, null pointer).
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::Pointer(None))
    }

    /// Text stored in the value column.
    #[must_use]
    pub fn to_db(&self) -> Option<String> {
        match self {
            Self::Null | Self::Pointer(None) => None,
            Self::Integer(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Boolean(v) => Some(v.to_string()),
            Self::String(v) => Some(v.clone()),
            Self::CsvList(items) => Some(items.join(",")),
            Self::Pointer(Some(id)) => Some(id.0.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_accepts_legacy_spellings() {
        for (raw, expected) in [("True", true), ("false", false), ("1", true), ("0", false)] {
            let value = ClassKind::Boolean
                .parse_value("Boolean", Some(raw))
                .expect("parse");
            assert_eq!(value, Value::Boolean(expected));
        }
    }

    #[test]
    fn invalid_integer_is_rejected() {
        let result = ClassKind::Integer.parse_value("Integer", Some("twelve"));
        assert!(matches!(result, Err(ScipionError::InvalidValue { .. })));
    }

    #[test]
    fn null_column_parses_to_empty_value() {
        assert_eq!(
            ClassKind::Integer.parse_value("Integer", None).expect("parse"),
            Value::Null
        );
        assert_eq!(
            ClassKind::CsvList.parse_value("CsvList", None).expect("parse"),
            Value::CsvList(Vec::new())
        );
        assert_eq!(
            ClassKind::Pointer.parse_value("Pointer", None).expect("parse"),
            Value::Pointer(None)
        );
    }

    #[test]
    fn csv_list_splits_on_commas() {
        let value = ClassKind::CsvList
            .parse_value("CsvList", Some("3, 5,8"))
            .expect("parse");
        assert_eq!(
            value,
            Value::CsvList(vec!["3".to_string(), "5".to_string(), "8".to_string()])
        );
    }

    #[test]
    fn null_does_not_fit_pointer_or_csv() {
        assert!(Value::Null.fits(ClassKind::Integer));
        assert!(!Value::Null.fits(ClassKind::Pointer));
        assert!(!Value::Integer(1).fits(ClassKind::String));
    }

    #[test]
    fn empty_string_is_not_null() {
        let value = ClassKind::String
            .parse_value("String", Some(""))
            .expect("parse");
        assert_eq!(value, Value::String(String::new()));
        assert_eq!(value.to_db().as_deref(), Some(""));
    }
}
