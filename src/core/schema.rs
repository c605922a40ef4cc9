//! Field-tree schema validation over YAML values.
//!
//! A [`Schema`] is validated against a `serde_yaml_ng::Value` and yields either
//! the normalized value (defaults applied, unknown object keys stripped) or the
//! full list of [`Issue`]s, each carrying a dotted path to the offending node.
//! Entity shapes, plugin configs and record values all go through here.

use indexmap::IndexMap;
use regex::Regex;
use serde_yaml_ng::{Mapping, Value};
use std::fmt;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Dotted path (`fields.email.type`, `steps[2]`); empty for the root.
    pub path: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Render issues as an indented bullet list.
pub fn format_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|i| format!("  - {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(usize),
}

fn render_path(path: &[Segment]) -> String {
    let mut out = String::new();
    for seg in path {
        match seg {
            Segment::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            Segment::Index(i) => out.push_str(&format!("[{}]", i)),
        }
    }
    out
}

fn issue(issues: &mut Vec<Issue>, path: &[Segment], message: String) -> Option<Value> {
    issues.push(Issue {
        path: render_path(path),
        message,
    });
    None
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "array",
        Value::Mapping(_) => "object",
        Value::Tagged(_) => "tagged value",
    }
}

/// A schema node.
#[derive(Debug, Clone)]
pub enum Schema {
    Any,
    String {
        min_len: usize,
        pattern: Option<Regex>,
    },
    Int {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number,
    Bool,
    Literal(String),
    Enum(Vec<String>),
    Array(Box<Schema>),
    Object(ObjectSchema),
    Record(Box<Schema>),
    /// Object discriminated by a string tag key.
    Tagged {
        tag: String,
        variants: IndexMap<String, ObjectSchema>,
    },
    /// First matching alternative wins.
    Union(Vec<Schema>),
}

/// Field declaration inside an [`ObjectSchema`].
#[derive(Debug, Clone)]
pub struct FieldSchema {
    schema: Schema,
    optional: bool,
    default: Option<Value>,
}

/// Object shape with ordered fields.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    fields: IndexMap<String, FieldSchema>,
    strict: bool,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn field(mut self, name: &str, schema: impl Into<Schema>) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldSchema {
                schema: schema.into(),
                optional: false,
                default: None,
            },
        );
        self
    }

    /// Add an optional field (absent or null is accepted).
    pub fn optional(mut self, name: &str, schema: impl Into<Schema>) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldSchema {
                schema: schema.into(),
                optional: true,
                default: None,
            },
        );
        self
    }

    /// Add a field that takes `default` when absent.
    pub fn with_default(mut self, name: &str, schema: impl Into<Schema>, default: Value) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldSchema {
                schema: schema.into(),
                optional: true,
                default: Some(default),
            },
        );
        self
    }

    /// Reject keys that are not declared.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    fn check(
        &self,
        value: &Value,
        skip_key: Option<&str>,
        path: &mut Vec<Segment>,
        issues: &mut Vec<Issue>,
    ) -> Option<Mapping> {
        let map = match value {
            Value::Mapping(m) => m,
            other => {
                issues.push(Issue {
                    path: render_path(path),
                    message: format!("expected object, received {}", kind_of(other)),
                });
                return None;
            }
        };

        let before = issues.len();
        let mut out = Mapping::new();

        for (name, field) in &self.fields {
            path.push(Segment::Key(name.clone()));
            match map.get(name.as_str()) {
                None | Some(Value::Null) => {
                    if let Some(ref default) = field.default {
                        out.insert(Value::String(name.clone()), default.clone());
                    } else if !field.optional {
                        issues.push(Issue {
                            path: render_path(path),
                            message: "required".to_string(),
                        });
                    }
                }
                Some(v) => {
                    if let Some(checked) = field.schema.check(v, path, issues) {
                        out.insert(Value::String(name.clone()), checked);
                    }
                }
            }
            path.pop();
        }

        for key in map.keys() {
            let key_str = match key {
                Value::String(s) => s.as_str(),
                other => {
                    issues.push(Issue {
                        path: render_path(path),
                        message: format!("object keys must be strings, found {}", kind_of(other)),
                    });
                    continue;
                }
            };
            if Some(key_str) == skip_key || self.fields.contains_key(key_str) {
                continue;
            }
            if self.strict {
                path.push(Segment::Key(key_str.to_string()));
                issues.push(Issue {
                    path: render_path(path),
                    message: "unknown key".to_string(),
                });
                path.pop();
            }
        }

        if issues.len() > before {
            None
        } else {
            Some(out)
        }
    }
}

impl From<ObjectSchema> for Schema {
    fn from(obj: ObjectSchema) -> Self {
        Schema::Object(obj)
    }
}

impl Schema {
    pub fn any() -> Self {
        Self::Any
    }

    pub fn string() -> Self {
        Self::String {
            min_len: 0,
            pattern: None,
        }
    }

    pub fn non_empty_string() -> Self {
        Self::String {
            min_len: 1,
            pattern: None,
        }
    }

    /// String that must fully match `pattern`.
    pub fn matching(pattern: Regex) -> Self {
        Self::String {
            min_len: 1,
            pattern: Some(pattern),
        }
    }

    pub fn int() -> Self {
        Self::Int {
            min: None,
            max: None,
        }
    }

    pub fn int_range(min: i64, max: i64) -> Self {
        Self::Int {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn number() -> Self {
        Self::Number
    }

    pub fn bool() -> Self {
        Self::Bool
    }

    pub fn literal(value: &str) -> Self {
        Self::Literal(value.to_string())
    }

    pub fn one_of(values: &[&str]) -> Self {
        Self::Enum(values.iter().map(|s| s.to_string()).collect())
    }

    pub fn array(item: impl Into<Schema>) -> Self {
        Self::Array(Box::new(item.into()))
    }

    pub fn record(value: impl Into<Schema>) -> Self {
        Self::Record(Box::new(value.into()))
    }

    pub fn tagged(tag: &str, variants: Vec<(&str, ObjectSchema)>) -> Self {
        Self::Tagged {
            tag: tag.to_string(),
            variants: variants
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    pub fn union(alternatives: Vec<Schema>) -> Self {
        Self::Union(alternatives)
    }

    /// Validate `value`, returning the normalized value or every issue found.
    pub fn validate(&self, value: &Value) -> Result<Value, Vec<Issue>> {
        let mut issues = Vec::new();
        let mut path = Vec::new();
        match self.check(value, &mut path, &mut issues) {
            Some(v) if issues.is_empty() => Ok(v),
            _ => Err(issues),
        }
    }

    fn check(&self, value: &Value, path: &mut Vec<Segment>, issues: &mut Vec<Issue>) -> Option<Value> {
        match self {
            Schema::Any => Some(value.clone()),

            Schema::String { min_len, pattern } => match value {
                Value::String(s) => {
                    if s.chars().count() < *min_len {
                        if *min_len == 1 {
                            return issue(issues, path, "must not be empty".to_string());
                        }
                        return issue(issues, path, format!("must be at least {} characters", min_len));
                    }
                    if let Some(re) = pattern {
                        if !re.is_match(s) {
                            return issue(issues, path, format!("'{}' does not match pattern {}", s, re.as_str()));
                        }
                    }
                    Some(value.clone())
                }
                other => issue(issues, path, format!("expected string, received {}", kind_of(other))),
            },

            Schema::Int { min, max } => {
                let n = match value {
                    Value::Number(n) => match n.as_i64() {
                        Some(n) => n,
                        None => return issue(issues, path, "expected integer, received number".to_string()),
                    },
                    other => return issue(issues, path, format!("expected integer, received {}", kind_of(other))),
                };
                if let Some(min) = min {
                    if n < *min {
                        return issue(issues, path, format!("must be >= {}", min));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return issue(issues, path, format!("must be <= {}", max));
                    }
                }
                Some(value.clone())
            }

            Schema::Number => match value {
                Value::Number(_) => Some(value.clone()),
                other => issue(issues, path, format!("expected number, received {}", kind_of(other))),
            },

            Schema::Bool => match value {
                Value::Bool(_) => Some(value.clone()),
                other => issue(issues, path, format!("expected boolean, received {}", kind_of(other))),
            },

            Schema::Literal(expected) => match value {
                Value::String(s) if s == expected => Some(value.clone()),
                _ => issue(issues, path, format!("expected \"{}\"", expected)),
            },

            Schema::Enum(choices) => match value {
                Value::String(s) if choices.contains(s) => Some(value.clone()),
                Value::String(s) => issue(issues, path, format!(
                    "'{}' must be one of: {}",
                    s,
                    choices.join(", ")
                )),
                other => issue(issues, path, format!("expected string, received {}", kind_of(other))),
            },

            Schema::Array(item) => match value {
                Value::Sequence(seq) => {
                    let before = issues.len();
                    let mut out = Vec::with_capacity(seq.len());
                    for (i, v) in seq.iter().enumerate() {
                        path.push(Segment::Index(i));
                        if let Some(checked) = item.check(v, path, issues) {
                            out.push(checked);
                        }
                        path.pop();
                    }
                    (issues.len() == before).then_some(Value::Sequence(out))
                }
                other => issue(issues, path, format!("expected array, received {}", kind_of(other))),
            },

            Schema::Object(obj) => obj.check(value, None, path, issues).map(Value::Mapping),

            Schema::Record(inner) => match value {
                Value::Mapping(map) => {
                    let before = issues.len();
                    let mut out = Mapping::new();
                    for (k, v) in map {
                        let key = match k {
                            Value::String(s) => s.clone(),
                            other => {
                                issues.push(Issue {
                                    path: render_path(path),
                                    message: format!(
                                        "object keys must be strings, found {}",
                                        kind_of(other)
                                    ),
                                });
                                continue;
                            }
                        };
                        path.push(Segment::Key(key.clone()));
                        if let Some(checked) = inner.check(v, path, issues) {
                            out.insert(Value::String(key), checked);
                        }
                        path.pop();
                    }
                    (issues.len() == before).then_some(Value::Mapping(out))
                }
                other => issue(issues, path, format!("expected object, received {}", kind_of(other))),
            },

            Schema::Tagged { tag, variants } => {
                let map = match value {
                    Value::Mapping(m) => m,
                    other => return issue(issues, path, format!("expected object, received {}", kind_of(other))),
                };
                let choices = || variants.keys().cloned().collect::<Vec<_>>().join(", ");
                let tag_value = match map.get(tag.as_str()) {
                    Some(Value::String(s)) => s.clone(),
                    Some(_) | None => {
                        path.push(Segment::Key(tag.clone()));
                        let msg = format!("required, one of: {}", choices());
                        issues.push(Issue {
                            path: render_path(path),
                            message: msg,
                        });
                        path.pop();
                        return None;
                    }
                };
                let Some(variant) = variants.get(&tag_value) else {
                    path.push(Segment::Key(tag.clone()));
                    let msg = format!("'{}' must be one of: {}", tag_value, choices());
                    issues.push(Issue {
                        path: render_path(path),
                        message: msg,
                    });
                    path.pop();
                    return None;
                };
                let checked = variant.check(value, Some(tag), path, issues)?;
                let mut out = Mapping::new();
                out.insert(Value::String(tag.clone()), Value::String(tag_value));
                for (k, v) in checked {
                    out.insert(k, v);
                }
                Some(Value::Mapping(out))
            }

            Schema::Union(alternatives) => {
                // A root type mismatch ranks below any alternative that got further.
                let here = render_path(path);
                let score = |found: &[Issue]| {
                    if found
                        .iter()
                        .any(|i| i.path == here && i.message.starts_with("expected "))
                    {
                        usize::MAX
                    } else {
                        found.len()
                    }
                };
                let mut best: Option<(usize, Vec<Issue>)> = None;
                for alt in alternatives {
                    let mut alt_issues = Vec::new();
                    if let Some(v) = alt.check(value, path, &mut alt_issues) {
                        if alt_issues.is_empty() {
                            return Some(v);
                        }
                    }
                    let s = score(&alt_issues);
                    if best.as_ref().is_none_or(|(b, _)| s < *b) {
                        best = Some((s, alt_issues));
                    }
                }
                match best {
                    Some((_, b)) if !b.is_empty() => {
                        issues.extend(b);
                        None
                    }
                    _ => issue(issues, path, "no alternative matched".to_string()),
                }
            }
        }
    }
}
