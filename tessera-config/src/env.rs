// Environment variable overrides

use serde_json::{Map, Value};
use std::env;

/// Default prefix for environment overrides.
pub const DEFAULT_PREFIX: &str = "TESSERA";

/// Turns prefixed environment variables into a settings overlay.
///
/// `TESSERA_NAMING__NAMESPACE=corp` becomes `{"naming": {"namespace": "corp"}}`;
/// a double underscore separates nesting levels.
///
/// Values stay strings unless a template says the field at that path is a
/// boolean or a number.
pub struct EnvLoader {
    prefix: String,
    template: Option<Value>,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            template: None,
        }
    }

    /// Type hints for coercion, usually the serialized default settings.
    pub fn with_template(mut self, template: Value) -> Self {
        self.template = Some(template);
        self
    }

    /// Build the overlay from the process environment.
    pub fn load(&self) -> Value {
        self.overlay(env::vars())
    }

    /// Build the overlay from an explicit set of variables.
    pub fn overlay<I>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let marker = format!("{}_", self.prefix);
        let mut root = Map::new();

        for (key, value) in vars {
            let Some(path) = key.strip_prefix(&marker) else {
                continue;
            };

            let segments: Vec<String> = path
                .split("__")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect();

            if segments.is_empty() {
                continue;
            }

            let hint = self.template.as_ref().and_then(|t| lookup(t, &segments));
            insert_path(&mut root, &segments, coerce(&value, hint));
        }

        Value::Object(root)
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

fn insert_path(map: &mut Map<String, Value>, segments: &[String], value: Value) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return,
    };

    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }

    let child = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));

    if !child.is_object() {
        *child = Value::Object(Map::new());
    }

    if let Value::Object(child_map) = child {
        insert_path(child_map, rest, value);
    }
}

fn lookup<'a>(template: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(template, |node, segment| node.get(segment.as_str()))
}

/// Environment values are untyped; recover booleans and numbers only where
/// the template holds one.
fn coerce(raw: &str, hint: Option<&Value>) -> Value {
    match hint {
        Some(Value::Bool(_)) => match raw.trim().parse::<bool>() {
            Ok(b) => Value::Bool(b),
            Err(_) => Value::String(raw.to_string()),
        },
        Some(Value::Number(_)) => {
            let raw = raw.trim();
            if let Ok(n) = raw.parse::<u64>() {
                Value::from(n)
            } else if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
                Value::from(f)
            } else {
                Value::String(raw.to_string())
            }
        }
        _ => Value::String(raw.to_string()),
    }
}
