//! Site document overrides and the interactive walk.
//!
//! Paths are dotted: mapping keys by name, sequence items by index, e.g.
//! `site_available_components.tnlcm.host` or `site_dns.0`.

use std::collections::{BTreeMap, BTreeSet};

use sandbox_core::prompt::Prompter;
use sandbox_core::Error;
use serde_yaml::{Mapping, Number, Value};
use tracing::debug;

use crate::Result;

/// Values the installer already knows, keyed by dotted path.
pub type Overrides = BTreeMap<String, Value>;

/// Set every override in `doc`, creating intermediate mappings as needed.
///
/// # Errors
///
/// Returns [`Error::ConfigError`] when a path runs through a scalar or
/// indexes past the end of a sequence.
pub fn apply_overrides(doc: &mut Value, overrides: &Overrides) -> Result<()> {
    for (path, value) in overrides {
        set_path(doc, path, value.clone())?;
        debug!(path = %path, "site override applied");
    }
    Ok(())
}

fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };
    let mut current = doc;
    for segment in parents {
        current = child_mut(current, segment, path)?;
    }
    *child_mut(current, last, path)? = value;
    Ok(())
}

fn child_mut<'a>(value: &'a mut Value, segment: &str, path: &str) -> Result<&'a mut Value> {
    if value.is_null() {
        *value = Value::Mapping(Mapping::new());
    }
    match value {
        Value::Mapping(map) => {
            if !map.contains_key(segment) {
                map.insert(Value::String(segment.to_string()), Value::Null);
            }
            map.get_mut(segment)
                .ok_or_else(|| bad_path(path, segment, "missing key"))
        }
        Value::Sequence(items) => {
            let index: usize = segment
                .parse()
                .map_err(|_| bad_path(path, segment, "expected a list index"))?;
            items
                .get_mut(index)
                .ok_or_else(|| bad_path(path, segment, "index out of range"))
        }
        Value::Tagged(tagged) => child_mut(&mut tagged.value, segment, path),
        _ => Err(bad_path(path, segment, "parent is a scalar")),
    }
}

fn bad_path(path: &str, segment: &str, reason: &str) -> Error {
    Error::ConfigError(format!("site path `{path}` at `{segment}`: {reason}"))
}

/// Prompt for every scalar of `doc` not under a `skip` path.
///
/// Strings and numbers are asked with the current value as default, booleans
/// as a confirmation, and keys that look like credentials as hidden input
/// where an empty answer keeps the current value. Returns how many values
/// were asked.
///
/// # Errors
///
/// Propagates prompt failures, including [`Error::Interrupted`].
pub fn walk_document(
    doc: &mut Value,
    skip: &BTreeSet<String>,
    prompter: &dyn Prompter,
) -> Result<usize> {
    let mut asked = 0;
    walk(doc, "", skip, prompter, &mut asked)?;
    Ok(asked)
}

fn walk(
    value: &mut Value,
    path: &str,
    skip: &BTreeSet<String>,
    prompter: &dyn Prompter,
    asked: &mut usize,
) -> Result<()> {
    if skip.contains(path) {
        return Ok(());
    }
    match value {
        Value::Mapping(map) => {
            for (key, child) in map.iter_mut() {
                walk(child, &join(path, &key_name(key)), skip, prompter, asked)?;
            }
        }
        Value::Sequence(items) => {
            for (index, child) in items.iter_mut().enumerate() {
                walk(child, &join(path, &index.to_string()), skip, prompter, asked)?;
            }
        }
        Value::Tagged(tagged) => walk(&mut tagged.value, path, skip, prompter, asked)?,
        Value::Bool(current) => {
            *current = prompter.confirm(path, *current)?;
            *asked += 1;
        }
        scalar => {
            let current = scalar_text(scalar);
            let answer = if is_secret(path) {
                let answer = prompter.password(path)?;
                if answer.is_empty() {
                    current.unwrap_or_default()
                } else {
                    answer
                }
            } else {
                prompter.text(path, current)?
            };
            *scalar = typed(answer, scalar);
            *asked += 1;
        }
    }
    Ok(())
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => "~".to_string(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Keep numbers numeric and unanswered nulls null.
fn typed(answer: String, previous: &Value) -> Value {
    match previous {
        Value::Null if answer.is_empty() => Value::Null,
        Value::Number(_) => answer
            .parse::<u64>()
            .map(Number::from)
            .or_else(|_| answer.parse::<i64>().map(Number::from))
            .or_else(|_| answer.parse::<f64>().map(Number::from))
            .map_or(Value::String(answer), Value::Number),
        _ => Value::String(answer),
    }
}

fn is_secret(path: &str) -> bool {
    let last = path.rsplit('.').next().unwrap_or(path).to_ascii_lowercase();
    ["password", "token", "secret"]
        .iter()
        .any(|marker| last.contains(marker))
}
