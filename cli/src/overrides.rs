//! `--override key.path=value` support, applied to the JSON form of a config.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct OverrideArg {
    pub path: String,
    pub value: String,
}

impl FromStr for OverrideArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| "override must be in the form key=value".to_string())?;
        if path.trim().is_empty() {
            return Err("override key must not be empty".into());
        }
        Ok(Self {
            path: path.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Round-trips `config` through JSON with each override written in order.
pub fn apply_overrides<T>(config: T, overrides: &[OverrideArg]) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    if overrides.is_empty() {
        return Ok(config);
    }

    let mut value =
        serde_json::to_value(config).context("failed to serialize config for overrides")?;
    for arg in overrides {
        set_value_at_path(&mut value, &arg.path, parse_override_value(&arg.value))
            .with_context(|| format!("cannot apply override '{}'", arg.path))?;
    }
    serde_json::from_value(value).context("config is invalid after applying overrides")
}

/// Booleans, `null`, integers, floats and inline JSON arrays/objects are
/// recognised; anything else is kept as a string.
fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if trimmed.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Value::Number(Number::from(int_val));
    }
    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
            return json_val;
        }
    }
    Value::String(trimmed.to_string())
}

#[derive(Debug, PartialEq)]
struct PathSegment {
    key: String,
    index: Option<usize>,
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    path.split('.')
        .map(|segment| match segment.split_once('[') {
            Some((key, index)) => {
                let index = index
                    .trim_end_matches(']')
                    .parse::<usize>()
                    .map_err(|err| anyhow!("invalid index in '{segment}': {err}"))?;
                Ok(PathSegment {
                    key: key.to_string(),
                    index: Some(index),
                })
            }
            None => Ok(PathSegment {
                key: segment.to_string(),
                index: None,
            }),
        })
        .collect()
}

fn set_value_at_path(root: &mut Value, path: &str, new_value: Value) -> Result<()> {
    let segments = parse_path(path)?;
    if segments.iter().any(|s| s.key.is_empty()) {
        bail!("override path has an empty segment");
    }

    let mut current = root;
    let last = segments.len() - 1;
    for (idx, segment) in segments.iter().enumerate() {
        let entry = object_entry(current, &segment.key)?;
        let slot = match segment.index {
            Some(index) => array_slot(entry, &segment.key, index)?,
            None => entry,
        };
        if idx == last {
            *slot = new_value;
            return Ok(());
        }
        current = slot;
    }
    Ok(())
}

/// Field `key` of `target`, turning a `null` target into an empty object.
fn object_entry<'a>(target: &'a mut Value, key: &str) -> Result<&'a mut Value> {
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        bail!("'{key}' is nested under a value that is not a table");
    };
    Ok(map.entry(key.to_string()).or_insert(Value::Null))
}

/// Element `index` of the array at `entry`; an index one past the end appends.
fn array_slot<'a>(entry: &'a mut Value, key: &str, index: usize) -> Result<&'a mut Value> {
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    let Value::Array(items) = entry else {
        bail!("'{key}' is not an array");
    };
    if index > items.len() {
        bail!(
            "index {index} for '{key}' is past the end ({} items)",
            items.len()
        );
    }
    if index == items.len() {
        items.push(Value::Null);
    }
    Ok(&mut items[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Model {
        vocab_size: usize,
        special_tokens: Vec<String>,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Root {
        model: Model,
        #[serde(default)]
        label: Option<String>,
    }

    fn root() -> Root {
        Root {
            model: Model {
                vocab_size: 100,
                special_tokens: vec!["<pad>".into(), "<unk>".into()],
            },
            label: None,
        }
    }

    fn arg(s: &str) -> OverrideArg {
        s.parse().unwrap()
    }

    #[test]
    fn parses_key_value_pairs() {
        assert_eq!(
            arg(" model.vocab_size = 32000 "),
            OverrideArg {
                path: "model.vocab_size".into(),
                value: "32000".into()
            }
        );
        assert!("no-equals".parse::<OverrideArg>().is_err());
        assert!("=1".parse::<OverrideArg>().is_err());
    }

    #[test]
    fn values_are_typed() {
        assert_eq!(parse_override_value("TRUE"), Value::Bool(true));
        assert_eq!(parse_override_value("null"), Value::Null);
        assert_eq!(parse_override_value("12"), Value::from(12));
        assert_eq!(parse_override_value("0.5"), Value::from(0.5));
        assert_eq!(parse_override_value("[1, 2]"), serde_json::json!([1, 2]));
        assert_eq!(parse_override_value("tur"), Value::from("tur"));
    }

    #[test]
    fn nested_fields_and_indices_are_written() {
        let updated = apply_overrides(
            root(),
            &[
                arg("model.vocab_size=256"),
                arg("model.special_tokens[1]=<oov>"),
                arg("label=run-7"),
            ],
        )
        .unwrap();
        assert_eq!(updated.model.vocab_size, 256);
        assert_eq!(updated.model.special_tokens, vec!["<pad>", "<oov>"]);
        assert_eq!(updated.label.as_deref(), Some("run-7"));
    }

    #[test]
    fn indices_may_only_append() {
        let updated = apply_overrides(root(), &[arg("model.special_tokens[2]=<bos>")]).unwrap();
        assert_eq!(updated.model.special_tokens, vec!["<pad>", "<unk>", "<bos>"]);

        let err = apply_overrides(root(), &[arg("model.special_tokens[5]=<bos>")]).unwrap_err();
        assert!(format!("{err:#}").contains("past the end"), "{err:#}");

        let huge = format!("model.special_tokens[{}]=x", usize::MAX);
        assert!(apply_overrides(root(), &[arg(&huge)]).is_err());
    }

    #[test]
    fn type_mismatches_are_reported() {
        assert!(apply_overrides(root(), &[arg("model.vocab_size=lots")]).is_err());
        assert!(apply_overrides(root(), &[arg("model.vocab_size.inner=1")]).is_err());
        assert!(apply_overrides(root(), &[arg("model..x=1")]).is_err());
    }
}
