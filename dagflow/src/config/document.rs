//! Raw document handling: extension gating, fragment inclusion, strict
//! parsing and content hashing.

use crate::errors::ConfigurationError;
use regex::Regex;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum nesting of `{% include %}` directives.
pub const MAX_INCLUDE_DEPTH: usize = 8;

/// Serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `.json`
    Json,
    /// `.yaml` / `.yml`
    Yaml,
}

impl DocumentFormat {
    /// Determines the format from a file extension.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedExtension` for anything other than json/yaml/yml.
    pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(ConfigurationError::UnsupportedExtension {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }
}

fn include_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\{%-?\s*include\s+["']([^"']+)["']\s*-?%\}"#)
            .unwrap_or_else(|e| unreachable!("include pattern is valid: {e}"))
    })
}

/// Replaces every `{% include "path" %}` directive with the named file's text.
///
/// Relative paths are tried against the working directory first and then
/// against `base_dir`. Included text is itself expanded.
///
/// # Errors
///
/// Returns `SubstitutionFileMissing` if an included file cannot be read and
/// `IncludeDepthExceeded` if includes nest too deeply.
pub fn substitute_includes(
    text: &str,
    base_dir: Option<&Path>,
) -> Result<String, ConfigurationError> {
    expand(text, base_dir, 0)
}

fn expand(text: &str, base_dir: Option<&Path>, depth: usize) -> Result<String, ConfigurationError> {
    let pattern = include_pattern();
    if !pattern.is_match(text) {
        return Ok(text.to_string());
    }
    if depth >= MAX_INCLUDE_DEPTH {
        return Err(ConfigurationError::IncludeDepthExceeded {
            depth: MAX_INCLUDE_DEPTH,
        });
    }

    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for captures in pattern.captures_iter(text) {
        let (Some(whole), Some(target)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        output.push_str(&text[last..whole.start()]);

        let raw_path = target.as_str().trim();
        let resolved = resolve_include(raw_path, base_dir).ok_or_else(|| {
            ConfigurationError::SubstitutionFileMissing {
                path: raw_path.to_string(),
            }
        })?;
        let fragment = std::fs::read_to_string(&resolved).map_err(|_| {
            ConfigurationError::SubstitutionFileMissing {
                path: raw_path.to_string(),
            }
        })?;
        tracing::debug!(include = %resolved.display(), "Substituting configuration fragment");

        let nested_base = resolved.parent().map(Path::to_path_buf);
        output.push_str(&expand(&fragment, nested_base.as_deref().or(base_dir), depth + 1)?);
        last = whole.end();
    }
    output.push_str(&text[last..]);
    Ok(output)
}

fn resolve_include(raw_path: &str, base_dir: Option<&Path>) -> Option<PathBuf> {
    let direct = PathBuf::from(raw_path);
    if direct.is_file() {
        return Some(direct);
    }
    let candidate = base_dir?.join(raw_path);
    candidate.is_file().then_some(candidate)
}

const DUPLICATE_MARKER: &str = "duplicate key `";

/// A JSON value deserialized with duplicate-key rejection at every level.
struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StrictVisitor).map(StrictValue)
    }
}

struct StrictVisitor;

impl<'de> Visitor<'de> for StrictVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any configuration value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        StrictValue::deserialize(deserializer).map(|v| v.0)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(StrictValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A>(self, mut access: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut map = Map::new();
        while let Some(key) = access.next_key::<String>()? {
            if map.contains_key(&key) {
                return Err(de::Error::custom(format!("{DUPLICATE_MARKER}{key}`")));
            }
            let StrictValue(value) = access.next_value()?;
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    }
}

fn map_parse_error(message: String) -> ConfigurationError {
    if let Some(start) = message.find(DUPLICATE_MARKER) {
        let rest = &message[start + DUPLICATE_MARKER.len()..];
        if let Some(end) = rest.find('`') {
            return ConfigurationError::DuplicateKey {
                key: rest[..end].to_string(),
            };
        }
    }
    ConfigurationError::Parse { message }
}

/// Blanks out `//` and `/* */` comments outside string literals.
///
/// Newlines are kept so parse errors still report the right line.
#[must_use]
pub fn strip_json_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    out.push(if skipped == '\n' { '\n' } else { ' ' });
                    prev = skipped;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Parses document text, rejecting duplicate keys at any level.
///
/// JSON may carry `//` and `/* */` comments.
///
/// # Errors
///
/// Returns `DuplicateKey` for repeated keys and `Parse` for malformed input.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<Value, ConfigurationError> {
    let parsed = match format {
        DocumentFormat::Json => serde_json::from_str::<StrictValue>(&strip_json_comments(text))
            .map_err(|e| map_parse_error(e.to_string())),
        DocumentFormat::Yaml => {
            serde_yaml::from_str::<StrictValue>(text).map_err(|e| map_parse_error(e.to_string()))
        }
    }?;
    Ok(parsed.0)
}

/// Returns a copy of `value` with object keys sorted at every level.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Returns the canonical JSON string and its SHA-256 hex digest.
///
/// # Errors
///
/// Returns the serde error if the value cannot be serialized.
pub fn content_hash(value: &Value) -> Result<(String, String), serde_json::Error> {
    let canonical = serde_json::to_string(&canonicalize(value))?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok((canonical, hex::encode(digest)))
}
