//! Collector configuration codec
//!
//! Parses the configuration string embedded in a collector spec into a small typed
//! tree and writes it back. Mappings are `BTreeMap`s, so serialization always emits
//! keys in lexicographic order at every depth: two equal trees produce identical text
//! no matter how the source document was ordered.

use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// Keys of a mapping node, sorted
pub type Mapping = BTreeMap<String, ConfigNode>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid YAML configuration: {0}")]
    InvalidYaml(#[source] serde_yaml::Error),

    #[error("invalid JSON configuration: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(String),
}

/// Textual format of a configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Guess the format of a document: JSON objects start with `{`, everything else is YAML
    pub fn detect(text: &str) -> Self {
        if text.trim_start().starts_with('{') {
            ConfigFormat::Json
        } else {
            ConfigFormat::Yaml
        }
    }
}

/// A node of the configuration tree
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Null,
    Bool(bool),
    Number(serde_yaml::Number),
    String(String),
    Sequence(Vec<ConfigNode>),
    Mapping(Mapping),
}

impl Default for ConfigNode {
    fn default() -> Self {
        ConfigNode::Mapping(Mapping::new())
    }
}

impl ConfigNode {
    /// An empty mapping
    pub fn mapping() -> Self {
        ConfigNode::Mapping(Mapping::new())
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            ConfigNode::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            ConfigNode::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Vec<ConfigNode>> {
        match self {
            ConfigNode::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Vec<ConfigNode>> {
        match self {
            ConfigNode::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigNode::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigNode::Null)
    }

    /// Render a scalar as text (strings verbatim, numbers and booleans formatted)
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            ConfigNode::String(s) => Some(s.clone()),
            ConfigNode::Number(n) => Some(n.to_string()),
            ConfigNode::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Child of a mapping node; `None` when absent or when this node is not a mapping
    pub fn get(&self, key: &str) -> Option<&ConfigNode> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ConfigNode> {
        self.as_mapping_mut().and_then(|m| m.get_mut(key))
    }

    /// Descend through nested mappings
    pub fn get_path(&self, path: &[&str]) -> Option<&ConfigNode> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    pub fn get_path_mut(&mut self, path: &[&str]) -> Option<&mut ConfigNode> {
        path.iter().try_fold(self, |node, key| node.get_mut(key))
    }

    /// A key is "set" when present with a non-null value
    pub fn has_path(&self, path: &[&str]) -> bool {
        self.get_path(path).is_some_and(|n| !n.is_null())
    }

    /// Remove a key from a mapping node
    pub fn remove(&mut self, key: &str) -> Option<ConfigNode> {
        self.as_mapping_mut().and_then(|m| m.remove(key))
    }

    /// Walk `path`, creating empty mappings for absent or null keys
    ///
    /// Returns `None` if the walk runs into a scalar or sequence: the caller must not
    /// overwrite user data to make room for a migrated value.
    pub fn ensure_mapping(&mut self, path: &[&str]) -> Option<&mut Mapping> {
        if self.is_null() {
            *self = ConfigNode::mapping();
        }
        let mut node = self;
        for key in path {
            let map = node.as_mapping_mut()?;
            let child = map.entry((*key).to_string()).or_insert(ConfigNode::Null);
            if child.is_null() {
                *child = ConfigNode::mapping();
            }
            node = child;
        }
        node.as_mapping_mut()
    }

    /// Set `path` to `value` unless a value is already there
    pub fn set_path_if_absent(&mut self, path: &[&str], value: ConfigNode) -> PathWrite {
        let Some((leaf, parents)) = path.split_last() else {
            return PathWrite::Blocked;
        };
        if self.has_path(path) {
            return PathWrite::AlreadySet;
        }
        match self.ensure_mapping(parents) {
            Some(map) => {
                map.insert((*leaf).to_string(), value);
                PathWrite::Written
            }
            None => PathWrite::Blocked,
        }
    }
}

/// Outcome of [`ConfigNode::set_path_if_absent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathWrite {
    Written,
    /// The key already holds a non-null value, which wins
    AlreadySet,
    /// A scalar or sequence sits where a parent mapping is needed; nothing was written
    Blocked,
}

impl From<&str> for ConfigNode {
    fn from(value: &str) -> Self {
        ConfigNode::String(value.to_string())
    }
}

impl From<String> for ConfigNode {
    fn from(value: String) -> Self {
        ConfigNode::String(value)
    }
}

impl From<bool> for ConfigNode {
    fn from(value: bool) -> Self {
        ConfigNode::Bool(value)
    }
}

impl From<i64> for ConfigNode {
    fn from(value: i64) -> Self {
        ConfigNode::Number(value.into())
    }
}

impl From<Mapping> for ConfigNode {
    fn from(value: Mapping) -> Self {
        ConfigNode::Mapping(value)
    }
}

impl From<serde_yaml::Value> for ConfigNode {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value;
        match value {
            Value::Null => ConfigNode::Null,
            Value::Bool(b) => ConfigNode::Bool(b),
            Value::Number(n) => ConfigNode::Number(n),
            Value::String(s) => ConfigNode::String(s),
            Value::Sequence(seq) => ConfigNode::Sequence(seq.into_iter().map(Into::into).collect()),
            Value::Mapping(map) => ConfigNode::Mapping(
                map.into_iter()
                    .map(|(k, v)| (yaml_key(k), ConfigNode::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => ConfigNode::from(tagged.value),
        }
    }
}

impl From<serde_json::Value> for ConfigNode {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ConfigNode::Null,
            Value::Bool(b) => ConfigNode::Bool(b),
            Value::Number(n) => ConfigNode::Number(json_number(&n)),
            Value::String(s) => ConfigNode::String(s),
            Value::Array(items) => ConfigNode::Sequence(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                ConfigNode::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

fn json_number(n: &serde_json::Number) -> serde_yaml::Number {
    if let Some(i) = n.as_i64() {
        i.into()
    } else if let Some(u) = n.as_u64() {
        u.into()
    } else {
        n.as_f64().unwrap_or_default().into()
    }
}

/// Mapping keys are strings in collector configs; anything else is stringified
fn yaml_key(key: serde_yaml::Value) -> String {
    use serde_yaml::Value;
    match key {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Tagged(tagged) => yaml_key(tagged.value),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

impl Serialize for ConfigNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigNode::Null => serializer.serialize_unit(),
            ConfigNode::Bool(b) => serializer.serialize_bool(*b),
            ConfigNode::Number(n) => n.serialize(serializer),
            ConfigNode::String(s) => serializer.serialize_str(s),
            ConfigNode::Sequence(seq) => serializer.collect_seq(seq),
            ConfigNode::Mapping(map) => serializer.collect_map(map),
        }
    }
}

/// Parse a configuration document
///
/// Empty documents parse to an empty mapping so that upgrade routines can treat every
/// instance uniformly.
pub fn parse(text: &str, format: ConfigFormat) -> Result<ConfigNode, CodecError> {
    if text.trim().is_empty() {
        return Ok(ConfigNode::mapping());
    }

    let node = match format {
        ConfigFormat::Yaml => serde_yaml::from_str::<serde_yaml::Value>(text)
            .map(ConfigNode::from)
            .map_err(CodecError::InvalidYaml)?,
        ConfigFormat::Json => serde_json::from_str::<serde_json::Value>(text)
            .map(ConfigNode::from)
            .map_err(CodecError::InvalidJson)?,
    };

    Ok(if node.is_null() {
        ConfigNode::mapping()
    } else {
        node
    })
}

/// Parse a stored document, detecting its format
///
/// Text starting with `{` is read as JSON first. YAML flow mappings start the same way,
/// so when the JSON parser refuses the text it is read again as YAML and reported as
/// such; the JSON error is kept only if both parsers fail.
pub fn parse_document(text: &str) -> Result<(ConfigNode, ConfigFormat), CodecError> {
    match ConfigFormat::detect(text) {
        ConfigFormat::Yaml => parse(text, ConfigFormat::Yaml).map(|tree| (tree, ConfigFormat::Yaml)),
        ConfigFormat::Json => match parse(text, ConfigFormat::Json) {
            Ok(tree) => Ok((tree, ConfigFormat::Json)),
            Err(json_err) => parse(text, ConfigFormat::Yaml)
                .map(|tree| (tree, ConfigFormat::Yaml))
                .map_err(|_| json_err),
        },
    }
}

/// Serialize a tree with sorted keys
pub fn serialize(tree: &ConfigNode, format: ConfigFormat) -> Result<String, CodecError> {
    match format {
        ConfigFormat::Yaml => {
            serde_yaml::to_string(tree).map_err(|e| CodecError::Serialize(e.to_string()))
        }
        ConfigFormat::Json => serde_json::to_string_pretty(tree)
            .map(|mut s| {
                s.push('\n');
                s
            })
            .map_err(|e| CodecError::Serialize(e.to_string())),
    }
}

#[cfg(test)]
#[path = "config_tree_test.rs"]
mod tests;
