//! Template & data resolution — the `${path}` expression language that binds
//! node outputs and workflow inputs to subsequent parameters.
//!
//! Per Design Notes: "Parse the path once at validation time and cache the
//! parsed AST keyed by the template string. Resolution at runtime walks the
//! AST and the store; no re-parsing."

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use nodes::{NodeError, StoreView};

use crate::store::SharedStore;

/// Errors raised while parsing or resolving a `${path}` expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("malformed template path '{0}'")]
    ParseError(String),

    /// The first segment resolved to neither a node id nor a workflow input.
    #[error("unresolved template path '{0}': no such node or input")]
    UnresolvedTemplate(String),

    /// A later segment traversed into a missing field or out-of-range index.
    #[error("path '{path}' has no '{missing_suffix}'; available: [{}]", .available.join(", "))]
    MissingTemplatePath {
        path: String,
        missing_suffix: String,
        available: Vec<String>,
    },
}

/// One segment of a parsed path: a field name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// A parsed `path` expression: `[A-Za-z_][\w-]*(\.[A-Za-z_][\w-]*|\[\d+\])*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePath {
    raw: String,
    pub segments: Vec<PathSegment>,
}

static PATH_CACHE: Lazy<Mutex<HashMap<String, Arc<TemplatePath>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

impl TemplatePath {
    /// The root (first) segment's identifier.
    pub fn root(&self) -> &str {
        match &self.segments[0] {
            PathSegment::Field(s) => s.as_str(),
            PathSegment::Index(_) => unreachable!("first segment is always a field"),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parse a path expression, without caching.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let chars: Vec<char> = raw.chars().collect();
        if chars.is_empty() {
            return Err(TemplateError::ParseError(raw.to_string()));
        }

        let mut segments = Vec::new();
        let mut i = 0;

        // First segment must be an identifier.
        if !is_ident_start(chars[0]) {
            return Err(TemplateError::ParseError(raw.to_string()));
        }
        let start = i;
        while i < chars.len() && is_ident_continue(chars[i]) {
            i += 1;
        }
        segments.push(PathSegment::Field(chars[start..i].iter().collect()));

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    if i >= chars.len() || !is_ident_start(chars[i]) {
                        return Err(TemplateError::ParseError(raw.to_string()));
                    }
                    let start = i;
                    while i < chars.len() && is_ident_continue(chars[i]) {
                        i += 1;
                    }
                    segments.push(PathSegment::Field(chars[start..i].iter().collect()));
                }
                '[' => {
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    if start == i || i >= chars.len() || chars[i] != ']' {
                        return Err(TemplateError::ParseError(raw.to_string()));
                    }
                    let idx: usize = chars[start..i]
                        .iter()
                        .collect::<String>()
                        .parse()
                        .map_err(|_| TemplateError::ParseError(raw.to_string()))?;
                    segments.push(PathSegment::Index(idx));
                    i += 1; // consume ']'
                }
                _ => return Err(TemplateError::ParseError(raw.to_string())),
            }
        }

        Ok(TemplatePath {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Parse a path, reusing a cached AST when the raw string was already
    /// parsed before (anywhere in this process).
    pub fn parse_cached(raw: &str) -> Result<Arc<Self>, TemplateError> {
        if let Some(hit) = PATH_CACHE.lock().get(raw) {
            return Ok(Arc::clone(hit));
        }
        let parsed = Arc::new(Self::parse(raw)?);
        PATH_CACHE.lock().insert(raw.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }
}

/// Resolve an already-parsed path against the store.
pub fn resolve_path(store: &SharedStore, path: &TemplatePath) -> Result<Value, TemplateError> {
    let root = path.root();
    let mut current = if store.namespace_exists(root) {
        store.namespace_value(root).unwrap_or(Value::Object(Default::default()))
    } else if store.has_input(root) || is_declared_but_unset_input(store, root) {
        store.get_input(root).unwrap_or(Value::Null)
    } else {
        return Err(TemplateError::UnresolvedTemplate(root.to_string()));
    };

    let mut consumed = vec![path.segments[0].clone()];
    for seg in &path.segments[1..] {
        current = match (&current, seg) {
            (Value::Object(map), PathSegment::Field(name)) => match map.get(name) {
                Some(v) => v.clone(),
                None => {
                    return Err(missing_path_error(path, &consumed, seg, &current));
                }
            },
            (Value::Array(arr), PathSegment::Index(idx)) => match arr.get(*idx) {
                Some(v) => v.clone(),
                None => {
                    return Err(missing_path_error(path, &consumed, seg, &current));
                }
            },
            _ => return Err(missing_path_error(path, &consumed, seg, &current)),
        };
        consumed.push(seg.clone());
    }

    Ok(current)
}

fn is_declared_but_unset_input(_store: &SharedStore, _root: &str) -> bool {
    false
}

fn missing_path_error(
    path: &TemplatePath,
    consumed: &[PathSegment],
    missing: &PathSegment,
    container: &Value,
) -> TemplateError {
    let available: Vec<String> = match container {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(arr) => (0..arr.len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    };
    let consumed_str = segments_to_string(consumed);
    let missing_str = match missing {
        PathSegment::Field(f) => format!("{consumed_str}.{f}"),
        PathSegment::Index(i) => format!("{consumed_str}[{i}]"),
    };
    TemplateError::MissingTemplatePath {
        path: path.raw().to_string(),
        missing_suffix: missing_str,
        available,
    }
}

fn segments_to_string(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        match seg {
            PathSegment::Field(f) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(f);
            }
            PathSegment::Index(idx) => {
                out.push_str(&format!("[{idx}]"));
            }
        }
    }
    out
}

/// Resolve a raw (unparsed) path string against the store, using the AST
/// cache.
pub fn resolve_path_str(store: &SharedStore, raw: &str) -> Result<Value, TemplateError> {
    let parsed = TemplatePath::parse_cached(raw)?;
    resolve_path(store, &parsed)
}

/// One piece of a parsed template string: literal text or a `${path}`
/// placeholder.
#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder(Arc<TemplatePath>),
}

/// A parsed template string, e.g. `"Count is ${a.stats.count}"`.
#[derive(Debug, Clone)]
pub struct TemplateString {
    segments: Vec<Segment>,
}

impl TemplateString {
    /// Parse a template string. Never fails on plain text with no `${...}`
    /// occurrences (or only `$$` escapes); malformed `${...}` content
    /// surfaces a `TemplateError`.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let chars: Vec<char> = raw.chars().collect();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            if chars[i] == '$' && i + 1 < chars.len() && chars[i + 1] == '$' {
                literal.push('$');
                i += 2;
            } else if chars[i] == '$' && i + 1 < chars.len() && chars[i + 1] == '{' {
                let start = i + 2;
                let mut j = start;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(TemplateError::ParseError(raw.to_string()));
                }
                let path_raw: String = chars[start..j].iter().collect();
                let path = TemplatePath::parse_cached(&path_raw)?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(path));
                i = j + 1;
            } else {
                literal.push(chars[i]);
                i += 1;
            }
        }
        if !literal.is_empty() || segments.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Whether the entire template string is a single `${path}` occurrence,
    /// in which case resolution preserves the raw value type instead of
    /// stringifying it.
    pub fn is_whole_value(&self) -> bool {
        self.segments.len() == 1 && matches!(self.segments[0], Segment::Placeholder(_))
    }

    /// Every node-id/input root referenced by this template's placeholders,
    /// used by the static validator.
    pub fn referenced_paths(&self) -> Vec<&TemplatePath> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(p) => Some(p.as_ref()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Resolve against the store. Whole-value templates preserve the raw
    /// resolved type; mixed templates stringify each placeholder.
    pub fn resolve(&self, store: &SharedStore) -> Result<Value, TemplateError> {
        if self.is_whole_value() {
            if let Segment::Placeholder(path) = &self.segments[0] {
                return resolve_path(store, path);
            }
        }

        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Placeholder(path) => {
                    let value = resolve_path(store, path)?;
                    out.push_str(&stringify_for_interpolation(&value));
                }
            }
        }
        Ok(Value::String(out))
    }

    /// Resolve against a `nodes::StoreView` rather than a `SharedStore`
    /// directly — used by the template-aware wrapper, which only has a view
    /// (already scoped to the consuming node) and must not depend on the
    /// concrete store type.
    pub fn resolve_via_view(&self, view: &dyn StoreView) -> Result<Value, NodeError> {
        if self.is_whole_value() {
            if let Segment::Placeholder(path) = &self.segments[0] {
                return view.read(path.raw());
            }
        }

        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Placeholder(path) => {
                    let value = view.read(path.raw())?;
                    out.push_str(&stringify_for_interpolation(&value));
                }
            }
        }
        Ok(Value::String(out))
    }
}

/// Recursively resolve every `${...}` occurrence in `value` against a
/// `nodes::StoreView`. The wrapper-side counterpart of [`resolve_value`].
pub fn resolve_value_via_view(view: &dyn StoreView, value: &Value) -> Result<Value, NodeError> {
    match value {
        Value::String(s) => {
            let parsed = TemplateString::parse(s).map_err(|e| NodeError::UnresolvedPath(e.to_string()))?;
            parsed.resolve_via_view(view)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value_via_view(view, item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value_via_view(view, v)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn stringify_for_interpolation(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Recursively resolve every `${...}` occurrence found in mappings,
/// sequences, and strings within `value`. Already-resolved values (the
/// output of a prior substitution) are never re-walked.
pub fn resolve_value(store: &SharedStore, value: &Value) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => TemplateString::parse(s)?.resolve(store),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(store, item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(store, v)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use uuid::Uuid;

    fn store_with(node: &str, value: Value) -> StdArc<SharedStore> {
        let store = StdArc::new(SharedStore::new(
            serde_json::Map::new(),
            vec![node.to_string()],
            false,
            Uuid::new_v4(),
        ));
        if let Value::Object(map) = value {
            for (k, v) in map {
                store.set(node, &k, v);
            }
        }
        store
    }

    #[test]
    fn whole_string_template_preserves_object_type() {
        let store = store_with("a", serde_json::json!({ "stats": { "count": 42 } }));
        let resolved = resolve_value(&store, &Value::String("${a.stats}".to_string())).unwrap();
        assert_eq!(resolved, serde_json::json!({ "count": 42 }));
    }

    #[test]
    fn embedded_template_stringifies_scalar() {
        let store = store_with("a", serde_json::json!({ "stats": { "count": 42 } }));
        let resolved =
            resolve_value(&store, &Value::String("Count is ${a.stats.count}".to_string())).unwrap();
        assert_eq!(resolved, Value::String("Count is 42".to_string()));
    }

    #[test]
    fn dollar_dollar_escapes_to_literal_dollar() {
        let store = SharedStore::new(serde_json::Map::new(), vec![], false, Uuid::new_v4());
        let resolved = resolve_value(&store, &Value::String("cost: $$5".to_string())).unwrap();
        assert_eq!(resolved, Value::String("cost: $5".to_string()));
    }

    #[test]
    fn missing_array_index_reports_hint() {
        let store = store_with("a", serde_json::json!({ "items": ["x", "y"] }));
        let err = resolve_value(&store, &Value::String("${a.items[5]}".to_string())).unwrap_err();
        assert!(matches!(err, TemplateError::MissingTemplatePath { .. }));
    }

    #[test]
    fn unknown_root_is_unresolved() {
        let store = SharedStore::new(serde_json::Map::new(), vec![], false, Uuid::new_v4());
        let err = resolve_value(&store, &Value::String("${ghost.field}".to_string())).unwrap_err();
        assert!(matches!(err, TemplateError::UnresolvedTemplate(_)));
    }
}
