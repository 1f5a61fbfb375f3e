//! Typed structural merge
//!
//! Topic state is folded from a sequence of partial JSON payloads. Every
//! schema type implements [`Merge`], which applies one payload in place:
//!
//! - fields present in the patch overwrite or recurse, absent fields are left alone
//! - `null` is an explicit overwrite (`Option` becomes `None`, maps drop the key,
//!   structs reset to their default), never "absent"
//! - arrays replace outright; index-keyed objects patch lists element-wise
//!
//! Struct schemas are declared once with [`merge_struct!`](crate::merge_struct),
//! which maps each JSON key to a field at compile time.
//!
//! A patch whose shape does not fit the schema never aborts the merge: the
//! offending field is skipped, logged, and recorded in the [`MergeContext`],
//! and the rest of the payload is still applied.

pub mod value;

pub use value::{deep_merge, fold_patches};

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::parse_utc;

/// A field that could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedField {
    /// Dotted path from the payload root
    pub path: String,
    /// Why the field was skipped
    pub reason: String,
}

/// Tracks the current path and any skipped fields while a payload is applied
#[derive(Debug, Default)]
pub struct MergeContext {
    path: Vec<String>,
    skipped: Vec<SkippedField>,
}

impl MergeContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with `key` pushed onto the path
    pub fn descend<F>(&mut self, key: &str, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.path.push(key.to_string());
        f(self);
        self.path.pop();
    }

    /// Record that the value at the current path could not be applied
    pub fn skip(&mut self, reason: impl Into<String>) {
        let path = self.current_path();
        let reason = reason.into();
        tracing::warn!(path = %path, reason = %reason, "Skipping field incompatible with schema");
        self.skipped.push(SkippedField { path, reason });
    }

    /// Note a key the schema does not model
    pub fn ignore(&mut self, key: &str) {
        tracing::trace!(path = %self.current_path(), key, "Ignoring unmodelled key");
    }

    /// Fields skipped so far
    pub fn skipped(&self) -> &[SkippedField] {
        &self.skipped
    }

    /// Whether every field applied cleanly
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Whether a skip recorded after `since` rejected the value at the current path itself
    pub(crate) fn rejected_here_since(&self, since: usize) -> bool {
        let here = self.current_path();
        self.skipped
            .get(since..)
            .is_some_and(|recent| recent.iter().any(|s| s.path == here))
    }

    fn current_path(&self) -> String {
        if self.path.is_empty() {
            "$".to_string()
        } else {
            format!("$.{}", self.path.join("."))
        }
    }
}

/// Apply a partial payload onto existing state
pub trait Merge {
    /// Fold `patch` into `self`, reporting incompatible fields to `ctx`
    fn merge(&mut self, patch: &Value, ctx: &mut MergeContext);
}

/// Apply `patch` to `target` with a fresh context and return the context
pub fn apply<T: Merge + ?Sized>(target: &mut T, patch: &Value) -> MergeContext {
    let mut ctx = MergeContext::new();
    target.merge(patch, &mut ctx);
    ctx
}

/// Short name for a JSON value's kind, for diagnostics
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declare the JSON key for each field of a schema struct and derive [`Merge`]
///
/// ```ignore
/// #[derive(Debug, Clone, Default, PartialEq, Serialize)]
/// pub struct LapCount {
///     pub current_lap: Option<u32>,
///     pub total_laps: Option<u32>,
/// }
///
/// merge_struct!(LapCount {
///     current_lap: "CurrentLap",
///     total_laps: "TotalLaps",
/// });
/// ```
#[macro_export]
macro_rules! merge_struct {
    ($ty:ident { $($field:ident : $key:literal),* $(,)? }) => {
        impl $crate::merge::Merge for $ty {
            fn merge(
                &mut self,
                patch: &::serde_json::Value,
                ctx: &mut $crate::merge::MergeContext,
            ) {
                match patch {
                    ::serde_json::Value::Object(fields) => {
                        for (key, value) in fields {
                            match key.as_str() {
                                $($key => ctx.descend(key, |ctx| {
                                    $crate::merge::Merge::merge(&mut self.$field, value, ctx)
                                }),)*
                                _ => ctx.ignore(key),
                            }
                        }
                    }
                    ::serde_json::Value::Null => *self = <$ty as ::std::default::Default>::default(),
                    other => ctx.skip(format!(
                        "expected object for {}, got {}",
                        stringify!($ty),
                        $crate::merge::kind_of(other)
                    )),
                }
            }
        }
    };
}

// ==================== Leaves ====================

macro_rules! merge_number {
    ($($ty:ty),* $(,)?) => {$(
        impl Merge for $ty {
            fn merge(&mut self, patch: &Value, ctx: &mut MergeContext) {
                let parsed = match patch {
                    Value::Number(_) => serde_json::from_value::<$ty>(patch.clone()).ok(),
                    Value::String(s) => s.trim().parse::<$ty>().ok(),
                    _ => None,
                };
                match parsed {
                    Some(v) => *self = v,
                    None => ctx.skip(format!(
                        "expected {}, got {}",
                        stringify!($ty),
                        kind_of(patch)
                    )),
                }
            }
        }
    )*};
}

merge_number!(i32, i64, u32, u64, f64);

impl Merge for bool {
    fn merge(&mut self, patch: &Value, ctx: &mut MergeContext) {
        match patch {
            Value::Bool(b) => *self = *b,
            Value::String(s) if s.eq_ignore_ascii_case("true") => *self = true,
            Value::String(s) if s.eq_ignore_ascii_case("false") => *self = false,
            other => ctx.skip(format!("expected bool, got {}", kind_of(other))),
        }
    }
}

impl Merge for String {
    fn merge(&mut self, patch: &Value, ctx: &mut MergeContext) {
        match patch {
            Value::String(s) => s.clone_into(self),
            Value::Number(n) => *self = n.to_string(),
            Value::Bool(b) => *self = b.to_string(),
            other => ctx.skip(format!("expected string, got {}", kind_of(other))),
        }
    }
}

impl Merge for DateTime<Utc> {
    fn merge(&mut self, patch: &Value, ctx: &mut MergeContext) {
        match patch.as_str().and_then(parse_utc) {
            Some(t) => *self = t,
            None => ctx.skip(format!("expected timestamp, got {}", kind_of(patch))),
        }
    }
}

impl Merge for Value {
    fn merge(&mut self, patch: &Value, _ctx: &mut MergeContext) {
        deep_merge(self, patch);
    }
}

// ==================== Containers ====================

impl<T: Merge + Default> Merge for Option<T> {
    fn merge(&mut self, patch: &Value, ctx: &mut MergeContext) {
        if patch.is_null() {
            *self = None;
            return;
        }
        match self {
            Some(existing) => existing.merge(patch, ctx),
            None => {
                let mut fresh = T::default();
                let before = ctx.skipped().len();
                fresh.merge(patch, ctx);
                // A value rejected outright leaves the slot empty instead of
                // inventing a default.
                if !ctx.rejected_here_since(before) {
                    *self = Some(fresh);
                }
            }
        }
    }
}

impl<T: Merge + Default> Merge for Vec<T> {
    fn merge(&mut self, patch: &Value, ctx: &mut MergeContext) {
        match patch {
            Value::Array(items) => {
                let mut replaced = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let mut element = T::default();
                    ctx.descend(&index.to_string(), |ctx| element.merge(item, ctx));
                    replaced.push(element);
                }
                *self = replaced;
            }
            Value::Object(entries) if value::is_index_keyed(entries) => {
                for (key, item) in entries {
                    let Ok(index) = key.parse::<usize>() else {
                        continue;
                    };
                    if index >= self.len() + value::MAX_INDEX_GROWTH {
                        ctx.descend(key, |ctx| ctx.skip("index too far past end of list"));
                        continue;
                    }
                    if index >= self.len() {
                        self.resize_with(index + 1, T::default);
                    }
                    ctx.descend(key, |ctx| self[index].merge(item, ctx));
                }
            }
            Value::Object(entries) if entries.is_empty() => {}
            Value::Null => self.clear(),
            other => ctx.skip(format!(
                "expected array or index-keyed object, got {}",
                kind_of(other)
            )),
        }
    }
}

impl<T: Merge + Default> Merge for BTreeMap<String, T> {
    fn merge(&mut self, patch: &Value, ctx: &mut MergeContext) {
        match patch {
            Value::Object(entries) => {
                for (key, item) in entries {
                    // Feed metadata such as `_kf` is not an entry
                    if key.starts_with('_') {
                        ctx.ignore(key);
                        continue;
                    }
                    if item.is_null() {
                        self.remove(key);
                        continue;
                    }
                    let existed = self.contains_key(key);
                    let before = ctx.skipped().len();
                    let slot = self.entry(key.clone()).or_default();
                    let mut rejected = false;
                    ctx.descend(key, |ctx| {
                        slot.merge(item, ctx);
                        rejected = ctx.rejected_here_since(before);
                    });
                    if rejected && !existed {
                        self.remove(key);
                    }
                }
            }
            // Initial snapshots send some keyed collections as plain lists
            Value::Array(items) => {
                let mut replaced = BTreeMap::new();
                for (index, item) in items.iter().enumerate() {
                    let key = index.to_string();
                    let mut element = T::default();
                    ctx.descend(&key, |ctx| element.merge(item, ctx));
                    replaced.insert(key, element);
                }
                *self = replaced;
            }
            Value::Null => self.clear(),
            other => ctx.skip(format!("expected object, got {}", kind_of(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    struct Sector {
        value: Option<String>,
        personal_fastest: Option<bool>,
    }

    merge_struct!(Sector {
        value: "Value",
        personal_fastest: "PersonalFastest",
    });

    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    struct Line {
        position: Option<u32>,
        gap: Option<String>,
        sectors: Vec<Sector>,
        stats: BTreeMap<String, f64>,
    }

    merge_struct!(Line {
        position: "Position",
        gap: "GapToLeader",
        sectors: "Sectors",
        stats: "Stats",
    });

    #[test]
    fn test_struct_preserves_absent_fields() {
        let mut line = Line::default();
        apply(&mut line, &json!({"Position": 3, "GapToLeader": "+1.2"}));
        apply(&mut line, &json!({"Position": "2"}));
        assert_eq!(line.position, Some(2));
        assert_eq!(line.gap.as_deref(), Some("+1.2"));
    }

    #[test]
    fn test_null_clears_option() {
        let mut line = Line::default();
        apply(&mut line, &json!({"GapToLeader": "+1.2"}));
        apply(&mut line, &json!({"GapToLeader": null}));
        assert_eq!(line.gap, None);
    }

    #[test]
    fn test_index_keyed_list_patch() {
        let mut line = Line::default();
        apply(&mut line, &json!({"Sectors": [{"Value": "30.1"}, {"Value": "31.0"}, {}]}));
        apply(&mut line, &json!({"Sectors": {"1": {"PersonalFastest": true}}}));
        assert_eq!(line.sectors.len(), 3);
        assert_eq!(line.sectors[1].value.as_deref(), Some("31.0"));
        assert_eq!(line.sectors[1].personal_fastest, Some(true));
    }

    #[test]
    fn test_empty_object_leaves_list_like_deep_merge() {
        let first = json!({"Sectors": [{"Value": "1"}, {"Value": "2"}]});
        let empty = json!({"Sectors": {}});

        let mut line = Line::default();
        apply(&mut line, &first);
        let context = apply(&mut line, &empty);
        assert!(context.is_clean());
        assert_eq!(line.sectors.len(), 2);

        let mut untyped = first.clone();
        crate::merge::deep_merge(&mut untyped, &empty);
        assert_eq!(untyped, first);
    }

    #[test]
    fn test_array_replaces_list() {
        let mut line = Line::default();
        apply(&mut line, &json!({"Sectors": [{"Value": "1"}, {"Value": "2"}]}));
        apply(&mut line, &json!({"Sectors": [{"Value": "3"}]}));
        assert_eq!(line.sectors.len(), 1);
        assert_eq!(line.sectors[0].value.as_deref(), Some("3"));
    }

    #[test]
    fn test_map_null_removes_key() {
        let mut line = Line::default();
        apply(&mut line, &json!({"Stats": {"a": 1.0, "b": 2.0}}));
        apply(&mut line, &json!({"Stats": {"a": null, "c": 3}}));
        assert_eq!(line.stats.len(), 2);
        assert!(!line.stats.contains_key("a"));
        assert_eq!(line.stats.get("c"), Some(&3.0));
    }

    #[test]
    fn test_incompatible_field_is_skipped_rest_applied() {
        let mut line = Line::default();
        let ctx = apply(
            &mut line,
            &json!({"Position": {"nested": true}, "GapToLeader": "+0.5"}),
        );
        assert_eq!(line.position, None);
        assert_eq!(line.gap.as_deref(), Some("+0.5"));
        assert_eq!(ctx.skipped().len(), 1);
        assert_eq!(ctx.skipped()[0].path, "$.Position");
    }

    #[test]
    fn test_struct_null_resets() {
        let mut line = Line::default();
        apply(&mut line, &json!({"Position": 1}));
        apply(&mut line, &Value::Null);
        assert_eq!(line, Line::default());
    }

    #[test]
    fn test_non_object_for_struct_is_skipped() {
        let mut line = Line::default();
        apply(&mut line, &json!({"Position": 1}));
        let ctx = apply(&mut line, &json!("nonsense"));
        assert_eq!(line.position, Some(1));
        assert!(!ctx.is_clean());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let mut line = Line::default();
        let ctx = apply(&mut line, &json!({"_kf": true, "Position": 4}));
        assert!(ctx.is_clean());
        assert_eq!(line.position, Some(4));
    }

    #[test]
    fn test_typed_idempotence() {
        let patch = json!({"Position": 5, "Stats": {"x": 1.5}, "Sectors": {"0": {"Value": "29.9"}}});
        let mut once = Line::default();
        apply(&mut once, &patch);
        let mut twice = once.clone();
        apply(&mut twice, &patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_map_ignores_metadata_keys() {
        let mut line = Line::default();
        let ctx = apply(&mut line, &json!({"Stats": {"_kf": true, "a": 1}}));
        assert!(ctx.is_clean());
        assert_eq!(line.stats.len(), 1);
    }

    #[test]
    fn test_rejected_new_map_entry_is_dropped() {
        let mut line = Line::default();
        let ctx = apply(&mut line, &json!({"Stats": {"a": "fast"}}));
        assert!(!ctx.is_clean());
        assert!(line.stats.is_empty());
    }

    #[test]
    fn test_bool_from_string() {
        let mut flag = false;
        apply(&mut flag, &json!("true"));
        assert!(flag);
    }

    #[test]
    fn test_timestamp_leaf() {
        let mut t: Option<DateTime<Utc>> = None;
        apply(&mut t, &json!("2024-03-02T15:00:00.123Z"));
        assert!(t.is_some());
        let ctx = apply(&mut t, &json!(12));
        assert!(!ctx.is_clean());
        assert!(t.is_some());
    }
}
