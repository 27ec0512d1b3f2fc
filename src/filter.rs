//! Pure predicate/transform over a line, plus the lookup machinery that
//! resolves a user-supplied filter for a given log (spec §4.2, §9).

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Line;

/// A user-supplied filter: returns the (possibly rewritten) line to keep
/// it, or `None` to drop it. Boxed as a plain callable rather than a trait
/// object hierarchy — spec §9 notes no dynamic code loading is needed in
/// the core, just a callable abstraction.
pub type FilterFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Identity filter used when no user filter matches a log (spec §4.2).
pub fn identity() -> FilterFn {
    Arc::new(|line: &str| Some(line.to_string()))
}

/// Tagged union over the three ways a filter can be looked up, in
/// first-match-wins order: by log name, then log id (API `log_key`), then
/// token (spec §4.2, §9).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Name(String),
    Id(String),
    Token(String),
}

/// Resolves filters and `filter_filenames` predicates by [`LookupKey`].
/// Constructed once by the (out-of-scope) configuration layer and consumed
/// read-only by the Supervisor during assembly.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    filters: HashMap<LookupKey, FilterFn>,
    filename_predicate: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: LookupKey, filter: FilterFn) -> &mut Self {
        self.filters.insert(key, filter);
        self
    }

    pub fn set_filename_predicate(
        &mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.filename_predicate = Some(Arc::new(predicate));
        self
    }

    /// Resolution order: by log name -> by log id -> by token -> identity
    /// (spec §4.2).
    pub fn resolve(&self, name: &str, log_id: Option<&str>, token: Option<&str>) -> FilterFn {
        if let Some(filter) = self.filters.get(&LookupKey::Name(name.to_string())) {
            return filter.clone();
        }
        if let Some(id) = log_id {
            if let Some(filter) = self.filters.get(&LookupKey::Id(id.to_string())) {
                return filter.clone();
            }
        }
        if let Some(token) = token {
            if let Some(filter) = self.filters.get(&LookupKey::Token(token.to_string())) {
                return filter.clone();
            }
        }
        identity()
    }

    /// Consulted once at Follower construction; a negative result means the
    /// log is not followed at all (spec §4.2).
    pub fn filter_filenames(&self, path: &str) -> bool {
        match &self.filename_predicate {
            Some(predicate) => predicate(path),
            None => true,
        }
    }
}

/// Applies `filter` to `line`, returning the value to pass to the
/// Formatter, or `None` if the line should be dropped. Mirrors `le.py`'s
/// `_send_line`: filter runs before formatter, and a dropped line never
/// reaches it.
pub fn apply(filter: &FilterFn, line: &Line) -> Option<Line> {
    filter(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passes_line_through() {
        let f = identity();
        assert_eq!(f("hello"), Some("hello".to_string()));
    }

    #[test]
    fn registry_resolution_order_is_name_then_id_then_token() {
        let mut registry = FilterRegistry::new();
        registry.register(
            LookupKey::Token("tok".into()),
            Arc::new(|_| Some("by-token".into())),
        );
        registry.register(
            LookupKey::Id("id-1".into()),
            Arc::new(|_| Some("by-id".into())),
        );
        registry.register(
            LookupKey::Name("mylog".into()),
            Arc::new(|_| Some("by-name".into())),
        );

        let resolved = registry.resolve("mylog", Some("id-1"), Some("tok"));
        assert_eq!(resolved("x"), Some("by-name".to_string()));

        let resolved = registry.resolve("other", Some("id-1"), Some("tok"));
        assert_eq!(resolved("x"), Some("by-id".to_string()));

        let resolved = registry.resolve("other", None, Some("tok"));
        assert_eq!(resolved("x"), Some("by-token".to_string()));

        let resolved = registry.resolve("other", None, None);
        assert_eq!(resolved("x"), Some("x".to_string()));
    }

    #[test]
    fn filter_can_drop_lines() {
        let drop_all: FilterFn = Arc::new(|_| None);
        assert_eq!(apply(&drop_all, &"anything".to_string()), None);
    }

    #[test]
    fn filename_predicate_defaults_to_true() {
        let registry = FilterRegistry::new();
        assert!(registry.filter_filenames("/var/log/anything.log"));
    }
}
