//! Model roster: the fixed priority list of completion models.
//!
//! One preferred model followed by fallbacks in declared order. The order is
//! never re-sorted at runtime. Capability discovery may mark models as
//! unavailable, which removes them from candidate lists unless no other
//! candidate would remain.

use serde::Serialize;

/// Availability of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub available: bool,
    pub last_error: Option<String>,
    pub error_count: u32,
}

impl Default for ModelStatus {
    fn default() -> Self {
        Self {
            available: true,
            last_error: None,
            error_count: 0,
        }
    }
}

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    pub name: String,
    pub status: ModelStatus,
}

/// Ordered list of models: preferred first, then fallbacks.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRoster {
    entries: Vec<ModelEntry>,
}

impl ModelRoster {
    /// Creates a roster. Duplicate names keep their first position.
    #[must_use]
    pub fn new(preferred: impl Into<String>, fallbacks: impl IntoIterator<Item = String>) -> Self {
        let mut entries: Vec<ModelEntry> = Vec::new();
        for name in std::iter::once(preferred.into()).chain(fallbacks) {
            if !name.is_empty() && !entries.iter().any(|e| e.name == name) {
                entries.push(ModelEntry {
                    name,
                    status: ModelStatus::default(),
                });
            }
        }
        Self { entries }
    }

    /// Returns the roster's preferred model.
    #[must_use]
    pub fn preferred(&self) -> Option<&str> {
        self.entries.first().map(|e| e.name.as_str())
    }

    /// Returns all entries in priority order.
    #[must_use]
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Returns the ordered candidates for a request preferring `preferred`.
    ///
    /// The requested model leads, followed by every other roster model in
    /// declared priority. Models marked unavailable are skipped unless that
    /// would leave no candidate.
    #[must_use]
    pub fn candidates(&self, preferred: &str) -> Vec<String> {
        let ordered: Vec<&ModelEntry> = self
            .entries
            .iter()
            .filter(|e| e.name == preferred)
            .chain(self.entries.iter().filter(|e| e.name != preferred))
            .collect();

        let mut names: Vec<String> = Vec::with_capacity(ordered.len() + 1);
        // A preferred model outside the roster is still tried first.
        if !preferred.is_empty() && !ordered.iter().any(|e| e.name == preferred) {
            names.push(preferred.to_string());
        }

        let available: Vec<String> = ordered
            .iter()
            .filter(|e| e.status.available)
            .map(|e| e.name.clone())
            .collect();

        if available.is_empty() && names.is_empty() {
            names.extend(ordered.iter().map(|e| e.name.clone()));
        } else {
            names.extend(available);
        }
        names
    }

    /// Updates availability from the list of models the backend offers.
    pub fn apply_discovery(&mut self, offered: &[String]) {
        for entry in &mut self.entries {
            if offered.iter().any(|name| name == &entry.name) {
                entry.status.available = true;
            } else {
                entry.status.available = false;
                entry.status.error_count += 1;
                entry.status.last_error = Some("not offered by backend".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> ModelRoster {
        ModelRoster::new("a", ["b".to_string(), "c".to_string(), "a".to_string()])
    }

    #[test]
    fn duplicates_keep_first_position() {
        let names: Vec<_> = roster().entries().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn requested_model_leads_then_declared_order() {
        assert_eq!(roster().candidates("a"), ["a", "b", "c"]);
        assert_eq!(roster().candidates("c"), ["c", "a", "b"]);
    }

    #[test]
    fn unknown_requested_model_is_tried_first() {
        assert_eq!(roster().candidates("z"), ["z", "a", "b", "c"]);
    }

    #[test]
    fn unavailable_models_are_skipped() {
        let mut roster = roster();
        roster.apply_discovery(&["a".to_string(), "c".to_string()]);
        assert_eq!(roster.candidates("a"), ["a", "c"]);
        let b = &roster.entries()[1];
        assert!(!b.status.available);
        assert_eq!(b.status.error_count, 1);
    }

    #[test]
    fn all_unavailable_falls_back_to_full_list() {
        let mut roster = roster();
        roster.apply_discovery(&[]);
        assert_eq!(roster.candidates("b"), ["b", "a", "c"]);
    }

    #[test]
    fn rediscovery_restores_availability() {
        let mut roster = roster();
        roster.apply_discovery(&["a".to_string()]);
        roster.apply_discovery(&["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(roster.candidates("a"), ["a", "b", "c"]);
    }
}
