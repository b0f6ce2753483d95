//! Category catalog and label normalization.
//!
//! The catalog is the ordered list of user-defined category labels handed
//! to the provider, and the normalizer that maps the provider's free-text
//! category output back onto exactly one configured label. Normalization
//! never rejects a card: unmatched labels fall back to the first entry.

use serde::{Deserialize, Serialize};

/// A category descriptor, as shown to the provider in the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: String,

    /// Built-in rather than user-created
    #[serde(default)]
    pub is_system: bool,

    /// Marks the "not at the machine" category
    #[serde(default)]
    pub is_idle: bool,

    /// Alternate spellings the provider is known to produce
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl Category {
    fn new(id: &str, name: &str, description: &str, synonyms: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            is_system: true,
            is_idle: false,
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Ordered category list with normalization.
#[derive(Debug, Clone)]
pub struct CategoryCatalog {
    categories: Vec<Category>,
}

impl Default for CategoryCatalog {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CategoryCatalog {
    /// Build a catalog; an empty list falls back to the default set so the
    /// fallback entry always exists.
    pub fn new(categories: Vec<Category>) -> Self {
        if categories.is_empty() {
            return Self {
                categories: Self::default_set(),
            };
        }
        Self { categories }
    }

    /// The built-in category set.
    pub fn default_set() -> Vec<Category> {
        let mut idle = Category::new(
            "idle",
            "Idle",
            "Away from the machine or no meaningful activity on screen",
            &["idle time", "away", "inactive", "afk", "break"],
        );
        idle.is_idle = true;

        vec![
            Category::new(
                "work",
                "Work",
                "Focused productive work: coding, writing, design, documents",
                &["working", "productivity", "focus", "deep work"],
            ),
            Category::new(
                "communication",
                "Communication",
                "Meetings, email, chat, and calls",
                &["meetings", "email", "chat", "messaging"],
            ),
            Category::new(
                "learning",
                "Learning",
                "Reading, research, courses, and documentation",
                &["research", "reading", "study"],
            ),
            Category::new(
                "entertainment",
                "Entertainment",
                "Videos, games, social media, and casual browsing",
                &["leisure", "fun", "browsing", "social media"],
            ),
            idle,
        ]
    }

    /// Ordered descriptors for the provider prompt.
    pub fn list_for_prompt(&self) -> &[Category] {
        &self.categories
    }

    /// The fallback entry used for unmatched labels (first in the list).
    pub fn fallback(&self) -> &Category {
        &self.categories[0]
    }

    /// Name of the idle category, if one is configured.
    pub fn idle_label(&self) -> Option<&str> {
        self.categories
            .iter()
            .find(|c| c.is_idle)
            .map(|c| c.name.as_str())
    }

    /// Normalize a raw provider label onto exactly one configured name.
    ///
    /// Case-insensitive, whitespace-trimmed, synonym-aware; unmatched
    /// labels map to the fallback entry rather than being rejected.
    pub fn normalize(&self, raw: &str) -> String {
        let needle = raw.trim().to_lowercase();
        if needle.is_empty() {
            return self.fallback().name.clone();
        }

        for category in &self.categories {
            if category.name.to_lowercase() == needle {
                return category.name.clone();
            }
        }

        for category in &self.categories {
            if category
                .synonyms
                .iter()
                .any(|s| s.to_lowercase() == needle)
            {
                return category.name.clone();
            }
        }

        self.fallback().name.clone()
    }
}
