use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Category assigned when no keyword rule matches.
pub const DEFAULT_CATEGORY: &str = "misc";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Keyword lists applied to product names. Matching is plain substring, case-sensitive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterLists {
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Checked in order; the first rule with a matching keyword wins.
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
}

impl FilterLists {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read filter lists from {}", path.display()))?;
        let lists = Self::parse(&raw)
            .with_context(|| format!("Invalid filter lists in {}", path.display()))?;
        debug!(
            "Loaded {} blacklist, {} whitelist keywords and {} categories",
            lists.blacklist.len(),
            lists.whitelist.len(),
            lists.categories.len()
        );
        Ok(lists)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let lists: FilterLists = serde_json::from_str(raw)?;
        if lists.whitelist.is_empty() {
            warn!("Whitelist is empty: every product will be rejected");
        }
        Ok(lists)
    }

    pub fn blacklisted(&self, name: &str) -> bool {
        self.blacklist.iter().any(|k| name.contains(k.as_str()))
    }

    pub fn whitelisted(&self, name: &str) -> bool {
        self.whitelist.iter().any(|k| name.contains(k.as_str()))
    }

    pub fn categorize(&self, name: &str) -> &str {
        self.categories
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| name.contains(k.as_str())))
            .map(|rule| rule.name.as_str())
            .unwrap_or(DEFAULT_CATEGORY)
    }
}
