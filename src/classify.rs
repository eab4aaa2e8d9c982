//! Map a file to its (category, subcategory) destination.
//!
//! Classification is pure: it looks at the name, size and modification time
//! it is given and never touches the filesystem.

use chrono::{DateTime, Datelike, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::config::{Config, SizeTier, Strategy, normalize_extension};
use crate::error::ClassificationError;

/// Category reached when nothing else matches.
pub const FALLBACK_CATEGORY: &str = "Misc";
/// Subcategory reached when nothing else matches.
pub const FALLBACK_SUBCATEGORY: &str = "Unsorted";

/// A resolved destination bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    pub category: String,
    pub subcategory: String,
}

impl Classification {
    pub fn new(category: impl Into<String>, subcategory: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
        }
    }

    pub fn fallback() -> Self {
        Self::new(FALLBACK_CATEGORY, FALLBACK_SUBCATEGORY)
    }

    pub fn is_fallback(&self) -> bool {
        self.category == FALLBACK_CATEGORY && self.subcategory == FALLBACK_SUBCATEGORY
    }
}

/// Flat, lowercase extension -> classification lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    by_extension: HashMap<String, Classification>,
}

impl RuleTable {
    /// Register a built-in rule unless the extension is already mapped.
    pub(crate) fn insert_default(&mut self, ext: &str, class: Classification) {
        self.by_extension.entry(ext.to_lowercase()).or_insert(class);
    }

    /// Register a custom rule; it always replaces the existing mapping.
    pub(crate) fn insert_override(&mut self, ext: &str, class: Classification) {
        self.by_extension.insert(ext.to_lowercase(), class);
    }

    /// Case-insensitive lookup, with or without the leading dot.
    pub fn lookup(&self, ext: &str) -> Option<&Classification> {
        let key = normalize_extension(ext)?;
        self.by_extension.get(&key)
    }

    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

/// What classification looks at.
#[derive(Debug, Clone, Copy)]
pub struct FileFacts<'a> {
    pub path: &'a Path,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl FileFacts<'_> {
    fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }
}

impl Strategy {
    /// Apply this strategy to one file.
    pub fn classify(&self, file: &FileFacts<'_>, rules: &RuleTable, tiers: &[SizeTier]) -> Classification {
        match self {
            Strategy::Extension => by_extension(file, rules),
            Strategy::Date => by_date(file),
            Strategy::Size => by_size(file, tiers),
            Strategy::Hybrid => {
                let class = by_extension(file, rules);
                if class.is_fallback() {
                    by_date(file)
                } else {
                    class
                }
            }
        }
    }
}

fn by_extension(file: &FileFacts<'_>, rules: &RuleTable) -> Classification {
    file.extension()
        .and_then(|ext| rules.lookup(ext))
        .cloned()
        .unwrap_or_else(Classification::fallback)
}

fn by_date(file: &FileFacts<'_>) -> Classification {
    Classification::new(
        format!("{:04}", file.modified.year()),
        format!("{:02}", file.modified.month()),
    )
}

fn by_size(file: &FileFacts<'_>, tiers: &[SizeTier]) -> Classification {
    tiers
        .iter()
        .find(|tier| tier.below.is_none_or(|below| file.size < below))
        .or_else(|| tiers.last())
        .map(|tier| Classification::new(&tier.category, &tier.subcategory))
        .unwrap_or_else(Classification::fallback)
}

/// A strategy bound to its rule table, built once per run.
#[derive(Debug, Clone)]
pub struct Classifier {
    strategy: Strategy,
    rules: RuleTable,
    tiers: Vec<SizeTier>,
}

impl Classifier {
    pub fn new(strategy: Strategy, rules: RuleTable, tiers: Vec<SizeTier>) -> Self {
        Self {
            strategy,
            rules,
            tiers,
        }
    }

    /// Build from configuration, validating the rule table.
    pub fn from_config(config: &Config) -> Result<Self, ClassificationError> {
        let rules = config.rule_table()?;
        Ok(Self::new(config.strategy, rules, config.size_tiers.clone()))
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn classify(&self, file: &FileFacts<'_>) -> Classification {
        self.strategy.classify(file, &self.rules, &self.tiers)
    }
}
