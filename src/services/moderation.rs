// src/services/moderation.rs

//! Regex title blocklist.

use regex::{Regex, RegexBuilder};

use super::ModerationPolicy;
use crate::error::Result;
use crate::models::ModerationConfig;

/// Blocks titles matching any configured pattern, and empty titles.
#[derive(Debug, Clone)]
pub struct TitleBlocklist {
    patterns: Vec<Regex>,
}

impl TitleBlocklist {
    pub fn new(config: &ModerationConfig) -> Result<Self> {
        let patterns = config
            .blocklist_patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl ModerationPolicy for TitleBlocklist {
    fn is_blocked(&self, title: &str) -> bool {
        let title = title.trim();
        title.is_empty() || self.patterns.iter().any(|p| p.is_match(title))
    }
}
