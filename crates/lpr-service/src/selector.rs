//! Best-plate selection over the pooled, corrected candidates
//!
//! Tiers are tried in order and the first one with a match wins:
//!
//! 1. region format: two letters, one or two digits, one to three letters, four digits
//! 2. generic format: 5 to 10 alphanumerics
//! 3. full-frame scans only: alphanumeric length 5 to 10, letters and digits mixed preferred
//! 4. longest pooled string
//!
//! Within a tier the longest string wins, then the lexicographically smallest.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;

/// Which rule picked the plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionTier {
    Region,
    Generic,
    FullFrame,
    Fallback,
}

impl SelectionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionTier::Region => "region",
            SelectionTier::Generic => "generic",
            SelectionTier::FullFrame => "full_frame",
            SelectionTier::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub plate: String,
    pub tier: SelectionTier,
}

/// A named plate format matcher
#[derive(Debug, Clone)]
pub struct PlatePattern {
    pub name: &'static str,
    pub tier: SelectionTier,
    regex: Regex,
}

impl PlatePattern {
    pub fn new(name: &'static str, tier: SelectionTier, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .with_context(|| format!("Invalid plate pattern {name}: {pattern}"))?;
        Ok(Self { name, tier, regex })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

pub const REGION_PLATE_PATTERN: &str = r"^[A-Z]{2}[0-9]{1,2}[A-Z]{1,3}[0-9]{4}$";
pub const GENERIC_PLATE_PATTERN: &str = r"^[A-Z0-9]{5,10}$";

#[derive(Debug, Clone)]
pub struct CandidateSelector {
    patterns: Vec<PlatePattern>,
}

/// Longest string, ties to the first in iteration order
fn longest<'a, I>(candidates: I) -> Option<&'a String>
where
    I: IntoIterator<Item = &'a String>,
{
    candidates.into_iter().fold(None, |best, candidate| match best {
        Some(current) if current.len() >= candidate.len() => Some(current),
        _ => Some(candidate),
    })
}

fn alnum_len(candidate: &str) -> usize {
    candidate.chars().filter(|c| c.is_ascii_alphanumeric()).count()
}

fn is_mixed(candidate: &str) -> bool {
    candidate.chars().any(|c| c.is_ascii_alphabetic())
        && candidate.chars().any(|c| c.is_ascii_digit())
}

impl CandidateSelector {
    /// Region format first, then generic alphanumeric
    pub fn new() -> Result<Self> {
        Ok(Self {
            patterns: vec![
                PlatePattern::new("region", SelectionTier::Region, REGION_PLATE_PATTERN)?,
                PlatePattern::new("generic", SelectionTier::Generic, GENERIC_PLATE_PATTERN)?,
            ],
        })
    }

    pub fn with_patterns(patterns: Vec<PlatePattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[PlatePattern] {
        &self.patterns
    }

    /// Pick the best plate from `pool`. Empty strings are ignored; an empty
    /// pool yields `None`.
    pub fn select(&self, pool: &BTreeSet<String>, full_frame: bool) -> Option<Selection> {
        let pool: Vec<&String> = pool.iter().filter(|s| !s.is_empty()).collect();

        for pattern in &self.patterns {
            let best = longest(pool.iter().copied().filter(|s| pattern.is_match(s)));
            if let Some(plate) = best {
                return Some(Selection {
                    plate: plate.clone(),
                    tier: pattern.tier,
                });
            }
        }

        if full_frame {
            let sized: Vec<&String> = pool
                .iter()
                .copied()
                .filter(|s| (5..=10).contains(&alnum_len(s)))
                .collect();
            let best = longest(sized.iter().copied().filter(|s| is_mixed(s)))
                .or_else(|| longest(sized.iter().copied()));
            if let Some(plate) = best {
                return Some(Selection {
                    plate: plate.clone(),
                    tier: SelectionTier::FullFrame,
                });
            }
        }

        longest(pool).map(|plate| Selection {
            plate: plate.clone(),
            tier: SelectionTier::Fallback,
        })
    }
}
