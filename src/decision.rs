//! Local ad decision pipeline.
//!
//! Selects at most one creative for a prompt/response pair using keyword
//! matching over an in-process catalog. Selection is a pure function of the
//! context and the catalog: no I/O, no clock, no randomness.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::error::{AdSdkError, Result};

/// Snapshot of one exchange to be evaluated for ad placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdContext {
    prompt: String,
    response: String,
    user_id: Option<String>,
}

impl AdContext {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Where a rendered ad goes inside the response text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    #[default]
    End,
    Start,
    AfterFirstParagraph,
}

/// An ad the local engine can select
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creative {
    pub id: String,
    pub category: String,
    /// Whole-word, case-insensitive triggers
    pub keywords: Vec<String>,
    pub headline: String,
    pub body: String,
    pub url: String,
    #[serde(default)]
    pub placement: Placement,
}

/// Result of one selection; `creative == None` is the no-op decision
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdDecision {
    pub creative: Option<Creative>,
    pub placement: Placement,
    /// Keywords that triggered the selection, in catalog order
    pub matched_keywords: Vec<String>,
    pub score: u32,
}

impl AdDecision {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.creative.is_none()
    }

    pub fn category(&self) -> Option<&str> {
        self.creative.as_ref().map(|c| c.category.as_str())
    }

    pub fn creative_id(&self) -> Option<&str> {
        self.creative.as_ref().map(|c| c.id.as_str())
    }
}

// Prompt hits count double: the prompt states intent, the response only echoes it.
const PROMPT_WEIGHT: u32 = 2;
const RESPONSE_WEIGHT: u32 = 1;

struct CompiledCreative {
    creative: Creative,
    patterns: Vec<(String, Regex)>,
}

/// Case-insensitive pattern matching `keyword` only where it is not glued to
/// other word characters, so `c++` and `.net` match as well as plain words
fn keyword_pattern(keyword: &str) -> Result<Regex> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(AdSdkError::validation("keyword must not be blank"));
    }
    Regex::new(&format!(r"(?i)(?:^|\W){}(?:\W|$)", regex::escape(keyword)))
        .map_err(|e| AdSdkError::validation(format!("invalid keyword {:?}: {}", keyword, e)))
}

fn compile_creative(creative: Creative) -> Result<CompiledCreative> {
    if creative.keywords.is_empty() {
        return Err(AdSdkError::validation(format!(
            "creative {} has no keywords",
            creative.id
        )));
    }
    let patterns = creative
        .keywords
        .iter()
        .map(|keyword| Ok((keyword.clone(), keyword_pattern(keyword)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(CompiledCreative { creative, patterns })
}

/// Keyword-matching selector over a fixed catalog
pub struct AdDecisionEngine {
    catalog: Vec<CompiledCreative>,
    min_score: u32,
}

impl AdDecisionEngine {
    /// Compile a catalog; keywords are matched as whole words, ignoring case
    ///
    /// # Errors
    /// `Validation` when a creative has no keywords or a keyword does not
    /// compile into a pattern.
    pub fn new(catalog: Vec<Creative>) -> Result<Self> {
        let catalog = catalog
            .into_iter()
            .map(compile_creative)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            catalog,
            min_score: 1,
        })
    }

    /// Engine over the built-in catalog
    pub fn with_default_catalog() -> Self {
        let catalog = default_catalog()
            .into_iter()
            .filter_map(|creative| {
                let id = creative.id.clone();
                match compile_creative(creative) {
                    Ok(compiled) => Some(compiled),
                    Err(error) => {
                        tracing::error!(creative = %id, error = %error, "Skipping built-in creative");
                        None
                    }
                }
            })
            .collect();

        Self {
            catalog,
            min_score: 1,
        }
    }

    /// Minimum score a creative needs to be eligible
    pub fn with_min_score(mut self, min_score: u32) -> Self {
        self.min_score = min_score.max(1);
        self
    }

    pub fn catalog_len(&self) -> usize {
        self.catalog.len()
    }

    /// Pick the best-scoring creative, or the no-op decision
    ///
    /// Ties go to catalog order, or, when the context carries a user id, to
    /// a stable per-user choice among the tied creatives.
    pub fn select_ad(&self, context: &AdContext) -> AdDecision {
        let mut best_score = 0;
        let mut candidates: Vec<(&CompiledCreative, Vec<String>)> = Vec::new();

        for entry in &self.catalog {
            let mut score = 0;
            let mut matched = Vec::new();
            for (keyword, regex) in &entry.patterns {
                let mut hit = false;
                if regex.is_match(context.prompt()) {
                    score += PROMPT_WEIGHT;
                    hit = true;
                }
                if regex.is_match(context.response()) {
                    score += RESPONSE_WEIGHT;
                    hit = true;
                }
                if hit {
                    matched.push(keyword.clone());
                }
            }

            if score < self.min_score || score < best_score {
                continue;
            }
            if score > best_score {
                best_score = score;
                candidates.clear();
            }
            candidates.push((entry, matched));
        }

        if candidates.is_empty() {
            return AdDecision::noop();
        }

        let index = match context.user_id() {
            Some(user_id) if candidates.len() > 1 => stable_index(user_id, candidates.len()),
            _ => 0,
        };
        let (entry, matched_keywords) = candidates.swap_remove(index);

        AdDecision {
            creative: Some(entry.creative.clone()),
            placement: entry.creative.placement,
            matched_keywords,
            score: best_score,
        }
    }
}

fn stable_index(user_id: &str, len: usize) -> usize {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % len as u64) as usize
}

fn creative(
    id: &str,
    category: &str,
    keywords: &[&str],
    headline: &str,
    body: &str,
    url: &str,
) -> Creative {
    Creative {
        id: id.to_string(),
        category: category.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        headline: headline.to_string(),
        body: body.to_string(),
        url: url.to_string(),
        placement: Placement::End,
    }
}

/// Built-in creatives used by [`select_ad`]
pub fn default_catalog() -> Vec<Creative> {
    vec![
        creative(
            "cr-perf-001",
            "developer_tools",
            &["performance", "caching", "cache", "latency", "optimize", "optimization", "slow"],
            "EdgeCache",
            "Cut response times with a globally distributed cache.",
            "https://ads.adstract.ai/edgecache",
        ),
        creative(
            "cr-db-002",
            "developer_tools",
            &["database", "sql", "postgres", "query", "index", "schema"],
            "ManagedSQL",
            "Serverless Postgres with automatic backups.",
            "https://ads.adstract.ai/managedsql",
        ),
        creative(
            "cr-sec-003",
            "security",
            &["security", "password", "encryption", "authentication", "vulnerability"],
            "VaultGuard",
            "Keep secrets out of your code and out of your logs.",
            "https://ads.adstract.ai/vaultguard",
        ),
        creative(
            "cr-travel-004",
            "travel",
            &["travel", "flight", "flights", "hotel", "vacation", "trip"],
            "TripFinder",
            "Compare flights and hotels in one search.",
            "https://ads.adstract.ai/tripfinder",
        ),
        creative(
            "cr-fit-005",
            "health",
            &["workout", "fitness", "exercise", "running", "training"],
            "PaceCoach",
            "Personal training plans that adapt to your week.",
            "https://ads.adstract.ai/pacecoach",
        ),
    ]
}

fn default_engine() -> &'static AdDecisionEngine {
    static ENGINE: OnceLock<AdDecisionEngine> = OnceLock::new();
    ENGINE.get_or_init(AdDecisionEngine::with_default_catalog)
}

/// Select an ad from the built-in catalog
pub fn select_ad(context: &AdContext) -> AdDecision {
    default_engine().select_ad(context)
}
