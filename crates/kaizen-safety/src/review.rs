//! AI security review with dual-provider arbitration
//!
//! Dangerous generated content is shown to both the primary (high-trust)
//! provider and the secondary with the same rubric, each returning a JSON
//! verdict. The primary's verdict trumps a secondary rejection; a verdict
//! from the secondary alone only counts when its trust score (agreement
//! rate with the primary over the last twenty dual reviews) is at least
//! 0.8. Every review is persisted; records older than thirty days are
//! pruned on write.

use chrono::{DateTime, Duration, Utc};
use kaizen_common::store::LazyStore;
use kaizen_common::util::generate_id;
use kaizen_common::Result;
use kaizen_provider::{AiProvider, CompletionRequest, ProviderSet};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Reviews older than this are pruned
const RETENTION_DAYS: i64 = 30;
/// Trust window: agreement measured over this many recent dual reviews
const TRUST_WINDOW: usize = 20;
/// Below this many dual samples the secondary's trust is 0.0
const TRUST_MIN_SAMPLES: usize = 5;
/// Secondary-only approvals require at least this trust
const TRUST_THRESHOLD: f64 = 0.8;

/// One provider's verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub approved: bool,
    pub reason: String,
}

/// The arbitrated decision
#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub approved: bool,
    pub reason: String,
    pub primary: Option<ReviewVerdict>,
    pub secondary: Option<ReviewVerdict>,
}

/// A persisted review record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: String,
    pub reviewed_at: DateTime<Utc>,
    pub context: String,
    pub code: String,
    pub dangerous_patterns: Vec<String>,
    pub primary: Option<ReviewVerdict>,
    pub secondary: Option<ReviewVerdict>,
    pub approved: bool,
    pub decision_reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReviewLogFile {
    reviews: Vec<ReviewRecord>,
}

/// Dual-provider security reviewer
pub struct SecurityReviewer {
    log: LazyStore<ReviewLogFile>,
    providers: Arc<ProviderSet>,
}

impl SecurityReviewer {
    pub fn new(log_path: impl Into<PathBuf>, providers: Arc<ProviderSet>) -> Self {
        Self {
            log: LazyStore::new(log_path),
            providers,
        }
    }

    /// Review dangerous generated content with both providers
    pub async fn review_code(
        &self,
        code: &str,
        context: &str,
        warnings: &[String],
    ) -> Result<ReviewDecision> {
        let prompt = review_prompt(code, context, warnings);

        let mut primary = None;
        if let Some(provider) = self.providers.primary() {
            if provider.is_available().await {
                primary = self.ask(provider, &prompt).await;
            }
        }
        let mut secondary = None;
        if let Some(provider) = self.providers.secondary() {
            if provider.is_available().await {
                secondary = self.ask(provider, &prompt).await;
            }
        }

        let decision = self.arbitrate(primary, secondary).await;
        self.record(context, code, warnings, &decision).await?;

        if decision.approved {
            info!("Security review approved: {}", decision.reason);
        } else {
            warn!("Security review rejected: {}", decision.reason);
        }
        Ok(decision)
    }

    /// Review a change to a conditionally-protected file. Primary-only:
    /// without the primary provider the change is rejected.
    pub async fn review_protected_change(
        &self,
        path: &str,
        description: &str,
        code: Option<&str>,
    ) -> Result<ReviewDecision> {
        let context = format!("protected file change: {}", path);

        let primary_provider = self.providers.primary();
        let primary_usable = match primary_provider {
            Some(provider) => provider.is_available().await,
            None => false,
        };
        let Some(primary_provider) = primary_provider.filter(|_| primary_usable) else {
            let decision = ReviewDecision {
                approved: false,
                reason: "Protected file".to_string(),
                primary: None,
                secondary: None,
            };
            self.record(&context, code.unwrap_or(""), &[], &decision).await?;
            return Ok(decision);
        };

        let prompt = format!(
            "A protected project file is about to be modified.\nFile: {}\nReason: {}\n{}\n\
             Respond with JSON only: {{\"approved\": true|false, \"reason\": \"...\"}}.\n\
             Approve only when the change is clearly safe and necessary.",
            path,
            description,
            code.map(|c| format!("Proposed content:\n{}", c)).unwrap_or_default(),
        );
        let verdict = self.ask(primary_provider, &prompt).await;

        let decision = match verdict {
            Some(v) => ReviewDecision {
                approved: v.approved,
                reason: if v.approved {
                    v.reason.clone()
                } else {
                    format!("Protected file: {}", v.reason)
                },
                primary: Some(v),
                secondary: None,
            },
            None => ReviewDecision {
                approved: false,
                reason: "Protected file".to_string(),
                primary: None,
                secondary: None,
            },
        };
        self.record(&context, code.unwrap_or(""), &[], &decision).await?;
        Ok(decision)
    }

    async fn ask(&self, provider: &Arc<dyn AiProvider>, prompt: &str) -> Option<ReviewVerdict> {
        match provider.complete(&CompletionRequest::new(prompt)).await {
            Ok(completion) => match parse_verdict(&completion.text) {
                Some(verdict) => Some(verdict),
                None => {
                    warn!(
                        "Provider '{}' returned an unparseable review verdict",
                        provider.name()
                    );
                    None
                }
            },
            Err(e) => {
                warn!("Review call to '{}' failed: {}", provider.name(), e);
                None
            }
        }
    }

    async fn arbitrate(
        &self,
        primary: Option<ReviewVerdict>,
        secondary: Option<ReviewVerdict>,
    ) -> ReviewDecision {
        match (&primary, &secondary) {
            (Some(p), Some(s)) => {
                let (approved, reason) = match (p.approved, s.approved) {
                    (true, true) => (true, format!("Both reviewers approved: {}", p.reason)),
                    // The primary trumps a secondary rejection
                    (true, false) => (true, format!("Primary approved (overrides secondary): {}", p.reason)),
                    (false, _) => (false, format!("Primary rejected: {}", p.reason)),
                };
                ReviewDecision {
                    approved,
                    reason,
                    primary,
                    secondary,
                }
            }
            (Some(p), None) => ReviewDecision {
                approved: p.approved,
                reason: p.reason.clone(),
                primary,
                secondary,
            },
            (None, Some(s)) => {
                let trust = self.secondary_trust_score().await;
                if s.approved && trust >= TRUST_THRESHOLD {
                    ReviewDecision {
                        approved: true,
                        reason: format!("Secondary approved with trust {:.2}: {}", trust, s.reason),
                        primary,
                        secondary,
                    }
                } else if s.approved {
                    ReviewDecision {
                        approved: false,
                        reason: format!(
                            "Secondary approval rejected, trust {:.2} below {:.2}",
                            trust, TRUST_THRESHOLD
                        ),
                        primary,
                        secondary,
                    }
                } else {
                    ReviewDecision {
                        approved: false,
                        reason: format!("Secondary rejected: {}", s.reason),
                        primary,
                        secondary,
                    }
                }
            }
            (None, None) => ReviewDecision {
                approved: false,
                reason: "No reviewer available".to_string(),
                primary,
                secondary,
            },
        }
    }

    /// Agreement rate of primary vs. secondary over the last dual reviews
    pub async fn secondary_trust_score(&self) -> f64 {
        let log = self.log.read().await;
        let dual: Vec<&ReviewRecord> = log
            .reviews
            .iter()
            .rev()
            .filter(|r| r.primary.is_some() && r.secondary.is_some())
            .take(TRUST_WINDOW)
            .collect();
        if dual.len() < TRUST_MIN_SAMPLES {
            return 0.0;
        }
        let agreements = dual
            .iter()
            .filter(|r| {
                r.primary.as_ref().map(|v| v.approved) == r.secondary.as_ref().map(|v| v.approved)
            })
            .count();
        agreements as f64 / dual.len() as f64
    }

    async fn record(
        &self,
        context: &str,
        code: &str,
        warnings: &[String],
        decision: &ReviewDecision,
    ) -> Result<()> {
        let record = ReviewRecord {
            id: generate_id("rev"),
            reviewed_at: Utc::now(),
            context: context.to_string(),
            code: code.to_string(),
            dangerous_patterns: warnings.to_vec(),
            primary: decision.primary.clone(),
            secondary: decision.secondary.clone(),
            approved: decision.approved,
            decision_reason: decision.reason.clone(),
        };
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        self.log
            .mutate(|file| {
                file.reviews.push(record);
                file.reviews.retain(|r| r.reviewed_at >= cutoff);
            })
            .await
    }

    /// Most recent review records, newest last
    pub async fn recent_reviews(&self, n: usize) -> Vec<ReviewRecord> {
        let log = self.log.read().await;
        let len = log.reviews.len();
        log.reviews[len.saturating_sub(n)..].to_vec()
    }
}

fn review_prompt(code: &str, context: &str, warnings: &[String]) -> String {
    format!(
        "You are a security reviewer for an autonomous coding agent.\n\
         Context: {}\n\
         Automated scanning flagged: {}\n\
         Review the following code and decide whether it is safe to write to the project.\n\
         Respond with JSON only: {{\"approved\": true|false, \"reason\": \"...\"}}.\n\n{}",
        context,
        warnings.join(", "),
        code,
    )
}

/// Extract a `{"approved": ..., "reason": ...}` object from provider output
fn parse_verdict(text: &str) -> Option<ReviewVerdict> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<ReviewVerdict>(&text[start..=end]).ok()
}
