use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::messages::{FactCheck, Verdict};

/// Trim, case-fold and collapse whitespace runs. Two claims that normalize
/// to the same string are the same claim; no fuzzy matching.
#[must_use]
pub fn normalize_claim(claim: &str) -> String {
    claim
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Per-room store of fact-check verdicts, at most one current entry per
/// normalized claim. Re-checking a claim updates the entry in place so the
/// analysis pipeline is never re-billed for a repeated claim.
#[derive(Default)]
pub struct FactCheckRegistry {
    entries: RwLock<HashMap<String, FactCheck>>,
}

impl FactCheckRegistry {
    #[must_use]
    pub fn new() -> Self {
        FactCheckRegistry::default()
    }

    /// Insert or overwrite the entry for `claim`. The entry id is stable
    /// across updates; `created_at` is set to the time of this call, so the
    /// last writer wins.
    pub async fn upsert(
        &self,
        claim: &str,
        verdict: Verdict,
        sources: Vec<String>,
        confidence: f64,
    ) -> FactCheck {
        let key = normalize_claim(claim);
        let mut entries = self.entries.write().await;
        match entries.get_mut(&key) {
            Some(existing) => {
                existing.verdict = verdict;
                existing.sources = sources;
                existing.confidence = confidence;
                existing.created_at = Utc::now();
                existing.clone()
            }
            None => {
                let entry = FactCheck {
                    id: Uuid::new_v4().to_string(),
                    claim: key.clone(),
                    verdict,
                    sources,
                    confidence,
                    created_at: Utc::now(),
                };
                entries.insert(key, entry.clone());
                entry
            }
        }
    }

    /// Store an externally-produced record verbatim, keyed by its normalized
    /// claim. Used when ingesting `FactCheckAdded` events from the channel.
    pub async fn insert_record(&self, fact_check: FactCheck) {
        let key = normalize_claim(&fact_check.claim);
        let mut entries = self.entries.write().await;
        entries.insert(key, fact_check);
    }

    pub async fn lookup(&self, claim: &str) -> Option<FactCheck> {
        let entries = self.entries.read().await;
        entries.get(&normalize_claim(claim)).cloned()
    }

    /// All entries, most recent first.
    pub async fn list(&self) -> Vec<FactCheck> {
        let entries = self.entries.read().await;
        let mut all: Vec<FactCheck> = entries.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Replace the whole store, e.g. after a gap-triggered resync.
    pub async fn replace_all(&self, records: Vec<FactCheck>) {
        let mut entries = self.entries.write().await;
        entries.clear();
        for record in records {
            entries.insert(normalize_claim(&record.claim), record);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn normalization_folds_case_and_whitespace() {
        assert_eq!(
            normalize_claim("  Paris   is the\tcapital of France  "),
            "paris is the capital of france"
        );
        assert_eq!(normalize_claim("paris is the capital of france"), "paris is the capital of france");
    }

    #[tokio::test]
    async fn upsert_dedups_by_normalized_claim() {
        let registry = FactCheckRegistry::new();
        let first = registry
            .upsert(
                "Paris is the capital of France",
                Verdict::True,
                vec!["encyclopedia".to_string()],
                0.9,
            )
            .await;
        let second = registry
            .upsert(
                "  paris is the capital of france  ",
                Verdict::Mixed,
                Vec::new(),
                0.4,
            )
            .await;

        let all = registry.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].verdict, Verdict::Mixed);
        assert_eq!(second.id, first.id);
        assert!(second.created_at >= first.created_at);
    }

    #[tokio::test]
    async fn lookup_is_exact_on_normalized_form() {
        let registry = FactCheckRegistry::new();
        registry
            .upsert("Water boils at 100C", Verdict::True, Vec::new(), 0.8)
            .await;

        assert!(registry.lookup("  WATER  boils at 100C ").await.is_some());
        assert!(registry.lookup("water boils at 100 degrees").await.is_none());
    }

    #[tokio::test]
    async fn list_orders_most_recent_first() {
        let registry = FactCheckRegistry::new();
        registry
            .upsert("older claim here", Verdict::False, Vec::new(), 0.7)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry
            .upsert("newer claim here", Verdict::True, Vec::new(), 0.7)
            .await;

        let all = registry.list().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].claim, "newer claim here");
        assert_eq!(all[1].claim, "older claim here");
    }

    #[tokio::test]
    async fn concurrent_upserts_leave_one_entry() {
        let registry = std::sync::Arc::new(FactCheckRegistry::new());
        let a = std::sync::Arc::clone(&registry);
        let b = std::sync::Arc::clone(&registry);
        let (left, right) = tokio::join!(
            a.upsert("The sky is blue", Verdict::True, Vec::new(), 0.9),
            b.upsert("  the SKY is   blue ", Verdict::Mixed, Vec::new(), 0.5),
        );
        assert_eq!(left.id, right.id);
        assert_eq!(registry.list().await.len(), 1);
    }
}
