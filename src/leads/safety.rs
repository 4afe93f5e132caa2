//! Safety filter: turns an uploaded batch into a send list plus an audit report.
//!
//! Every input row lands in exactly one bucket, decided in priority order:
//! 1. phone fails normalization → `no_phone`
//! 2. phone already seen earlier in the batch → `duplicates_removed`
//! 3. closed status or blacklisted company → `blocked_closed`
//! 4. contacted for this campaign kind inside the dedup window → `already_contacted`
//! 5. otherwise → sendable
//!
//! Storage lookups for steps 3 and 4 are issued once per batch, not per row.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::model::{CampaignKind, LeadRef, NormalizedLead, RawLead};
use super::normalize::{Normalizer, company_key};
use crate::config::SafetyConfig;
use crate::error::DatabaseError;
use crate::store::LeadStore;

/// Audit breakdown of why leads were excluded from a send list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub total_original: usize,
    pub sendable: usize,
    pub already_contacted: usize,
    pub already_contacted_list: Vec<LeadRef>,
    pub duplicates_removed: usize,
    pub duplicates_list: Vec<LeadRef>,
    pub blocked_closed: usize,
    pub blocked_closed_list: Vec<LeadRef>,
    pub no_phone: usize,
    pub no_phone_list: Vec<LeadRef>,
}

impl SafetyReport {
    /// Every input row is accounted for exactly once.
    pub fn is_consistent(&self) -> bool {
        self.total_original
            == self.sendable
                + self.already_contacted
                + self.duplicates_removed
                + self.blocked_closed
                + self.no_phone
    }

    /// Copy with each list capped at `limit` entries. Counts are unchanged.
    pub fn truncated(&self, limit: usize) -> Self {
        let cap = |list: &Vec<LeadRef>| list.iter().take(limit).cloned().collect();
        Self {
            already_contacted_list: cap(&self.already_contacted_list),
            duplicates_list: cap(&self.duplicates_list),
            blocked_closed_list: cap(&self.blocked_closed_list),
            no_phone_list: cap(&self.no_phone_list),
            ..self.clone()
        }
    }
}

/// Sendable leads and the report describing everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub sendable: Vec<NormalizedLead>,
    pub report: SafetyReport,
}

/// A row that survived the pure checks and still needs storage lookups.
struct Candidate {
    row: usize,
    lead: NormalizedLead,
    company_key: Option<String>,
}

/// Partitions uploaded leads into sendable and categorized rejections.
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    normalizer: Normalizer,
    closed_statuses: HashSet<String>,
    dedup_window_days: u32,
}

impl SafetyFilter {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            normalizer: Normalizer::new(config.country_prefix.clone()),
            closed_statuses: config
                .closed_statuses
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
            dedup_window_days: config.dedup_window_days,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Whether a spreadsheet status marks the lead as an existing customer.
    pub fn is_closed_status(&self, status: &str) -> bool {
        let lowered = status.trim().to_lowercase();
        if lowered.is_empty() {
            return false;
        }
        self.closed_statuses.contains(&lowered)
            || lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| self.closed_statuses.contains(word))
    }

    /// Run the full filter over a batch.
    pub async fn filter(
        &self,
        raw_leads: &[RawLead],
        kind: CampaignKind,
        store: &dyn LeadStore,
    ) -> Result<FilterOutcome, DatabaseError> {
        let mut report = SafetyReport {
            total_original: raw_leads.len(),
            ..Default::default()
        };

        // Steps 1-3 (status part): pure, in input order.
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut candidates = Vec::new();

        for (row, raw) in raw_leads.iter().enumerate() {
            let lead = match self.normalizer.normalize(raw) {
                Ok(lead) => lead,
                Err(_) => {
                    debug!(row, phone = %raw.phone, "Rejected: unparsable phone");
                    report.no_phone_list.push(lead_ref(row, raw, &raw.phone, "invalid or missing phone"));
                    continue;
                }
            };

            if let Some(&first) = first_seen.get(&lead.phone_e164) {
                debug!(row, phone = %lead.phone_e164, first, "Rejected: duplicate in batch");
                report.duplicates_list.push(lead_ref(
                    row,
                    raw,
                    &lead.phone_e164,
                    &format!("duplicate of row {first}"),
                ));
                continue;
            }
            first_seen.insert(lead.phone_e164.clone(), row);

            if let Some(status) = raw.original_status.as_deref().filter(|s| self.is_closed_status(s)) {
                debug!(row, phone = %lead.phone_e164, status, "Rejected: closed status");
                report.blocked_closed_list.push(lead_ref(
                    row,
                    raw,
                    &lead.phone_e164,
                    &format!("closed status: {status}"),
                ));
                continue;
            }

            candidates.push(Candidate {
                row,
                company_key: raw.company.as_deref().and_then(company_key),
                lead,
            });
        }

        // Steps 3 (blacklist part) and 4: one batched lookup each.
        let phones: Vec<String> = candidates.iter().map(|c| c.lead.phone_e164.clone()).collect();
        let mut companies: Vec<String> = candidates
            .iter()
            .filter_map(|c| c.company_key.clone())
            .collect();
        companies.sort();
        companies.dedup();

        let blacklisted = if companies.is_empty() {
            HashSet::new()
        } else {
            store.blacklisted_companies(&companies).await?
        };
        let contacted = if phones.is_empty() {
            HashSet::new()
        } else {
            store
                .contacted_phones(&phones, kind, self.dedup_window_days)
                .await?
        };

        let mut sendable = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let raw = &raw_leads[candidate.row];
            let phone = &candidate.lead.phone_e164;

            if candidate
                .company_key
                .as_ref()
                .is_some_and(|key| blacklisted.contains(key))
            {
                debug!(row = candidate.row, phone = %phone, "Rejected: blacklisted company");
                report.blocked_closed_list.push(lead_ref(
                    candidate.row,
                    raw,
                    phone,
                    "company is an existing customer",
                ));
            } else if contacted.contains(phone) {
                debug!(row = candidate.row, phone = %phone, "Rejected: recently contacted");
                report.already_contacted_list.push(lead_ref(
                    candidate.row,
                    raw,
                    phone,
                    &format!("contacted in the last {} days", self.dedup_window_days),
                ));
            } else {
                sendable.push(candidate.lead);
            }
        }

        // Blacklisted companies were appended after closed statuses; restore input order.
        report.blocked_closed_list.sort_by_key(|r| r.row);

        report.sendable = sendable.len();
        report.already_contacted = report.already_contacted_list.len();
        report.duplicates_removed = report.duplicates_list.len();
        report.blocked_closed = report.blocked_closed_list.len();
        report.no_phone = report.no_phone_list.len();

        info!(
            kind = %kind,
            total = report.total_original,
            sendable = report.sendable,
            already_contacted = report.already_contacted,
            duplicates = report.duplicates_removed,
            blocked = report.blocked_closed,
            no_phone = report.no_phone,
            "Safety filter complete"
        );

        Ok(FilterOutcome { sendable, report })
    }
}

fn lead_ref(row: usize, raw: &RawLead, phone: &str, reason: &str) -> LeadRef {
    LeadRef {
        row,
        name: raw.name.trim().to_string(),
        phone: phone.to_string(),
        company: raw.company.clone().filter(|c| !c.trim().is_empty()),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::campaign::job::{SendOutcome, SendRecord};
    use crate::qualification::QualifiedLead;
    use crate::store::{MemoryStore, SendWrite};

    fn filter() -> SafetyFilter {
        SafetyFilter::new(&SafetyConfig::default())
    }

    /// Counts the batched lookups the filter issues.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        blacklist_queries: AtomicUsize,
        contact_queries: AtomicUsize,
    }

    #[async_trait]
    impl LeadStore for CountingStore {
        async fn add_to_blacklist(&self, company: &str) -> Result<(), DatabaseError> {
            self.inner.add_to_blacklist(company).await
        }

        async fn blacklisted_companies(
            &self,
            company_keys: &[String],
        ) -> Result<HashSet<String>, DatabaseError> {
            self.blacklist_queries.fetch_add(1, Ordering::SeqCst);
            self.inner.blacklisted_companies(company_keys).await
        }

        async fn contacted_phones(
            &self,
            phones: &[String],
            kind: CampaignKind,
            window_days: u32,
        ) -> Result<HashSet<String>, DatabaseError> {
            self.contact_queries.fetch_add(1, Ordering::SeqCst);
            self.inner.contacted_phones(phones, kind, window_days).await
        }

        async fn record_send(
            &self,
            campaign_id: &str,
            phone: &str,
            kind: CampaignKind,
            outcome: SendOutcome,
            error: Option<&str>,
        ) -> Result<SendWrite, DatabaseError> {
            self.inner
                .record_send(campaign_id, phone, kind, outcome, error)
                .await
        }

        async fn list_send_records(
            &self,
            campaign_id: &str,
        ) -> Result<Vec<SendRecord>, DatabaseError> {
            self.inner.list_send_records(campaign_id).await
        }

        async fn get_qualified_lead(
            &self,
            phone: &str,
        ) -> Result<Option<QualifiedLead>, DatabaseError> {
            self.inner.get_qualified_lead(phone).await
        }

        async fn upsert_qualified_lead(&self, lead: &QualifiedLead) -> Result<(), DatabaseError> {
            self.inner.upsert_qualified_lead(lead).await
        }

        async fn insert_qualified_lead_if_absent(
            &self,
            lead: &QualifiedLead,
        ) -> Result<bool, DatabaseError> {
            self.inner.insert_qualified_lead_if_absent(lead).await
        }

        async fn list_qualified_leads(&self) -> Result<Vec<QualifiedLead>, DatabaseError> {
            self.inner.list_qualified_leads().await
        }
    }

    #[tokio::test]
    async fn lookups_are_batched_once_per_filter() {
        let store = CountingStore::default();
        store.add_to_blacklist("Cliente Antigo").await.unwrap();
        let rows: Vec<RawLead> = (0..50)
            .map(|i| {
                RawLead::new(format!("Lead {i}"), format!("119000000{i:02}"))
                    .with_company(format!("Empresa {}", i % 7))
            })
            .chain([RawLead::new("Old", "11988887777").with_company("cliente antigo")])
            .collect();

        let outcome = filter()
            .filter(&rows, CampaignKind::Reactivation, &store)
            .await
            .unwrap();

        assert_eq!(outcome.sendable.len(), 50);
        assert_eq!(outcome.report.blocked_closed, 1);
        assert_eq!(store.blacklist_queries.load(Ordering::SeqCst), 1);
        assert_eq!(store.contact_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_duplicate_and_bad_phone_scenario() {
        let store = MemoryStore::new();
        let rows = vec![
            RawLead::new("Ana", "11988887777").with_status("Fechado"),
            RawLead::new("Ana", "11988887777"),
            RawLead::new("Bruno", "bad"),
        ];

        let outcome = filter()
            .filter(&rows, CampaignKind::Reactivation, &store)
            .await
            .unwrap();

        assert!(outcome.sendable.is_empty());
        assert_eq!(outcome.report.blocked_closed, 1);
        assert_eq!(outcome.report.blocked_closed_list[0].row, 0);
        assert_eq!(outcome.report.duplicates_removed, 1);
        assert_eq!(outcome.report.duplicates_list[0].row, 1);
        assert_eq!(outcome.report.no_phone, 1);
        assert!(outcome.report.is_consistent());
    }

    #[tokio::test]
    async fn first_occurrence_wins() {
        let store = MemoryStore::new();
        let rows = vec![
            RawLead::new("Carla", "(21) 99999-0000"),
            RawLead::new("Carla 2", "+55 21 99999-0000"),
        ];
        let outcome = filter()
            .filter(&rows, CampaignKind::ColdProspecting, &store)
            .await
            .unwrap();

        assert_eq!(outcome.sendable.len(), 1);
        assert_eq!(outcome.sendable[0].name.as_deref(), Some("Carla"));
        assert_eq!(outcome.report.duplicates_list[0].name, "Carla 2");
    }

    #[tokio::test]
    async fn closed_status_blocks_every_kind() {
        let store = MemoryStore::new();
        let rows = vec![RawLead::new("Dora", "11977776666").with_status("Cliente ATIVO")];
        for kind in [CampaignKind::Reactivation, CampaignKind::ColdProspecting] {
            let outcome = filter().filter(&rows, kind, &store).await.unwrap();
            assert!(outcome.sendable.is_empty());
            assert_eq!(outcome.report.blocked_closed, 1);
        }
    }

    #[test]
    fn closed_status_matches_words_not_fragments() {
        let f = filter();
        assert!(f.is_closed_status("FECHADO"));
        assert!(f.is_closed_status("contrato assinado"));
        assert!(!f.is_closed_status("inativo"));
        assert!(!f.is_closed_status("em negociação"));
        assert!(!f.is_closed_status(""));
    }

    #[tokio::test]
    async fn blacklisted_company_is_blocked() {
        let store = MemoryStore::new();
        store.add_to_blacklist("Locadora Silva").await.unwrap();
        let rows = vec![
            RawLead::new("Eva", "11966665555").with_company("  locadora   SILVA"),
            RawLead::new("Fabio", "11955554444").with_company("Outra"),
        ];
        let outcome = filter()
            .filter(&rows, CampaignKind::Reactivation, &store)
            .await
            .unwrap();

        assert_eq!(outcome.report.blocked_closed, 1);
        assert_eq!(outcome.sendable.len(), 1);
        assert_eq!(outcome.sendable[0].phone_e164, "5511955554444");
    }

    #[tokio::test]
    async fn recent_contact_is_per_kind() {
        let store = MemoryStore::new();
        store
            .record_send("c1", "5511944443333", CampaignKind::Reactivation, SendOutcome::Queued, None)
            .await
            .unwrap();
        store
            .record_send("c1", "5511944443333", CampaignKind::Reactivation, SendOutcome::Sent, None)
            .await
            .unwrap();

        let rows = vec![RawLead::new("Gil", "11944443333")];

        let reactivation = filter()
            .filter(&rows, CampaignKind::Reactivation, &store)
            .await
            .unwrap();
        assert_eq!(reactivation.report.already_contacted, 1);
        assert!(reactivation.sendable.is_empty());

        let cold = filter()
            .filter(&rows, CampaignKind::ColdProspecting, &store)
            .await
            .unwrap();
        assert_eq!(cold.sendable.len(), 1);
    }

    #[tokio::test]
    async fn failed_sends_do_not_count_as_contacted() {
        let store = MemoryStore::new();
        store
            .record_send("c1", "5511933332222", CampaignKind::Reactivation, SendOutcome::Queued, None)
            .await
            .unwrap();
        store
            .record_send(
                "c1",
                "5511933332222",
                CampaignKind::Reactivation,
                SendOutcome::Failed,
                Some("gateway 500"),
            )
            .await
            .unwrap();

        let rows = vec![RawLead::new("Hugo", "11933332222")];
        let outcome = filter()
            .filter(&rows, CampaignKind::Reactivation, &store)
            .await
            .unwrap();
        assert_eq!(outcome.sendable.len(), 1);
    }

    #[tokio::test]
    async fn partition_is_complete_for_mixed_batch() {
        let store = MemoryStore::new();
        store.add_to_blacklist("Cliente Antigo").await.unwrap();
        store
            .record_send("old", "5511900000003", CampaignKind::Reactivation, SendOutcome::Queued, None)
            .await
            .unwrap();
        store
            .record_send("old", "5511900000003", CampaignKind::Reactivation, SendOutcome::Sent, None)
            .await
            .unwrap();

        let rows = vec![
            RawLead::new("A", "11900000001"),
            RawLead::new("B", "11900000001"),
            RawLead::new("C", "11900000002").with_status("won"),
            RawLead::new("D", "11900000003"),
            RawLead::new("E", ""),
            RawLead::new("F", "11900000004").with_company("cliente antigo"),
            RawLead::new("G", "11900000005"),
            RawLead::new("H", "123"),
        ];
        let outcome = filter()
            .filter(&rows, CampaignKind::Reactivation, &store)
            .await
            .unwrap();
        let r = &outcome.report;

        assert_eq!(r.total_original, 8);
        assert_eq!(r.sendable, 2);
        assert_eq!(r.duplicates_removed, 1);
        assert_eq!(r.blocked_closed, 2);
        assert_eq!(r.already_contacted, 1);
        assert_eq!(r.no_phone, 2);
        assert!(r.is_consistent());
        assert_eq!(
            r.blocked_closed_list.iter().map(|l| l.row).collect::<Vec<_>>(),
            vec![2, 5]
        );
    }

    #[test]
    fn truncated_keeps_counts() {
        let refs: Vec<LeadRef> = (0..20)
            .map(|row| LeadRef {
                row,
                name: format!("L{row}"),
                phone: String::new(),
                company: None,
                reason: "invalid or missing phone".into(),
            })
            .collect();
        let report = SafetyReport {
            total_original: 20,
            no_phone: 20,
            no_phone_list: refs,
            ..Default::default()
        };
        let short = report.truncated(10);
        assert_eq!(short.no_phone, 20);
        assert_eq!(short.no_phone_list.len(), 10);
        assert!(short.is_consistent());
    }
}
