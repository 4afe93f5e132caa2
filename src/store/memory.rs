//! In-memory `LeadStore` for tests and ephemeral runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::traits::{LeadStore, SendWrite};
use crate::campaign::job::{SendOutcome, SendRecord};
use crate::error::DatabaseError;
use crate::leads::CampaignKind;
use crate::leads::normalize::company_key;
use crate::qualification::QualifiedLead;

/// HashMap-backed store. Send records are kept in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    blacklist: RwLock<HashSet<String>>,
    sends: RwLock<Vec<SendRecord>>,
    leads: RwLock<HashMap<String, QualifiedLead>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn add_to_blacklist(&self, company: &str) -> Result<(), DatabaseError> {
        if let Some(key) = company_key(company) {
            self.blacklist.write().await.insert(key);
        }
        Ok(())
    }

    async fn blacklisted_companies(
        &self,
        company_keys: &[String],
    ) -> Result<HashSet<String>, DatabaseError> {
        let blacklist = self.blacklist.read().await;
        Ok(company_keys
            .iter()
            .filter(|k| blacklist.contains(*k))
            .cloned()
            .collect())
    }

    async fn contacted_phones(
        &self,
        phones: &[String],
        kind: CampaignKind,
        window_days: u32,
    ) -> Result<HashSet<String>, DatabaseError> {
        let cutoff = Utc::now() - chrono::Duration::days(window_days as i64);
        let wanted: HashSet<&String> = phones.iter().collect();
        let sends = self.sends.read().await;
        Ok(sends
            .iter()
            .filter(|r| {
                r.kind == kind
                    && r.outcome.counts_as_contact()
                    && r.updated_at >= cutoff
                    && wanted.contains(&r.phone)
            })
            .map(|r| r.phone.clone())
            .collect())
    }

    async fn record_send(
        &self,
        campaign_id: &str,
        phone: &str,
        kind: CampaignKind,
        outcome: SendOutcome,
        error: Option<&str>,
    ) -> Result<SendWrite, DatabaseError> {
        let now = Utc::now();
        let mut sends = self.sends.write().await;

        if let Some(existing) = sends
            .iter_mut()
            .find(|r| r.campaign_id == campaign_id && r.phone == phone)
        {
            if outcome == SendOutcome::Queued {
                return Ok(SendWrite::Conflict);
            }
            existing.outcome = outcome;
            existing.error = error.map(String::from);
            existing.updated_at = now;
            return Ok(SendWrite::Updated);
        }

        sends.push(SendRecord {
            campaign_id: campaign_id.to_string(),
            phone: phone.to_string(),
            kind,
            outcome,
            error: error.map(String::from),
            created_at: now,
            updated_at: now,
        });
        Ok(SendWrite::Inserted)
    }

    async fn list_send_records(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<SendRecord>, DatabaseError> {
        let sends = self.sends.read().await;
        Ok(sends
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn get_qualified_lead(
        &self,
        phone: &str,
    ) -> Result<Option<QualifiedLead>, DatabaseError> {
        Ok(self.leads.read().await.get(phone).cloned())
    }

    async fn upsert_qualified_lead(&self, lead: &QualifiedLead) -> Result<(), DatabaseError> {
        self.leads
            .write()
            .await
            .insert(lead.phone.clone(), lead.clone());
        Ok(())
    }

    async fn insert_qualified_lead_if_absent(
        &self,
        lead: &QualifiedLead,
    ) -> Result<bool, DatabaseError> {
        let mut leads = self.leads.write().await;
        if leads.contains_key(&lead.phone) {
            return Ok(false);
        }
        leads.insert(lead.phone.clone(), lead.clone());
        Ok(true)
    }

    async fn list_qualified_leads(&self) -> Result<Vec<QualifiedLead>, DatabaseError> {
        Ok(self.leads.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_claim_conflicts_on_second_attempt() {
        let store = MemoryStore::new();
        let kind = CampaignKind::Reactivation;
        assert_eq!(
            store
                .record_send("c1", "5511988887777", kind, SendOutcome::Queued, None)
                .await
                .unwrap(),
            SendWrite::Inserted
        );
        assert_eq!(
            store
                .record_send("c1", "5511988887777", kind, SendOutcome::Queued, None)
                .await
                .unwrap(),
            SendWrite::Conflict
        );
        assert_eq!(
            store
                .record_send("c1", "5511988887777", kind, SendOutcome::Sent, None)
                .await
                .unwrap(),
            SendWrite::Updated
        );
        // Another campaign may target the same phone.
        assert_eq!(
            store
                .record_send("c2", "5511988887777", kind, SendOutcome::Queued, None)
                .await
                .unwrap(),
            SendWrite::Inserted
        );

        let records = store.list_send_records("c1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, SendOutcome::Sent);
    }

    #[tokio::test]
    async fn single_lookups_delegate_to_batch() {
        let store = MemoryStore::new();
        store.add_to_blacklist(" ACME  Locações ").await.unwrap();
        assert!(store.lookup_blacklist("acme locações").await.unwrap());
        assert!(!store.lookup_blacklist("outra").await.unwrap());

        store
            .record_send("c1", "5511911112222", CampaignKind::ColdProspecting, SendOutcome::Delivered, None)
            .await
            .unwrap();
        assert!(
            store
                .was_recently_contacted("5511911112222", CampaignKind::ColdProspecting, 30)
                .await
                .unwrap()
        );
        assert!(
            !store
                .was_recently_contacted("5511911112222", CampaignKind::Reactivation, 30)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn insert_if_absent_never_resets() {
        let store = MemoryStore::new();
        let mut lead = QualifiedLead::new("5511933334444");
        lead.total_exchanges = 3;
        store.upsert_qualified_lead(&lead).await.unwrap();

        let fresh = QualifiedLead::new("5511933334444");
        assert!(!store.insert_qualified_lead_if_absent(&fresh).await.unwrap());
        let stored = store.get_qualified_lead("5511933334444").await.unwrap().unwrap();
        assert_eq!(stored.total_exchanges, 3);
    }
}
