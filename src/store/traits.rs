//! `LeadStore` trait: single async interface for everything the engine
//! reads and commits.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::campaign::job::{SendOutcome, SendRecord};
use crate::error::DatabaseError;
use crate::leads::CampaignKind;
use crate::qualification::QualifiedLead;

/// Result of a `record_send` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendWrite {
    /// New (campaign, phone) row created.
    Inserted,
    /// Existing row's outcome updated.
    Updated,
    /// A `queued` claim hit an existing row; the lead was already attempted
    /// in this campaign.
    Conflict,
}

/// Backend-agnostic storage for blacklist, send history, and qualified leads.
///
/// (campaign_id, phone) uniqueness of send records is enforced here, not by
/// callers.
#[async_trait]
pub trait LeadStore: Send + Sync {
    // ── Blacklist ───────────────────────────────────────────────────

    /// Add a company to the existing-customer blacklist.
    async fn add_to_blacklist(&self, company: &str) -> Result<(), DatabaseError>;

    /// Which of the given normalized company keys are blacklisted. One query.
    async fn blacklisted_companies(
        &self,
        company_keys: &[String],
    ) -> Result<HashSet<String>, DatabaseError>;

    /// Single-company convenience over [`Self::blacklisted_companies`].
    async fn lookup_blacklist(&self, company_key: &str) -> Result<bool, DatabaseError> {
        let hits = self.blacklisted_companies(&[company_key.to_string()]).await?;
        Ok(hits.contains(company_key))
    }

    // ── Send history ────────────────────────────────────────────────

    /// Which of the given phones were reached (sent or delivered) by a
    /// campaign of `kind` within the last `window_days`. One query.
    async fn contacted_phones(
        &self,
        phones: &[String],
        kind: CampaignKind,
        window_days: u32,
    ) -> Result<HashSet<String>, DatabaseError>;

    /// Single-phone convenience over [`Self::contacted_phones`].
    async fn was_recently_contacted(
        &self,
        phone: &str,
        kind: CampaignKind,
        window_days: u32,
    ) -> Result<bool, DatabaseError> {
        let hits = self
            .contacted_phones(&[phone.to_string()], kind, window_days)
            .await?;
        Ok(hits.contains(phone))
    }

    /// Write a send outcome for (campaign, phone).
    ///
    /// `Queued` is insert-if-absent and returns `Conflict` when the row
    /// exists. Any other outcome upserts.
    async fn record_send(
        &self,
        campaign_id: &str,
        phone: &str,
        kind: CampaignKind,
        outcome: SendOutcome,
        error: Option<&str>,
    ) -> Result<SendWrite, DatabaseError>;

    /// All send records of a campaign, oldest first.
    async fn list_send_records(&self, campaign_id: &str)
    -> Result<Vec<SendRecord>, DatabaseError>;

    // ── Qualified leads ─────────────────────────────────────────────

    async fn get_qualified_lead(&self, phone: &str)
    -> Result<Option<QualifiedLead>, DatabaseError>;

    /// Insert or fully replace the record for `lead.phone`.
    async fn upsert_qualified_lead(&self, lead: &QualifiedLead) -> Result<(), DatabaseError>;

    /// Insert only when no record exists. Returns whether it was inserted.
    async fn insert_qualified_lead_if_absent(
        &self,
        lead: &QualifiedLead,
    ) -> Result<bool, DatabaseError>;

    async fn list_qualified_leads(&self) -> Result<Vec<QualifiedLead>, DatabaseError>;
}
