//! Campaign job state machine and per-lead send records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CampaignError;
use crate::leads::CampaignKind;

/// Lifecycle state of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Registered, no send issued yet.
    Queued,
    /// First send has been issued.
    Running,
    /// Every lead was attempted.
    Completed,
    /// Could not start (transport unavailable).
    Failed,
    /// Stopped by an operator.
    Cancelled,
}

impl CampaignStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: CampaignStatus) -> bool {
        use CampaignStatus::*;

        matches!(
            (self, target),
            (Queued, Running) | (Queued, Failed) | (Queued, Cancelled) |
            (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot of one campaign. Written only by its dispatch loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignJob {
    pub id: String,
    pub kind: CampaignKind,
    pub status: CampaignStatus,
    pub leads_total: usize,
    pub leads_sent: usize,
    pub leads_failed: usize,
    pub messages_per_lead: usize,
    pub delay_seconds: u64,
    pub created_at: DateTime<Utc>,
    /// Fixed at creation; never recomputed mid-run.
    pub estimated_finish_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CampaignJob {
    pub fn new(
        id: impl Into<String>,
        kind: CampaignKind,
        leads_total: usize,
        messages_per_lead: usize,
        delay_seconds: u64,
    ) -> Self {
        let created_at = Utc::now();
        let total_secs = (leads_total * messages_per_lead) as i64 * delay_seconds as i64;
        Self {
            id: id.into(),
            kind,
            status: CampaignStatus::Queued,
            leads_total,
            leads_sent: 0,
            leads_failed: 0,
            messages_per_lead,
            delay_seconds,
            created_at,
            estimated_finish_at: created_at + chrono::Duration::seconds(total_secs),
            finished_at: None,
            last_error: None,
        }
    }

    /// Move to a new status, rejecting anything that leaves a terminal state.
    pub fn transition_to(&mut self, target: CampaignStatus) -> Result<(), CampaignError> {
        if !self.status.can_transition_to(target) {
            return Err(CampaignError::InvalidTransition {
                id: self.id.clone(),
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        if target.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Leads attempted so far.
    pub fn processed(&self) -> usize {
        self.leads_sent + self.leads_failed
    }

    pub fn remaining(&self) -> usize {
        self.leads_total.saturating_sub(self.processed())
    }
}

/// Outcome of one (campaign, phone) dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    /// Claimed before the transport call.
    Queued,
    /// Transport accepted the message.
    Sent,
    Failed,
    /// Gateway confirmed delivery.
    Delivered,
}

impl SendOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Delivered => "delivered",
        }
    }

    /// Whether this outcome means the lead was actually reached.
    pub fn counts_as_contact(&self) -> bool {
        matches!(self, Self::Sent | Self::Delivered)
    }
}

impl std::fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SendOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "delivered" => Ok(Self::Delivered),
            other => Err(format!("unknown send outcome: {other}")),
        }
    }
}

/// One row per (campaign_id, phone). Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecord {
    pub campaign_id: String,
    pub phone: String,
    pub kind: CampaignKind,
    pub outcome: SendOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        use CampaignStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Failed));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Queued));
        assert!(!Running.can_transition_to(Queued));
    }

    #[test]
    fn terminal_states_are_final() {
        use CampaignStatus::*;
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for target in [Queued, Running, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn estimated_finish_accounts_for_messages_per_lead() {
        let job = CampaignJob::new("c", CampaignKind::ColdProspecting, 10, 2, 30);
        assert_eq!(
            job.estimated_finish_at - job.created_at,
            chrono::Duration::seconds(600)
        );
        assert_eq!(job.status, CampaignStatus::Queued);
        assert_eq!(job.remaining(), 10);
    }

    #[test]
    fn transition_sets_finished_at_and_rejects_regression() {
        let mut job = CampaignJob::new("c", CampaignKind::Reactivation, 1, 1, 30);
        job.transition_to(CampaignStatus::Running).unwrap();
        assert!(job.finished_at.is_none());
        job.transition_to(CampaignStatus::Completed).unwrap();
        assert!(job.finished_at.is_some());

        let err = job.transition_to(CampaignStatus::Running).unwrap_err();
        assert!(matches!(err, CampaignError::InvalidTransition { .. }));
        assert_eq!(job.status, CampaignStatus::Completed);
    }

    #[test]
    fn only_sent_and_delivered_count_as_contact() {
        assert!(SendOutcome::Sent.counts_as_contact());
        assert!(SendOutcome::Delivered.counts_as_contact());
        assert!(!SendOutcome::Queued.counts_as_contact());
        assert!(!SendOutcome::Failed.counts_as_contact());
        assert_eq!("delivered".parse::<SendOutcome>().unwrap(), SendOutcome::Delivered);
    }
}
