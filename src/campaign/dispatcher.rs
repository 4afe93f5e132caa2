//! Campaign dispatcher: runs one paced, cancellable send loop per campaign.
//!
//! Sends are strictly sequential with a fixed start-to-start delay between
//! consecutive messages, so a slow transport call does not compress the gap
//! that follows it. The job snapshot is published through a `watch` channel:
//! the loop is its only writer and status reads never wait on the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{CampaignJob, CampaignStatus, SendOutcome};
use super::template::{render, validate_templates};
use crate::config::DispatchConfig;
use crate::error::ValidationError;
use crate::leads::{CampaignKind, NormalizedLead};
use crate::qualification::QualificationMachine;
use crate::store::{LeadStore, SendWrite};
use crate::transport::{OutboundMessage, Transport};

/// Build a campaign id: `{kind}_{YYYYmmdd_HHMMSS}_{6 hex}`.
pub fn generate_campaign_id(kind: CampaignKind) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        kind.as_str(),
        Utc::now().format("%Y%m%d_%H%M%S"),
        &suffix[..6]
    )
}

/// A validated, ready-to-run campaign.
#[derive(Debug, Clone)]
pub struct CampaignPlan {
    pub id: String,
    pub kind: CampaignKind,
    pub leads: Vec<NormalizedLead>,
    pub templates: Vec<String>,
    pub delay: Duration,
}

impl CampaignPlan {
    /// Validate inputs and clamp the delay into the configured range.
    pub fn new(
        kind: CampaignKind,
        leads: Vec<NormalizedLead>,
        templates: Vec<String>,
        delay_seconds: Option<u64>,
        config: &DispatchConfig,
    ) -> Result<Self, ValidationError> {
        if leads.is_empty() {
            return Err(ValidationError::EmptyLeadList);
        }
        validate_templates(&templates)?;

        let clamped = config.clamp_delay(delay_seconds);
        if let Some(requested) = delay_seconds.filter(|d| *d != clamped) {
            debug!(requested, clamped, "Delay clamped into configured range");
        }

        Ok(Self {
            id: generate_campaign_id(kind),
            kind,
            leads,
            templates,
            delay: Duration::from_secs(clamped),
        })
    }

    /// Initial `queued` snapshot for this plan.
    pub fn initial_job(&self) -> CampaignJob {
        CampaignJob::new(
            self.id.clone(),
            self.kind,
            self.leads.len(),
            self.templates.len(),
            self.delay.as_secs(),
        )
    }
}

/// Reader side of a campaign: cheap status snapshots plus cancellation.
#[derive(Debug)]
pub struct DispatchHandle {
    id: String,
    state: watch::Receiver<CampaignJob>,
    cancel: CancellationToken,
}

impl DispatchHandle {
    /// Handle for a campaign that never started (setup failure).
    pub fn finished(job: CampaignJob) -> Self {
        let (_tx, rx) = watch::channel(job.clone());
        Self {
            id: job.id,
            state: rx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest snapshot. Never blocks on the send loop.
    ///
    /// Once cancellation is requested the snapshot reports `cancelled` even
    /// if the loop is still inside a transport call; the loop writes the
    /// same status when it observes the token.
    pub fn status(&self) -> CampaignJob {
        let mut job = self.state.borrow().clone();
        if self.cancel.is_cancelled() && !job.status.is_terminal() {
            job.status = CampaignStatus::Cancelled;
        }
        job
    }

    /// Request cancellation. Returns `false` if the campaign already finished
    /// or was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.cancel.is_cancelled() || self.state.borrow().status.is_terminal() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<CampaignJob> {
        self.state.clone()
    }

    /// Wait until the campaign reaches a terminal status.
    pub async fn wait(&self) -> CampaignJob {
        let mut rx = self.state.clone();
        let done = rx
            .wait_for(|job| job.status.is_terminal())
            .await
            .map(|job| job.clone());
        match done {
            Ok(job) => job,
            // Sender dropped: the loop is gone, return what it last wrote.
            Err(_) => rx.borrow().clone(),
        }
    }
}

/// Spawns campaign loops against a store and a transport.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn LeadStore>,
    transport: Arc<dyn Transport>,
    qualification: Option<Arc<QualificationMachine>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn LeadStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            qualification: None,
        }
    }

    /// Seed `novo` qualified leads for every lead reached.
    pub fn with_qualification(mut self, machine: Arc<QualificationMachine>) -> Self {
        self.qualification = Some(machine);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Start the send loop in the background and return its handle.
    pub fn spawn(&self, plan: CampaignPlan) -> DispatchHandle {
        let job = plan.initial_job();
        let (tx, rx) = watch::channel(job.clone());
        let cancel = CancellationToken::new();

        info!(
            campaign_id = %plan.id,
            kind = %plan.kind,
            leads = plan.leads.len(),
            messages_per_lead = plan.templates.len(),
            delay_secs = plan.delay.as_secs(),
            estimated_finish_at = %job.estimated_finish_at,
            "Campaign queued"
        );

        let runner = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            runner.run(plan, job, tx, token).await;
        });

        let id = rx.borrow().id.clone();
        DispatchHandle {
            id,
            state: rx,
            cancel,
        }
    }

    async fn run(
        &self,
        plan: CampaignPlan,
        mut job: CampaignJob,
        tx: watch::Sender<CampaignJob>,
        cancel: CancellationToken,
    ) {
        let tag = plan.kind.campaign_tag();
        let mut next_start = Instant::now();
        let mut cancelled = false;

        for lead in &plan.leads {
            let phone = lead.phone_e164.as_str();
            let mut delivered = 0usize;
            let mut failure: Option<String> = None;

            for (index, template) in plan.templates.iter().enumerate() {
                if !wait_turn(next_start, &cancel).await {
                    cancelled = true;
                    break;
                }

                if index == 0 {
                    // Claim (campaign, phone) before sending so a retried loop
                    // cannot reach the same lead twice.
                    match self
                        .store
                        .record_send(&plan.id, phone, plan.kind, SendOutcome::Queued, None)
                        .await
                    {
                        Ok(SendWrite::Conflict) => {
                            debug!(campaign_id = %plan.id, phone = %phone, "Lead already attempted in this campaign");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            failure = Some(format!("could not record send: {e}"));
                            break;
                        }
                    }
                }

                if job.status == CampaignStatus::Queued {
                    transition(&mut job, CampaignStatus::Running);
                    tx.send_replace(job.clone());
                    info!(campaign_id = %plan.id, "Campaign running");
                }

                next_start = Instant::now() + plan.delay;
                let message = OutboundMessage {
                    phone: phone.to_string(),
                    text: render(template, lead),
                    campaign_tag: tag.to_string(),
                };
                match self.transport.send(&message).await {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }

            if delivered == 0 && failure.is_none() {
                if cancelled {
                    break;
                }
                // Claim conflict: already handled by an earlier run.
                job.leads_sent += 1;
                tx.send_replace(job.clone());
                continue;
            }

            // Reached with at least one message counts as sent; a failed
            // follow-up is kept as the record's error.
            let outcome = if delivered > 0 {
                SendOutcome::Sent
            } else {
                SendOutcome::Failed
            };
            if let Err(e) = self
                .store
                .record_send(&plan.id, phone, plan.kind, outcome, failure.as_deref())
                .await
            {
                error!(campaign_id = %plan.id, phone = %phone, error = %e, "Failed to record send outcome");
            }

            match outcome {
                SendOutcome::Sent => {
                    job.leads_sent += 1;
                    info!(
                        campaign_id = %plan.id,
                        phone = %phone,
                        messages = delivered,
                        sent = job.leads_sent,
                        total = job.leads_total,
                        "Lead contacted"
                    );
                    if let Some(machine) = &self.qualification {
                        if let Err(e) = machine.seed_from_campaign(lead, &plan.id).await {
                            warn!(campaign_id = %plan.id, phone = %phone, error = %e, "Failed to seed qualified lead");
                        }
                    }
                }
                _ => {
                    job.leads_failed += 1;
                    job.last_error = failure.clone();
                    warn!(
                        campaign_id = %plan.id,
                        phone = %phone,
                        error = failure.as_deref().unwrap_or_default(),
                        failed = job.leads_failed,
                        "Lead send failed"
                    );
                }
            }
            tx.send_replace(job.clone());

            if cancelled {
                break;
            }
        }

        // A cancel that lands after the last send still wins.
        let cancelled = cancelled || cancel.is_cancelled();
        if job.status == CampaignStatus::Queued && !cancelled {
            transition(&mut job, CampaignStatus::Running);
        }
        let terminal = if cancelled {
            CampaignStatus::Cancelled
        } else {
            CampaignStatus::Completed
        };
        transition(&mut job, terminal);
        tx.send_replace(job.clone());

        info!(
            campaign_id = %plan.id,
            status = %job.status,
            sent = job.leads_sent,
            failed = job.leads_failed,
            total = job.leads_total,
            "Campaign finished"
        );
    }
}

/// Sleep until `next_start` unless cancelled first. Returns `false` when the
/// campaign should stop.
async fn wait_turn(next_start: Instant, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(next_start) => !cancel.is_cancelled(),
    }
}

fn transition(job: &mut CampaignJob, target: CampaignStatus) {
    if let Err(e) = job.transition_to(target) {
        warn!(campaign_id = %job.id, error = %e, "Ignoring invalid campaign transition");
    }
}
