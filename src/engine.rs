//! `CampaignEngine`: the caller-facing operations, independent of HTTP.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::campaign::{
    CampaignJob, CampaignPlan, CampaignRegistry, CampaignStatus, DefaultTemplates, DispatchHandle,
    Dispatcher, MessagePreview, SendOutcome, SendRecord, default_template_texts, default_templates,
};
use crate::config::EngineConfig;
use crate::error::{CampaignError, DatabaseError, Result};
use crate::leads::{CampaignKind, NormalizedLead, RawLead, SafetyFilter, SafetyReport};
use crate::qualification::{Board, ConversationEvent, QualificationMachine, QualifiedLead, Stage};
use crate::store::LeadStore;
use crate::transport::Transport;

/// Number of rendered samples returned with a preview.
const PREVIEW_SAMPLES: usize = 5;

/// Result of `preview_campaign`.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignPreview {
    pub kind: CampaignKind,
    pub sendable: Vec<NormalizedLead>,
    pub report: SafetyReport,
    pub templates: Vec<String>,
    pub samples: Vec<MessagePreview>,
}

/// Input to `launch_campaign`. Omitted templates fall back to the kind's
/// defaults; an explicit empty list is rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchRequest {
    pub kind: CampaignKind,
    pub leads: Vec<NormalizedLead>,
    #[serde(default)]
    pub templates: Option<Vec<String>>,
    #[serde(default)]
    pub delay_seconds: Option<u64>,
}

/// Wires the safety filter, dispatcher, registry, and qualification machine
/// over one store and one transport.
pub struct CampaignEngine {
    config: EngineConfig,
    store: Arc<dyn LeadStore>,
    filter: SafetyFilter,
    dispatcher: Dispatcher,
    registry: Arc<CampaignRegistry>,
    qualification: Arc<QualificationMachine>,
}

impl CampaignEngine {
    /// Fails if the dispatch delay range is inverted.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn LeadStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.dispatch.validate()?;
        let filter = SafetyFilter::new(&config.safety);
        let qualification = Arc::new(QualificationMachine::new(
            Arc::clone(&store),
            filter.normalizer().clone(),
            config.qualification.clone(),
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&store), transport)
            .with_qualification(Arc::clone(&qualification));

        Ok(Self {
            config,
            store,
            filter,
            dispatcher,
            registry: CampaignRegistry::new(),
            qualification,
        })
    }

    /// Use a shared registry instead of a private one.
    pub fn with_registry(mut self, registry: Arc<CampaignRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CampaignRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.store
    }

    // ── Campaigns ───────────────────────────────────────────────────

    /// Filter an uploaded batch and render a few sample messages.
    pub async fn preview_campaign(
        &self,
        rows: &[RawLead],
        kind: CampaignKind,
    ) -> Result<CampaignPreview> {
        let outcome = self.filter.filter(rows, kind, self.store.as_ref()).await?;
        let templates = default_template_texts(kind);
        let samples = outcome
            .sendable
            .iter()
            .take(PREVIEW_SAMPLES)
            .map(|lead| MessagePreview::new(lead, &templates))
            .collect();

        Ok(CampaignPreview {
            kind,
            sendable: outcome.sendable,
            report: outcome.report,
            templates,
            samples,
        })
    }

    /// Validate, check the transport, and start the send loop. Returns the
    /// initial snapshot; the loop keeps running in the background.
    pub async fn launch_campaign(&self, request: LaunchRequest) -> Result<CampaignJob> {
        let normalizer = self.filter.normalizer();
        let leads = request
            .leads
            .into_iter()
            .map(|mut lead| {
                lead.phone_e164 = normalizer.normalize_phone(&lead.phone_e164)?;
                Ok(lead)
            })
            .collect::<std::result::Result<Vec<_>, crate::error::ValidationError>>()?;
        let templates = request
            .templates
            .unwrap_or_else(|| default_template_texts(request.kind));

        let plan = CampaignPlan::new(
            request.kind,
            leads,
            templates,
            request.delay_seconds,
            &self.config.dispatch,
        )?;

        let transport = self.dispatcher.transport();
        if let Err(e) = transport.check_ready().await {
            let mut job = plan.initial_job();
            let reason = e.to_string();
            if let Err(te) = job.transition_to(CampaignStatus::Failed) {
                error!(campaign_id = %job.id, error = %te, "Could not mark campaign failed");
            }
            job.last_error = Some(reason.clone());
            error!(
                campaign_id = %job.id,
                transport = transport.name(),
                error = %reason,
                "Campaign setup failed"
            );
            let id = job.id.clone();
            self.registry.insert(DispatchHandle::finished(job)).await;
            return Err(CampaignError::SetupFailed { id, reason }.into());
        }

        let handle = self.registry.insert(self.dispatcher.spawn(plan)).await;
        Ok(handle.status())
    }

    /// Latest snapshot. Poll about once a second until terminal.
    pub async fn get_campaign_status(&self, id: &str) -> Result<CampaignJob> {
        let handle = self.handle(id).await?;
        Ok(handle.status())
    }

    pub async fn list_campaigns(&self) -> Vec<CampaignJob> {
        self.registry.list().await
    }

    /// Request cancellation. The returned snapshot is already `cancelled`;
    /// the loop stops before its next send.
    pub async fn cancel_campaign(&self, id: &str) -> Result<CampaignJob> {
        let handle = self.handle(id).await?;
        if !handle.cancel() {
            let job = handle.status();
            return Err(CampaignError::InvalidTransition {
                id: job.id,
                from: job.status.to_string(),
                to: CampaignStatus::Cancelled.to_string(),
            }
            .into());
        }
        info!(campaign_id = %id, "Campaign cancellation requested");
        Ok(handle.status())
    }

    async fn handle(&self, id: &str) -> Result<Arc<DispatchHandle>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| CampaignError::NotFound { id: id.to_string() }.into())
    }

    /// Mark a lead's send as delivered once the gateway confirms it. Only a
    /// lead the campaign actually reached can be marked.
    pub async fn record_delivery(&self, campaign_id: &str, phone: &str) -> Result<SendRecord> {
        let phone = self.filter.normalizer().normalize_phone(phone)?;
        let record = self.send_record(campaign_id, &phone).await?;
        match record.outcome {
            SendOutcome::Delivered => return Ok(record),
            SendOutcome::Sent => {}
            other => {
                return Err(CampaignError::InvalidTransition {
                    id: campaign_id.to_string(),
                    from: other.to_string(),
                    to: SendOutcome::Delivered.to_string(),
                }
                .into());
            }
        }

        self.store
            .record_send(
                campaign_id,
                &phone,
                record.kind,
                SendOutcome::Delivered,
                record.error.as_deref(),
            )
            .await?;
        info!(campaign_id = %campaign_id, phone = %phone, "Delivery confirmed");
        self.send_record(campaign_id, &phone).await
    }

    async fn send_record(&self, campaign_id: &str, phone: &str) -> Result<SendRecord> {
        self.store
            .list_send_records(campaign_id)
            .await?
            .into_iter()
            .find(|r| r.phone == phone)
            .ok_or_else(|| {
                DatabaseError::NotFound {
                    entity: "send record".into(),
                    id: format!("{campaign_id}/{phone}"),
                }
                .into()
            })
    }

    pub fn default_templates(&self, kind: CampaignKind) -> DefaultTemplates {
        default_templates(kind)
    }

    /// Add a company to the existing-customer blacklist.
    pub async fn blacklist_company(&self, company: &str) -> Result<()> {
        self.store.add_to_blacklist(company).await?;
        info!(company = %company, "Company blacklisted");
        Ok(())
    }

    // ── Qualification ───────────────────────────────────────────────

    pub async fn record_conversation_event(&self, event: &ConversationEvent) -> Result<QualifiedLead> {
        self.qualification.apply_event(event).await
    }

    pub async fn move_lead(&self, phone: &str, stage: Stage) -> Result<QualifiedLead> {
        self.qualification.move_lead(phone, stage).await
    }

    pub async fn get_lead(&self, phone: &str) -> Result<Option<QualifiedLead>> {
        self.qualification.get_lead(phone).await
    }

    pub async fn get_board(&self) -> Result<Board> {
        self.qualification.board().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{Error, TransportError, ValidationError};
    use crate::qualification::Sentiment;
    use crate::store::MemoryStore;
    use crate::transport::OutboundMessage;

    struct CountingTransport {
        ready: bool,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        fn name(&self) -> &str {
            "counting"
        }

        async fn check_ready(&self) -> std::result::Result<(), TransportError> {
            if self.ready {
                Ok(())
            } else {
                Err(TransportError::NotConfigured {
                    name: "counting".into(),
                    reason: "no url".into(),
                })
            }
        }

        async fn send(&self, _message: &OutboundMessage) -> std::result::Result<(), TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine(ready: bool) -> (CampaignEngine, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport {
            ready,
            sent: AtomicUsize::new(0),
        });
        let engine = CampaignEngine::new(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            transport.clone(),
        )
        .unwrap();
        (engine, transport)
    }

    fn lead(phone: &str) -> NormalizedLead {
        NormalizedLead {
            name: Some("Ana".into()),
            phone_e164: phone.into(),
            company: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn preview_partitions_and_samples() {
        let (engine, _) = engine(true);
        let rows = vec![
            RawLead::new("Ana", "11988887777").with_status("Fechado"),
            RawLead::new("Ana", "11988887777"),
            RawLead::new("Bruno", "bad"),
            RawLead::new("Carla", "(11) 97777-6666"),
        ];
        let preview = engine
            .preview_campaign(&rows, CampaignKind::Reactivation)
            .await
            .unwrap();

        assert_eq!(preview.report.blocked_closed, 1);
        assert_eq!(preview.report.duplicates_removed, 1);
        assert_eq!(preview.report.no_phone, 1);
        assert_eq!(preview.sendable.len(), 1);
        assert_eq!(preview.samples.len(), 1);
        assert_eq!(preview.samples[0].messages.len(), preview.templates.len());
        assert!(preview.samples[0].messages[0].contains("Carla"));
    }

    #[tokio::test(start_paused = true)]
    async fn launch_runs_to_completion_and_seeds_board() {
        let (engine, transport) = engine(true);
        let job = engine
            .launch_campaign(LaunchRequest {
                kind: CampaignKind::ColdProspecting,
                leads: vec![lead("11988887777"), lead("5511977776666")],
                templates: Some(vec!["Oi [NAME]".into()]),
                delay_seconds: Some(30),
            })
            .await
            .unwrap();
        assert!(job.id.starts_with("cold_prospecting_"));

        let handle = engine.registry().get(&job.id).await.unwrap();
        let done = handle.wait().await;
        assert_eq!(done.status, CampaignStatus::Completed);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 2);

        let board = engine.get_board().await.unwrap();
        assert_eq!(board.summary[&Stage::Novo], 2);
        assert!(engine.get_lead("11988887777").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn launch_uses_default_templates_when_omitted() {
        let (engine, _) = engine(true);
        let job = engine
            .launch_campaign(LaunchRequest {
                kind: CampaignKind::Reactivation,
                leads: vec![lead("11988887777")],
                templates: None,
                delay_seconds: None,
            })
            .await
            .unwrap();
        assert_eq!(job.messages_per_lead, 2);
        assert_eq!(job.delay_seconds, 45);
        engine.cancel_campaign(&job.id).await.unwrap();
    }

    #[tokio::test]
    async fn launch_validation_errors_are_synchronous() {
        let (engine, transport) = engine(true);
        let err = engine
            .launch_campaign(LaunchRequest {
                kind: CampaignKind::Reactivation,
                leads: vec![],
                templates: None,
                delay_seconds: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyLeadList)));

        let err = engine
            .launch_campaign(LaunchRequest {
                kind: CampaignKind::Reactivation,
                leads: vec![lead("123")],
                templates: None,
                delay_seconds: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::InvalidPhone(_))));
        assert!(engine.list_campaigns().await.is_empty());
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn setup_failure_registers_failed_job() {
        let (engine, transport) = engine(false);
        let err = engine
            .launch_campaign(LaunchRequest {
                kind: CampaignKind::Reactivation,
                leads: vec![lead("11988887777")],
                templates: None,
                delay_seconds: None,
            })
            .await
            .unwrap_err();

        let Error::Campaign(CampaignError::SetupFailed { id, reason }) = err else {
            panic!("expected setup failure, got {err:?}");
        };
        assert!(reason.contains("no url"));

        let job = engine.get_campaign_status(&id).await.unwrap();
        assert_eq!(job.status, CampaignStatus::Failed);
        assert!(job.last_error.is_some());
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_campaign_and_double_cancel() {
        let (engine, _) = engine(true);
        assert!(matches!(
            engine.get_campaign_status("nope").await.unwrap_err(),
            Error::Campaign(CampaignError::NotFound { .. })
        ));

        let job = engine
            .launch_campaign(LaunchRequest {
                kind: CampaignKind::Reactivation,
                leads: vec![lead("11988887777"), lead("11977776666")],
                templates: None,
                delay_seconds: Some(120),
            })
            .await
            .unwrap();
        engine.cancel_campaign(&job.id).await.unwrap();
        let done = engine.registry().get(&job.id).await.unwrap().wait().await;
        assert_eq!(done.status, CampaignStatus::Cancelled);

        assert!(matches!(
            engine.cancel_campaign(&job.id).await.unwrap_err(),
            Error::Campaign(CampaignError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_returns_cancelled_snapshot() {
        let (engine, _) = engine(true);
        let job = engine
            .launch_campaign(LaunchRequest {
                kind: CampaignKind::Reactivation,
                leads: vec![lead("11988887777"), lead("11977776666")],
                templates: None,
                delay_seconds: Some(120),
            })
            .await
            .unwrap();

        let cancelled = engine.cancel_campaign(&job.id).await.unwrap();
        assert_eq!(cancelled.status, CampaignStatus::Cancelled);
        let polled = engine.get_campaign_status(&job.id).await.unwrap();
        assert_eq!(polled.status, CampaignStatus::Cancelled);
    }

    #[test]
    fn inverted_delay_range_is_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.dispatch.min_delay_secs = 90;
        config.dispatch.max_delay_secs = 30;
        let transport = Arc::new(CountingTransport {
            ready: true,
            sent: AtomicUsize::new(0),
        });
        let result = CampaignEngine::new(config, Arc::new(MemoryStore::new()), transport);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_receipt_upgrades_sent_record() {
        let (engine, _) = engine(true);
        let job = engine
            .launch_campaign(LaunchRequest {
                kind: CampaignKind::Reactivation,
                leads: vec![lead("11988887777")],
                templates: Some(vec!["Oi [NAME]".into()]),
                delay_seconds: Some(30),
            })
            .await
            .unwrap();
        engine.registry().get(&job.id).await.unwrap().wait().await;

        let record = engine.record_delivery(&job.id, "(11) 98888-7777").await.unwrap();
        assert_eq!(record.outcome, SendOutcome::Delivered);
        // Idempotent.
        let again = engine.record_delivery(&job.id, "11988887777").await.unwrap();
        assert_eq!(again.outcome, SendOutcome::Delivered);

        // A delivered lead still counts as contacted.
        let preview = engine
            .preview_campaign(&[RawLead::new("Ana", "11988887777")], CampaignKind::Reactivation)
            .await
            .unwrap();
        assert!(preview.sendable.is_empty());
        assert_eq!(preview.report.already_contacted, 1);

        assert!(matches!(
            engine.record_delivery(&job.id, "11977776666").await.unwrap_err(),
            Error::Database(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_send_cannot_be_marked_delivered() {
        let (engine, _) = engine(true);
        engine
            .store()
            .record_send("c1", "5511988887777", CampaignKind::Reactivation, SendOutcome::Failed, Some("boom"))
            .await
            .unwrap();
        assert!(matches!(
            engine.record_delivery("c1", "11988887777").await.unwrap_err(),
            Error::Campaign(CampaignError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn blacklisted_company_is_blocked_in_preview() {
        let (engine, _) = engine(true);
        engine.blacklist_company("Auto Pecas Silva").await.unwrap();
        let rows = vec![RawLead::new("Carlos", "11988887777").with_company("auto  pecas SILVA")];
        let preview = engine
            .preview_campaign(&rows, CampaignKind::ColdProspecting)
            .await
            .unwrap();
        assert!(preview.sendable.is_empty());
        assert_eq!(preview.report.blocked_closed, 1);
    }

    #[tokio::test]
    async fn conversation_events_and_manual_moves() {
        let (engine, _) = engine(true);
        let event = ConversationEvent {
            phone: "11988887777".into(),
            signals: vec!["equipment".into()],
            sentiment: Some(Sentiment::Positive),
            reply_text: "Tenho uma retroescavadeira".into(),
        };
        let lead = engine.record_conversation_event(&event).await.unwrap();
        assert_eq!(lead.stage, Stage::EmConversa);

        let moved = engine
            .move_lead("5511988887777", Stage::ReuniaoAgendada)
            .await
            .unwrap();
        assert_eq!(moved.stage, Stage::ReuniaoAgendada);

        let board = engine.get_board().await.unwrap();
        assert_eq!(board.total, 1);
        assert_eq!(board.summary[&Stage::ReuniaoAgendada], 1);
    }
}
