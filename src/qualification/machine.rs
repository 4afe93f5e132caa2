//! Qualification state machine: applies conversation events and operator
//! moves to qualified leads, and projects the board.
//!
//! Events for the same phone are serialized through a per-phone lock so they
//! apply in arrival order; different phones proceed concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::model::{
    Board, BoardCard, ConversationEvent, QualifiedLead, Sentiment, Stage, TransitionSource,
};
use super::signals::{self, CONFIRMED, ParsedSignal};
use crate::config::QualificationConfig;
use crate::error::{QualificationError, Result};
use crate::leads::NormalizedLead;
use crate::leads::normalize::Normalizer;
use crate::store::LeadStore;

/// Decide the automatic next stage. Manual moves never go through here.
pub fn next_stage(
    current: Stage,
    sentiment: Sentiment,
    progress: u8,
    total_exchanges: u32,
    schedule_meeting: bool,
    curious_after: u32,
) -> Stage {
    use Stage::*;

    if current == Perdido {
        return Perdido;
    }
    if sentiment == Sentiment::Negative {
        return Perdido;
    }
    if schedule_meeting || current == ReuniaoAgendada {
        return ReuniaoAgendada;
    }
    if progress >= 4 && sentiment == Sentiment::Positive {
        return Qualificado;
    }
    match current {
        Novo => EmConversa,
        EmConversa
            if sentiment == Sentiment::Neutral
                && total_exchanges >= curious_after
                && progress < 2 =>
        {
            Curioso
        }
        Curioso if sentiment == Sentiment::Positive => EmConversa,
        other => other,
    }
}

/// Owns stage changes for qualified leads.
/// A handle on one phone's lock. Dropping it removes the map entry once
/// nobody else holds or waits on it, including when the owning future is
/// dropped mid-await.
struct PhoneLock<'a> {
    locks: &'a std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    phone: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for PhoneLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        let idle = Arc::strong_count(&self.lock) == 2
            && locks
                .get(&self.phone)
                .is_some_and(|current| Arc::ptr_eq(current, &self.lock));
        if idle {
            locks.remove(&self.phone);
        }
    }
}

pub struct QualificationMachine {
    store: Arc<dyn LeadStore>,
    normalizer: Normalizer,
    config: QualificationConfig,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QualificationMachine {
    pub fn new(store: Arc<dyn LeadStore>, normalizer: Normalizer, config: QualificationConfig) -> Self {
        Self {
            store,
            normalizer,
            config,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn phone_lock(&self, phone: &str) -> PhoneLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PhoneLock {
            locks: &self.locks,
            phone: phone.to_string(),
            lock,
        }
    }

    /// Apply one conversation event. Creates an inbound `novo` record for
    /// phones never seen before.
    pub async fn apply_event(&self, event: &ConversationEvent) -> Result<QualifiedLead> {
        let phone = self.normalizer.normalize_phone(&event.phone)?;
        let entry = self.phone_lock(&phone);
        let _guard = entry.lock.lock().await;
        self.apply_locked(&phone, event).await
    }

    async fn apply_locked(&self, phone: &str, event: &ConversationEvent) -> Result<QualifiedLead> {
        let mut lead = match self.store.get_qualified_lead(phone).await? {
            Some(lead) => lead,
            None => {
                info!(phone = %phone, "Inbound lead without prior record");
                QualifiedLead::new(phone)
            }
        };

        lead.total_exchanges += 1;
        let reply = event.reply_text.trim();
        if !reply.is_empty() {
            lead.last_message = Some(reply.chars().take(self.config.last_message_chars).collect());
        }

        // Explicit signals first; extracted values only fill what is left.
        let mut schedule_meeting = false;
        for raw in &event.signals {
            match signals::parse_signal(raw) {
                ParsedSignal::Category(category, Some(value)) => {
                    lead.qualification_data.insert(category, value);
                }
                ParsedSignal::Category(category, None) => {
                    if !lead.has_signal(category) {
                        lead.qualification_data.insert(category, CONFIRMED.to_string());
                    }
                }
                ParsedSignal::ScheduleMeeting => schedule_meeting = true,
                ParsedSignal::Unknown(name) => {
                    debug!(phone = %phone, signal = %name, "Ignoring unknown signal");
                }
            }
        }
        if self.config.extract_from_text && !reply.is_empty() {
            for (category, value) in signals::extract_signals(reply) {
                if !lead.has_signal(category) {
                    lead.qualification_data.insert(category, value);
                }
            }
        }
        lead.recompute_progress();

        let sentiment = match event.sentiment {
            Some(sentiment) => sentiment,
            None if self.config.extract_from_text => signals::classify_sentiment(reply),
            None => Sentiment::Neutral,
        };

        let from = lead.stage;
        let to = next_stage(
            from,
            sentiment,
            lead.qualification_progress,
            lead.total_exchanges,
            schedule_meeting,
            self.config.curious_after_exchanges,
        );
        if lead.set_stage(to, TransitionSource::Automatic) {
            info!(
                phone = %phone,
                from = %from,
                to = %to,
                sentiment = %sentiment,
                progress = lead.qualification_progress,
                "Lead stage changed"
            );
        }
        lead.updated_at = Utc::now();

        self.store.upsert_qualified_lead(&lead).await?;
        Ok(lead)
    }

    /// Operator override: move a lead to any stage, including out of `perdido`.
    pub async fn move_lead(&self, phone: &str, stage: Stage) -> Result<QualifiedLead> {
        let phone = self.normalizer.normalize_phone(phone)?;
        let entry = self.phone_lock(&phone);
        let _guard = entry.lock.lock().await;
        self.move_locked(&phone, stage).await
    }

    async fn move_locked(&self, phone: &str, stage: Stage) -> Result<QualifiedLead> {
        let mut lead = self
            .store
            .get_qualified_lead(phone)
            .await?
            .ok_or_else(|| QualificationError::LeadNotFound {
                phone: phone.to_string(),
            })?;

        let from = lead.stage;
        if lead.set_stage(stage, TransitionSource::Manual) {
            info!(phone = %phone, from = %from, to = %stage, "Lead moved manually");
            self.store.upsert_qualified_lead(&lead).await?;
        }
        Ok(lead)
    }

    /// Seed a `novo` record for a lead a campaign just reached. Existing
    /// records are left untouched. Returns whether a record was created.
    pub async fn seed_from_campaign(&self, lead: &NormalizedLead, campaign_id: &str) -> Result<bool> {
        let entry = self.phone_lock(&lead.phone_e164);
        let _guard = entry.lock.lock().await;
        let record = QualifiedLead::from_campaign(lead, campaign_id);
        self.store
            .insert_qualified_lead_if_absent(&record)
            .await
            .map_err(Into::into)
    }

    pub async fn get_lead(&self, phone: &str) -> Result<Option<QualifiedLead>> {
        let phone = self.normalizer.normalize_phone(phone)?;
        Ok(self.store.get_qualified_lead(&phone).await?)
    }

    /// Group every lead by stage, most recently updated first.
    pub async fn board(&self) -> Result<Board> {
        let leads = self.store.list_qualified_leads().await?;
        Ok(build_board(leads))
    }
}

/// Pure projection of a lead set into board columns.
pub fn build_board(leads: Vec<QualifiedLead>) -> Board {
    let mut columns: BTreeMap<Stage, Vec<BoardCard>> =
        Stage::ALL.into_iter().map(|s| (s, Vec::new())).collect();
    let total = leads.len();

    for lead in leads {
        columns.entry(lead.stage).or_default().push(BoardCard::from(lead));
    }
    for cards in columns.values_mut() {
        cards.sort_by(|a, b| b.lead.updated_at.cmp(&a.lead.updated_at));
    }

    let summary = columns.iter().map(|(stage, cards)| (*stage, cards.len())).collect();
    Board {
        columns,
        summary,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::qualification::SignalCategory;
    use crate::store::MemoryStore;

    const PHONE: &str = "5511988887777";

    fn machine() -> (QualificationMachine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let machine = QualificationMachine::new(
            store.clone(),
            Normalizer::new("55"),
            QualificationConfig::default(),
        );
        (machine, store)
    }

    fn event(text: &str, sentiment: Option<Sentiment>, signals: &[&str]) -> ConversationEvent {
        ConversationEvent {
            phone: PHONE.into(),
            signals: signals.iter().map(|s| s.to_string()).collect(),
            sentiment,
            reply_text: text.into(),
        }
    }

    fn seed_lead() -> NormalizedLead {
        NormalizedLead {
            name: Some("Ana".into()),
            phone_e164: PHONE.into(),
            company: Some("Locadora Sul".into()),
            notes: None,
        }
    }

    #[test]
    fn next_stage_rules() {
        use Sentiment::*;
        use Stage::*;
        assert_eq!(next_stage(Novo, Neutral, 0, 1, false, 3), EmConversa);
        assert_eq!(next_stage(EmConversa, Negative, 4, 2, true, 3), Perdido);
        assert_eq!(next_stage(Perdido, Positive, 4, 9, true, 3), Perdido);
        assert_eq!(next_stage(Curioso, Neutral, 1, 5, true, 3), ReuniaoAgendada);
        assert_eq!(next_stage(ReuniaoAgendada, Positive, 4, 5, false, 3), ReuniaoAgendada);
        assert_eq!(next_stage(Curioso, Positive, 4, 5, false, 3), Qualificado);
        assert_eq!(next_stage(EmConversa, Neutral, 1, 3, false, 3), Curioso);
        assert_eq!(next_stage(EmConversa, Neutral, 2, 3, false, 3), EmConversa);
        assert_eq!(next_stage(EmConversa, Neutral, 1, 2, false, 3), EmConversa);
        assert_eq!(next_stage(Curioso, Positive, 1, 4, false, 3), EmConversa);
        assert_eq!(next_stage(Qualificado, Neutral, 4, 6, false, 3), Qualificado);
    }

    #[tokio::test]
    async fn first_reply_moves_to_em_conversa() {
        let (machine, _) = machine();
        machine.seed_from_campaign(&seed_lead(), "c1").await.unwrap();

        let lead = machine
            .apply_event(&event("Oi, quem é?", Some(Sentiment::Neutral), &[]))
            .await
            .unwrap();
        assert_eq!(lead.stage, Stage::EmConversa);
        assert_eq!(lead.total_exchanges, 1);
        assert_eq!(lead.name.as_deref(), Some("Ana"));
        assert_eq!(lead.transitions.len(), 1);
        assert_eq!(lead.transitions[0].source, TransitionSource::Automatic);
    }

    #[tokio::test]
    async fn curioso_then_qualified_with_four_signals() {
        let (machine, _) = machine();
        for _ in 0..3 {
            machine
                .apply_event(&event("hmm", Some(Sentiment::Neutral), &[]))
                .await
                .unwrap();
        }
        let lead = machine.get_lead(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.stage, Stage::Curioso);

        let lead = machine
            .apply_event(&event(
                "ok",
                Some(Sentiment::Positive),
                &["equipment=empilhadeira", "urgency", "cnpj=12.345.678/0001-90", "revenue=20_50k"],
            ))
            .await
            .unwrap();
        assert_eq!(lead.qualification_progress, 4);
        assert_eq!(lead.stage, Stage::Qualificado);
        assert!(lead.missing_signals().is_empty());
    }

    #[tokio::test]
    async fn signals_extracted_from_text_and_explicit_wins() {
        let (machine, _) = machine();
        let lead = machine
            .apply_event(&event(
                "Preciso de uma betoneira urgente",
                None,
                &["equipment=andaime"],
            ))
            .await
            .unwrap();
        assert_eq!(
            lead.qualification_data.get(&SignalCategory::Equipment).unwrap(),
            "andaime"
        );
        assert_eq!(
            lead.qualification_data.get(&SignalCategory::Urgency).unwrap(),
            "urgente"
        );
        assert_eq!(lead.qualification_progress, 2);
    }

    #[tokio::test]
    async fn progress_never_exceeds_four_and_data_is_kept() {
        let (machine, _) = machine();
        let all = ["equipment", "urgency", "tax_id", "revenue_bracket", "cnpj"];
        machine
            .apply_event(&event("", Some(Sentiment::Neutral), &all))
            .await
            .unwrap();
        let lead = machine
            .apply_event(&event("", Some(Sentiment::Neutral), &[]))
            .await
            .unwrap();
        assert_eq!(lead.qualification_progress, 4);
    }

    #[tokio::test]
    async fn negative_reply_is_terminal_for_automatic_transitions() {
        let (machine, _) = machine();
        let lead = machine
            .apply_event(&event("Não tenho interesse", None, &[]))
            .await
            .unwrap();
        assert_eq!(lead.stage, Stage::Perdido);

        let lead = machine
            .apply_event(&event("na verdade quero sim", None, &["schedule_meeting"]))
            .await
            .unwrap();
        assert_eq!(lead.stage, Stage::Perdido);
    }

    #[tokio::test]
    async fn manual_move_overrides_perdido() {
        let (machine, _) = machine();
        machine
            .apply_event(&event("sai fora", None, &[]))
            .await
            .unwrap();

        let lead = machine
            .move_lead("(11) 98888-7777", Stage::ReuniaoAgendada)
            .await
            .unwrap();
        assert_eq!(lead.stage, Stage::ReuniaoAgendada);
        let last = lead.transitions.last().unwrap();
        assert_eq!(last.from, Stage::Perdido);
        assert_eq!(last.source, TransitionSource::Manual);
    }

    #[tokio::test]
    async fn move_unknown_lead_fails() {
        let (machine, _) = machine();
        let err = machine.move_lead(PHONE, Stage::Perdido).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Qualification(QualificationError::LeadNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn seeding_never_resets_existing_lead() {
        let (machine, _) = machine();
        machine
            .apply_event(&event("oi", Some(Sentiment::Neutral), &[]))
            .await
            .unwrap();
        let created = machine.seed_from_campaign(&seed_lead(), "c2").await.unwrap();
        assert!(!created);
        let lead = machine.get_lead(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.stage, Stage::EmConversa);
        assert_eq!(lead.campaign_id, None);
    }

    #[tokio::test]
    async fn last_message_is_truncated() {
        let (machine, _) = machine();
        let long = "a".repeat(500);
        let lead = machine
            .apply_event(&event(&long, Some(Sentiment::Neutral), &[]))
            .await
            .unwrap();
        assert_eq!(lead.last_message.unwrap().chars().count(), 100);
    }

    #[tokio::test]
    async fn concurrent_events_for_one_phone_are_all_counted() {
        let (machine, _) = machine();
        let machine = Arc::new(machine);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let m = machine.clone();
            handles.push(tokio::spawn(async move {
                m.apply_event(&event("hmm", Some(Sentiment::Neutral), &[]))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let lead = machine.get_lead(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.total_exchanges, 20);
        assert!(machine.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_event_releases_its_lock_entry() {
        let (machine, _) = machine();
        let held = machine.phone_lock(PHONE);
        let guard = held.lock.lock().await;

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            machine.apply_event(&event("oi", None, &[])),
        )
        .await;
        assert!(pending.is_err());

        drop(guard);
        drop(held);
        assert!(machine.locks.lock().unwrap().is_empty());
        assert!(machine.get_lead(PHONE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn board_groups_all_stages() {
        let (machine, store) = machine();
        machine.seed_from_campaign(&seed_lead(), "c1").await.unwrap();
        let mut lost = QualifiedLead::new("5511900001111");
        lost.set_stage(Stage::Perdido, TransitionSource::Manual);
        store.upsert_qualified_lead(&lost).await.unwrap();

        let board = machine.board().await.unwrap();
        assert_eq!(board.columns.len(), 6);
        assert_eq!(board.total, 2);
        assert_eq!(board.summary[&Stage::Novo], 1);
        assert_eq!(board.summary[&Stage::Perdido], 1);
        assert_eq!(board.summary[&Stage::Qualificado], 0);
        assert_eq!(board.summary.values().sum::<usize>(), board.total);
    }
}
