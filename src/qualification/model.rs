//! Qualification data model: pipeline stages, signals, and the lead record
//! shown on the board.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::leads::NormalizedLead;

/// Maximum number of stage transitions kept per lead.
pub const MAX_TRANSITIONS: usize = 50;

/// Pipeline stage (board column). Declaration order is column order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Novo,
    EmConversa,
    Qualificado,
    ReuniaoAgendada,
    Curioso,
    Perdido,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Novo,
        Stage::EmConversa,
        Stage::Qualificado,
        Stage::ReuniaoAgendada,
        Stage::Curioso,
        Stage::Perdido,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Novo => "novo",
            Self::EmConversa => "em_conversa",
            Self::Qualificado => "qualificado",
            Self::ReuniaoAgendada => "reuniao_agendada",
            Self::Curioso => "curioso",
            Self::Perdido => "perdido",
        }
    }

    /// Column title for the board.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Novo => "Novo",
            Self::EmConversa => "Em conversa",
            Self::Qualificado => "Qualificado",
            Self::ReuniaoAgendada => "Reunião agendada",
            Self::Curioso => "Curioso",
            Self::Perdido => "Perdido",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownStage(s.to_string()))
    }
}

/// Tone of a lead's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sentiment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "neutral" => Ok(Self::Neutral),
            _ => Err(ValidationError::UnknownSentiment(s.to_string())),
        }
    }
}

/// The four buying-signal categories that make up qualification progress.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Equipment,
    Urgency,
    TaxId,
    RevenueBracket,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 4] = [
        SignalCategory::Equipment,
        SignalCategory::Urgency,
        SignalCategory::TaxId,
        SignalCategory::RevenueBracket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equipment => "equipment",
            Self::Urgency => "urgency",
            Self::TaxId => "tax_id",
            Self::RevenueBracket => "revenue_bracket",
        }
    }

    /// Accepts canonical names plus the aliases used by conversation tooling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "equipment" | "equipamento" => Some(Self::Equipment),
            "urgency" | "urgencia" => Some(Self::Urgency),
            "tax_id" | "cnpj" => Some(Self::TaxId),
            "revenue_bracket" | "revenue" | "faturamento" => Some(Self::RevenueBracket),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who caused a stage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    /// Driven by a conversation event.
    Automatic,
    /// Operator override.
    Manual,
}

/// A recorded stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
    pub source: TransitionSource,
}

/// A lead's position in the qualification funnel. Keyed by phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedLead {
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Campaign that first reached this lead, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub stage: Stage,
    /// Distinct signal categories collected, 0..=4.
    pub qualification_progress: u8,
    #[serde(default)]
    pub qualification_data: BTreeMap<SignalCategory, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub total_exchanges: u32,
    #[serde(default)]
    pub transitions: Vec<StageTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QualifiedLead {
    /// A fresh `novo` record with nothing collected.
    pub fn new(phone: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            phone: phone.into(),
            name: None,
            company: None,
            campaign_id: None,
            stage: Stage::Novo,
            qualification_progress: 0,
            qualification_data: BTreeMap::new(),
            last_message: None,
            total_exchanges: 0,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record for a lead just reached by a campaign.
    pub fn from_campaign(lead: &NormalizedLead, campaign_id: &str) -> Self {
        Self {
            name: lead.name.clone(),
            company: lead.company.clone(),
            campaign_id: Some(campaign_id.to_string()),
            ..Self::new(lead.phone_e164.clone())
        }
    }

    /// Change stage, recording the transition. No-op when already there.
    pub fn set_stage(&mut self, to: Stage, source: TransitionSource) -> bool {
        if self.stage == to {
            return false;
        }
        let now = Utc::now();
        self.transitions.push(StageTransition {
            from: self.stage,
            to,
            at: now,
            source,
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }
        self.stage = to;
        self.updated_at = now;
        true
    }

    /// Whether a non-blank value has been collected for `category`.
    pub fn has_signal(&self, category: SignalCategory) -> bool {
        self.qualification_data
            .get(&category)
            .is_some_and(|v| !v.trim().is_empty())
    }

    /// Recount progress from the collected data.
    pub fn recompute_progress(&mut self) {
        let collected = SignalCategory::ALL
            .into_iter()
            .filter(|c| self.has_signal(*c))
            .count();
        self.qualification_progress = collected.min(SignalCategory::ALL.len()) as u8;
    }

    /// Signal categories not yet collected, in canonical order.
    pub fn missing_signals(&self) -> Vec<SignalCategory> {
        SignalCategory::ALL
            .into_iter()
            .filter(|c| !self.has_signal(*c))
            .collect()
    }

    /// Short note for the salesperson picking up this lead.
    pub fn insights(&self) -> String {
        let mut lines = Vec::new();

        if let Some(equipment) = self.qualification_data.get(&SignalCategory::Equipment) {
            lines.push(format!("Equipamento: {equipment}"));
        }
        if let Some(bracket) = self.qualification_data.get(&SignalCategory::RevenueBracket) {
            let label = match bracket.as_str() {
                "ate_20k" => "Pequeno porte (até R$20k)",
                "20_50k" => "Médio porte (R$20-50k)",
                "acima_50k" => "Grande porte (acima de R$50k)",
                other => other,
            };
            lines.push(format!("Faturamento: {label}"));
        }
        if let Some(tax_id) = self.qualification_data.get(&SignalCategory::TaxId) {
            lines.push(format!("CNPJ: {tax_id}"));
        }
        if self.has_signal(SignalCategory::Urgency) {
            lines.push("ALERTA: lead com urgência alta".to_string());
        }

        let action = match self.qualification_progress {
            4 => "Ação: lead qualificado, ligar imediatamente",
            2 | 3 => "Ação: lead quente, falta pouco para qualificar",
            _ => "Ação: lead morno, continuar identificando a necessidade",
        };
        lines.push(action.to_string());

        lines.join("\n")
    }
}

/// One inbound conversation outcome for a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub phone: String,
    /// Signal names, optionally `category=value`. `schedule_meeting` requests
    /// a meeting.
    #[serde(default)]
    pub signals: Vec<String>,
    /// Classified from `reply_text` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub reply_text: String,
}

/// Board card: the lead plus derived guidance.
#[derive(Debug, Clone, Serialize)]
pub struct BoardCard {
    #[serde(flatten)]
    pub lead: QualifiedLead,
    pub missing_signals: Vec<SignalCategory>,
    pub insights: String,
}

impl From<QualifiedLead> for BoardCard {
    fn from(lead: QualifiedLead) -> Self {
        Self {
            missing_signals: lead.missing_signals(),
            insights: lead.insights(),
            lead,
        }
    }
}

/// Grouped-by-stage projection of every qualified lead.
#[derive(Debug, Clone, Serialize)]
pub struct Board {
    /// All six stages, always present, in column order.
    pub columns: BTreeMap<Stage, Vec<BoardCard>>,
    pub summary: BTreeMap<Stage, usize>,
    pub total: usize,
}
