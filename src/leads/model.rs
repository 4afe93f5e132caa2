//! Lead data model: raw upload rows, normalized leads, report references.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Which outbound flow a campaign belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    /// Re-engaging dormant leads from an old spreadsheet.
    Reactivation,
    /// First contact with leads that never heard from us.
    ColdProspecting,
}

impl CampaignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reactivation => "reactivation",
            Self::ColdProspecting => "cold_prospecting",
        }
    }

    /// Tag sent to the gateway so conversations can be traced back to a flow.
    pub fn campaign_tag(&self) -> &'static str {
        match self {
            Self::Reactivation => "reativacao",
            Self::ColdProspecting => "prospeccao_fria",
        }
    }
}

impl std::fmt::Display for CampaignKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "reactivation" => Ok(Self::Reactivation),
            "cold_prospecting" | "cold" => Ok(Self::ColdProspecting),
            other => Err(ValidationError::UnknownCampaignKind(other.to_string())),
        }
    }
}

/// One row of an uploaded spreadsheet, already split into columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLead {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Pipeline status copied from the spreadsheet (e.g. "Fechado").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_status: Option<String>,
}

impl RawLead {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            ..Default::default()
        }
    }

    /// Builder: set company.
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// Builder: set notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Builder: set the spreadsheet status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.original_status = Some(status.into());
        self
    }
}

/// A lead whose phone has been canonicalized and is safe to key on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedLead {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Country-coded digit string, e.g. `5511988887777`.
    pub phone_e164: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Compact reference to an input row, used in the rejection report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRef {
    /// Zero-based position in the uploaded batch.
    pub row: usize,
    pub name: String,
    /// Normalized phone when available, otherwise the raw value.
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Human-readable reason for the exclusion.
    pub reason: String,
}
