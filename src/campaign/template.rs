//! Message templating: placeholder substitution and the default templates
//! shipped for each campaign kind.
//!
//! Two equivalent placeholder syntaxes are supported: `[NAME]` / `{name}`,
//! `[NOTES]` / `{notes}`, `[COMPANY]` / `{company}`. Substitution is a single
//! pass, so values containing placeholder text are never expanded again.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::ValidationError;
use crate::leads::{CampaignKind, NormalizedLead};

/// Greeting used when a lead has no name.
pub const FALLBACK_NAME: &str = "Amigo";

/// Benefit phrase used when a lead has no notes.
pub const FALLBACK_NOTES: &str = "queria crescer o negócio";

/// A campaign sends an opener and at most one follow-up per lead.
pub const MAX_TEMPLATES: usize = 2;

/// Placeholders advertised to callers.
pub const PLACEHOLDERS: &[&str] = &["[NAME]", "[NOTES]", "[COMPANY]"];

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(NAME|NOTES|COMPANY)\]|\{(name|notes|company)\}")
        .expect("placeholder pattern is valid")
});

const REACTIVATION_OPENER: &str = "Fala, [NAME]! Tudo bem por aí? João aqui.

Estava revisando aqui as anotações que meu time fez sobre sua empresa. Vi que você [NOTES]. Conseguiu resolver isso?";

const REACTIVATION_FOLLOW_UP: &str = "Pergunto porque amanhã teremos uma aula gratuita online com um cliente nosso que saiu de R$ 65.000 para R$ 150.000 sem depender de indicação! Quero te convidar para esse evento. Faz sentido pra você?";

const COLD_OPENER: &str = "Oi [NAME], tudo bem? João aqui.";

const COLD_FOLLOW_UP: &str =
    "Vi a [COMPANY] no Google e fiquei com uma dúvida sobre a frota de vocês.";

/// Substitute lead fields into a template. Total: never fails.
pub fn render(template: &str, lead: &NormalizedLead) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            match key.as_str() {
                "name" => lead.name.as_deref().unwrap_or(FALLBACK_NAME).to_string(),
                "notes" => lead.notes.as_deref().unwrap_or(FALLBACK_NOTES).to_string(),
                "company" => lead.company.clone().unwrap_or_default(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Validate caller-supplied templates: one or two, none blank.
pub fn validate_templates(templates: &[String]) -> Result<(), ValidationError> {
    if templates.is_empty() {
        return Err(ValidationError::NoTemplates);
    }
    if templates.len() > MAX_TEMPLATES {
        return Err(ValidationError::TooManyTemplates {
            max: MAX_TEMPLATES,
            got: templates.len(),
        });
    }
    if let Some(index) = templates.iter().position(|t| t.trim().is_empty()) {
        return Err(ValidationError::BlankTemplate { index });
    }
    Ok(())
}

/// Built-in opener and follow-up for a campaign kind.
pub fn default_template_texts(kind: CampaignKind) -> Vec<String> {
    let pair = match kind {
        CampaignKind::Reactivation => [REACTIVATION_OPENER, REACTIVATION_FOLLOW_UP],
        CampaignKind::ColdProspecting => [COLD_OPENER, COLD_FOLLOW_UP],
    };
    pair.iter().map(|s| s.to_string()).collect()
}

/// Default templates plus a rendering for a sample lead.
#[derive(Debug, Clone, Serialize)]
pub struct DefaultTemplates {
    pub kind: CampaignKind,
    pub campaign_tag: &'static str,
    pub templates: Vec<String>,
    pub placeholders: Vec<&'static str>,
    pub example: Vec<String>,
}

pub fn default_templates(kind: CampaignKind) -> DefaultTemplates {
    let sample = NormalizedLead {
        name: Some("Carlos".into()),
        phone_e164: "5511999999999".into(),
        company: Some("Auto Pecas Silva".into()),
        notes: Some("queria conseguir mais clientes pelo Google".into()),
    };
    let templates = default_template_texts(kind);
    let example = templates.iter().map(|t| render(t, &sample)).collect();
    DefaultTemplates {
        kind,
        campaign_tag: kind.campaign_tag(),
        templates,
        placeholders: PLACEHOLDERS.to_vec(),
        example,
    }
}

/// Rendered messages for one lead, shown before launch.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePreview {
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub messages: Vec<String>,
}

impl MessagePreview {
    pub fn new(lead: &NormalizedLead, templates: &[String]) -> Self {
        Self {
            phone: lead.phone_e164.clone(),
            name: lead.name.clone(),
            messages: templates.iter().map(|t| render(t, lead)).collect(),
        }
    }
}
