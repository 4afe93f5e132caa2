//! Signal vocabulary: parses explicit event signals and extracts signal
//! values and sentiment from free reply text.
//!
//! Matching runs over accent-folded, lowercased text with word boundaries,
//! so "não" and "nao" match alike and "para" does not match "parabéns".

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::model::{Sentiment, SignalCategory};

/// Control signal that requests the meeting stage.
pub const SCHEDULE_MEETING: &str = "schedule_meeting";

/// Value stored when an explicit signal carries no value.
pub const CONFIRMED: &str = "confirmado";

/// A parsed explicit signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedSignal {
    Category(SignalCategory, Option<String>),
    ScheduleMeeting,
    Unknown(String),
}

/// Parse `category` or `category=value`.
pub fn parse_signal(raw: &str) -> ParsedSignal {
    let (name, value) = match raw.split_once('=') {
        Some((name, value)) => (name, Some(value.trim().to_string())),
        None => (raw, None),
    };
    let value = value.filter(|v| !v.is_empty());
    let key = name.trim().to_lowercase().replace('-', "_");

    if matches!(key.as_str(), SCHEDULE_MEETING | "meeting" | "agendar_reuniao") {
        return ParsedSignal::ScheduleMeeting;
    }
    match SignalCategory::parse(&key) {
        Some(category) => ParsedSignal::Category(category, value),
        None => ParsedSignal::Unknown(raw.trim().to_string()),
    }
}

const EQUIPMENT_WORDS: &[&str] = &[
    "empilhadeira",
    "retroescavadeira",
    "escavadeira",
    "mini carregadeira",
    "carregadeira",
    "andaime",
    "betoneira",
    "gerador",
    "compactador",
    "rolo compactador",
    "plataforma elevatoria",
    "plataforma",
    "guindaste",
    "munck",
    "trator",
    "caminhao",
    "maquina",
    "maquinas",
    "equipamento",
    "equipamentos",
    "frota",
];

const URGENCY_WORDS: &[&str] = &[
    "urgente",
    "urgencia",
    "pra ontem",
    "o quanto antes",
    "rapido",
    "hoje",
    "amanha",
    "essa semana",
    "prioridade",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "nao quero",
    "nao tenho interesse",
    "sem interesse",
    "nao preciso",
    "nao obrigado",
    "nao me manda",
    "nao quero receber",
    "para de",
    "pare de",
    "sai fora",
    "remove",
    "remover",
    "descadastrar",
    "bloquear",
    "spam",
];

const INTEREST_PHRASES: &[&str] = &[
    "sim",
    "quero",
    "bora",
    "vamos",
    "interessado",
    "interessada",
    "interesse",
    "faz sentido",
    "gostaria",
    "pode ser",
    "topo",
    "show",
    "perfeito",
    "combinado",
    "beleza",
    "como funciona",
    "quanto custa",
    "agendar",
    "marcar",
    "me inscreve",
];

/// Build `\b(?:a|b|c)\b`, longest alternatives first.
fn word_regex(words: &[&str]) -> Regex {
    let mut sorted: Vec<&str> = words.to_vec();
    sorted.sort_by_key(|w| std::cmp::Reverse(w.len()));
    let alternation = sorted
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).expect("keyword pattern is valid")
}

static EQUIPMENT_RE: LazyLock<Regex> = LazyLock::new(|| word_regex(EQUIPMENT_WORDS));
static URGENCY_RE: LazyLock<Regex> = LazyLock::new(|| word_regex(URGENCY_WORDS));
static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| word_regex(NEGATIVE_PHRASES));
static INTEREST_RE: LazyLock<Regex> = LazyLock::new(|| word_regex(INTEREST_PHRASES));

static CNPJ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}\b").expect("CNPJ pattern is valid")
});

static REVENUE_ABOVE_50_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:acima de|acima|mais de) 50\b|acima_50k").expect("revenue pattern is valid")
});

static REVENUE_20_50_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b20 ?(?:-|a|e) ?50\b|\bentre 20\b|20_50k").expect("revenue pattern is valid")
});

static REVENUE_UP_TO_20_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:ate|menos de|abaixo de) 20\b|ate_20k").expect("revenue pattern is valid")
});

/// Lowercase and strip Portuguese diacritics.
pub fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Extract every signal category the reply text reveals.
pub fn extract_signals(text: &str) -> BTreeMap<SignalCategory, String> {
    let folded = fold(text);
    let mut found = BTreeMap::new();

    if let Some(m) = EQUIPMENT_RE.find(&folded) {
        found.insert(SignalCategory::Equipment, m.as_str().to_string());
    }
    if let Some(m) = URGENCY_RE.find(&folded) {
        found.insert(SignalCategory::Urgency, m.as_str().to_string());
    }
    if let Some(m) = CNPJ_RE.find(text) {
        found.insert(SignalCategory::TaxId, m.as_str().to_string());
    }
    if let Some(bracket) = revenue_bracket(&folded) {
        found.insert(SignalCategory::RevenueBracket, bracket.to_string());
    }
    found
}

fn revenue_bracket(folded: &str) -> Option<&'static str> {
    if REVENUE_ABOVE_50_RE.is_match(folded) {
        Some("acima_50k")
    } else if REVENUE_20_50_RE.is_match(folded) {
        Some("20_50k")
    } else if REVENUE_UP_TO_20_RE.is_match(folded) {
        Some("ate_20k")
    } else {
        None
    }
}

/// Classify reply tone: refusal wins, then interest, otherwise neutral.
pub fn classify_sentiment(text: &str) -> Sentiment {
    let folded = fold(text);
    let trimmed = folded.trim().trim_end_matches(['.', '!']);
    if trimmed == "nao" || NEGATIVE_RE.is_match(&folded) {
        Sentiment::Negative
    } else if INTEREST_RE.is_match(&folded) {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}
