//! Phone and name canonicalization for uploaded rows.

use super::model::{NormalizedLead, RawLead};
use crate::error::ValidationError;

/// Minimum national digits (area code + subscriber number).
const MIN_NATIONAL_DIGITS: usize = 10;

/// Maximum national digits; anything past this is treated as trailing noise
/// (extensions, merged cells) and dropped.
const MAX_NATIONAL_DIGITS: usize = 11;

/// Turns raw rows into [`NormalizedLead`]s. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct Normalizer {
    country_prefix: String,
}

impl Normalizer {
    pub fn new(country_prefix: impl Into<String>) -> Self {
        Self {
            country_prefix: country_prefix.into(),
        }
    }

    pub fn country_prefix(&self) -> &str {
        &self.country_prefix
    }

    /// Canonicalize a phone number to `<prefix><national>` digits.
    ///
    /// A leading prefix is only treated as the country code when enough
    /// digits remain after it, so a national number whose area code happens
    /// to equal the prefix is not mangled.
    pub fn normalize_phone(&self, raw: &str) -> Result<String, ValidationError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        let national = match digits.strip_prefix(self.country_prefix.as_str()) {
            Some(rest) if rest.len() >= MIN_NATIONAL_DIGITS => rest,
            _ => digits.as_str(),
        };

        if national.len() < MIN_NATIONAL_DIGITS {
            return Err(ValidationError::InvalidPhone(raw.to_string()));
        }

        let national = &national[..national.len().min(MAX_NATIONAL_DIGITS)];
        Ok(format!("{}{}", self.country_prefix, national))
    }

    /// Normalize a whole row. Fails only on the phone.
    pub fn normalize(&self, raw: &RawLead) -> Result<NormalizedLead, ValidationError> {
        let phone_e164 = self.normalize_phone(&raw.phone)?;
        Ok(NormalizedLead {
            name: clean_text(&raw.name),
            phone_e164,
            company: raw.company.as_deref().and_then(clean_text),
            notes: raw.notes.as_deref().and_then(clean_text),
        })
    }
}

/// Trim and collapse internal whitespace; empty becomes `None`.
pub fn clean_text(raw: &str) -> Option<String> {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() { None } else { Some(joined) }
}

/// Key used for blacklist lookups: whitespace-collapsed, lowercase.
pub fn company_key(raw: &str) -> Option<String> {
    clean_text(raw).map(|s| s.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new("55")
    }

    #[test]
    fn prepends_country_prefix() {
        assert_eq!(
            normalizer().normalize_phone("(11) 98888-7777").unwrap(),
            "5511988887777"
        );
    }

    #[test]
    fn keeps_existing_prefix() {
        assert_eq!(
            normalizer().normalize_phone("+55 11 98888-7777").unwrap(),
            "5511988887777"
        );
    }

    #[test]
    fn area_code_equal_to_prefix_is_not_stripped() {
        // DDD 55 (Rio Grande do Sul) with a 9-digit subscriber number.
        assert_eq!(
            normalizer().normalize_phone("55 99988-7766").unwrap(),
            "5555999887766"
        );
    }

    #[test]
    fn landline_ten_digits_accepted() {
        assert_eq!(
            normalizer().normalize_phone("1133334444").unwrap(),
            "551133334444"
        );
    }

    #[test]
    fn rejects_short_and_garbage() {
        assert!(normalizer().normalize_phone("bad").is_err());
        assert!(normalizer().normalize_phone("").is_err());
        assert!(normalizer().normalize_phone("98888-777").is_err());
        assert!(normalizer().normalize_phone("55 1234").is_err());
    }

    #[test]
    fn trailing_noise_is_dropped() {
        assert_eq!(
            normalizer().normalize_phone("11988887777 ramal 12").unwrap(),
            "5511988887777"
        );
    }

    #[test]
    fn normalize_row_cleans_text_fields() {
        let raw = RawLead::new("  Ana   Maria ", "11988887777")
            .with_company("  ")
            .with_notes(" precisa de  frota ");
        let lead = normalizer().normalize(&raw).unwrap();
        assert_eq!(lead.name.as_deref(), Some("Ana Maria"));
        assert_eq!(lead.company, None);
        assert_eq!(lead.notes.as_deref(), Some("precisa de frota"));
    }

    #[test]
    fn company_key_is_case_insensitive() {
        assert_eq!(company_key(" Locadora  SILVA "), company_key("locadora silva"));
        assert_eq!(company_key("   "), None);
    }
}
