//! Uploaded leads: normalization and the safety filter.

pub mod model;
pub mod normalize;
pub mod safety;

pub use model::{CampaignKind, LeadRef, NormalizedLead, RawLead};
pub use normalize::Normalizer;
pub use safety::{FilterOutcome, SafetyFilter, SafetyReport};
