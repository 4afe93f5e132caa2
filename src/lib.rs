//! Lead Dispatch: campaign dispatch and lead-state engine.

pub mod api;
pub mod campaign;
pub mod config;
pub mod engine;
pub mod error;
pub mod leads;
pub mod qualification;
pub mod store;
pub mod transport;

pub use engine::{CampaignEngine, CampaignPreview, LaunchRequest};
pub use error::{Error, Result};
