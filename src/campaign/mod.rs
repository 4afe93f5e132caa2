//! Campaigns: jobs, templates, the paced dispatcher, and the registry.

pub mod dispatcher;
pub mod job;
pub mod registry;
pub mod template;

pub use dispatcher::{CampaignPlan, DispatchHandle, Dispatcher, generate_campaign_id};
pub use job::{CampaignJob, CampaignStatus, SendOutcome, SendRecord};
pub use registry::{CampaignRegistry, spawn_prune_task};
pub use template::{DefaultTemplates, MessagePreview, default_template_texts, default_templates};
