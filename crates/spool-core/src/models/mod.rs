//! Data models for Spool

mod content;
mod site;

pub use content::{
    validate_path_segment, ContentEvent, ContentEventKind, ContentItem, ContentStatus,
    ContentUpdate,
};
pub use site::{generate_api_key, validate_site_name, Site, SiteSummary, API_KEY_PREFIX};
