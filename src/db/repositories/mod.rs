pub mod channel_rules;
pub mod classification_cache;
pub mod device_policies;
pub mod device_tabs;
pub mod sites;
pub mod watch_history;
