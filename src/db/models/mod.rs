pub mod channel_rule;
pub mod classification;
pub mod device_policy;
pub mod site;
pub mod tab;
pub mod watch;

pub use channel_rule::{ChannelAction, ChannelRule};
pub use classification::{classification_ttl, CachedClassification, CLASSIFICATION_TTL_HOURS};
pub use device_policy::{AccessCheck, DeviceAccess, DevicePolicy, Strictness};
pub use site::{normalize_domain, SiteRecord, SiteStatus};
pub use tab::{BrowserTab, DeviceTabs, PendingTabClose};
pub use watch::{NewWatchEntry, WatchClassification, WatchEntry, WatchStats, DEFAULT_HISTORY_LIMIT};
