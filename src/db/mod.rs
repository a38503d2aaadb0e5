//! SQLite-backed stores: device policy, site registry, channel rules,
//! classification cache, the watch ledger and device tab snapshots.
//!
//! Each store is a group of `Database` methods defined next to its
//! repository in `repositories/`.

mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{
    AccessCheck, BrowserTab, CachedClassification, ChannelAction, ChannelRule, DeviceAccess,
    DevicePolicy, DeviceTabs, NewWatchEntry, PendingTabClose, SiteRecord, SiteStatus, Strictness,
    WatchClassification, WatchEntry, WatchStats,
};
