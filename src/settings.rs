//! Engine configuration.
//!
//! Plain values with defaults; callers adjust them with the `with_*`
//! builders and hand them to the components that need them.

use std::time::Duration;

use crate::constants::{
    DEFAULT_ALLOWED_FAST_COUNT, DEFAULT_DISK_WRITE_BACKLOG, DHT_QUERY_TIMEOUT, MAX_UPLOAD_QUEUE,
};
use crate::metainfo::LoadOptions;
use crate::picker::PieceRequesterSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Download limit in bytes per second; zero means unlimited.
    pub download_rate: u64,
    /// Upload limit in bytes per second; zero means unlimited.
    pub upload_rate: u64,
    /// Pending disk write bytes above which downloads pause.
    pub disk_write_backlog: u64,
    /// Load BEP-52 v2 and hybrid torrents.
    pub supports_v2: bool,
    pub dht_query_timeout: Duration,
    /// Pieces offered to fast peers while they are choked.
    pub allowed_fast_count: usize,
    /// Upload requests queued per peer before new ones are refused.
    pub max_upload_queue: usize,
    pub picker: PieceRequesterSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            download_rate: 0,
            upload_rate: 0,
            disk_write_backlog: DEFAULT_DISK_WRITE_BACKLOG,
            supports_v2: true,
            dht_query_timeout: DHT_QUERY_TIMEOUT,
            allowed_fast_count: DEFAULT_ALLOWED_FAST_COUNT,
            max_upload_queue: MAX_UPLOAD_QUEUE,
            picker: PieceRequesterSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn with_download_rate(mut self, rate: u64) -> Self {
        self.download_rate = rate;
        self
    }

    pub fn with_upload_rate(mut self, rate: u64) -> Self {
        self.upload_rate = rate;
        self
    }

    pub fn with_disk_write_backlog(mut self, bytes: u64) -> Self {
        self.disk_write_backlog = bytes;
        self
    }

    pub fn with_v2_support(mut self, enabled: bool) -> Self {
        self.supports_v2 = enabled;
        self
    }

    pub fn with_dht_query_timeout(mut self, timeout: Duration) -> Self {
        self.dht_query_timeout = timeout;
        self
    }

    pub fn with_allowed_fast_count(mut self, count: usize) -> Self {
        self.allowed_fast_count = count;
        self
    }

    pub fn with_max_upload_queue(mut self, len: usize) -> Self {
        self.max_upload_queue = len;
        self
    }

    pub fn with_picker(mut self, picker: PieceRequesterSettings) -> Self {
        self.picker = picker;
        self
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            supports_v2: self.supports_v2,
        }
    }
}
