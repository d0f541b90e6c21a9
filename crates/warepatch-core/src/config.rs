//! Run configuration
//!
//! Collects the user parameters that shape a patch run: optional group
//! parameters, the payload to append, and the clock used for stamps.

use crate::params::{ModelDescriptor, WareVersion};
use crate::payload::Payload;
use chrono::{DateTime, Utc};

/// Options for one patch run
#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Enables the fake-version group with this version
    pub fake_version: Option<WareVersion>,
    /// Enables the fake-model group with this configuration
    pub fake_model: Option<ModelDescriptor>,
    /// Blob for append-region patches
    pub payload: Option<Payload>,
    /// Time used for clock-based stamps
    pub now: DateTime<Utc>,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            fake_version: None,
            fake_model: None,
            payload: None,
            now: Utc::now(),
        }
    }
}

impl PatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fake_version(mut self, version: WareVersion) -> Self {
        self.fake_version = Some(version);
        self
    }

    pub fn with_fake_model(mut self, model: ModelDescriptor) -> Self {
        self.fake_model = Some(model);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Fix the stamp clock
    pub fn with_time(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}
