// Copyright 2022 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `ClientConfig`: homeserver base url, cross-process lock holder name, the
//! sync long-poll timeout, and the backoff schedule for sync retries
//! (`SPEC_FULL` §1 addition, mirroring `matrix_sdk_base::store::StoreConfig`
//! one level up).

use std::time::Duration;

use matrix_sdk_base::store::StoreConfig;
use url::Url;

/// Capped exponential backoff for the sync loop's network-error retries
/// (spec §4.8 "Failure", `SPEC_FULL` §4.8 addition).
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base: Duration::from_millis(500), multiplier: 2.0, max: Duration::from_secs(30) }
    }
}

impl BackoffConfig {
    /// The delay before retry attempt number `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max)
    }
}

/// Builder-style configuration for a [`crate::Client`] (`SPEC_FULL` §1
/// addition: "a `ClientConfig`/`StoreConfig`-style builder").
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub homeserver: Url,
    pub store: StoreConfig,
    pub sync_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Rotate an outbound Megolm session after this many encrypted messages
    /// (spec §4.7).
    pub megolm_rotation_messages: u64,
    /// Rotate an outbound Megolm session after this much wall-clock time
    /// (spec §4.7).
    pub megolm_rotation_period: Duration,
}

impl ClientConfig {
    pub fn new(homeserver: Url, holder_name: String) -> Self {
        Self {
            homeserver,
            store: StoreConfig::new(holder_name),
            sync_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            megolm_rotation_messages: 100,
            megolm_rotation_period: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::BackoffConfig;

    #[test]
    fn backoff_is_capped() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for(0), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(20), backoff.max);
    }
}
