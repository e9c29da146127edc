// Copyright 2021 The Matrix.org Foundation C.I.C.
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

//! Synchronization primitives used to serialize access to room state.
//!
//! Per spec §5, no room data structure is ever accessed concurrently from
//! two scheduling contexts; the only thing that needs mutual exclusion is
//! the boundary between "apply a sync batch" and "read/mutate room state
//! from elsewhere on the loop" (e.g. a manual `markMessagesAsRead` call
//! racing an in-flight sync application).

use tokio::sync::{Mutex, MutexGuard};

/// Guards the section of the main loop that applies a sync response to room
/// state, so that a concurrently-issued local mutation (e.g. marking a room
/// as read) is never interleaved with it.
#[derive(Debug, Default)]
pub struct SyncGuardLock {
    lock: Mutex<()>,
}

impl SyncGuardLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive access for the duration of one sync application or
    /// one local mutation.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

pub use std::sync::RwLock as StdRwLock;
