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

//! The base component of the runtime: the event model, the per-room state
//! store, and the shape of a decomposed sync response. Higher-level crates
//! (`matrix-sdk-ui`, `matrix-sdk`) build the timeline engine and the
//! networked client on top of these types.

pub mod events;
pub mod room;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use events::{Event, EventCapability, EventError};
pub use room::Room;
pub use store::{Store, StoreConfig, StoreError};
