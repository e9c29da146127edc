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

//! Types and primitives shared by every crate in the runtime: a cancellable
//! async task handle, a monotonic connection-local transaction id source,
//! and re-exports of the identifier types used throughout.

pub mod executor;
pub mod identifiers;
pub mod locks;
pub mod time;

pub use time::MilliSecondsSinceUnixEpoch;
