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

//! The timeline engine and the read-marker/unread-stats subsystem (spec
//! §4.3, §4.5) built on top of the room state store in `matrix-sdk-base`.

pub mod blurhash;
pub mod change_set;
pub mod read_marker;
pub mod timeline;

pub use change_set::Change;
pub use read_marker::{DefaultNotableClassifier, NotableClassifier, ReadMarkerEngine, ReadMarkerError};
pub use timeline::TimelineEngine;
