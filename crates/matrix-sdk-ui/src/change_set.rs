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

//! An explicit change set returned from ingestion, replacing the source's
//! signal/slot notifications (Design Notes §9): a bitmask of the §4.3 step 3
//! state-change categories plus the timeline/pending/relations/statistics
//! categories, dispatched to subscribers by the embedding application.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Change: u32 {
        const NAME        = 1 << 0;
        const ALIASES     = 1 << 1;
        const TOPIC       = 1 << 2;
        const AVATAR      = 1 << 3;
        const MEMBERS     = 1 << 4;
        const ENCRYPTION  = 1 << 5;
        const OTHER_STATE = 1 << 6;
        const TIMELINE    = 1 << 7;
        const PENDING     = 1 << 8;
        const RELATIONS   = 1 << 9;
        const CALL        = 1 << 10;
        const STATISTICS  = 1 << 11;
        const SUMMARY     = 1 << 12;
    }
}

impl Change {
    pub fn for_state_event_type(event_type: &str) -> Self {
        match event_type {
            "m.room.name" => Self::NAME,
            "m.room.canonical_alias" => Self::ALIASES,
            "m.room.topic" => Self::TOPIC,
            "m.room.avatar" => Self::AVATAR,
            "m.room.member" => Self::MEMBERS,
            "m.room.encryption" => Self::ENCRYPTION,
            _ => Self::OTHER_STATE,
        }
    }
}
