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

//! Matching a server-echoed event back to the pending event that produced it
//! (spec §4.3.1 step 4).

use matrix_sdk_base::{events::Event, room::PendingEvent};

/// Whether `event`, freshly arrived from sync, is the server's echo of
/// `pending`: same event type, then matched by `event_id`, else by
/// `transaction_id`, else (for state events) by `state_key`, else by content
/// equality.
pub fn echo_matches(event: &Event, pending: &PendingEvent) -> bool {
    if event.event_type != pending.event.event_type {
        return false;
    }

    if let (Some(a), Some(b)) = (&event.event_id, &pending.event.event_id) {
        return a == b;
    }

    if let Some(transaction_id) = &event.unsigned.transaction_id {
        return *transaction_id == pending.transaction_id;
    }

    if event.is_state_event() || pending.event.is_state_event() {
        return event.state_key == pending.event.state_key;
    }

    event.content == pending.event.content
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use matrix_sdk_base::{
        events::Event,
        room::{DeliveryStatus, PendingEvent},
    };
    use matrix_sdk_common::{identifiers::OwnedTransactionId, MilliSecondsSinceUnixEpoch};
    use serde_json::json;

    use super::echo_matches;

    fn pending_with(event: Event, transaction_id: &str) -> PendingEvent {
        PendingEvent {
            event: Arc::new(event),
            transaction_id: OwnedTransactionId::from(transaction_id.to_owned()),
            delivery_status: DeliveryStatus::Submitted,
            last_updated: MilliSecondsSinceUnixEpoch(0),
            annotation: None,
        }
    }

    #[test]
    fn matches_by_transaction_id_when_neither_has_an_event_id_mismatch() {
        let mut sent = Event::from_json(json!({
            "type": "m.room.message",
            "event_id": "$server:example.org",
            "content": {"msgtype": "m.text", "body": "hi"},
        }))
        .unwrap();
        sent.unsigned.transaction_id = Some(OwnedTransactionId::from("txn1".to_owned()));

        let local = Event::from_json(json!({
            "type": "m.room.message",
            "content": {"msgtype": "m.text", "body": "hi"},
        }))
        .unwrap();

        assert!(echo_matches(&sent, &pending_with(local, "txn1")));
    }

    #[test]
    fn different_event_types_never_match() {
        let sent = Event::from_json(json!({"type": "m.reaction", "content": {}})).unwrap();
        let local = Event::from_json(json!({"type": "m.room.message", "content": {}})).unwrap();
        assert!(!echo_matches(&sent, &pending_with(local, "txn1")));
    }
}
