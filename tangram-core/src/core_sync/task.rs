//! One outstanding batch of fetch requests against one peer.
//!
//! A task finishes exactly once: either every requested identifier was
//! satisfied by an arriving update/delete, or the inactivity deadline
//! passed (the synchronizer times a task out immediately when its target
//! peer disconnects). The deadline resets on every partial satisfaction,
//! so a slow-but-responsive peer is not penalized.

use crate::core_identity::PeerId;
use crate::core_store::game_object::ObjectId;
use crate::core_sync::request::SyncRequest;
use std::collections::HashMap;
use std::time::Duration;

pub type TaskId = u64;

/// A fetch the task wants issued on creation; unicast to the target peer
/// when it is a known holder, broadcast otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFetch {
    pub identifier: ObjectId,
    pub send_to: Option<PeerId>,
}

#[derive(Debug)]
pub struct SynchronizeTask {
    pub id: TaskId,
    pub peer_id: PeerId,
    requests: HashMap<ObjectId, SyncRequest>,
    deadline_ms: u64,
}

impl SynchronizeTask {
    /// Claim the requests (decrementing each TTL) and produce the fetches
    /// to issue. A task created with zero requests is already complete and
    /// must be finished by the scheduler on its next tick, never
    /// synchronously.
    pub fn new(
        id: TaskId,
        peer_id: PeerId,
        requests: Vec<SyncRequest>,
        now_ms: u64,
        timeout: Duration,
    ) -> (Self, Vec<TaskFetch>) {
        let mut claimed = HashMap::new();
        let mut fetches = Vec::new();
        for mut request in requests {
            request.ttl -= 1;
            let send_to = request
                .holder_ids
                .contains(&peer_id)
                .then(|| peer_id.clone());
            fetches.push(TaskFetch {
                identifier: request.identifier.clone(),
                send_to,
            });
            claimed.insert(request.identifier.clone(), request);
        }

        let task = SynchronizeTask {
            id,
            peer_id,
            requests: claimed,
            deadline_ms: now_ms + timeout.as_millis() as u64,
        };
        (task, fetches)
    }

    pub fn identifiers(&self) -> Vec<ObjectId> {
        self.requests.keys().cloned().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        !self.is_complete() && now_ms >= self.deadline_ms
    }

    /// Mark one identifier as satisfied. Returns true when the identifier
    /// was outstanding; the inactivity deadline resets in that case.
    pub fn satisfy(&mut self, identifier: &ObjectId, now_ms: u64, timeout: Duration) -> bool {
        if self.requests.remove(identifier).is_none() {
            return false;
        }
        self.deadline_ms = now_ms + timeout.as_millis() as u64;
        true
    }

    /// Requests still worth retrying (TTL not exhausted), returned to the
    /// shared pool on timeout.
    pub fn unexhausted_requests(&self) -> Vec<SyncRequest> {
        self.requests
            .values()
            .filter(|request| request.ttl >= 0)
            .cloned()
            .collect()
    }
}
