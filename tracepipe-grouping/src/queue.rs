// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Grouping queue: bounded in-memory queue with per-`(project_id,
//! path)` coalescing. Constructed once at startup and passed by reference
//! to ingestion and the worker — no singleton.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracepipe_core::model::{ProjectId, TraceId};

pub type Key = (ProjectId, Option<String>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub project_id: ProjectId,
    pub path: Option<String>,
    pub trace_id: TraceId,
    pub enqueued_at: DateTime<Utc>,
}

impl Request {
    pub fn key(&self) -> Key {
        (self.project_id, self.path.clone())
    }
}

/// The enqueue side, held by the ingestion service. Cheaply cloneable;
/// every clone shares the same bounded channel and `latestRequest` map.
#[derive(Clone)]
pub struct GroupingQueue {
    sender: mpsc::Sender<Request>,
    latest: Arc<Mutex<HashMap<Key, Request>>>,
}

impl GroupingQueue {
    /// Enqueues `req`, updating the `latestRequest` entry for its key
    /// first so a concurrent dequeue always observes the newest
    /// registration. Never blocks: if the bounded channel is full the
    /// request is dropped and an error logged.
    pub fn enqueue(&self, req: Request) {
        self.latest.lock().insert(req.key(), req.clone());

        if let Err(err) = self.sender.try_send(req) {
            match err {
                mpsc::error::TrySendError::Full(req) => {
                    tracing::error!(
                        project_id = %req.project_id,
                        path = ?req.path,
                        "grouping queue full, dropping enqueue"
                    );
                }
                mpsc::error::TrySendError::Closed(req) => {
                    tracing::error!(
                        project_id = %req.project_id,
                        path = ?req.path,
                        "grouping queue closed, dropping enqueue"
                    );
                }
            }
        }
    }
}

/// The dequeue side, held exclusively by the grouping worker (single
/// consumer by contract).
pub struct GroupingQueueConsumer {
    receiver: mpsc::Receiver<Request>,
    latest: Arc<Mutex<HashMap<Key, Request>>>,
}

impl GroupingQueueConsumer {
    pub async fn recv(&mut self) -> Option<Request> {
        self.receiver.recv().await
    }

    /// Re-reads the `latestRequest` entry for `key`. If it no longer
    /// equals `dequeued`, a newer request has superseded it and the
    /// worker must skip processing.
    pub fn is_superseded(&self, dequeued: &Request) -> bool {
        match self.latest.lock().get(&dequeued.key()) {
            Some(current) => current.trace_id != dequeued.trace_id,
            None => false,
        }
    }

    /// Clears the `(project_id, path)` entry only if it still equals
    /// `processed`.
    pub fn clear_if_current(&self, processed: &Request) {
        let mut latest = self.latest.lock();
        if latest.get(&processed.key()) == Some(processed) {
            latest.remove(&processed.key());
        }
    }
}

pub fn channel(capacity: usize) -> (GroupingQueue, GroupingQueueConsumer) {
    let (sender, receiver) = mpsc::channel(capacity);
    let latest = Arc::new(Mutex::new(HashMap::new()));

    (
        GroupingQueue {
            sender,
            latest: latest.clone(),
        },
        GroupingQueueConsumer { receiver, latest },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(trace_id: i64) -> Request {
        Request {
            project_id: ProjectId(7),
            path: Some("/chat".to_string()),
            trace_id: TraceId(trace_id),
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn s4_throttled_grouping_supersedes_to_latest() {
        let (queue, mut consumer) = channel(1000);

        for id in [100, 101, 102, 103, 104] {
            queue.enqueue(req(id));
        }

        let mut processed_last = None;
        while let Ok(Some(dequeued)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), consumer.recv()).await
        {
            if !consumer.is_superseded(&dequeued) {
                processed_last = Some(dequeued.trace_id);
                consumer.clear_if_current(&dequeued);
            }
        }

        assert_eq!(processed_last, Some(TraceId(104)));
    }

    #[test]
    fn full_queue_drops_without_panicking() {
        let (queue, _consumer) = channel(1);
        queue.enqueue(req(1));
        queue.enqueue(req(2));
        queue.enqueue(req(3));
    }
}
