// Copyright 2025 Snapgrep Project
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

//! Fetch concurrency limiter.
//!
//! A single actor task owns all mutable state (the current limit, the
//! ordered list of outstanding permits, the wait queue); every mutation
//! and query is a serialized message, so no mutex is needed and the
//! oldest-first revocation policy on a limit decrease stays a simple
//! front-of-queue pop. Capacity can be adjusted live without losing
//! in-flight acquisitions.

use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

enum Msg {
    Acquire { resp: oneshot::Sender<Permit> },
    Release { id: u64 },
    SetLimit { limit: usize },
    GetLimit { resp: oneshot::Sender<usize> },
}

/// A granted fetch slot. Dropping it releases the slot. `revoked()`
/// resolves if the limiter shrank below the running count and this permit
/// was among the oldest sacrificed; holders should abandon their fetch.
pub struct Permit {
    id: u64,
    tx: mpsc::UnboundedSender<Msg>,
    revoke_rx: oneshot::Receiver<()>,
}

impl Permit {
    pub async fn revoked(&mut self) {
        // An Err means the revoke sender was dropped with the permit still
        // active, i.e. revocation can no longer happen; wait forever.
        if (&mut self.revoke_rx).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Release { id: self.id });
    }
}

#[derive(Clone)]
pub struct FetchLimiter {
    tx: mpsc::UnboundedSender<Msg>,
}

impl FetchLimiter {
    pub fn new(limit: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor_tx = tx.clone();
        tokio::spawn(run_actor(limit.max(1), actor_tx, rx));
        Self { tx }
    }

    /// Wait for a fetch slot. Cancellable: dropping the future abandons
    /// the queue position without affecting other waiters.
    pub async fn acquire(&self) -> Result<Permit, LimiterClosed> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(Msg::Acquire { resp: resp_tx })
            .map_err(|_| LimiterClosed)?;
        resp_rx.await.map_err(|_| LimiterClosed)
    }

    /// Change the capacity. Shrinking below the number of running fetches
    /// revokes the oldest permits first.
    pub fn set_limit(&self, limit: usize) {
        let _ = self.tx.send(Msg::SetLimit {
            limit: limit.max(1),
        });
    }

    pub async fn limit(&self) -> Result<usize, LimiterClosed> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(Msg::GetLimit { resp: resp_tx })
            .map_err(|_| LimiterClosed)?;
        resp_rx.await.map_err(|_| LimiterClosed)
    }
}

#[derive(Debug)]
pub struct LimiterClosed;

impl std::fmt::Display for LimiterClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "limiter actor is gone")
    }
}

impl std::error::Error for LimiterClosed {}

struct Active {
    id: u64,
    revoke: oneshot::Sender<()>,
}

async fn run_actor(
    mut limit: usize,
    tx: mpsc::UnboundedSender<Msg>,
    mut rx: mpsc::UnboundedReceiver<Msg>,
) {
    let mut next_id: u64 = 0;
    // front = oldest, so revocation on a limit decrease pops from the front
    let mut active: VecDeque<Active> = VecDeque::new();
    let mut waiting: VecDeque<oneshot::Sender<Permit>> = VecDeque::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            Msg::Acquire { resp } => {
                if active.len() < limit {
                    grant(&tx, &mut next_id, &mut active, resp);
                } else {
                    waiting.push_back(resp);
                }
            }
            Msg::Release { id } => {
                active.retain(|a| a.id != id);
                drain_waiting(&tx, limit, &mut next_id, &mut active, &mut waiting);
            }
            Msg::SetLimit { limit: new_limit } => {
                limit = new_limit;
                while active.len() > limit {
                    if let Some(oldest) = active.pop_front() {
                        let _ = oldest.revoke.send(());
                    }
                }
                drain_waiting(&tx, limit, &mut next_id, &mut active, &mut waiting);
            }
            Msg::GetLimit { resp } => {
                let _ = resp.send(limit);
            }
        }
    }
}

fn grant(
    tx: &mpsc::UnboundedSender<Msg>,
    next_id: &mut u64,
    active: &mut VecDeque<Active>,
    resp: oneshot::Sender<Permit>,
) -> bool {
    let id = *next_id;
    *next_id += 1;
    let (revoke_tx, revoke_rx) = oneshot::channel();
    let permit = Permit {
        id,
        tx: tx.clone(),
        revoke_rx,
    };
    if resp.send(permit).is_ok() {
        active.push_back(Active {
            id,
            revoke: revoke_tx,
        });
        true
    } else {
        // Caller gave up while queued; the permit it never saw released
        // itself on drop, nothing to track.
        false
    }
}

fn drain_waiting(
    tx: &mpsc::UnboundedSender<Msg>,
    limit: usize,
    next_id: &mut u64,
    active: &mut VecDeque<Active>,
    waiting: &mut VecDeque<oneshot::Sender<Permit>>,
) {
    while active.len() < limit {
        match waiting.pop_front() {
            Some(resp) => {
                grant(tx, next_id, active, resp);
            }
            None => break,
        }
    }
}
