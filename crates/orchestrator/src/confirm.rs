//! Confirmation gate for destructive or bulk tool calls.
//!
//! A tool that requires confirmation never runs during the turn that
//! proposed it. The gate parks the invocation under a fresh action id, the
//! client shows the summary to the user, and a later confirm request either
//! releases the invocation for execution or discards it. Actions are single
//! use and expire after a TTL.

use mentor_core::message::SessionId;
use mentor_core::tool::ToolInvocation;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

struct PendingAction {
    invocation: ToolInvocation,
    user_id: Uuid,
    session_id: SessionId,
    proposed_at: Instant,
}

/// Result of resolving a pending action.
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// User approved; the parked invocation is released to the caller,
    /// along with the session that proposed it.
    Approved {
        invocation: ToolInvocation,
        session_id: SessionId,
    },
    /// User rejected; the invocation is discarded.
    Rejected,
    /// The action expired before the user answered.
    Expired,
    /// No such action (never existed, already resolved, or wrong user).
    NotFound,
}

pub struct ConfirmationGate {
    pending: Mutex<HashMap<String, PendingAction>>,
    ttl: Duration,
}

impl ConfirmationGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Park an invocation and hand back its action id.
    pub fn propose(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        invocation: ToolInvocation,
    ) -> String {
        let action_id = format!("act_{}", Uuid::new_v4().simple());
        debug!(action_id, tool = %invocation.name, "Tool call parked for confirmation");

        if let Ok(mut pending) = self.pending.lock() {
            // Opportunistic purge keeps the map from accumulating dead entries
            let ttl = self.ttl;
            pending.retain(|_, a| a.proposed_at.elapsed() < ttl);
            pending.insert(
                action_id.clone(),
                PendingAction {
                    invocation,
                    user_id,
                    session_id,
                    proposed_at: Instant::now(),
                },
            );
        }

        action_id
    }

    /// Resolve an action. Removes it from the gate in every case, so a
    /// second resolve of the same id reports `NotFound`.
    pub fn resolve(&self, user_id: Uuid, action_id: &str, confirmed: bool) -> ConfirmOutcome {
        let Ok(mut pending) = self.pending.lock() else {
            return ConfirmOutcome::NotFound;
        };

        let Some(action) = pending.remove(action_id) else {
            return ConfirmOutcome::NotFound;
        };

        if action.user_id != user_id {
            warn!(action_id, "Confirm attempt by a different user");
            return ConfirmOutcome::NotFound;
        }

        if action.proposed_at.elapsed() >= self.ttl {
            debug!(action_id, "Pending action expired");
            return ConfirmOutcome::Expired;
        }

        if confirmed {
            ConfirmOutcome::Approved {
                invocation: action.invocation,
                session_id: action.session_id,
            }
        } else {
            ConfirmOutcome::Rejected
        }
    }

    /// Number of live pending actions.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .map(|p| {
                p.values()
                    .filter(|a| a.proposed_at.elapsed() < self.ttl)
                    .count()
            })
            .unwrap_or(0)
    }
}
