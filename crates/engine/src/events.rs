//! API events: the local application's requests to the engine.

use conduit_protocols::{ObjectiveId, ObjectiveRequest};
use tokio::sync::oneshot;

/// One API call, enqueued onto the engine's API queue.
///
/// All three fields may be set in one event. Rejection takes precedence:
/// when the same id appears in both `objective_to_approve` and
/// `objective_to_reject`, the objective is rejected and the approval is
/// ignored.
#[derive(Debug, Default)]
pub struct ApiEvent {
    /// A new objective to construct, approve, and start cranking.
    pub objective_to_spawn: Option<ObjectiveRequest>,
    /// An existing objective to approve.
    pub objective_to_approve: Option<ObjectiveId>,
    /// An existing objective to reject.
    pub objective_to_reject: Option<ObjectiveId>,
    /// The per-call error channel: resolves to the spawned objective's id,
    /// or to the reason the spawn was refused. Never resolves with partial
    /// success.
    pub spawn_ack: Option<oneshot::Sender<Result<ObjectiveId, String>>>,
}

impl ApiEvent {
    /// An event that only spawns `request`.
    pub fn spawn(request: ObjectiveRequest) -> Self {
        ApiEvent {
            objective_to_spawn: Some(request),
            ..ApiEvent::default()
        }
    }

    /// An event that spawns `request` and reports the outcome on `ack`.
    pub fn spawn_with_ack(
        request: ObjectiveRequest,
        ack: oneshot::Sender<Result<ObjectiveId, String>>,
    ) -> Self {
        ApiEvent {
            objective_to_spawn: Some(request),
            spawn_ack: Some(ack),
            ..ApiEvent::default()
        }
    }

    /// An event that only approves `id`.
    pub fn approve(id: ObjectiveId) -> Self {
        ApiEvent {
            objective_to_approve: Some(id),
            ..ApiEvent::default()
        }
    }

    /// An event that only rejects `id`.
    pub fn reject(id: ObjectiveId) -> Self {
        ApiEvent {
            objective_to_reject: Some(id),
            ..ApiEvent::default()
        }
    }
}
