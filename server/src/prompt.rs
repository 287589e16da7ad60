//! At-most-one outstanding question per session. The asking side parks a
//! one-shot sink keyed by SessionId; the inbound dispatcher hands the answer
//! over, and disconnect or leave cancels the sink instead.

use cardroom_protocol::{PromptReply, ServerMessage, SessionId};
use tokio::sync::oneshot;
use tracing::debug;

use crate::state::{AppState, ServerState};

#[derive(Debug, Clone, PartialEq)]
pub struct PromptOutcome {
    pub value: Option<serde_json::Value>,
    pub cancelled: bool,
}

impl PromptOutcome {
    pub fn answered(value: Option<serde_json::Value>) -> Self {
        PromptOutcome {
            value,
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        PromptOutcome {
            value: None,
            cancelled: true,
        }
    }
}

/// Install the pending sink for `session` and emit the prompt message, in
/// that order under the caller's lock, so the prompt frame always precedes
/// any cancellation-observable effect.
///
/// Panics if a sink is already pending for the session: a second in-flight
/// prompt per session is a programmer error.
pub fn begin_locked(
    s: &mut ServerState,
    session: SessionId,
    prompt: ServerMessage,
) -> oneshot::Receiver<PromptOutcome> {
    let (tx, rx) = oneshot::channel();
    let prev = s.prompts.insert(session, tx);
    assert!(
        prev.is_none(),
        "a prompt is already pending for session {session}"
    );
    s.send_to_session(session, &prompt);
    rx
}

/// Resolve the pending prompt for `session` with an inbound reply. Replies
/// with no matching sink are dropped.
pub fn deliver(state: &AppState, session: SessionId, reply: PromptReply) {
    let mut s = state.inner.lock();
    let Some(sink) = s.prompts.remove(&session) else {
        debug!(%session, "dropping unsolicited prompt reply");
        return;
    };
    let outcome = if reply.cancel.unwrap_or(false) {
        PromptOutcome::cancelled()
    } else {
        PromptOutcome::answered(reply.value)
    };
    let _ = sink.send(outcome);
}

/// Cancel the pending prompt for `session`, if any. Fired on socket close
/// and on voluntary `room_leave`.
pub fn cancel_locked(s: &mut ServerState, session: SessionId) {
    if let Some(sink) = s.prompts.remove(&session) {
        debug!(%session, "cancelling pending prompt");
        let _ = sink.send(PromptOutcome::cancelled());
    }
}
