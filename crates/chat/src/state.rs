use crate::message::SendId;

/// Why a send ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Upload,
    Connect,
    StreamTransport,
    Timeout,
    IncompleteStream,
    Internal,
}

/// Lifecycle of the send pipeline.
///
/// Only one send may sit in an active state (`Uploading`, `Connecting`,
/// `Streaming`) at a time; the rest are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Uploading(SendId),
    Connecting(SendId),
    Streaming(SendId),
    Completed(SendId),
    Failed {
        send_id: SendId,
        kind: FailureKind,
        message: String,
    },
    Cancelled(SendId),
}

/// State transition input for the send lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTransition {
    Start(SendId),
    BeginConnect(SendId),
    BeginStreaming(SendId),
    Complete(SendId),
    Fail {
        send_id: SendId,
        kind: FailureKind,
        message: String,
    },
    Cancel(SendId),
}

/// Rejection reason for illegal transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTransitionRejection {
    AlreadyActive { active: SendId, attempted: SendId },
    NoActiveSend,
    SessionMismatch { active: SendId, attempted: SendId },
    OutOfOrder { send_id: SendId, from: &'static str },
}

pub type SendTransitionResult = Result<SendState, SendTransitionRejection>;

impl SendState {
    /// Returns the active send if and only if the state is non-terminal.
    pub fn active_send(&self) -> Option<SendId> {
        match self {
            Self::Uploading(send_id) | Self::Connecting(send_id) | Self::Streaming(send_id) => {
                Some(*send_id)
            }
            Self::Idle | Self::Completed(_) | Self::Failed { .. } | Self::Cancelled(_) => None,
        }
    }

    /// Returns true when work tagged with `send_id` may still touch the conversation.
    pub fn accepts(&self, send_id: SendId) -> bool {
        self.active_send() == Some(send_id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading(_) => "uploading",
            Self::Connecting(_) => "connecting",
            Self::Streaming(_) => "streaming",
            Self::Completed(_) => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled(_) => "cancelled",
        }
    }

    pub fn apply(&self, transition: SendTransition) -> SendTransitionResult {
        match transition {
            SendTransition::Start(send_id) => self.apply_start(send_id),
            SendTransition::BeginConnect(send_id) => {
                self.advance(send_id, |state| matches!(state, Self::Uploading(_)), Self::Connecting)
            }
            SendTransition::BeginStreaming(send_id) => {
                self.advance(send_id, |state| matches!(state, Self::Connecting(_)), Self::Streaming)
            }
            SendTransition::Complete(send_id) => {
                self.advance(send_id, |state| matches!(state, Self::Streaming(_)), Self::Completed)
            }
            SendTransition::Fail {
                send_id,
                kind,
                message,
            } => self.advance(send_id, |_| true, |send_id| Self::Failed {
                send_id,
                kind,
                message,
            }),
            SendTransition::Cancel(send_id) => self.advance(send_id, |_| true, Self::Cancelled),
        }
    }

    fn apply_start(&self, send_id: SendId) -> SendTransitionResult {
        match self.active_send() {
            Some(active) => Err(SendTransitionRejection::AlreadyActive {
                active,
                attempted: send_id,
            }),
            None => Ok(Self::Uploading(send_id)),
        }
    }

    fn advance(
        &self,
        send_id: SendId,
        allowed_from: impl FnOnce(&Self) -> bool,
        next: impl FnOnce(SendId) -> Self,
    ) -> SendTransitionResult {
        match self.active_send() {
            None => Err(SendTransitionRejection::NoActiveSend),
            Some(active) if active != send_id => Err(SendTransitionRejection::SessionMismatch {
                active,
                attempted: send_id,
            }),
            Some(_) if !allowed_from(self) => Err(SendTransitionRejection::OutOfOrder {
                send_id,
                from: self.name(),
            }),
            Some(_) => Ok(next(send_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SendId = SendId::new(1);
    const B: SendId = SendId::new(2);

    #[test]
    fn happy_path_walks_every_active_state() {
        let state = SendState::Idle
            .apply(SendTransition::Start(A))
            .and_then(|state| state.apply(SendTransition::BeginConnect(A)))
            .and_then(|state| state.apply(SendTransition::BeginStreaming(A)))
            .and_then(|state| state.apply(SendTransition::Complete(A)))
            .unwrap();

        assert_eq!(state, SendState::Completed(A));
        assert_eq!(state.active_send(), None);
    }

    #[test]
    fn second_start_is_rejected_while_active() {
        let state = SendState::Streaming(A);
        assert_eq!(
            state.apply(SendTransition::Start(B)),
            Err(SendTransitionRejection::AlreadyActive {
                active: A,
                attempted: B
            })
        );
    }

    #[test]
    fn stale_session_cannot_finish_the_active_one() {
        let state = SendState::Streaming(B);
        assert_eq!(
            state.apply(SendTransition::Complete(A)),
            Err(SendTransitionRejection::SessionMismatch {
                active: B,
                attempted: A
            })
        );
        assert!(!state.accepts(A));
        assert!(state.accepts(B));
    }

    #[test]
    fn complete_requires_streaming() {
        let state = SendState::Uploading(A);
        assert_eq!(
            state.apply(SendTransition::Complete(A)),
            Err(SendTransitionRejection::OutOfOrder {
                send_id: A,
                from: "uploading"
            })
        );
    }

    #[test]
    fn fail_and_cancel_are_allowed_from_any_active_state() {
        for state in [
            SendState::Uploading(A),
            SendState::Connecting(A),
            SendState::Streaming(A),
        ] {
            assert_eq!(
                state.apply(SendTransition::Cancel(A)),
                Ok(SendState::Cancelled(A))
            );
            assert!(matches!(
                state.apply(SendTransition::Fail {
                    send_id: A,
                    kind: FailureKind::Timeout,
                    message: "late".to_string(),
                }),
                Ok(SendState::Failed {
                    kind: FailureKind::Timeout,
                    ..
                })
            ));
        }
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let state = SendState::Completed(A);
        assert_eq!(
            state.apply(SendTransition::Cancel(A)),
            Err(SendTransitionRejection::NoActiveSend)
        );
        assert_eq!(
            state.apply(SendTransition::Start(B)),
            Ok(SendState::Uploading(B))
        );
    }
}
