use super::ids::{ConversationId, SendAttemptId};

/// Conversation and attempt a pending send is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SendTarget {
    pub conversation_id: ConversationId,
    pub attempt: SendAttemptId,
}

impl SendTarget {
    pub fn new(conversation_id: ConversationId, attempt: SendAttemptId) -> Self {
        Self {
            conversation_id,
            attempt,
        }
    }
}

/// Lifecycle of the most recent send issued by a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending(SendTarget),
    Succeeded(SendTarget),
    /// `target` is `None` when the content never got past validation.
    Failed {
        target: Option<SendTarget>,
        message: String,
    },
    Aborted(SendTarget),
}

/// State transition input for the send lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTransition {
    Start(SendTarget),
    Complete(SendTarget),
    Fail {
        target: SendTarget,
        message: String,
    },
    Abort(SendTarget),
    /// Validation failure before any target exists.
    Reject {
        message: String,
    },
    ResetToIdle,
}

/// Rejection reason for illegal send transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTransitionRejection {
    AlreadySending {
        active: SendTarget,
    },
    NoActiveSend,
    AttemptMismatch {
        active: SendTarget,
        attempted: SendTarget,
    },
}

pub type SendTransitionResult = Result<SendState, SendTransitionRejection>;

impl SendState {
    pub fn is_sending(&self) -> bool {
        matches!(self, Self::Sending(_))
    }

    /// Returns the in-flight target if and only if state is `Sending`.
    pub fn active_target(&self) -> Option<&SendTarget> {
        match self {
            Self::Sending(target) => Some(target),
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } | Self::Aborted(_) => None,
        }
    }

    /// Returns true when a resolution for `attempt` may still land.
    pub fn accepts_resolution(&self, attempt: SendAttemptId) -> bool {
        matches!(self, Self::Sending(active) if active.attempt == attempt)
    }

    /// Applies one transition deterministically.
    ///
    /// Only one send may be in flight; `Start` and `Reject` are refused while
    /// `Sending`. Terminal transitions (`Complete`/`Fail`/`Abort`) must name the
    /// active target exactly.
    pub fn apply(&self, transition: SendTransition) -> SendTransitionResult {
        match transition {
            SendTransition::Start(target) => self.apply_start(target),
            SendTransition::Complete(target) => self.apply_terminal(target, Self::Succeeded),
            SendTransition::Fail { target, message } => {
                self.apply_terminal(target, |target| Self::Failed {
                    target: Some(target),
                    message,
                })
            }
            SendTransition::Abort(target) => self.apply_terminal(target, Self::Aborted),
            SendTransition::Reject { message } => self.apply_reject(message),
            SendTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn apply_start(&self, target: SendTarget) -> SendTransitionResult {
        match self {
            Self::Sending(active) => Err(SendTransitionRejection::AlreadySending {
                active: active.clone(),
            }),
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } | Self::Aborted(_) => {
                Ok(Self::Sending(target))
            }
        }
    }

    fn apply_reject(&self, message: String) -> SendTransitionResult {
        match self {
            Self::Sending(active) => Err(SendTransitionRejection::AlreadySending {
                active: active.clone(),
            }),
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } | Self::Aborted(_) => {
                Ok(Self::Failed {
                    target: None,
                    message,
                })
            }
        }
    }

    fn apply_terminal(
        &self,
        target: SendTarget,
        finish: impl FnOnce(SendTarget) -> SendState,
    ) -> SendTransitionResult {
        match self {
            Self::Sending(active) if *active == target => Ok(finish(target)),
            Self::Sending(active) => Err(SendTransitionRejection::AttemptMismatch {
                active: active.clone(),
                attempted: target,
            }),
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } | Self::Aborted(_) => {
                Err(SendTransitionRejection::NoActiveSend)
            }
        }
    }
}
