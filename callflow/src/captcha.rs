//! Captcha recovery coordination.
//!
//! When a request hits a captcha challenge and is allowed to recover, it
//! registers the challenge here and waits. Whoever presents the challenge
//! (a UI, a solver service) supplies the answer through
//! [`CaptchaCoordinator::resolve`]. The owning request's next attempt takes
//! the answer out of the slot and sends it along with its parameters.
//!
//! Only one challenge is tracked at a time. A challenge raised by a second
//! request while the slot is taken is refused with
//! [`RequestError::CaptchaConflict`].

use crate::errors::{CaptchaError, RequestError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// A captcha challenge declared by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    /// Challenge id, echoed back as `captcha_sid`.
    pub sid: String,
    /// Where the captcha image can be fetched.
    pub image_url: Option<String>,
}

impl CaptchaChallenge {
    /// Creates a new challenge.
    #[must_use]
    pub fn new(sid: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            sid: sid.into(),
            image_url,
        }
    }
}

/// An answer to a captcha challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaAnswer {
    /// Challenge id.
    pub sid: String,
    /// The solution text.
    pub key: String,
}

/// State of the coordinator's single slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaptchaState {
    /// Nothing pending.
    #[default]
    Idle,
    /// Waiting for someone to answer `challenge` on behalf of `owner`.
    Soliciting {
        /// Request id that raised the challenge.
        owner: u64,
        /// The challenge.
        challenge: CaptchaChallenge,
    },
    /// Answer supplied, waiting for the owner's next attempt.
    Resolved {
        /// Request id that raised the challenge.
        owner: u64,
        /// The answer.
        answer: CaptchaAnswer,
    },
}

impl CaptchaState {
    fn owner(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Soliciting { owner, .. } | Self::Resolved { owner, .. } => Some(*owner),
        }
    }
}

/// Listener notified when a new challenge starts soliciting.
pub type ChallengeListener = Arc<dyn Fn(u64, &CaptchaChallenge) + Send + Sync>;

/// Shared captcha state for every request of a session.
#[derive(Default)]
pub struct CaptchaCoordinator {
    state: Mutex<CaptchaState>,
    resolved: Notify,
    listeners: RwLock<Vec<ChallengeListener>>,
}

impl CaptchaCoordinator {
    /// Creates an idle coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener invoked whenever a challenge needs an answer.
    ///
    /// Listeners run outside the state lock and may call [`Self::resolve`].
    pub fn on_challenge<F>(&self, listener: F)
    where
        F: Fn(u64, &CaptchaChallenge) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> CaptchaState {
        self.state.lock().clone()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(*self.state.lock(), CaptchaState::Idle)
    }

    /// Starts soliciting an answer for `challenge` on behalf of `owner`.
    ///
    /// The owner may re-solicit (a retry that hit a fresh challenge replaces
    /// its own pending one). Any other owner gets a conflict error.
    pub fn solicit(&self, owner: u64, challenge: CaptchaChallenge) -> Result<(), RequestError> {
        {
            let mut state = self.state.lock();
            match state.owner() {
                Some(pending_owner) if pending_owner != owner => {
                    warn!(
                        request_id = owner,
                        pending_owner, "Captcha challenge refused, slot already taken"
                    );
                    return Err(RequestError::CaptchaConflict {
                        request_id: owner,
                        pending_owner,
                    });
                }
                _ => {
                    *state = CaptchaState::Soliciting {
                        owner,
                        challenge: challenge.clone(),
                    };
                }
            }
        }

        info!(request_id = owner, sid = %challenge.sid, "Soliciting captcha answer");

        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(owner, &challenge);
            })) {
                warn!("Captcha listener panicked: {:?}", e);
            }
        }
        Ok(())
    }

    /// Supplies the answer for the pending challenge.
    pub fn resolve(&self, sid: impl Into<String>, key: impl Into<String>) -> Result<(), CaptchaError> {
        let sid = sid.into();
        {
            let mut state = self.state.lock();
            let owner = match &*state {
                CaptchaState::Soliciting { owner, challenge } => {
                    if challenge.sid != sid {
                        return Err(CaptchaError::SidMismatch {
                            expected: challenge.sid.clone(),
                            got: sid,
                        });
                    }
                    *owner
                }
                _ => return Err(CaptchaError::NoPendingChallenge),
            };
            debug!(request_id = owner, sid = %sid, "Captcha resolved");
            *state = CaptchaState::Resolved {
                owner,
                answer: CaptchaAnswer {
                    sid,
                    key: key.into(),
                },
            };
        }
        self.resolved.notify_waiters();
        Ok(())
    }

    /// Takes the answer if it belongs to `owner`, returning the slot to idle.
    pub fn take_answer(&self, owner: u64) -> Option<CaptchaAnswer> {
        let mut state = self.state.lock();
        match &*state {
            CaptchaState::Resolved { owner: o, answer } if *o == owner => {
                let answer = answer.clone();
                *state = CaptchaState::Idle;
                Some(answer)
            }
            _ => None,
        }
    }

    /// Returns true if `owner` is still waiting for an answer.
    #[must_use]
    pub fn is_soliciting_for(&self, owner: u64) -> bool {
        matches!(&*self.state.lock(), CaptchaState::Soliciting { owner: o, .. } if *o == owner)
    }

    /// Drops whatever `owner` holds in the slot.
    ///
    /// Returns the abandoned challenge id, if the slot was owned by `owner`.
    pub fn abandon(&self, owner: u64) -> Option<String> {
        let mut state = self.state.lock();
        let sid = match &*state {
            CaptchaState::Soliciting { owner: o, challenge } if *o == owner => challenge.sid.clone(),
            CaptchaState::Resolved { owner: o, answer } if *o == owner => answer.sid.clone(),
            _ => return None,
        };
        *state = CaptchaState::Idle;
        drop(state);
        self.resolved.notify_waiters();
        debug!(request_id = owner, sid = %sid, "Captcha slot abandoned");
        Some(sid)
    }

    /// Waits until the challenge owned by `owner` stops soliciting, or until
    /// `timeout` elapses.
    ///
    /// Returns true if an answer is ready for `owner`.
    pub async fn wait_resolved(&self, owner: u64, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.resolved.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if !self.is_soliciting_for(owner) {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(timeout, wait).await;
        matches!(&*self.state.lock(), CaptchaState::Resolved { owner: o, .. } if *o == owner)
    }
}

impl std::fmt::Debug for CaptchaCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaCoordinator")
            .field("state", &self.state())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
