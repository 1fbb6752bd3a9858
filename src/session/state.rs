//! Session state machine.
//!
//! Every transition of the camera session goes through
//! [`StateMachine::transition`], which only accepts the edges listed in
//! [`SessionState::can_transition_to`].

use super::error::CameraError;
use serde::Serialize;

/// Lifecycle state of the camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No handle is held.
    Closed,
    /// Waiting for the device to report it is open.
    Opening,
    /// Handle held, no preview bound.
    Open,
    /// Preview frames are flowing.
    Previewing,
    /// A still capture is in flight.
    Capturing,
    /// The handle was lost; only a close leaves this state.
    Error,
}

impl SessionState {
    /// Legal edges of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Open | Closed | Error)
                | (Open, Previewing | Closed | Error)
                | (Previewing, Capturing | Closed | Error)
                | (Capturing, Previewing | Open | Closed | Error)
                | (Error, Closed)
        )
    }

    /// True while the hardware handle is held.
    pub fn holds_handle(self) -> bool {
        matches!(
            self,
            SessionState::Opening
                | SessionState::Open
                | SessionState::Previewing
                | SessionState::Capturing
        )
    }

    /// Numeric code exported as a metric.
    pub fn code(self) -> i64 {
        match self {
            SessionState::Closed => 0,
            SessionState::Opening => 1,
            SessionState::Open => 2,
            SessionState::Previewing => 3,
            SessionState::Capturing => 4,
            SessionState::Error => 5,
        }
    }
}

/// Current state plus the generation of the live handle.
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
    generation: Option<u64>,
    next_generation: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: SessionState::Closed,
            generation: None,
            next_generation: 1,
        }
    }
}

impl StateMachine {
    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Generation of the live handle, if any.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Applies a transition, returning the previous state.
    ///
    /// Entering `Opening` mints a new handle generation; entering `Closed`
    /// or `Error` retires it.
    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, CameraError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(CameraError::InvalidTransition { from, to: next });
        }
        match next {
            SessionState::Opening => {
                self.generation = Some(self.next_generation);
                self.next_generation += 1;
            }
            SessionState::Closed | SessionState::Error => self.generation = None,
            _ => {}
        }
        self.state = next;
        tracing::debug!(?from, to = ?next, "Session transition");
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::SessionState::*;

    const ALL: [SessionState; 6] = [Closed, Opening, Open, Previewing, Capturing, Error];

    #[test]
    fn test_happy_path() {
        let mut machine = StateMachine::default();
        for next in [Opening, Open, Previewing, Capturing, Previewing, Closed] {
            machine.transition(next).unwrap();
        }
        assert_eq!(machine.state(), Closed);
    }

    #[test]
    fn test_rejects_illegal_edges() {
        let mut machine = StateMachine::default();
        let err = machine.transition(Capturing).unwrap_err();
        assert!(matches!(
            err,
            CameraError::InvalidTransition {
                from: Closed,
                to: Capturing
            }
        ));
        assert_eq!(machine.state(), Closed);
    }

    #[test]
    fn test_no_self_edges() {
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn test_error_only_settles_to_closed() {
        for next in ALL {
            assert_eq!(Error.can_transition_to(next), next == Closed);
        }
    }

    #[test]
    fn test_generation_lifecycle() {
        let mut machine = StateMachine::default();
        assert_eq!(machine.generation(), None);

        machine.transition(Opening).unwrap();
        let first = machine.generation().unwrap();
        machine.transition(Open).unwrap();
        assert_eq!(machine.generation(), Some(first));

        machine.transition(Error).unwrap();
        assert_eq!(machine.generation(), None);
        machine.transition(Closed).unwrap();
        machine.transition(Opening).unwrap();
        assert!(machine.generation().unwrap() > first);
    }

    #[test]
    fn test_handle_held_states() {
        let held: Vec<_> = ALL.into_iter().filter(|s| s.holds_handle()).collect();
        assert_eq!(held, vec![Opening, Open, Previewing, Capturing]);
    }
}
