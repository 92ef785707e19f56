use crate::event::MotionEvent;

/// Armed/disarmed flag carried across loop iterations.
///
/// `armed` means a motion start has been handled and no motion end has been
/// seen since. Never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotionState {
    pub armed: bool,
}

/// Result of feeding one event into the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Disarmed -> Armed. The caller runs the action sequence.
    Triggered,
    /// Armed -> Disarmed.
    Rearmed,
    /// Started while armed (debounced).
    Debounced,
    /// Ended while disarmed, or an unknown event.
    Ignored,
}

#[derive(Clone, Debug, Default)]
pub struct MotionStateMachine {
    state: MotionState,
}

impl MotionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed
    }

    /// Applies an event. The transition to armed is committed before any
    /// action runs, so action failures cannot leave the machine disarmed.
    pub fn handle(&mut self, event: MotionEvent) -> Transition {
        match (event, self.state.armed) {
            (MotionEvent::Started, false) => {
                self.state.armed = true;
                Transition::Triggered
            }
            (MotionEvent::Started, true) => Transition::Debounced,
            (MotionEvent::Ended, true) => {
                self.state.armed = false;
                Transition::Rearmed
            }
            (MotionEvent::Ended, false) | (MotionEvent::Unknown, _) => Transition::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disarmed() {
        let machine = MotionStateMachine::new();
        assert!(!machine.is_armed());
    }

    #[test]
    fn start_run_triggers_once() {
        let mut machine = MotionStateMachine::new();
        assert_eq!(machine.handle(MotionEvent::Started), Transition::Triggered);
        for _ in 0..5 {
            assert_eq!(machine.handle(MotionEvent::Started), Transition::Debounced);
        }
        assert!(machine.is_armed());
    }

    #[test]
    fn end_only_applies_when_armed() {
        let mut machine = MotionStateMachine::new();
        assert_eq!(machine.handle(MotionEvent::Ended), Transition::Ignored);
        assert!(!machine.is_armed());

        machine.handle(MotionEvent::Started);
        assert_eq!(machine.handle(MotionEvent::Ended), Transition::Rearmed);
        assert!(!machine.is_armed());
        assert_eq!(machine.handle(MotionEvent::Ended), Transition::Ignored);
    }

    #[test]
    fn unknown_never_changes_state() {
        let mut machine = MotionStateMachine::new();
        assert_eq!(machine.handle(MotionEvent::Unknown), Transition::Ignored);
        assert!(!machine.is_armed());
        machine.handle(MotionEvent::Started);
        assert_eq!(machine.handle(MotionEvent::Unknown), Transition::Ignored);
        assert!(machine.is_armed());
    }

    #[test]
    fn full_cycle_retriggers() {
        let mut machine = MotionStateMachine::new();
        let events = [
            MotionEvent::Started,
            MotionEvent::Started,
            MotionEvent::Ended,
            MotionEvent::Started,
        ];
        let triggered = events
            .iter()
            .filter(|event| machine.handle(**event) == Transition::Triggered)
            .count();
        assert_eq!(triggered, 2);
    }
}
