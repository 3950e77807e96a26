//! A finite state machine driven by a static transition table.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use tracing::trace;

/// One row of a transition table: `event` moves the machine from any state in `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S, E> {
    /// Event that triggers the transition.
    pub event: E,
    /// States the event is legal in.
    pub from: Vec<S>,
    /// State the machine ends up in.
    pub to: S,
}

/// Errors raised by [`Fsm`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsmError {
    /// The event is not legal in the current state.
    #[error("illegal transition from {state} on {event}")]
    IllegalTransition {
        /// Current state.
        state: String,
        /// Rejected event.
        event: String,
    },
    /// The table given to [`Fsm::new`] is malformed.
    #[error("invalid transition table: {0}")]
    InvalidTable(String),
}

/// A state machine whose legal moves are fixed when it is built.
#[derive(Debug, Clone)]
pub struct Fsm<S, E> {
    current: S,
    source_event: Option<E>,
    transitions: HashMap<E, Transition<S, E>>,
    history: Option<Vec<(S, E, S)>>,
}

impl<S, E> Fsm<S, E>
where
    S: Copy + Eq + Debug,
    E: Copy + Eq + Hash + Debug,
{
    /// Builds a machine starting in `initial`.
    ///
    /// Every event must appear in exactly one row and every row must list at least one source
    /// state.
    pub fn new(initial: S, table: Vec<Transition<S, E>>) -> Result<Self, FsmError> {
        let mut transitions = HashMap::with_capacity(table.len());
        for row in table {
            if row.from.is_empty() {
                return Err(FsmError::InvalidTable(format!(
                    "event {:?} has no source states",
                    row.event
                )));
            }
            let event = row.event;
            if transitions.insert(event, row).is_some() {
                return Err(FsmError::InvalidTable(format!(
                    "event {event:?} appears more than once"
                )));
            }
        }
        Ok(Self {
            current: initial,
            source_event: None,
            transitions,
            history: None,
        })
    }

    /// Records every transition taken from now on.
    pub fn with_history(mut self) -> Self {
        self.history = Some(Vec::new());
        self
    }

    /// Current state.
    pub fn current(&self) -> S {
        self.current
    }

    /// Event that led to the current state. `None` before the first transition.
    pub fn source_event(&self) -> Option<E> {
        self.source_event
    }

    /// Transitions taken so far as `(from, event, to)`, if history is being recorded.
    pub fn history(&self) -> &[(S, E, S)] {
        self.history.as_deref().unwrap_or_default()
    }

    /// Whether `event` is legal in the current state.
    pub fn can(&self, event: E) -> bool {
        self.transitions
            .get(&event)
            .is_some_and(|row| row.from.contains(&self.current))
    }

    /// Applies `event` and returns the new state.
    pub fn do_transition(&mut self, event: E) -> Result<S, FsmError> {
        let row = self
            .transitions
            .get(&event)
            .filter(|row| row.from.contains(&self.current))
            .ok_or_else(|| FsmError::IllegalTransition {
                state: format!("{:?}", self.current),
                event: format!("{event:?}"),
            })?;
        let from = self.current;
        self.current = row.to;
        self.source_event = Some(event);
        if let Some(history) = self.history.as_mut() {
            history.push((from, event, row.to));
        }
        trace!(?from, ?event, to = ?self.current, "Fsm transition");
        Ok(self.current)
    }
}
