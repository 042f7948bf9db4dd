//! Turn router state machine
//!
//! Elm-style: a pure transition function produces the next state plus
//! effects, and the runtime executor performs them.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ConversationState, RouterContext, RouterState, Turn, TurnRole, DEFAULT_MAX_HOPS};
pub use transition::{transition, TransitionError, TransitionResult};
