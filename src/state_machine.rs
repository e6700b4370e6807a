//! Scroll lifecycle state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! `transition` maps (state, event) to a new state plus effects, and the
//! runtime executor performs the effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::{Command, Event};
pub use state::{ScrollContext, ScrollPhase};
pub use transition::{transition, Rejection, TransitionResult};
