//! The sending half of a session: splitting messages into data packets, and keeping them in a
//!  window until they are acknowledged.

pub mod send_window;
pub mod timers;
