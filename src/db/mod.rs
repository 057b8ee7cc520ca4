#![forbid(unsafe_code)]

//! Factories and the sessions they hand out.

mod factory;
mod session;


pub use factory::GraphFactory;
pub use session::{Session, SessionKind, SessionState};
