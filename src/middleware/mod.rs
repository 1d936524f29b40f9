//! Middleware chain
//!
//! Composed outermost-first as `cors -> logging -> audit -> auth` ahead of
//! the dispatcher.

pub mod audit;
pub mod auth;
pub mod cors;
pub mod logging;
