//! Request handlers.

pub mod artifacts;
pub mod health;
pub mod jobs;

pub use artifacts::*;
pub use health::*;
pub use jobs::*;
