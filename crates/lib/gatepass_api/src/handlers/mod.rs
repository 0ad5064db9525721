//! Request handlers.

pub mod admin;
pub mod events;
pub mod gate;
pub mod health;
pub mod passes;
pub mod students;
pub mod tokens;
