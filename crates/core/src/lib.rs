//! Pure domain logic for panelgate.
//!
//! Nothing in this crate touches the database or the remote panels. The
//! `api` crate composes these pieces into the submission workflow.

pub mod content;
pub mod error;
pub mod quota;
pub mod scripting;
pub mod selection;
pub mod slots;
pub mod types;
