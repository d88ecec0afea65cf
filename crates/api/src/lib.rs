//! HTTP surface and submission workflow for panelgate.
//!
//! The binary in `main.rs` wires the pieces together; integration tests build
//! the same router through [`router::build_app_router`] with in-memory
//! collaborators.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod submission;
