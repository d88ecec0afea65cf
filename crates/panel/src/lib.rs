//! Client library for remote automation panels.
//!
//! Provides the panel wire types and [`api::PanelApi`] seam, a
//! [`client::PanelClient`] that recovers expired bearer tokens on its own,
//! token acquisition, a bounded retry helper for idempotent reads, and a
//! [`manager::PanelManager`] that shares one client per panel.

pub mod api;
pub mod auth;
pub mod client;
pub mod error;
pub mod manager;
pub mod retry;

pub use api::{EnvUpdate, NewEnv, PanelApi, PanelEnv, TokenData};
pub use client::{PanelClient, TokenRefresher, EXPIRY_MARGIN_SECS};
pub use error::PanelError;
pub use manager::{PanelConnector, PanelManager, PanelTarget};
pub use retry::{with_retry, RetryPolicy};

/// `User-Agent` sent on every panel call.
pub const PANEL_USER_AGENT: &str = "panelgate/1.0";
