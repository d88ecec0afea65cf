//! Plugin scripting.
//!
//! Plugins are small Rhai scripts that define `fn main(value)`. They run in
//! [`sandbox::PluginSandbox`] with resource caps, a wall-clock timeout and
//! an outbound HTTP helper restricted to public hosts. The return value is
//! turned into a [`output::PluginVerdict`] by the submission pipeline.

pub mod executor;
pub mod output;
pub mod request;
pub mod sandbox;

pub use executor::{ExecutionContext, ExecutionResult, ScriptError};
pub use output::{interpret_output, PluginVerdict};
pub use request::RequestPolicy;
pub use sandbox::{PluginSandbox, SandboxLimits};
