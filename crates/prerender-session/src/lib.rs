//! Prerendering of single-page applications in a long-lived headless
//! browser page.
//!
//! A [`Session`] boots the application once (navigation to a synthetic
//! origin answered by the request interceptor, runtime shim, vendor and app
//! scripts, app boot) and then serves many serialized visits against it,
//! each capturing the rendered head, body and root element attributes.

mod bootstrap;
pub mod collector;
pub mod error;
mod exec;
pub mod interceptor;
pub mod metrics;
pub mod request;
pub mod result;
mod script;
pub mod session;
mod visit;

pub use error::{BootError, RenderError, SessionError};
pub use metrics::{register_metrics, SessionMetricsSnapshot};
pub use request::{Headers, Request};
pub use result::RenderResult;
pub use script::CAPABILITIES;
pub use session::{render, Session, SessionOptions, SessionState};
