//! HTTP front for an application bundle: stored files are served as is,
//! every other GET is rendered and spliced into the index document.

mod cache;
mod handler;
mod renderer;
mod router;
mod state;

pub use cache::RenderCache;
pub use handler::{build_request, splice, BODY_END, BODY_MARKER, BODY_START, HEAD_MARKER, TITLE_MARKER};
pub use renderer::{IsolatedRenderer, Renderer, SharedRenderer};
pub use router::{build_router, LIVE_PATH, READY_PATH};
pub use state::{HealthSnapshot, LogHooks, RenderHooks, ServeHealth, ServeOptions, ServeState};
