pub mod app;
pub mod env;
pub mod render;
pub mod runtime;
pub mod serve;

pub use app::run;
pub use env::{CliArgs, Commands};
pub use render::{cmd_render, RenderArgs};
pub use serve::{cmd_serve, ServeArgs};
