//! Renderer adapters behind [`crate::application::render::Renderer`].

mod chromium;
mod disabled;
mod remote;

pub use chromium::ChromiumRenderer;
pub use disabled::DisabledRenderer;
pub use remote::RemoteRenderer;
