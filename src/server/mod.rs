pub(crate) mod codec;
mod connection;
pub(crate) mod handler;
mod listener;
#[allow(clippy::module_inception)]
pub(crate) mod server;
pub(crate) mod state;

pub use server::{Error, ServerConfig};
pub use state::Matcher;
