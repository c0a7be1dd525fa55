mod mock;
mod server;

pub use mock::{Mock, MockRef};
pub use server::MockServer;
