pub mod data;
pub(crate) mod runtime;
pub mod util;
