pub mod errors;
pub mod wire;

pub use errors::*;
pub use wire::*;
