pub mod chain;
pub mod proxy;

pub use chain::*;
pub use proxy::*;
