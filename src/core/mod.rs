pub mod codec;
pub mod errors;
pub mod logging;

pub use codec::*;
pub use errors::*;
pub use logging::*;
