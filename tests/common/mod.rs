//! Common test utilities for playlist-archiver integration tests


#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use backends::*;
pub use config::*;
