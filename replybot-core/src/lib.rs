pub mod config;
pub mod duration;
pub mod error;
pub mod error_utils;
pub mod seen;
pub mod traits;
pub mod types;

pub use config::*;
pub use duration::parse_duration;
pub use error::*;
pub use error_utils::*;
pub use seen::MemorySeenStore;
pub use traits::*;
pub use types::*;
