pub mod cache;
pub mod error;
pub mod record;
pub mod source;

pub use cache::*;
pub use error::*;
pub use record::*;
pub use source::*;
