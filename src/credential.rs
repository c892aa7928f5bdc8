//! Subject identifiers, redacted secrets, and the persisted credential record.

pub mod id;
pub mod record;
pub mod secret;

pub use id::*;
pub use record::*;
pub use secret::*;
