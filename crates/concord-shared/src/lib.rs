//! # concord-shared
//!
//! Types shared by the Concord discussion crates: identities, discussion
//! status and kind, system message categories and the JSON control payloads
//! exchanged between devices.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::IdentityError;
pub use protocol::*;
pub use types::*;
