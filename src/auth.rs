//! Credential material, token snapshots, and refresh-error classification.

pub mod classify;
pub mod credentials;
pub mod secret;
pub mod token;

pub use classify::*;
pub use credentials::*;
pub use secret::*;
pub use token::*;
