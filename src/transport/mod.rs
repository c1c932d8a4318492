//! HTTP surface: signed webhook intake and the approval API.

pub mod server;
pub mod signature;

pub use server::{router, serve, AppState};
pub use signature::{sign, verify, SIGNATURE_HEADER};
