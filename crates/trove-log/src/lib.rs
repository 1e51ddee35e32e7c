//! In-process verifiable log.
//!
//! One append-only tree per record token. Each leaf commits to a 32-byte
//! blob digest; the tree root is an RFC 6962-style SHA-256 merkle root, so
//! any leaf can be proven included in any later root. Roots are what the
//! anchor engine timestamps onto the external chain.
//!
//! The log is deliberately synchronous behind a `RwLock` — all state is in
//! memory and every operation is pure map/vec work.

mod error;
mod log;
pub mod merkle;

pub use error::LogError;
pub use log::{Leaf, LogRoot, NewLeaf, VerifiableLog};
