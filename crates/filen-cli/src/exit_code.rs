//! Process exit codes.
//!
//! The CLI exits with the lowest-numbered class that applies; clap itself
//! exits with [`USAGE`] on argument errors.

use filen_core::ErrorKind;

pub const SUCCESS: u8 = 0;
/// Partial failure or verification mismatch.
pub const PARTIAL: u8 = 1;
pub const USAGE: u8 = 2;
pub const AUTH: u8 = 3;
/// Network failure after retries were exhausted.
pub const NETWORK: u8 = 4;

/// Map an error chain onto an exit code via typed downcasting.
pub fn categorize(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if let Some(core) = cause.downcast_ref::<filen_core::Error>() {
            return match core.kind() {
                ErrorKind::Auth => AUTH,
                ErrorKind::Transient | ErrorKind::RateLimited => NETWORK,
                _ => PARTIAL,
            };
        }
    }
    PARTIAL
}
