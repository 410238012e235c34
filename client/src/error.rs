//! Typed errors at the client's component boundaries (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("reconnection attempts exceeded the configured ceiling ({0})")]
    AttemptsExceeded(u32),
}
