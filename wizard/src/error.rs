/*!
Errors raised while running jobs against the rig.
*/

use crate::device::DeviceError;
use shared::SharedError;
use thiserror::Error;

pub type ExecResult<T> = std::result::Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    /// The job's cancel token fired
    #[error("Cancelled")]
    Cancelled,

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Shared(#[from] SharedError),
}

impl ExecError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
