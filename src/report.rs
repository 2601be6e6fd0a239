//! Leveled status signal shared by every operation.
//!
//! Each remote step reports exactly one of these outcomes so an operator
//! reading the log can tell a clean skip from a failure.

use std::fmt;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Skip,
    Note,
    Warn,
    Fail,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OKAY",
            Self::Skip => "SKIP",
            Self::Note => "NOTE",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn status(level: Status, message: impl fmt::Display) {
    match level {
        Status::Ok | Status::Skip | Status::Note => info!(status = %level, "{}", message),
        Status::Warn => warn!(status = %level, "{}", message),
        Status::Fail => error!(status = %level, "{}", message),
    }
}
