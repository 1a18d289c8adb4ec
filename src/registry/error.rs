//! Registry error types

use thiserror::Error;

use crate::session::NoticeKind;
use crate::store::SourceId;

/// Why a session could not be acquired
///
/// Surfaced only to the requesting connection; configuration errors never
/// create a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// No configuration record for this source id
    #[error("source not found: {0}")]
    NotFound(SourceId),

    /// The source exists but is switched off
    #[error("source is inactive: {0}")]
    Inactive(SourceId),
}

impl AcquireError {
    /// The notice kind sent to the requesting viewer
    pub fn notice_kind(&self) -> NoticeKind {
        match self {
            AcquireError::NotFound(_) => NoticeKind::NotFound,
            AcquireError::Inactive(_) => NoticeKind::Inactive,
        }
    }
}
