//! Error taxonomy shared by the translator, applier, and session.

use otdom_live::LiveError;
use thiserror::Error;

use crate::element_list::SerializeError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Shadow and live tree diverged in count or identity. Fatal to the
    /// replica: local translation halts until a resync.
    #[error("shadow tree diverged from live tree: {0}")]
    StructuralIntegrity(String),

    /// Local translation is halted after an integrity failure.
    #[error("translation halted after an integrity failure; resync required")]
    Halted,

    /// An operation shape the format disallows. Programming/data error.
    #[error("unsupported operation shape: {0}")]
    UnsupportedShape(String),

    #[error(transparent)]
    Live(#[from] LiveError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),
}
