use hearth_db::DbError;
use std::sync::Arc;
use thiserror::Error;

use crate::dispatcher::Reply;
use crate::validation::ValidationError;

/// Failures surfaced by the record cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The store could not be read or written. Shared between every caller
    /// that waited on the same load.
    #[error("player store unavailable: {0}")]
    StoreUnavailable(#[source] Arc<DbError>),
}

/// Argument errors are reported to the invoker before any async work starts.
pub type ParseError = ValidationError;

/// Failures of the asynchronous part of a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl CommandError {
    /// Convert into the line shown to the invoker. Internal details stay in the logs.
    pub fn into_reply(self, command: &str) -> Reply {
        match self {
            CommandError::Cache(CacheError::StoreUnavailable(err)) => {
                tracing::error!(command, error = %err, "player store unavailable during command");
                Reply::error("§cPlayer data is unavailable right now. Please try again later.")
            }
        }
    }
}
