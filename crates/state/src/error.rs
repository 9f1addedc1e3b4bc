// SPDX-License-Identifier: MIT

//! Errors raised by the SQLite-backed state store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state store {path}: {source}")]
    Sqlite {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("state store {path}: stored status `{value}` is not a recognized status")]
    CorruptStatus { path: String, value: String },
}
