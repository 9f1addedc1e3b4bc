// SPDX-License-Identifier: MIT

use aetherflow_registry::RegistryError;
use aetherflow_resolver::ResolverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("resource `{resource}` references unknown profile `{profile}`")]
    UnknownProfile { resource: String, profile: String },

    #[error("resource `{resource}` field `{field}`: {source}")]
    Template {
        resource: String,
        field: String,
        #[source]
        source: ResolverError,
    },

    #[error(
        "resource `{resource}` field `{field}` is marked `decode` but is not a standalone `{{{{PATH}}}}` token"
    )]
    DecodeRequiresStandaloneToken { resource: String, field: String },

    #[error("resource `{resource}` field `{field}` decode hook failed: {reason}")]
    DecodeFailed {
        resource: String,
        field: String,
        reason: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
