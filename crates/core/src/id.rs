// SPDX-License-Identifier: MIT

//! Identifier newtypes for the core entities a run tracks.

/// Trait for truncating identifiers to a short prefix (for log lines).
pub trait ShortId {
    /// Returns a string slice truncated to at most `n` characters.
    fn short(&self, n: usize) -> &str;
}

impl ShortId for str {
    fn short(&self, n: usize) -> &str {
        if self.len() <= n {
            self
        } else {
            &self[..n]
        }
    }
}

/// Define a newtype ID wrapper around `String`.
///
/// Generates `new()`, `as_str()`, `short()`, `Display`, `From<String>`,
/// `From<&str>`, `PartialEq<str>`, `PartialEq<&str>`, and `Borrow<str>`
/// implementations.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns a string slice truncated to at most `n` characters.
            pub fn short(&self, n: usize) -> &str {
                if self.0.len() <= n {
                    &self.0
                } else {
                    &self.0[..n]
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Identifier of a flow definition (`FlowMetadata.id`).
    pub struct FlowId;
}

define_id! {
    /// Caller-supplied or generated run identifier. Reusing the same
    /// `RunId` against the same state database is what resume means.
    pub struct RunId;
}

define_id! {
    /// Job identifier, unique within a flow.
    pub struct JobId;
}

define_id! {
    /// Step identifier, unique within a job.
    pub struct StepId;
}

impl RunId {
    /// Generate a fresh opaque run identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_truncates() {
        let id = JobId::new("abcdefgh");
        assert_eq!(id.short(4), "abcd");
    }

    #[test]
    fn short_leaves_shorter_strings_alone() {
        let id = JobId::new("ab");
        assert_eq!(id.short(4), "ab");
    }

    #[test]
    fn generated_run_ids_are_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn eq_str_compares_inner_value() {
        let id = StepId::new("check_items");
        assert_eq!(id, "check_items");
    }
}
