//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

/// Key/value attributes attached to containers, profiles, resources and configurations.
pub type Attributes = BTreeMap<String, String>;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
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

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }

        impl AsRef<std::path::Path> for $name {
            fn as_ref(&self) -> &std::path::Path {
                std::path::Path::new(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Hierarchical container name of the form `parent:child#suffix`.
    ContainerIdentity
);

string_newtype!(
    /// Profile name, unique within its profile version.
    ProfileIdentity
);

string_newtype!(
    /// Identifier of a single item inside a profile.
    ItemIdentity
);

string_newtype!(
    /// Installable resource identity, `symbolic-name:version`.
    ResourceIdentity
);

impl ContainerIdentity {
    /// The `#suffix` part, if any.
    pub fn suffix(&self) -> Option<&str> {
        self.0.split_once('#').map(|(_, suffix)| suffix)
    }

    /// The `:`-separated path segments with the suffix stripped.
    pub fn segments(&self) -> Vec<&str> {
        let path = self.0.split_once('#').map_or(self.0.as_str(), |(p, _)| p);
        path.split(':').collect()
    }

    /// The last path segment, i.e. the simple name without parent prefix or suffix.
    pub fn simple_name(&self) -> &str {
        let path = self.0.split_once('#').map_or(self.0.as_str(), |(p, _)| p);
        path.rsplit(':').next().unwrap_or(path)
    }
}

impl ResourceIdentity {
    /// Compose an identity from a symbolic name and a version string.
    pub fn from_parts(name: &str, version: &str) -> Self {
        Self(format!("{name}:{version}"))
    }

    /// Symbolic name, everything before the last `:`.
    pub fn symbolic_name(&self) -> &str {
        self.0.rsplit_once(':').map_or(self.0.as_str(), |(n, _)| n)
    }

    /// Version part, everything after the last `:`.
    pub fn version(&self) -> Option<&str> {
        self.0.rsplit_once(':').map(|(_, v)| v)
    }
}
