// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let digits = value.strip_prefix(concat!($prefix, ":")).unwrap_or(value);
                Ok(Self(digits.parse()?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0).finish()
            }
        }
    };
}

numeric_id!(
    /// Identifier of an item in the content tree.
    ///
    /// Node ids are assigned by the content-management collaborator, the engine never mints
    /// them itself.
    NodeId,
    "node"
);

numeric_id!(
    /// Identifier of a user account.
    UserId,
    "user"
);

numeric_id!(
    /// Identifier of an explicit share row.
    ShareId,
    "share"
);

numeric_id!(
    /// Identifier of a graft, the virtual attachment of one subtree below another node.
    GraftId,
    "graft"
);

/// Monotonic position of a committed mutation.
///
/// Revisions are handed out by the store while it holds its write lock, they therefore follow
/// the order in which structural facts were committed and not the order in which background
/// workers happen to pick up the resulting tasks.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    pub const ZERO: Revision = Revision(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Revision directly following this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Subject of a share: either one specific user or everybody.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Principal {
    Public,
    User(UserId),
}

impl Principal {
    pub fn user(&self) -> Option<UserId> {
        match self {
            Principal::Public => None,
            Principal::User(user) => Some(*user),
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Principal::Public)
    }
}

impl From<Option<UserId>> for Principal {
    fn from(value: Option<UserId>) -> Self {
        match value {
            Some(user) => Principal::User(user),
            None => Principal::Public,
        }
    }
}

impl From<UserId> for Principal {
    fn from(value: UserId) -> Self {
        Principal::User(value)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Public => write!(f, "public"),
            Principal::User(user) => write!(f, "{user}"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("invalid numeric identifier: {0}")]
    InvalidNumber(#[from] ParseIntError),
}

#[cfg(test)]
mod tests {
    use super::{NodeId, Principal, Revision, UserId};

    #[test]
    fn parse_with_and_without_prefix() {
        assert_eq!("node:12".parse::<NodeId>().unwrap(), NodeId::new(12));
        assert_eq!("12".parse::<NodeId>().unwrap(), NodeId::new(12));
        assert!("node:x".parse::<NodeId>().is_err());

        // The prefix of another id type is not accepted.
        assert!("user:12".parse::<NodeId>().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(NodeId::new(3).to_string(), "node:3");
        assert_eq!(Principal::User(UserId::new(7)).to_string(), "user:7");
        assert_eq!(Principal::Public.to_string(), "public");
    }

    #[test]
    fn principal_from_optional_user() {
        assert_eq!(Principal::from(None::<UserId>), Principal::Public);
        assert_eq!(
            Principal::from(Some(UserId::new(1))),
            Principal::User(UserId::new(1))
        );
    }

    #[test]
    fn revisions_are_ordered() {
        let first = Revision::ZERO.next();
        assert!(first > Revision::ZERO);
        assert!(first.next() > first);
    }

    #[test]
    fn serde_transparent() {
        let json = serde_json::to_string(&NodeId::new(5)).unwrap();
        assert_eq!(json, "5");
        let id: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, NodeId::new(5));
    }
}
