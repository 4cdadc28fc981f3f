// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The five permission ranks which can be granted on a node. Greater ranks are assumed to also
/// contain all lower ones.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    /// Explicitly no access. Used to block a grant inherited from further up the tree.
    #[default]
    NoAccess,

    /// Permission to see a node and its content.
    Read,

    /// Permission to read and comment.
    Feedback,

    /// Permission to change content and structure below a node.
    Write,

    /// Permission to manage shares of a node.
    Admin,
}

impl Rank {
    pub const ALL: [Rank; 5] = [
        Rank::NoAccess,
        Rank::Read,
        Rank::Feedback,
        Rank::Write,
        Rank::Admin,
    ];

    /// Numeric representation, `no_access` is `0` and `admin` is `4`.
    pub fn as_u8(&self) -> u8 {
        match self {
            Rank::NoAccess => 0,
            Rank::Read => 1,
            Rank::Feedback => 2,
            Rank::Write => 3,
            Rank::Admin => 4,
        }
    }

    /// Returns `true` if this rank grants any access at all.
    pub fn grants_access(&self) -> bool {
        *self >= Rank::Read
    }

    /// Returns `true` if this rank is at least the required one.
    pub fn satisfies(&self, required: Rank) -> bool {
        *self >= required
    }
}

impl Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rank::NoAccess => "no_access",
            Rank::Read => "read",
            Rank::Feedback => "feedback",
            Rank::Write => "write",
            Rank::Admin => "admin",
        };

        write!(f, "{}", s)
    }
}

impl TryFrom<u8> for Rank {
    type Error = RankError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rank::ALL
            .get(value as usize)
            .copied()
            .ok_or(RankError::OutOfRange(value))
    }
}

impl FromStr for Rank {
    type Err = RankError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "no_access" => Ok(Rank::NoAccess),
            "read" => Ok(Rank::Read),
            "feedback" => Ok(Rank::Feedback),
            "write" => Ok(Rank::Write),
            "admin" => Ok(Rank::Admin),
            other => Err(RankError::UnknownName(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RankError {
    #[error("permission rank {0} is out of range, expected 0..=4")]
    OutOfRange(u8),

    #[error("unknown permission rank \"{0}\"")]
    UnknownName(String),
}
