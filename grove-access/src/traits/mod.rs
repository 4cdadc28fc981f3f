// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to collaborators living outside of the permission index.
mod comments;
mod queue;

pub use comments::CommentSource;
pub use queue::{TaskHandler, TaskQueue};
