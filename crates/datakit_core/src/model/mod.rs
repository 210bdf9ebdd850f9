//! Generic domain contracts shared by schema, session and repository layers.
//!
//! # Responsibility
//! - Define the `Entity`/`Field` contracts application records implement.
//! - Define typed predicates used by every filter-based query.

pub mod entity;
pub mod filter;
