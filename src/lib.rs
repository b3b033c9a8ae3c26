//! School grading engine and the workspace daemon built on it.
//!
//! [`calc`], [`policy`] and [`access`] are pure: they turn trimester
//! component scores into trimester, annual and final statuses, and decide
//! module permissions. [`ipc`] wraps them in a line-delimited JSON service
//! over a SQLite workspace ([`db`]).

pub mod access;
pub mod backup;
pub mod calc;
pub mod db;
pub mod error;
pub mod ipc;
pub mod policy;

pub use error::{GradeError, LoadError};
