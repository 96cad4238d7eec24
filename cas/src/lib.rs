//! Core engine mapping a git object graph onto a content-addressed store.
//!
//! See SPEC_FULL.md for the full requirements; this crate implements
//! components C1-C4 (Tracker, CAS Client, Push Engine, Fetch Engine) plus
//! the thin git-object-reading and VFS-decoration collaborators. The
//! remote-helper line protocol and the per-scheme ref handlers (C5 and the
//! Ref Handler plug-ins) live in the `git-remote-cas` binary crate.

pub mod cas;
pub mod config;
pub mod content;
pub mod error;
pub mod fetch;
pub mod git;
pub mod naming;
pub mod push;
pub mod tracker;
pub mod vfs;

pub use crate::cas::{Address, Client};
pub use crate::error::{Error, Result};
pub use crate::git::{Oid, Reader};
pub use crate::tracker::Tracker;
