//! Pipeline stages for batch conversion.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own against an in-memory [`remote::RemoteService`].
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ resume ──▶ upload ──▶ poll ──▶ retrieve
//! (walkdir)   (skip?)    (PUT)      (GET×n)  (zip)
//! ```
//!
//! 1. [`discover`] — walk the input root, map each file to its output directory
//! 2. [`resume`]   — skip documents whose output already holds Markdown
//! 3. [`upload`]   — reserve a remote batch and transfer the bytes
//! 4. [`poll`]     — fixed-interval status checks with an attempt ceiling
//! 5. [`retrieve`] — download the result archive and unpack it in
//!    `spawn_blocking`
//!
//! [`job`] ties stages 3–5 together behind a small state machine, and
//! [`remote`] is the only module that performs network I/O.

pub mod discover;
pub mod job;
pub mod poll;
pub mod remote;
pub mod resume;
pub mod retrieve;
pub mod upload;
