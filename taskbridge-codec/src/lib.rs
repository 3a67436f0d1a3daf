//! Task-line codec: one markdown checkbox line ⇄ structured task fields.
//!
//! Canonical form produced by [`build`]:
//!
//! ```text
//! <indent>- [ ] content #label [due:: 2026-03-09] [time:: 09:30] [p:: medium|high|urgent] [dur:: 45m] [sync:: a1b2c3]
//! ```
//!
//! [`parse`] accepts `-` or `*` bullets, `x`/`X` completion marks, tabs or
//! spaces for indentation, and annotations in any order. Round-trip holds
//! for any fields this system builds: `parse(build(f, id, d))` reproduces
//! `(f, id, d)`.
//!
//! Malformed task lines (bad checkbox, unparseable annotation value) yield
//! `None`; callers skip and log them.

pub mod line;

pub use line::{build, extract_id, parse, ParsedLine, INDENT_WIDTH};
