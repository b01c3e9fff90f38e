//! Vcmerge: VCDIFF (RFC 3284) delta merging in Rust.
//!
//! Given a chain of deltas d1 = Δ(S→M) and d2 = Δ(M→T), the crate produces
//! one equivalent delta Δ(S→T) without materializing M or T.  The crate
//! provides:
//! - Whole-target delta states and the merge engine (`merge`)
//! - A VCDIFF window reader/writer to move states on and off the wire
//!   (`vcdiff`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use vcmerge::merge::{self, CopySpace, WholeTarget};
//!
//! let source = b"abcdefgh";
//!
//! // d1: source -> "cdef" (one source copy).
//! let mut d1 = WholeTarget::new();
//! d1.push_copy(CopySpace::Source, 4, 2);
//!
//! // d2: "cdef" -> "cdcd" (two copies of its source's head).
//! let mut d2 = WholeTarget::new();
//! d2.push_copy(CopySpace::Source, 2, 0);
//! d2.push_copy(CopySpace::Source, 2, 0);
//!
//! let merged = merge::merge(&d1, &d2).unwrap();
//! assert_eq!(merged.apply(source).unwrap(), b"cdcd");
//! ```

pub mod merge;
pub mod vcdiff;

#[cfg(feature = "cli")]
pub mod cli;
