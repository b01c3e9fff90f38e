//! Delta composition: whole-target states and the merge engine.
//!
//! A [`WholeTarget`] is one fully-decoded delta held flat: an instruction
//! list ordered by target position plus an arena of ADD/RUN immediates.
//! [`merge`] composes two consecutive deltas into one without ever
//! materializing the intermediate target.

pub mod engine;
pub mod state;

pub use engine::{merge, merge_chain, merge_into};
pub use state::{CopySpace, InstKind, MergeInst, WholeTarget};

use std::io::Read;

use thiserror::Error;

use crate::vcdiff::{DecodeError, DeltaReader};

/// Errors from merging or applying whole-target states.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A copy instruction references bytes outside the delta it resolves
    /// against.
    #[error("invalid copy offset in merge: {0}")]
    InvalidInput(String),
    /// The position index failed to converge; the state's ordering
    /// invariant was broken upstream.
    #[error("internal error in merge: {0}")]
    Internal(String),
}

/// Decode an entire VCDIFF stream into one whole-target state.
pub fn read_delta<R: Read>(reader: R) -> Result<WholeTarget, DecodeError> {
    let mut delta = DeltaReader::new(reader);
    let mut state = WholeTarget::new();
    while let Some(window) = delta.next_window()? {
        state.append_window(&window);
    }
    log::debug!(
        "read delta: {} instructions, {} target bytes, {} immediate bytes",
        state.instructions().len(),
        state.len(),
        state.immediates().len()
    );
    Ok(state)
}
