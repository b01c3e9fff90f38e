// The merge engine: compose two consecutive deltas into one.
//
// Given `source` = Δ(S→M) and `input` = Δ(M→T), produce Δ(S→T) without
// materializing M or T.  RUN/ADD instructions and target-space copies of
// `input` carry over directly; `input`'s source copies read M, so they are
// resolved against `source`'s instruction list, splitting at instruction
// boundaries and rewriting addresses until everything refers to S or to
// already-described bytes of T.

use log::debug;

use super::MergeError;
use super::state::{CopySpace, InstKind, MergeInst, WholeTarget};

/// Merge `input` (Δ of the intermediate to the final target) with `source`
/// (Δ of the original source to the intermediate).
///
/// The result describes the same target as `input`: its length always
/// equals `input.len()`.
pub fn merge(source: &WholeTarget, input: &WholeTarget) -> Result<WholeTarget, MergeError> {
    debug!(
        "merge: {} input instructions against {} source instructions",
        input.instructions().len(),
        source.instructions().len()
    );

    let mut output = WholeTarget::new();
    for inst in input.instructions() {
        match inst.kind {
            InstKind::Run => {
                output.push_run(inst.size, input.immediates()[inst.addr as usize]);
            }
            InstKind::Add => {
                let start = inst.addr as usize;
                output.push_add(&input.immediates()[start..start + inst.size as usize]);
            }
            // Emitted and earlier-target copies already reference the final
            // target; they pass through untouched.
            InstKind::Copy(space @ (CopySpace::Emitted | CopySpace::Target)) => {
                output.push_copy(space, inst.size, inst.addr);
            }
            InstKind::Copy(CopySpace::Source) => {
                resolve_source_copy(&mut output, source, inst)?;
            }
        }
    }

    debug_assert_eq!(output.len(), input.len());
    Ok(output)
}

/// Translate one of `input`'s source copies (a span of the intermediate)
/// into instructions over the original source.
///
/// Walks the source instructions covering `[inst.addr, inst.addr + size)`
/// and emits one output instruction per overlapped segment: a RUN keeps
/// its single repeat byte, an ADD contributes the overlapping slice of its
/// literal data, and a copy collapses by address arithmetic, keeping its
/// own space.
fn resolve_source_copy(
    output: &mut WholeTarget,
    source: &WholeTarget,
    inst: &MergeInst,
) -> Result<(), MergeError> {
    let end = inst.addr.checked_add(u64::from(inst.size));
    if end.is_none_or(|end| end > source.len()) {
        return Err(MergeError::InvalidInput(format!(
            "copy {}+{} exceeds intermediate length {}",
            inst.addr,
            inst.size,
            source.len()
        )));
    }

    let mut offset = inst.addr;
    let mut remaining = u64::from(inst.size);
    let mut index = source.find(offset)?;

    while remaining > 0 {
        let seg = source.instructions().get(index).ok_or_else(|| {
            MergeError::Internal(format!("ran out of source instructions at offset {offset}"))
        })?;
        let seg_off = offset - seg.position;
        let take = remaining.min(u64::from(seg.size) - seg_off) as u32;

        match seg.kind {
            InstKind::Run => {
                output.push_run(take, source.immediates()[seg.addr as usize]);
            }
            InstKind::Add => {
                let start = (seg.addr + seg_off) as usize;
                output.push_add(&source.immediates()[start..start + take as usize]);
            }
            InstKind::Copy(space) => {
                output.push_copy(space, take, seg.addr + seg_off);
            }
        }

        offset += u64::from(take);
        remaining -= u64::from(take);
        index += 1;
    }

    Ok(())
}

/// Fold `input` into `accumulator`, replacing the accumulator's contents
/// with the merged delta.
pub fn merge_into(accumulator: &mut WholeTarget, input: &WholeTarget) -> Result<(), MergeError> {
    let mut merged = merge(accumulator, input)?;
    accumulator.swap(&mut merged);
    Ok(())
}

/// Reduce a chain of deltas d1..dn pairwise, left to right.  The result
/// maps d1's source to dn's target.  An empty chain yields an empty state.
pub fn merge_chain<I>(deltas: I) -> Result<WholeTarget, MergeError>
where
    I: IntoIterator<Item = WholeTarget>,
{
    let mut iter = deltas.into_iter();
    let Some(mut accumulator) = iter.next() else {
        return Ok(WholeTarget::new());
    };
    for delta in iter {
        merge_into(&mut accumulator, &delta)?;
    }
    Ok(accumulator)
}
