// Whole-target state: a decoded delta as a flat instruction list plus an
// immediate-data arena.
//
// All cross-references are integer offsets into the two owned buffers, so
// growth by reallocation needs no fixups.  Instructions are strictly
// ordered and contiguous in target position; appends are the only
// mutation.

use std::mem;

use crate::vcdiff::reader::{DecodedWindow, Instruction};

use super::MergeError;

/// Growth quantum for the immediate-data arena, in bytes.
pub const ARENA_QUANTUM: usize = 1 << 14;
/// Growth quantum for the instruction vector, in records.
pub const INST_QUANTUM: usize = 1 << 9;

/// Which byte space a COPY reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySpace {
    /// Already-emitted bytes of this delta's own target.
    Emitted,
    /// The external source.
    Source,
    /// An earlier window's target segment (VCD_TARGET).
    Target,
}

/// Instruction kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstKind {
    Run,
    Add,
    Copy(CopySpace),
}

/// One whole-target instruction.
///
/// `addr` is an arena offset for RUN/ADD, a source offset for
/// `Copy(Source)`, and a target offset for the other copy spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeInst {
    pub kind: InstKind,
    /// Target bytes this instruction produces.
    pub size: u32,
    /// Absolute target offset of the first produced byte.
    pub position: u64,
    pub addr: u64,
}

impl MergeInst {
    /// One past the last target offset this instruction produces.
    #[inline]
    pub fn end(&self) -> u64 {
        self.position + u64::from(self.size)
    }
}

/// A fully-decoded delta against a single source.
#[derive(Debug, Default)]
pub struct WholeTarget {
    adds: Vec<u8>,
    insts: Vec<MergeInst>,
    length: u64,
}

impl WholeTarget {
    pub fn new() -> Self {
        Self {
            adds: Vec::with_capacity(ARENA_QUANTUM),
            insts: Vec::with_capacity(INST_QUANTUM),
            length: 0,
        }
    }

    /// Total target bytes described so far.
    #[inline]
    pub fn len(&self) -> u64 {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The instruction list, ordered by `position`.
    #[inline]
    pub fn instructions(&self) -> &[MergeInst] {
        &self.insts
    }

    /// The immediate-data arena referenced by RUN/ADD instructions.
    #[inline]
    pub fn immediates(&self) -> &[u8] {
        &self.adds
    }

    /// Exchange the buffers of two states.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    pub fn clear(&mut self) {
        self.adds.clear();
        self.insts.clear();
        self.length = 0;
    }

    /// Reserve one instruction slot and `data_len` arena bytes, both ahead
    /// of either write, growing each buffer to twice its needed size
    /// rounded up to its quantum.
    fn reserve_for(&mut self, data_len: usize) {
        reserve_amortized(&mut self.insts, 1, INST_QUANTUM);
        if data_len > 0 {
            reserve_amortized(&mut self.adds, data_len, ARENA_QUANTUM);
        }
    }

    /// Append a RUN of `size` copies of `byte`.
    pub fn push_run(&mut self, size: u32, byte: u8) {
        debug_assert!(size >= 1);
        self.reserve_for(1);
        let addr = self.adds.len() as u64;
        self.adds.push(byte);
        self.insts.push(MergeInst {
            kind: InstKind::Run,
            size,
            position: self.length,
            addr,
        });
        self.length += u64::from(size);
    }

    /// Append an ADD of the literal bytes in `data`.
    pub fn push_add(&mut self, data: &[u8]) {
        debug_assert!(!data.is_empty());
        self.reserve_for(data.len());
        let addr = self.adds.len() as u64;
        self.adds.extend_from_slice(data);
        self.insts.push(MergeInst {
            kind: InstKind::Add,
            size: data.len() as u32,
            position: self.length,
            addr,
        });
        self.length += data.len() as u64;
    }

    /// Append a COPY of `size` bytes from `addr` in `space`.
    ///
    /// Emitted-target copies are expected to start inside the
    /// already-described bytes; [`validate`](Self::validate) enforces it.
    pub fn push_copy(&mut self, space: CopySpace, size: u32, addr: u64) {
        debug_assert!(size >= 1);
        self.reserve_for(0);
        self.insts.push(MergeInst {
            kind: InstKind::Copy(space),
            size,
            position: self.length,
            addr,
        });
        self.length += u64::from(size);
    }

    /// Append one decoded window, rewriting window-local copy addresses
    /// into the flat source-absolute or target-absolute form.
    ///
    /// The window reader has already validated the window (and dropped
    /// placeholder NOOP halves), so this cannot fail.
    pub fn append_window(&mut self, window: &DecodedWindow) {
        let base = self.length;
        let mut data_pos = 0usize;

        for inst in &window.insts {
            match *inst {
                Instruction::Run { size } => {
                    let byte = window.data[data_pos];
                    data_pos += 1;
                    self.push_run(size, byte);
                }
                Instruction::Add { size } => {
                    let end = data_pos + size as usize;
                    self.push_add(&window.data[data_pos..end]);
                    data_pos = end;
                }
                Instruction::Copy { size, addr } => {
                    if addr < window.copy_len {
                        let space = if window.from_target {
                            CopySpace::Target
                        } else {
                            CopySpace::Source
                        };
                        self.push_copy(space, size, window.copy_offset + addr);
                    } else {
                        self.push_copy(CopySpace::Emitted, size, base + (addr - window.copy_len));
                    }
                }
            }
        }

        debug_assert_eq!(data_pos, window.data.len(), "window data fully consumed");
    }

    /// Index of the instruction covering target offset `offset`.
    ///
    /// Binary search over `position`; the target index stays inside
    /// `[low, high)` and the ordering invariant guarantees convergence.
    pub fn find(&self, offset: u64) -> Result<usize, MergeError> {
        if offset >= self.length {
            return Err(MergeError::InvalidInput(format!(
                "offset {offset} is beyond the described length {}",
                self.length
            )));
        }

        let mut low = 0usize;
        let mut high = self.insts.len();
        while low < high {
            let mid = low + (high - low) / 2;
            let inst = &self.insts[mid];
            if offset < inst.position {
                high = mid;
            } else if offset >= inst.end() {
                low = mid + 1;
            } else {
                return Ok(mid);
            }
        }

        Err(MergeError::Internal(format!(
            "position index failed to locate offset {offset}"
        )))
    }

    /// Materialize the target this state describes, reading source bytes
    /// from `source`.  This is the reference applier used to check merge
    /// results; the merge engine itself never calls it.
    pub fn apply(&self, source: &[u8]) -> Result<Vec<u8>, MergeError> {
        let mut out = Vec::with_capacity(usize::try_from(self.length).unwrap_or(0));

        for inst in &self.insts {
            let size = inst.size as usize;
            match inst.kind {
                InstKind::Run => {
                    let byte = *self.adds.get(inst.addr as usize).ok_or_else(|| {
                        MergeError::Internal(format!("run byte {} outside arena", inst.addr))
                    })?;
                    out.resize(out.len() + size, byte);
                }
                InstKind::Add => {
                    let start = inst.addr as usize;
                    let data = self.adds.get(start..start + size).ok_or_else(|| {
                        MergeError::Internal(format!("add data {}+{} outside arena", start, size))
                    })?;
                    out.extend_from_slice(data);
                }
                InstKind::Copy(CopySpace::Source) => {
                    let start = inst.addr as usize;
                    let data = source.get(start..start + size).ok_or_else(|| {
                        MergeError::InvalidInput(format!(
                            "source copy {}+{} exceeds source length {}",
                            inst.addr,
                            size,
                            source.len()
                        ))
                    })?;
                    out.extend_from_slice(data);
                }
                InstKind::Copy(_) => {
                    let start = inst.addr as usize;
                    if inst.addr >= inst.position {
                        return Err(MergeError::InvalidInput(format!(
                            "target copy at {} references unwritten offset {}",
                            inst.position, inst.addr
                        )));
                    }
                    let end = start + size;
                    if end <= out.len() {
                        out.extend_from_within(start..end);
                    } else {
                        // Overlapping self-copy: later reads must observe
                        // bytes written earlier in the same instruction.
                        for i in start..end {
                            let byte = out[i];
                            out.push(byte);
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Check the structural invariants: contiguous ordering from offset 0,
    /// nonzero sizes, arena references in bounds, and target copies
    /// starting inside already-described bytes.
    pub fn validate(&self) -> Result<(), MergeError> {
        let mut expected = 0u64;
        for (i, inst) in self.insts.iter().enumerate() {
            if inst.size == 0 {
                return Err(MergeError::Internal(format!("instruction {i} has size 0")));
            }
            if inst.position != expected {
                return Err(MergeError::Internal(format!(
                    "instruction {i} starts at {}, expected {expected}",
                    inst.position
                )));
            }
            let in_arena = match inst.kind {
                InstKind::Run => 1,
                InstKind::Add => u64::from(inst.size),
                InstKind::Copy(_) => 0,
            };
            if in_arena > 0 && inst.addr + in_arena > self.adds.len() as u64 {
                return Err(MergeError::Internal(format!(
                    "instruction {i} references arena {}+{in_arena} of {}",
                    inst.addr,
                    self.adds.len()
                )));
            }
            if matches!(inst.kind, InstKind::Copy(CopySpace::Emitted | CopySpace::Target))
                && inst.addr >= inst.position
            {
                return Err(MergeError::Internal(format!(
                    "instruction {i} copies target offset {} at position {}",
                    inst.addr, inst.position
                )));
            }
            expected = inst.end();
        }
        if expected != self.length {
            return Err(MergeError::Internal(format!(
                "instructions cover {expected} bytes, state says {}",
                self.length
            )));
        }
        Ok(())
    }
}

/// Grow `vec` so `additional` more elements fit: twice the needed size,
/// rounded up to `quantum` elements.
fn reserve_amortized<T>(vec: &mut Vec<T>, additional: usize, quantum: usize) {
    let needed = vec.len() + additional;
    if needed <= vec.capacity() {
        return;
    }
    let goal = (2 * needed).next_multiple_of(quantum);
    vec.reserve_exact(goal - vec.len());
}
