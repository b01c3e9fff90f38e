// Delta writer: re-encode a whole-target state as a VCDIFF stream.
//
// The merged instruction list is emitted canonically: one (possibly
// paired) opcode per instruction, addresses through the encoding address
// cache, no re-optimization of the instruction stream.  Windows are cut at
// instruction boundaries under a soft size budget.  A self-referencing
// copy cannot reach past its own window's base in VCDIFF, so a state whose
// target copies reach back across a planned boundary is written as a
// single window instead.
//
// No checksums are emitted: the writer never materializes the target, so
// it has nothing to hash.

use std::io::{self, Write};
use std::ops::Range;

use log::debug;

use crate::merge::state::{CopySpace, InstKind, WholeTarget};

use super::address_cache::AddressCache;
use super::code_table::{self, OP_ADD, OP_COPY, OP_RUN, OpSpec};
use super::header::{FileHeader, HeaderFlags, WindowFlags, WindowHeader};
use super::varint;

/// Options for delta emission.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Soft limit on target bytes per window.  A single oversized
    /// instruction still becomes one window.
    pub window_budget: u64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            window_budget: 1 << 23, // 8 MiB
        }
    }
}

/// Writes a VCDIFF stream: file header, then windows.
pub struct DeltaWriter<W: Write> {
    writer: W,
    header_written: bool,
    file_header: FileHeader,
}

impl<W: Write> DeltaWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
            file_header: FileHeader::default(),
        }
    }

    /// Attach application-defined header data.
    pub fn set_app_header(&mut self, data: Vec<u8>) {
        self.file_header.flags |= HeaderFlags::APPHEADER;
        self.file_header.app_header = Some(data);
    }

    fn ensure_header(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.file_header.encode(&mut self.writer)?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Emit all of `state` as one or more windows.
    pub fn write_state(&mut self, state: &WholeTarget, opts: &WriteOptions) -> io::Result<()> {
        self.ensure_header()?;

        let windows = plan_windows(state, opts.window_budget);
        debug!(
            "writing {} instructions as {} windows",
            state.instructions().len(),
            windows.len()
        );
        for range in windows {
            self.write_window(state, range)?;
        }
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.ensure_header()?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_window(&mut self, state: &WholeTarget, range: Range<usize>) -> io::Result<()> {
        let insts = &state.instructions()[range];
        let base = insts[0].position;

        // Copy window: the tightest source span the window's source copies
        // touch.
        let mut lo = u64::MAX;
        let mut hi = 0u64;
        for inst in insts {
            if inst.kind == InstKind::Copy(CopySpace::Source) {
                lo = lo.min(inst.addr);
                hi = hi.max(inst.addr + u64::from(inst.size));
            }
        }
        let (copy_offset, copy_len) = if lo < hi { (lo, hi - lo) } else { (0, 0) };

        let mut sections = SectionBuilder::new(copy_len);
        for inst in insts {
            let size = inst.size as usize;
            match inst.kind {
                InstKind::Run => {
                    sections.run(inst.size, state.immediates()[inst.addr as usize]);
                }
                InstKind::Add => {
                    let start = inst.addr as usize;
                    sections.add(&state.immediates()[start..start + size]);
                }
                InstKind::Copy(CopySpace::Source) => {
                    sections.copy(inst.size, inst.addr - copy_offset);
                }
                InstKind::Copy(_) => {
                    sections.copy(inst.size, copy_len + (inst.addr - base));
                }
            }
        }
        let (data, inst_section, addr, target_len) = sections.finish();

        let mut header = WindowHeader {
            flags: if copy_len > 0 {
                WindowFlags::SOURCE
            } else {
                WindowFlags::empty()
            },
            copy_len,
            copy_offset,
            target_len,
            data_len: data.len() as u64,
            inst_len: inst_section.len() as u64,
            addr_len: addr.len() as u64,
            ..Default::default()
        };
        header.enc_len = header.expected_enc_len();

        header.encode(&mut self.writer)?;
        self.writer.write_all(&data)?;
        self.writer.write_all(&inst_section)?;
        self.writer.write_all(&addr)
    }
}

/// One-call emission with default options.
pub fn write_delta<W: Write>(state: &WholeTarget, writer: W) -> io::Result<W> {
    let mut delta = DeltaWriter::new(writer);
    delta.write_state(state, &WriteOptions::default())?;
    delta.finish()
}

/// Cut the instruction list into window ranges.
///
/// Greedy accumulation up to the soft budget, always at instruction
/// boundaries.  Falls back to one window covering everything when any
/// target-space copy would land in a window after the one holding its
/// referenced bytes.
fn plan_windows(state: &WholeTarget, budget: u64) -> Vec<Range<usize>> {
    let insts = state.instructions();
    if insts.is_empty() {
        return Vec::new();
    }

    let mut ranges = Vec::new();
    let mut start = 0usize;
    let mut produced = 0u64;
    for (i, inst) in insts.iter().enumerate() {
        if produced >= budget && i > start {
            ranges.push(start..i);
            start = i;
            produced = 0;
        }
        produced += u64::from(inst.size);
    }
    ranges.push(start..insts.len());

    for range in &ranges {
        let window_base = insts[range.start].position;
        let reaches_back = insts[range.clone()].iter().any(|inst| {
            matches!(
                inst.kind,
                InstKind::Copy(CopySpace::Emitted | CopySpace::Target)
            ) && inst.addr < window_base
        });
        if reaches_back {
            debug!("target copy reaches across a window boundary, writing one window");
            return vec![0..insts.len()];
        }
    }

    ranges
}

// ---------------------------------------------------------------------------
// Section builder
// ---------------------------------------------------------------------------

/// Accumulates one window's DATA/INST/ADDR sections.
///
/// Adjacent instructions that the code table can pack share a double
/// opcode; everything else gets a single opcode with an inline or varint
/// size.
struct SectionBuilder {
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    acache: AddressCache,
    pending: Option<OpSpec>,
    produced: u64,
    copy_len: u64,
}

impl SectionBuilder {
    fn new(copy_len: u64) -> Self {
        Self {
            data: Vec::new(),
            inst: Vec::new(),
            addr: Vec::new(),
            acache: AddressCache::new(),
            pending: None,
            produced: 0,
            copy_len,
        }
    }

    /// Current position in the window's combined address space.
    #[inline]
    fn here(&self) -> u64 {
        self.copy_len + self.produced
    }

    fn run(&mut self, size: u32, byte: u8) {
        self.data.push(byte);
        self.emit(OpSpec { kind: OP_RUN, size });
        self.produced += u64::from(size);
    }

    fn add(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.emit(OpSpec {
            kind: OP_ADD,
            size: bytes.len() as u32,
        });
        self.produced += bytes.len() as u64;
    }

    /// `window_addr` is already in the combined address space.
    fn copy(&mut self, size: u32, window_addr: u64) {
        let mode = self.acache.encode(window_addr, self.here(), &mut self.addr);
        self.emit(OpSpec {
            kind: OP_COPY + mode,
            size,
        });
        self.produced += u64::from(size);
    }

    fn emit(&mut self, spec: OpSpec) {
        if let Some(prev) = self.pending
            && let Some(code) = code_table::pair_opcode(prev, spec)
        {
            self.pending = None;
            self.inst.push(code);
            return;
        }
        self.flush_pending();
        self.pending = Some(spec);
    }

    fn flush_pending(&mut self) {
        if let Some(spec) = self.pending.take() {
            let code = code_table::solo_opcode(spec);
            self.inst.push(code);
            if code_table::default_table()[code as usize].first.size == 0 {
                varint::push(&mut self.inst, u64::from(spec.size));
            }
        }
    }

    fn finish(mut self) -> (Vec<u8>, Vec<u8>, Vec<u8>, u64) {
        self.flush_pending();
        (self.data, self.inst, self.addr, self.produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::read_delta;

    fn roundtrip(state: &WholeTarget, opts: &WriteOptions) -> WholeTarget {
        let mut out = Vec::new();
        let mut writer = DeltaWriter::new(&mut out);
        writer.write_state(state, opts).unwrap();
        writer.finish().unwrap();

        let back = read_delta(std::io::Cursor::new(&out)).unwrap();
        back.validate().unwrap();
        back
    }

    fn assert_states_equal(a: &WholeTarget, b: &WholeTarget) {
        assert_eq!(a.len(), b.len());
        assert_eq!(a.instructions(), b.instructions());
        assert_eq!(a.immediates(), b.immediates());
    }

    #[test]
    fn empty_state_writes_header_only() {
        let state = WholeTarget::new();
        let mut out = Vec::new();
        write_delta(&state, &mut out).unwrap();
        assert_eq!(out.len(), 5); // magic + indicator

        let back = read_delta(std::io::Cursor::new(&out)).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn mixed_state_roundtrips_exactly() {
        let mut state = WholeTarget::new();
        state.push_add(b"header:");
        state.push_copy(CopySpace::Source, 40, 100);
        state.push_run(9, 0);
        state.push_copy(CopySpace::Emitted, 5, 2);
        state.push_copy(CopySpace::Source, 12, 130);

        let back = roundtrip(&state, &WriteOptions::default());
        assert_states_equal(&state, &back);
    }

    #[test]
    fn copy_window_is_tight() {
        let mut state = WholeTarget::new();
        state.push_copy(CopySpace::Source, 4, 1000);
        state.push_copy(CopySpace::Source, 4, 1016);

        let mut out = Vec::new();
        write_delta(&state, &mut out).unwrap();

        let mut reader = crate::vcdiff::DeltaReader::new(std::io::Cursor::new(&out));
        let win = reader.next_window().unwrap().unwrap();
        assert_eq!(win.copy_offset, 1000);
        assert_eq!(win.copy_len, 20);
    }

    #[test]
    fn small_budget_splits_windows() {
        let mut state = WholeTarget::new();
        for i in 0..8u8 {
            state.push_add(&[b'a' + i; 10]);
        }

        let mut out = Vec::new();
        let mut writer = DeltaWriter::new(&mut out);
        writer
            .write_state(&state, &WriteOptions { window_budget: 25 })
            .unwrap();
        writer.finish().unwrap();

        let mut reader = crate::vcdiff::DeltaReader::new(std::io::Cursor::new(&out));
        let windows = reader.read_to_end().unwrap();
        assert!(windows.len() > 1, "expected a split, got 1 window");

        let back = read_delta(std::io::Cursor::new(&out)).unwrap();
        assert_states_equal(&state, &back);
    }

    #[test]
    fn far_target_copy_forces_single_window() {
        let mut state = WholeTarget::new();
        for i in 0..8u8 {
            state.push_add(&[b'a' + i; 10]);
        }
        // References window 1's bytes from what would be a later window.
        state.push_copy(CopySpace::Emitted, 10, 0);

        let mut out = Vec::new();
        let mut writer = DeltaWriter::new(&mut out);
        writer
            .write_state(&state, &WriteOptions { window_budget: 25 })
            .unwrap();
        writer.finish().unwrap();

        let mut reader = crate::vcdiff::DeltaReader::new(std::io::Cursor::new(&out));
        let windows = reader.read_to_end().unwrap();
        assert_eq!(windows.len(), 1);

        let back = read_delta(std::io::Cursor::new(&out)).unwrap();
        assert_states_equal(&state, &back);
    }

    #[test]
    fn near_target_copy_still_splits() {
        // The emitted copy references bytes inside its own window.
        let mut state = WholeTarget::new();
        for i in 0..4u8 {
            state.push_add(&[b'a' + i; 10]);
        }
        state.push_add(b"0123456789");
        state.push_copy(CopySpace::Emitted, 5, 40);

        let mut out = Vec::new();
        let mut writer = DeltaWriter::new(&mut out);
        writer
            .write_state(&state, &WriteOptions { window_budget: 40 })
            .unwrap();
        writer.finish().unwrap();

        let mut reader = crate::vcdiff::DeltaReader::new(std::io::Cursor::new(&out));
        let windows = reader.read_to_end().unwrap();
        assert!(windows.len() > 1);

        let back = read_delta(std::io::Cursor::new(&out)).unwrap();
        assert_states_equal(&state, &back);
    }

    #[test]
    fn paired_opcodes_shrink_inst_section() {
        // ADD(1) + COPY(4) packs into one opcode.
        let mut state = WholeTarget::new();
        state.push_add(b"X");
        state.push_copy(CopySpace::Source, 4, 0);

        let mut out = Vec::new();
        write_delta(&state, &mut out).unwrap();

        let mut reader = crate::vcdiff::DeltaReader::new(std::io::Cursor::new(&out));
        let win = reader.next_window().unwrap().unwrap();
        assert_eq!(win.insts.len(), 2);

        let back = read_delta(std::io::Cursor::new(&out)).unwrap();
        assert_states_equal(&state, &back);
    }

    #[test]
    fn app_header_survives() {
        let mut state = WholeTarget::new();
        state.push_run(3, b'.');

        let mut out = Vec::new();
        let mut writer = DeltaWriter::new(&mut out);
        writer.set_app_header(b"from=a;to=b".to_vec());
        writer.write_state(&state, &WriteOptions::default()).unwrap();
        writer.finish().unwrap();

        let mut reader = crate::vcdiff::DeltaReader::new(std::io::Cursor::new(&out));
        let header = reader.file_header().unwrap();
        assert_eq!(header.app_header.as_deref(), Some(b"from=a;to=b".as_slice()));
    }
}
