// Window reader: decodes a VCDIFF stream into per-window instruction lists.
//
// Unlike a target-reconstructing decoder, this reader never executes
// instructions.  Each window comes back as its literal-data section plus a
// validated instruction list with addresses already resolved through the
// address cache, which is exactly the form the whole-target appender
// consumes.  A window that passes validation here can be appended without
// further checks.

use std::io::Read;

use log::{debug, trace};

use super::address_cache::AddressCache;
use super::code_table::{self, OP_ADD, OP_NOOP, OP_RUN};
use super::header::{FileHeader, WindowHeader};
use super::{DecodeError, varint};

/// One decoded instruction.  COPY addresses live in the window's combined
/// address space: `0..copy_len` is the copy window, `copy_len..` is this
/// window's own already-produced output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Add { size: u32 },
    Run { size: u32 },
    Copy { size: u32, addr: u64 },
}

impl Instruction {
    /// Target bytes this instruction produces.
    #[inline]
    pub fn size(&self) -> u32 {
        match *self {
            Instruction::Add { size }
            | Instruction::Run { size }
            | Instruction::Copy { size, .. } => size,
        }
    }
}

/// One fully-decoded window.
#[derive(Debug, Clone, Default)]
pub struct DecodedWindow {
    /// Offset of the copy window in the source (or earlier target).
    pub copy_offset: u64,
    /// Length of the copy window; 0 when the window has none.
    pub copy_len: u64,
    /// The copy window lies in the earlier target (VCD_TARGET) rather than
    /// the source.
    pub from_target: bool,
    /// Declared Adler-32 of this window's target bytes, if present.  The
    /// reader cannot verify it: nothing here materializes the target.
    pub checksum: Option<u32>,
    /// Literal bytes for ADD (size bytes each) and RUN (one byte each),
    /// in instruction order.
    pub data: Vec<u8>,
    /// Decoded instructions; placeholder NOOP halves are dropped.
    pub insts: Vec<Instruction>,
}

impl DecodedWindow {
    /// Target bytes this window produces.
    pub fn target_len(&self) -> u64 {
        self.insts.iter().map(|i| u64::from(i.size())).sum()
    }
}

/// Streaming reader over the windows of one VCDIFF delta.
pub struct DeltaReader<R: Read> {
    reader: R,
    file_header: Option<FileHeader>,
    acache: AddressCache,
    windows_read: usize,
}

impl<R: Read> DeltaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            file_header: None,
            acache: AddressCache::new(),
            windows_read: 0,
        }
    }

    /// Parse the file header if not yet read, and return it.
    pub fn file_header(&mut self) -> Result<&FileHeader, DecodeError> {
        if self.file_header.is_none() {
            let header = FileHeader::decode(&mut self.reader)?;
            if let Some(id) = header.secondary_id {
                return Err(DecodeError::Unsupported(format!(
                    "secondary compression (id {id})"
                )));
            }
            self.file_header = Some(header);
        }
        Ok(self.file_header.as_ref().unwrap())
    }

    /// Decode the next window.  Returns `Ok(None)` after the last one.
    pub fn next_window(&mut self) -> Result<Option<DecodedWindow>, DecodeError> {
        self.file_header()?;

        let Some(header) = WindowHeader::decode(&mut self.reader)? else {
            return Ok(None);
        };
        if !header.section_flags.is_empty() {
            return Err(DecodeError::Unsupported(
                "secondary-compressed window sections".into(),
            ));
        }

        let mut data = vec![0u8; checked_len(header.data_len)?];
        self.reader.read_exact(&mut data)?;
        let mut inst_section = vec![0u8; checked_len(header.inst_len)?];
        self.reader.read_exact(&mut inst_section)?;
        let mut addr_section = vec![0u8; checked_len(header.addr_len)?];
        self.reader.read_exact(&mut addr_section)?;

        let insts = self.decode_instructions(&header, &inst_section, &addr_section, data.len())?;

        let window = DecodedWindow {
            copy_offset: header.copy_offset,
            copy_len: header.copy_len,
            from_target: header.copies_from_target(),
            checksum: header.checksum,
            data,
            insts,
        };

        self.windows_read += 1;
        trace!(
            "window {}: {} instructions, {} target bytes, copy window {}+{}",
            self.windows_read,
            window.insts.len(),
            header.target_len,
            window.copy_offset,
            window.copy_len
        );
        Ok(Some(window))
    }

    /// Decode all remaining windows.
    pub fn read_to_end(&mut self) -> Result<Vec<DecodedWindow>, DecodeError> {
        let mut windows = Vec::new();
        while let Some(win) = self.next_window()? {
            windows.push(win);
        }
        debug!("decoded {} windows", windows.len());
        Ok(windows)
    }

    /// Walk the instruction section, resolving sizes and addresses.
    ///
    /// Validates everything the appender relies on: opcode halves are
    /// well-formed, copy addresses stay inside the combined address space,
    /// the data section is consumed exactly, and the produced sizes sum to
    /// the header's target length.
    fn decode_instructions(
        &mut self,
        header: &WindowHeader,
        inst_section: &[u8],
        addr_section: &[u8],
        data_len: usize,
    ) -> Result<Vec<Instruction>, DecodeError> {
        self.acache.reset();
        let table = code_table::default_table();

        let mut insts = Vec::new();
        let mut inst_pos = 0usize;
        let mut addr_pos = 0usize;
        let mut data_pos = 0usize;
        let mut produced = 0u64;

        while inst_pos < inst_section.len() {
            let opcode = inst_section[inst_pos];
            inst_pos += 1;
            let entry = table[opcode as usize];

            for half in [entry.first, entry.second] {
                if half.kind == OP_NOOP {
                    continue;
                }

                let size = if half.size != 0 {
                    u32::from(half.size)
                } else {
                    let (size, n) = varint::read_u32(&inst_section[inst_pos..]).map_err(|e| {
                        DecodeError::InvalidInput(format!("instruction size: {e}"))
                    })?;
                    inst_pos += n;
                    size
                };
                if size == 0 {
                    return Err(DecodeError::InvalidInput(
                        "zero-length instruction".into(),
                    ));
                }

                let inst = match half.kind {
                    OP_RUN => {
                        data_pos += 1;
                        Instruction::Run { size }
                    }
                    OP_ADD => {
                        data_pos += size as usize;
                        Instruction::Add { size }
                    }
                    kind => {
                        let mode = kind - code_table::OP_COPY;
                        let here = header.copy_len + produced;
                        let (addr, n) = self
                            .acache
                            .decode(mode, &addr_section[addr_pos..], here)
                            .map_err(|e| {
                                DecodeError::InvalidInput(format!("copy address: {e}"))
                            })?;
                        addr_pos += n;
                        // A copy may not straddle the copy-window/target seam.
                        if addr < header.copy_len && addr + u64::from(size) > header.copy_len {
                            return Err(DecodeError::InvalidInput(
                                "copy spans the source/target boundary".into(),
                            ));
                        }
                        Instruction::Copy { size, addr }
                    }
                };

                if data_pos > data_len {
                    return Err(DecodeError::InvalidInput(
                        "data section underflow".into(),
                    ));
                }
                produced += u64::from(inst.size());
                insts.push(inst);
            }
        }

        if data_pos != data_len {
            return Err(DecodeError::InvalidInput(format!(
                "data section has {} unconsumed bytes",
                data_len - data_pos
            )));
        }
        if addr_pos != addr_section.len() {
            return Err(DecodeError::InvalidInput(format!(
                "address section has {} unconsumed bytes",
                addr_section.len() - addr_pos
            )));
        }
        if produced != header.target_len {
            return Err(DecodeError::InvalidInput(format!(
                "window produces {produced} bytes, header says {}",
                header.target_len
            )));
        }

        Ok(insts)
    }
}

fn checked_len(len: u64) -> Result<usize, DecodeError> {
    usize::try_from(len)
        .ok()
        .filter(|&n| n as u64 <= super::header::MAX_WINDOW_TARGET.saturating_mul(2))
        .ok_or_else(|| DecodeError::InvalidInput(format!("section length {len} too large")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcdiff::header::{HeaderFlags, WindowFlags};
    use std::io::Cursor;

    /// Hand-assemble a delta with one window from raw sections.
    fn assemble(
        flags: WindowFlags,
        copy: (u64, u64),
        target_len: u64,
        data: &[u8],
        inst: &[u8],
        addr: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        FileHeader::default().encode(&mut out).unwrap();
        let mut wh = WindowHeader {
            flags,
            copy_len: copy.0,
            copy_offset: copy.1,
            target_len,
            data_len: data.len() as u64,
            inst_len: inst.len() as u64,
            addr_len: addr.len() as u64,
            ..Default::default()
        };
        wh.enc_len = wh.expected_enc_len();
        wh.encode(&mut out).unwrap();
        out.extend_from_slice(data);
        out.extend_from_slice(inst);
        out.extend_from_slice(addr);
        out
    }

    #[test]
    fn decodes_add_run_copy_window() {
        // ADD(5) "hello", RUN(3) 'x', COPY(4) addr 2 from the copy window.
        let mut inst = Vec::new();
        inst.push(1); // ADD, size follows
        varint::push(&mut inst, 5);
        inst.push(0); // RUN, size follows
        varint::push(&mut inst, 3);
        inst.push(19 + 1); // COPY mode 0, size 4

        let mut addr = Vec::new();
        varint::push(&mut addr, 2);

        let delta = assemble(
            WindowFlags::SOURCE,
            (100, 0),
            12,
            b"hellox",
            &inst,
            &addr,
        );

        let mut reader = DeltaReader::new(Cursor::new(&delta));
        let win = reader.next_window().unwrap().unwrap();
        assert_eq!(
            win.insts,
            vec![
                Instruction::Add { size: 5 },
                Instruction::Run { size: 3 },
                Instruction::Copy { size: 4, addr: 2 },
            ]
        );
        assert_eq!(win.data, b"hellox");
        assert_eq!(win.copy_len, 100);
        assert!(!win.from_target);
        assert_eq!(win.target_len(), 12);
        assert!(reader.next_window().unwrap().is_none());
    }

    #[test]
    fn decodes_paired_opcode() {
        // Opcode 163 = ADD(1) + COPY(4) mode 0.
        let inst = [163u8];
        let mut addr = Vec::new();
        varint::push(&mut addr, 0);
        let delta = assemble(WindowFlags::SOURCE, (50, 0), 5, b"A", &inst, &addr);

        let mut reader = DeltaReader::new(Cursor::new(&delta));
        let win = reader.next_window().unwrap().unwrap();
        assert_eq!(
            win.insts,
            vec![
                Instruction::Add { size: 1 },
                Instruction::Copy { size: 4, addr: 0 },
            ]
        );
    }

    #[test]
    fn self_copy_addresses_resolve_past_copy_window() {
        // ADD(4), then COPY(4) of the bytes just produced (addr = copy_len).
        let mut inst = Vec::new();
        inst.push(1);
        varint::push(&mut inst, 4);
        inst.push(19 + 1); // COPY mode 0 size 4
        let mut addr = Vec::new();
        varint::push(&mut addr, 10); // == copy_len: first target byte
        let delta = assemble(WindowFlags::SOURCE, (10, 0), 8, b"abcd", &inst, &addr);

        let mut reader = DeltaReader::new(Cursor::new(&delta));
        let win = reader.next_window().unwrap().unwrap();
        assert_eq!(win.insts[1], Instruction::Copy { size: 4, addr: 10 });
    }

    #[test]
    fn rejects_copy_across_boundary() {
        // COPY(4) at addr 8 with copy_len 10 straddles the seam.
        let mut inst = Vec::new();
        inst.push(19 + 1);
        let mut addr = Vec::new();
        varint::push(&mut addr, 8);
        // Needs some produced bytes first so `here` lets addr 8 decode.
        let mut full_inst = Vec::new();
        full_inst.push(1);
        varint::push(&mut full_inst, 4);
        full_inst.extend_from_slice(&inst);
        let delta = assemble(WindowFlags::SOURCE, (10, 0), 8, b"abcd", &full_inst, &addr);

        let mut reader = DeltaReader::new(Cursor::new(&delta));
        assert!(matches!(
            reader.next_window(),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_unconsumed_data() {
        let mut inst = Vec::new();
        inst.push(1);
        varint::push(&mut inst, 2);
        let delta = assemble(WindowFlags::empty(), (0, 0), 2, b"abXX", &inst, &[]);
        let mut reader = DeltaReader::new(Cursor::new(&delta));
        assert!(matches!(
            reader.next_window(),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_target_len_mismatch() {
        let mut inst = Vec::new();
        inst.push(1);
        varint::push(&mut inst, 2);
        let delta = assemble(WindowFlags::empty(), (0, 0), 3, b"ab", &inst, &[]);
        let mut reader = DeltaReader::new(Cursor::new(&delta));
        assert!(matches!(
            reader.next_window(),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_secondary_compression() {
        let mut out = Vec::new();
        FileHeader {
            flags: HeaderFlags::SECONDARY,
            secondary_id: Some(2),
            app_header: None,
        }
        .encode(&mut out)
        .unwrap();
        let mut reader = DeltaReader::new(Cursor::new(&out));
        assert!(matches!(
            reader.next_window(),
            Err(DecodeError::Unsupported(_))
        ));
    }

    #[test]
    fn target_window_flag_surfaces() {
        let mut inst = Vec::new();
        inst.push(19 + 1); // COPY mode 0 size 4
        let mut addr = Vec::new();
        varint::push(&mut addr, 16);
        let delta = assemble(WindowFlags::TARGET, (20, 16), 4, b"", &inst, &addr);

        let mut reader = DeltaReader::new(Cursor::new(&delta));
        let win = reader.next_window().unwrap().unwrap();
        assert!(win.from_target);
        assert_eq!(win.copy_offset, 16);
    }

    #[test]
    fn empty_stream_has_no_windows() {
        let mut out = Vec::new();
        FileHeader::default().encode(&mut out).unwrap();
        let mut reader = DeltaReader::new(Cursor::new(&out));
        assert!(reader.next_window().unwrap().is_none());
        assert!(reader.read_to_end().unwrap().is_empty());
    }
}
