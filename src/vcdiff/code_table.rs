// VCDIFF default code table (RFC 3284, Section 5.6).
//
// Each of the 256 opcodes encodes one or two half-instructions.  A half
// with `size == 0` takes its actual size from a varint that follows the
// opcode in the instruction section.

/// Half-instruction kinds.  COPY kinds are `OP_COPY + mode`, where `mode`
/// ranges over the nine address modes of the default cache geometry.
pub const OP_NOOP: u8 = 0;
pub const OP_ADD: u8 = 1;
pub const OP_RUN: u8 = 2;
pub const OP_COPY: u8 = 3;

/// Number of COPY address modes in the default table (2 + 4 near + 3 same).
pub const COPY_MODES: u8 = 9;

/// Shortest COPY the default table can express.
pub const MIN_COPY: u8 = 4;

/// One half of a code table entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Half {
    /// OP_NOOP, OP_ADD, OP_RUN, or OP_COPY + mode.
    pub kind: u8,
    /// Implicit size, or 0 when the size follows as a varint.
    pub size: u8,
}

/// One opcode: a first half and an optional second half (OP_NOOP when absent).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpcodeEntry {
    pub first: Half,
    pub second: Half,
}

impl OpcodeEntry {
    fn solo(kind: u8, size: u8) -> Self {
        Self {
            first: Half { kind, size },
            second: Half {
                kind: OP_NOOP,
                size: 0,
            },
        }
    }

    fn pair(kind1: u8, size1: u8, kind2: u8, size2: u8) -> Self {
        Self {
            first: Half {
                kind: kind1,
                size: size1,
            },
            second: Half {
                kind: kind2,
                size: size2,
            },
        }
    }
}

/// The complete 256-entry table.
pub type CodeTable = [OpcodeEntry; 256];

/// Build the default RFC 3284 code table.
///
/// Layout: RUN(0), ADD sizes 0..=17 (1..18), then per mode a COPY group of
/// size 0 and sizes 4..=18 (19..162), then ADD+COPY pairs (163..246), then
/// COPY+ADD pairs (247..255).
pub fn build_default_table() -> CodeTable {
    let mut table = [OpcodeEntry::default(); 256];
    let mut next = 0usize;

    table[next] = OpcodeEntry::solo(OP_RUN, 0);
    next += 1;

    for size in 0..=17u8 {
        table[next] = OpcodeEntry::solo(OP_ADD, size);
        next += 1;
    }

    for mode in 0..COPY_MODES {
        table[next] = OpcodeEntry::solo(OP_COPY + mode, 0);
        next += 1;
        for size in MIN_COPY..=18 {
            table[next] = OpcodeEntry::solo(OP_COPY + mode, size);
            next += 1;
        }
    }

    // ADD(1..=4) + COPY pairs.  Near modes pair with copies up to 6 bytes,
    // same modes only with 4-byte copies.
    for mode in 0..COPY_MODES {
        let copy_max = if mode < 6 { 6 } else { 4 };
        for add_size in 1..=4u8 {
            for copy_size in MIN_COPY..=copy_max {
                table[next] = OpcodeEntry::pair(OP_ADD, add_size, OP_COPY + mode, copy_size);
                next += 1;
            }
        }
    }

    // COPY(4) + ADD(1) pairs, one per mode.
    for mode in 0..COPY_MODES {
        table[next] = OpcodeEntry::pair(OP_COPY + mode, MIN_COPY, OP_ADD, 1);
        next += 1;
    }

    debug_assert_eq!(next, 256, "default code table must fill all opcodes");
    table
}

/// The lazily-built shared default table.
pub fn default_table() -> &'static CodeTable {
    use std::sync::LazyLock;
    static TABLE: LazyLock<CodeTable> = LazyLock::new(build_default_table);
    &TABLE
}

// ---------------------------------------------------------------------------
// Opcode choice (writer side)
// ---------------------------------------------------------------------------

/// A half-instruction the writer wants to emit: kind plus actual size.
#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    /// OP_ADD, OP_RUN, or OP_COPY + mode.
    pub kind: u8,
    pub size: u32,
}

/// The single-instruction opcode for `inst`.  When the entry's implicit
/// size is 0 the caller must append the size as a varint.
pub fn solo_opcode(inst: OpSpec) -> u8 {
    match inst.kind {
        OP_RUN => 0,
        OP_ADD => {
            if (1..=17).contains(&inst.size) {
                1 + inst.size as u8
            } else {
                1
            }
        }
        _ => {
            let mode = inst.kind - OP_COPY;
            let group = 19 + 16 * mode;
            if (u32::from(MIN_COPY)..=18).contains(&inst.size) {
                group + inst.size as u8 - 3
            } else {
                group
            }
        }
    }
}

/// The double opcode packing `prev` followed by `next`, if the table has one.
pub fn pair_opcode(prev: OpSpec, next: OpSpec) -> Option<u8> {
    match (prev.kind, next.kind) {
        // ADD(1..=4) + COPY: near modes take copies of 4..=6, same modes 4.
        (OP_ADD, k) if k >= OP_COPY => {
            let mode = k - OP_COPY;
            if !(1..=4).contains(&prev.size) {
                return None;
            }
            if mode < 6 && (4..=6).contains(&next.size) {
                Some(163 + mode * 12 + 3 * (prev.size as u8 - 1) + (next.size as u8 - 4))
            } else if mode >= 6 && next.size == 4 {
                Some(235 + (mode - 6) * 4 + (prev.size as u8 - 1))
            } else {
                None
            }
        }
        // COPY(4) + ADD(1), any mode.
        (k, OP_ADD) if k >= OP_COPY && prev.size == 4 && next.size == 1 => {
            Some(247 + (k - OP_COPY))
        }
        _ => None,
    }
}
