// VCDIFF file and window headers (RFC 3284, Sections 4.1-4.3).
//
// Wire-compatible with xdelta3's header layout.  Indicator bytes are
// modeled as bitflags; set bits outside the defined masks are a decode
// error, matching the VCD_INV* checks in the reference decoder.

use std::io::{self, Read, Write};

use bitflags::bitflags;

use super::{DecodeError, varint};

pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

bitflags! {
    /// Header indicator byte (hdr_ind).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        const SECONDARY = 1 << 0;
        const CODETABLE = 1 << 1;
        const APPHEADER = 1 << 2;
    }

    /// Window indicator byte (win_ind).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowFlags: u8 {
        const SOURCE = 1 << 0;
        const TARGET = 1 << 1;
        const ADLER32 = 1 << 2;
    }

    /// Delta indicator byte (del_ind): per-section secondary compression.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectionFlags: u8 {
        const DATA = 1 << 0;
        const INST = 1 << 1;
        const ADDR = 1 << 2;
    }
}

/// Upper bound accepted for one window's target length.
///
/// Interoperable xdelta3 streams keep windows at or below 16 MiB; merged
/// single-window output can be larger, so this guard only bounds hostile
/// headers rather than enforcing the interop limit.
pub const MAX_WINDOW_TARGET: u64 = 1 << 30;

fn read_byte<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF file header.
#[derive(Debug, Clone, Default)]
pub struct FileHeader {
    pub flags: HeaderFlags,
    /// Secondary compressor ID (when SECONDARY is set).
    pub secondary_id: Option<u8>,
    /// Application-defined data (when APPHEADER is set).
    pub app_header: Option<Vec<u8>>,
}

impl FileHeader {
    /// Emit magic, indicator, and the optional trailing fields.
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&VCDIFF_MAGIC)?;
        w.write_all(&[self.flags.bits()])?;

        if self.flags.contains(HeaderFlags::SECONDARY) {
            w.write_all(&[self.secondary_id.unwrap_or(0)])?;
        }

        if self.flags.contains(HeaderFlags::APPHEADER) {
            let data = self.app_header.as_deref().unwrap_or(&[]);
            varint::write(w, data.len() as u64)?;
            w.write_all(data)?;
        }

        Ok(())
    }

    /// Parse and validate a file header.
    pub fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic[..3] != VCDIFF_MAGIC[..3] {
            return Err(DecodeError::InvalidInput(format!(
                "bad VCDIFF magic: {:02X} {:02X} {:02X}",
                magic[0], magic[1], magic[2]
            )));
        }
        if magic[3] != 0 {
            return Err(DecodeError::InvalidInput(format!(
                "unsupported VCDIFF version: {:#04X}",
                magic[3]
            )));
        }

        let bits = read_byte(r)?;
        let flags = HeaderFlags::from_bits(bits).ok_or_else(|| {
            DecodeError::InvalidInput(format!("invalid header indicator bits: {bits:#04X}"))
        })?;

        let secondary_id = if flags.contains(HeaderFlags::SECONDARY) {
            Some(read_byte(r)?)
        } else {
            None
        };

        if flags.contains(HeaderFlags::CODETABLE) {
            return Err(DecodeError::Unsupported(
                "application-defined code tables".into(),
            ));
        }

        let app_header = if flags.contains(HeaderFlags::APPHEADER) {
            let len = varint::read_from(r)? as usize;
            let mut data = vec![0u8; len];
            r.read_exact(&mut data)?;
            Some(data)
        } else {
            None
        };

        Ok(Self {
            flags,
            secondary_id,
            app_header,
        })
    }
}

// ---------------------------------------------------------------------------
// Window header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF per-window header.
#[derive(Debug, Clone, Default)]
pub struct WindowHeader {
    pub flags: WindowFlags,
    /// Length of the source/target copy window.
    pub copy_len: u64,
    /// Offset of the copy window in the source (or earlier target).
    pub copy_offset: u64,
    /// Redundant length of the delta encoding that follows.
    pub enc_len: u64,
    /// Target bytes this window produces.
    pub target_len: u64,
    /// Per-section secondary compression flags.
    pub section_flags: SectionFlags,
    pub data_len: u64,
    pub inst_len: u64,
    pub addr_len: u64,
    /// Adler-32 of the target window (when ADLER32 is set).
    pub checksum: Option<u32>,
}

impl WindowHeader {
    /// Does this window copy from a source or earlier-target segment?
    #[inline]
    pub fn has_copy_window(&self) -> bool {
        self.flags
            .intersects(WindowFlags::SOURCE | WindowFlags::TARGET)
    }

    /// Does the copy window lie in the earlier target rather than the source?
    #[inline]
    pub fn copies_from_target(&self) -> bool {
        self.flags.contains(WindowFlags::TARGET)
    }

    /// The `enc_len` value implied by the other fields.
    pub fn expected_enc_len(&self) -> u64 {
        varint::encoded_len(self.target_len) as u64
            + 1
            + varint::encoded_len(self.data_len) as u64
            + varint::encoded_len(self.inst_len) as u64
            + varint::encoded_len(self.addr_len) as u64
            + self.data_len
            + self.inst_len
            + self.addr_len
            + if self.flags.contains(WindowFlags::ADLER32) {
                4
            } else {
                0
            }
    }

    /// Emit the window header.  `enc_len` is taken from the struct; callers
    /// normally fill it via [`expected_enc_len`](Self::expected_enc_len).
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.flags.bits()])?;

        if self.has_copy_window() {
            varint::write(w, self.copy_len)?;
            varint::write(w, self.copy_offset)?;
        }

        varint::write(w, self.enc_len)?;
        varint::write(w, self.target_len)?;
        w.write_all(&[self.section_flags.bits()])?;
        varint::write(w, self.data_len)?;
        varint::write(w, self.inst_len)?;
        varint::write(w, self.addr_len)?;

        if self.flags.contains(WindowFlags::ADLER32) {
            w.write_all(&self.checksum.unwrap_or(0).to_be_bytes())?;
        }

        Ok(())
    }

    /// Parse a window header.  Returns `None` on clean EOF (no more windows).
    pub fn decode<R: Read>(r: &mut R) -> Result<Option<Self>, DecodeError> {
        let bits = match read_byte(r) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let flags = WindowFlags::from_bits(bits).ok_or_else(|| {
            DecodeError::InvalidInput(format!("invalid window indicator bits: {bits:#04X}"))
        })?;
        if flags.contains(WindowFlags::SOURCE | WindowFlags::TARGET) {
            return Err(DecodeError::InvalidInput(
                "window names both source and target copy segments".into(),
            ));
        }

        let (copy_len, copy_offset) = if flags.intersects(WindowFlags::SOURCE | WindowFlags::TARGET)
        {
            (varint::read_from(r)?, varint::read_from(r)?)
        } else {
            (0, 0)
        };

        let enc_len = varint::read_from(r)?;
        let target_len = varint::read_from(r)?;
        if target_len > MAX_WINDOW_TARGET {
            return Err(DecodeError::InvalidInput(format!(
                "window target length {target_len} exceeds limit {MAX_WINDOW_TARGET}"
            )));
        }

        let bits = read_byte(r)?;
        let section_flags = SectionFlags::from_bits(bits).ok_or_else(|| {
            DecodeError::InvalidInput(format!("invalid delta indicator bits: {bits:#04X}"))
        })?;

        let data_len = varint::read_from(r)?;
        let inst_len = varint::read_from(r)?;
        let addr_len = varint::read_from(r)?;

        let checksum = if flags.contains(WindowFlags::ADLER32) {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            Some(u32::from_be_bytes(b))
        } else {
            None
        };

        let header = Self {
            flags,
            copy_len,
            copy_offset,
            enc_len,
            target_len,
            section_flags,
            data_len,
            inst_len,
            addr_len,
            checksum,
        };

        let expected = header.expected_enc_len();
        if enc_len != expected {
            return Err(DecodeError::InvalidInput(format!(
                "enc_len mismatch: header says {enc_len}, sections imply {expected}"
            )));
        }

        Ok(Some(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn file_header_roundtrip_minimal() {
        let hdr = FileHeader::default();
        let mut buf = Vec::new();
        hdr.encode(&mut buf).unwrap();
        assert_eq!(&buf[..4], &VCDIFF_MAGIC);

        let back = FileHeader::decode(&mut Cursor::new(&buf)).unwrap();
        assert!(back.flags.is_empty());
        assert!(back.secondary_id.is_none());
        assert!(back.app_header.is_none());
    }

    #[test]
    fn file_header_roundtrip_app_header() {
        let hdr = FileHeader {
            flags: HeaderFlags::APPHEADER,
            secondary_id: None,
            app_header: Some(b"s=base.bin".to_vec()),
        };
        let mut buf = Vec::new();
        hdr.encode(&mut buf).unwrap();
        let back = FileHeader::decode(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.app_header.as_deref(), Some(b"s=base.bin".as_slice()));
    }

    #[test]
    fn file_header_rejects_bad_magic() {
        let buf = [0x00u8, 0x11, 0x22, 0x00, 0x00];
        assert!(matches!(
            FileHeader::decode(&mut Cursor::new(&buf)),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn file_header_rejects_reserved_bits() {
        let mut buf = Vec::new();
        FileHeader::default().encode(&mut buf).unwrap();
        buf[4] = 0x80;
        assert!(matches!(
            FileHeader::decode(&mut Cursor::new(&buf)),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn file_header_rejects_custom_code_table() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&VCDIFF_MAGIC);
        buf.push(HeaderFlags::CODETABLE.bits());
        assert!(matches!(
            FileHeader::decode(&mut Cursor::new(&buf)),
            Err(DecodeError::Unsupported(_))
        ));
    }

    fn sample_window() -> WindowHeader {
        let mut wh = WindowHeader {
            flags: WindowFlags::SOURCE,
            copy_len: 1024,
            copy_offset: 512,
            target_len: 300,
            data_len: 100,
            inst_len: 20,
            addr_len: 5,
            ..Default::default()
        };
        wh.enc_len = wh.expected_enc_len();
        wh
    }

    #[test]
    fn window_header_roundtrip() {
        let wh = sample_window();
        let mut buf = Vec::new();
        wh.encode(&mut buf).unwrap();
        let back = WindowHeader::decode(&mut Cursor::new(&buf)).unwrap().unwrap();
        assert_eq!(back.copy_len, 1024);
        assert_eq!(back.copy_offset, 512);
        assert_eq!(back.target_len, 300);
        assert!(!back.copies_from_target());
    }

    #[test]
    fn window_header_eof_is_none() {
        let empty: &[u8] = &[];
        assert!(WindowHeader::decode(&mut Cursor::new(empty)).unwrap().is_none());
    }

    #[test]
    fn window_header_rejects_enc_len_mismatch() {
        let mut wh = sample_window();
        wh.enc_len += 1;
        let mut buf = Vec::new();
        wh.encode(&mut buf).unwrap();
        assert!(matches!(
            WindowHeader::decode(&mut Cursor::new(&buf)),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn window_header_rejects_source_and_target() {
        let mut buf = Vec::new();
        buf.push((WindowFlags::SOURCE | WindowFlags::TARGET).bits());
        varint::push(&mut buf, 10);
        varint::push(&mut buf, 0);
        varint::push(&mut buf, 5);
        varint::push(&mut buf, 5);
        buf.push(0);
        varint::push(&mut buf, 0);
        varint::push(&mut buf, 0);
        varint::push(&mut buf, 0);
        assert!(matches!(
            WindowHeader::decode(&mut Cursor::new(&buf)),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn target_window_checksum_roundtrip() {
        let mut wh = sample_window();
        wh.flags |= WindowFlags::ADLER32;
        wh.checksum = Some(0xDEAD_BEEF);
        wh.enc_len = wh.expected_enc_len();
        let mut buf = Vec::new();
        wh.encode(&mut buf).unwrap();
        let back = WindowHeader::decode(&mut Cursor::new(&buf)).unwrap().unwrap();
        assert_eq!(back.checksum, Some(0xDEAD_BEEF));
    }
}
