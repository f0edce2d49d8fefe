#![forbid(unsafe_code)]

//! Classic capture-file (pcap) reader and writer: global-header decode with
//! byte-order detection, 16-byte per-record framing, native-order output.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const MAGIC_NATIVE: u32 = 0xa1b2c3d4;
pub const MAGIC_SWAPPED: u32 = 0xd4c3b2a1;

/// Hard ceiling on a single record, independent of the file's snaplen.
pub const MAX_RECORD_LEN: u32 = 65_535;

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

#[derive(Debug)]
pub enum CaptureError {
    Io(io::Error),
    Format(&'static str),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Io(err) => write!(f, "{err}"),
            CaptureError::Format(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        CaptureError::Io(err)
    }
}

/// The 24-byte file header. Values are kept normalized to host order; the
/// `magic` field records how the file on disk was laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub network: u32,
}

impl GlobalHeader {
    pub fn new(snaplen: u32) -> Self {
        GlobalHeader {
            magic: MAGIC_NATIVE,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen,
            network: 1, // Ethernet
        }
    }

    pub fn to_bytes(&self) -> [u8; GLOBAL_HEADER_LEN] {
        let mut out = [0u8; GLOBAL_HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC_NATIVE.to_ne_bytes());
        out[4..6].copy_from_slice(&self.version_major.to_ne_bytes());
        out[6..8].copy_from_slice(&self.version_minor.to_ne_bytes());
        out[8..12].copy_from_slice(&self.thiszone.to_ne_bytes());
        out[12..16].copy_from_slice(&self.sigfigs.to_ne_bytes());
        out[16..20].copy_from_slice(&self.snaplen.to_ne_bytes());
        out[20..24].copy_from_slice(&self.network.to_ne_bytes());
        out
    }

    fn from_bytes(bytes: &[u8; GLOBAL_HEADER_LEN]) -> Result<(Self, bool), CaptureError> {
        let magic = read_ne_u32(&bytes[0..4]);
        let swapped = match magic {
            MAGIC_NATIVE => false,
            MAGIC_SWAPPED => true,
            _ => return Err(CaptureError::Format("invalid capture magic number")),
        };
        let header = GlobalHeader {
            magic: MAGIC_NATIVE,
            version_major: maybe_swap16(read_ne_u16(&bytes[4..6]), swapped),
            version_minor: maybe_swap16(read_ne_u16(&bytes[6..8]), swapped),
            thiszone: maybe_swap32(read_ne_u32(&bytes[8..12]), swapped) as i32,
            sigfigs: maybe_swap32(read_ne_u32(&bytes[12..16]), swapped),
            snaplen: maybe_swap32(read_ne_u32(&bytes[16..20]), swapped),
            network: maybe_swap32(read_ne_u32(&bytes[20..24]), swapped),
        };
        Ok((header, swapped))
    }
}

/// One record as stored in the file: capture timestamp, original wire
/// length, and the captured link-layer bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub orig_len: u32,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct CaptureReader {
    file: BufReader<File>,
    header: GlobalHeader,
    swapped: bool,
}

impl CaptureReader {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let file = File::open(path)?;
        let mut file = BufReader::new(file);
        let mut bytes = [0u8; GLOBAL_HEADER_LEN];
        if read_fully(&mut file, &mut bytes)? != GLOBAL_HEADER_LEN {
            return Err(CaptureError::Format("truncated capture header"));
        }
        let (header, swapped) = GlobalHeader::from_bytes(&bytes)?;
        Ok(CaptureReader {
            file,
            header,
            swapped,
        })
    }

    pub fn header(&self) -> &GlobalHeader {
        &self.header
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    /// Read the next record. `Ok(None)` on clean end of file; a record that
    /// is truncated mid-way or longer than the snaplen is a format error.
    pub fn next_record(&mut self) -> Result<Option<RawRecord>, CaptureError> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let n = read_fully(&mut self.file, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < RECORD_HEADER_LEN {
            return Err(CaptureError::Format("truncated record header"));
        }

        let ts_sec = maybe_swap32(read_ne_u32(&header[0..4]), self.swapped);
        let ts_usec = maybe_swap32(read_ne_u32(&header[4..8]), self.swapped);
        let incl_len = maybe_swap32(read_ne_u32(&header[8..12]), self.swapped);
        let orig_len = maybe_swap32(read_ne_u32(&header[12..16]), self.swapped);

        if incl_len > self.header.snaplen || incl_len > MAX_RECORD_LEN {
            return Err(CaptureError::Format("record length exceeds snaplen"));
        }

        let mut data = vec![0u8; incl_len as usize];
        if read_fully(&mut self.file, &mut data)? != incl_len as usize {
            return Err(CaptureError::Format("truncated record body"));
        }

        Ok(Some(RawRecord {
            ts_sec,
            ts_usec,
            orig_len,
            data,
        }))
    }
}

#[derive(Debug)]
pub struct CaptureWriter {
    file: BufWriter<File>,
}

impl CaptureWriter {
    /// Create the output file and write the global header in native byte
    /// order (swapped inputs are normalized on the way through).
    pub fn create(path: &Path, header: &GlobalHeader) -> Result<Self, CaptureError> {
        let file = File::create(path)?;
        let mut file = BufWriter::new(file);
        file.write_all(&header.to_bytes())?;
        Ok(CaptureWriter { file })
    }

    pub fn write_record(&mut self, record: &RawRecord) -> Result<(), CaptureError> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        header[0..4].copy_from_slice(&record.ts_sec.to_ne_bytes());
        header[4..8].copy_from_slice(&record.ts_usec.to_ne_bytes());
        header[8..12].copy_from_slice(&(record.data.len() as u32).to_ne_bytes());
        header[12..16].copy_from_slice(&record.orig_len.to_ne_bytes());
        self.file.write_all(&header)?;
        self.file.write_all(&record.data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CaptureError> {
        self.file.flush()?;
        Ok(())
    }
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn read_ne_u16(bytes: &[u8]) -> u16 {
    let mut array = [0u8; 2];
    array.copy_from_slice(&bytes[..2]);
    u16::from_ne_bytes(array)
}

fn read_ne_u32(bytes: &[u8]) -> u32 {
    let mut array = [0u8; 4];
    array.copy_from_slice(&bytes[..4]);
    u32::from_ne_bytes(array)
}

fn maybe_swap16(value: u16, swapped: bool) -> u16 {
    if swapped {
        value.swap_bytes()
    } else {
        value
    }
}

fn maybe_swap32(value: u32, swapped: bool) -> u32 {
    if swapped {
        value.swap_bytes()
    } else {
        value
    }
}
