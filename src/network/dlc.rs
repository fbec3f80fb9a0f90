//! DLC descriptor header parsing and writing.
//!
//! Layout (little-endian):
//!
//! ```text
//! 0   [u8; 8]  magic "SNPEDLC\0"
//! 8   u16      major version
//! 10  u16      minor version
//! 12  u32      descriptor table length in bytes (T)
//! 16  table    u16 input_count, u16 output_count, then per tensor:
//!              u8 name_len, name, u8 rank, rank x u32 dims,
//!              u8 encoding (0 f32, 1 f16, 2 u8 affine, 3 i8 affine),
//!              [f32 scale, i32 zero_point] when quantized,
//!              u8 layout (0 none, 1 NCHW, 2 NHWC)
//! 16+T         opaque archive handed to the native builder
//! ```

use std::ops::RangeInclusive;

use serde::Serialize;

use super::descriptor::{validate_descriptors, ElementEncoding, TensorDescriptor, TensorLayout};
use crate::error::{ErrorKind, Result, RuntimeError};

pub const MAGIC: [u8; 8] = *b"SNPEDLC\0";
pub const HEADER_PREFIX_LEN: usize = 16;
pub const SUPPORTED_MAJOR: RangeInclusive<u16> = 1..=2;
pub const CURRENT_VERSION: DlcVersion = DlcVersion { major: 2, minor: 0 };
const MAX_RANK: usize = 8;

const ENC_F32: u8 = 0;
const ENC_F16: u8 = 1;
const ENC_U8: u8 = 2;
const ENC_I8: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DlcVersion {
    pub major: u16,
    pub minor: u16,
}

impl std::fmt::Display for DlcVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Parsed descriptor header.
#[derive(Debug, Clone, PartialEq)]
pub struct DlcHeader {
    pub version: DlcVersion,
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
    /// Offset of the opaque archive within the byte image.
    pub payload_offset: usize,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len()).ok_or_else(|| {
            RuntimeError::invalid_format(format!("descriptor table truncated at byte {}", self.pos))
        })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Parse and validate the descriptor header of a DLC byte image.
pub fn parse_header(bytes: &[u8]) -> Result<DlcHeader> {
    if bytes.len() < HEADER_PREFIX_LEN {
        return Err(RuntimeError::invalid_format(format!(
            "image is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            HEADER_PREFIX_LEN
        )));
    }
    let mut prefix = Reader::new(&bytes[..HEADER_PREFIX_LEN]);
    let magic: [u8; 8] = prefix.array()?;
    if magic != MAGIC {
        return Err(RuntimeError::invalid_format("bad magic, not a DLC image"));
    }
    let version = DlcVersion { major: prefix.u16()?, minor: prefix.u16()? };
    if !SUPPORTED_MAJOR.contains(&version.major) {
        return Err(RuntimeError::new(
            ErrorKind::UnsupportedVersion,
            format!(
                "DLC version {} outside supported range {}..={}",
                version,
                SUPPORTED_MAJOR.start(),
                SUPPORTED_MAJOR.end()
            ),
        ));
    }
    let table_len = prefix.u32()? as usize;
    let table_end = HEADER_PREFIX_LEN
        .checked_add(table_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| RuntimeError::invalid_format("descriptor table extends past end of image"))?;

    let mut table = Reader::new(&bytes[HEADER_PREFIX_LEN..table_end]);
    let input_count = table.u16()? as usize;
    let output_count = table.u16()? as usize;
    if input_count == 0 || output_count == 0 {
        return Err(RuntimeError::invalid_format(format!(
            "network declares {} inputs and {} outputs",
            input_count, output_count
        )));
    }
    let inputs = read_descriptors(&mut table, input_count)?;
    let outputs = read_descriptors(&mut table, output_count)?;
    if table.remaining() != 0 {
        return Err(RuntimeError::invalid_format(format!(
            "{} trailing bytes in descriptor table",
            table.remaining()
        )));
    }
    validate_descriptors(&inputs)?;
    validate_descriptors(&outputs)?;

    Ok(DlcHeader { version, inputs, outputs, payload_offset: table_end })
}

fn read_descriptors(reader: &mut Reader<'_>, count: usize) -> Result<Vec<TensorDescriptor>> {
    let mut list = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        list.push(read_descriptor(reader)?);
    }
    Ok(list)
}

fn read_descriptor(reader: &mut Reader<'_>) -> Result<TensorDescriptor> {
    let name_len = reader.u8()? as usize;
    let name = std::str::from_utf8(reader.take(name_len)?)
        .map_err(|_| RuntimeError::invalid_format("tensor name is not UTF-8"))?
        .to_string();
    let rank = reader.u8()? as usize;
    if rank == 0 || rank > MAX_RANK {
        return Err(RuntimeError::invalid_format(format!("rank {} out of range 1..={}", rank, MAX_RANK))
            .with_tensor(name));
    }
    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        dims.push(reader.u32()? as usize);
    }
    let encoding = match reader.u8()? {
        ENC_F32 => ElementEncoding::Float32,
        ENC_F16 => ElementEncoding::Float16,
        ENC_U8 => ElementEncoding::QuantizedU8 { scale: reader.f32()?, zero_point: reader.i32()? },
        ENC_I8 => ElementEncoding::QuantizedI8 { scale: reader.f32()?, zero_point: reader.i32()? },
        tag => {
            return Err(RuntimeError::invalid_format(format!("unknown element encoding tag {}", tag))
                .with_tensor(name))
        }
    };
    let layout = match reader.u8()? {
        0 => None,
        1 => Some(TensorLayout::Nchw),
        2 => Some(TensorLayout::Nhwc),
        tag => {
            return Err(RuntimeError::invalid_format(format!("unknown layout tag {}", tag)).with_tensor(name))
        }
    };
    Ok(TensorDescriptor { name, dims, encoding, layout })
}

/// Writes DLC images: descriptor header followed by an opaque archive.
#[derive(Debug, Clone)]
pub struct DlcBuilder {
    version: DlcVersion,
    inputs: Vec<TensorDescriptor>,
    outputs: Vec<TensorDescriptor>,
    payload: Vec<u8>,
}

impl Default for DlcBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DlcBuilder {
    pub fn new() -> Self {
        Self { version: CURRENT_VERSION, inputs: Vec::new(), outputs: Vec::new(), payload: Vec::new() }
    }

    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.version = DlcVersion { major, minor };
        self
    }

    pub fn input(mut self, desc: TensorDescriptor) -> Self {
        self.inputs.push(desc);
        self
    }

    pub fn output(mut self, desc: TensorDescriptor) -> Self {
        self.outputs.push(desc);
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Serialize the image. Names longer than 255 bytes or ranks above 8
    /// are rejected rather than truncated.
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut table = Vec::new();
        table.extend_from_slice(&count_u16(self.inputs.len())?.to_le_bytes());
        table.extend_from_slice(&count_u16(self.outputs.len())?.to_le_bytes());
        for desc in self.inputs.iter().chain(self.outputs.iter()) {
            write_descriptor(&mut table, desc)?;
        }
        let table_len = u32::try_from(table.len())
            .map_err(|_| RuntimeError::invalid_argument("descriptor table too large"))?;

        let mut out = Vec::with_capacity(HEADER_PREFIX_LEN + table.len() + self.payload.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.version.major.to_le_bytes());
        out.extend_from_slice(&self.version.minor.to_le_bytes());
        out.extend_from_slice(&table_len.to_le_bytes());
        out.extend_from_slice(&table);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

fn count_u16(n: usize) -> Result<u16> {
    u16::try_from(n).map_err(|_| RuntimeError::invalid_argument("too many tensors"))
}

fn write_descriptor(out: &mut Vec<u8>, desc: &TensorDescriptor) -> Result<()> {
    let name = desc.name.as_bytes();
    let name_len = u8::try_from(name.len())
        .map_err(|_| RuntimeError::invalid_argument("tensor name longer than 255 bytes").with_tensor(&desc.name))?;
    if desc.dims.len() > MAX_RANK {
        return Err(RuntimeError::invalid_argument("rank above 8").with_tensor(&desc.name));
    }
    out.push(name_len);
    out.extend_from_slice(name);
    out.push(desc.dims.len() as u8);
    for &d in &desc.dims {
        let d = u32::try_from(d)
            .map_err(|_| RuntimeError::invalid_argument("dimension exceeds u32").with_tensor(&desc.name))?;
        out.extend_from_slice(&d.to_le_bytes());
    }
    match desc.encoding {
        ElementEncoding::Float32 => out.push(ENC_F32),
        ElementEncoding::Float16 => out.push(ENC_F16),
        ElementEncoding::QuantizedU8 { scale, zero_point } => {
            out.push(ENC_U8);
            out.extend_from_slice(&scale.to_le_bytes());
            out.extend_from_slice(&zero_point.to_le_bytes());
        }
        ElementEncoding::QuantizedI8 { scale, zero_point } => {
            out.push(ENC_I8);
            out.extend_from_slice(&scale.to_le_bytes());
            out.extend_from_slice(&zero_point.to_le_bytes());
        }
    }
    out.push(match desc.layout {
        None => 0,
        Some(TensorLayout::Nchw) => 1,
        Some(TensorLayout::Nhwc) => 2,
    });
    Ok(())
}
