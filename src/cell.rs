//! Bit-addressed cell primitives: the storage layer the interpreter reads
//! fields from and writes fields into.
//!
//! A [`Cell`] holds up to 1023 bits and up to 4 references to other
//! cells, following TON's Bag-of-Cells container. This module also owns
//! the (simplified) BoC binary format so [`crate::compile`] output is
//! usable end to end without a separate client library.

use std::io::Cursor;
use std::sync::Arc;

use base64::Engine as _;
use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use num_bigint::{BigInt, Sign};
use rustc_hash::FxHashMap;

use crate::error::DataError;

pub const MAX_BITS: usize = 1023;
pub const MAX_REFS: usize = 4;
const BOC_MAGIC: u32 = 0xb5ee9c72;

/// An immutable cell: up to 1023 bits of payload plus up to 4 child
/// cells. `data` is always padded to whole bytes; only the first
/// `bit_len` bits are meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    references: Vec<Arc<Cell>>,
}

impl Cell {
    pub fn new(data: Vec<u8>, bit_len: usize, references: Vec<Arc<Cell>>) -> Result<Arc<Self>, DataError> {
        if bit_len > MAX_BITS {
            return Err(DataError::BadInput(format!(
                "cell has {bit_len} bits, exceeds the {MAX_BITS}-bit limit"
            )));
        }
        if references.len() > MAX_REFS {
            return Err(DataError::BadInput(format!(
                "cell has {} references, exceeds the {MAX_REFS}-reference limit",
                references.len()
            )));
        }
        let needed = (bit_len + 7) / 8;
        if data.len() < needed {
            return Err(DataError::BadInput(format!(
                "cell declares {bit_len} bits but only {} bytes were supplied",
                data.len()
            )));
        }
        Ok(Arc::new(Cell {
            data,
            bit_len,
            references,
        }))
    }

    /// A leaf cell wrapping raw bytes, read MSB-first, with no references.
    pub fn leaf(data: Vec<u8>, bit_len: usize) -> Result<Arc<Self>, DataError> {
        Cell::new(data, bit_len, Vec::new())
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn references(&self) -> &[Arc<Cell>] {
        &self.references
    }

    pub fn to_base64(&self) -> String {
        let root = Arc::new(self.clone());
        let bytes = serialize_boc(&root);
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    pub fn from_base64(s: &str) -> Result<Arc<Cell>, DataError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| DataError::BadInput(e.to_string()))?;
        deserialize_boc(&bytes)
    }
}

/// A read cursor into a [`Cell`]. Cheap to clone (an `Arc` bump plus two
/// integers) so decoding can snapshot a position, attempt a parse, and
/// roll back on failure.
#[derive(Debug, Clone)]
pub struct CellSlice {
    cell: Arc<Cell>,
    bit_pos: usize,
    ref_pos: usize,
}

impl CellSlice {
    pub fn new(cell: Arc<Cell>) -> Self {
        CellSlice {
            cell,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len.saturating_sub(self.bit_pos)
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.references.len().saturating_sub(self.ref_pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    pub fn position(&self) -> (usize, usize) {
        (self.bit_pos, self.ref_pos)
    }

    pub fn restore(&mut self, pos: (usize, usize)) {
        self.bit_pos = pos.0;
        self.ref_pos = pos.1;
    }

    /// Signed rewind/advance of the bit cursor (spec's `CellSlice::skip`).
    pub fn skip(&mut self, delta: i64) -> Result<(), DataError> {
        let next = self.bit_pos as i64 + delta;
        if next < 0 || next as usize > self.cell.bit_len {
            return Err(DataError::DataShort {
                field: "<skip>".into(),
                needed: delta.unsigned_abs(),
            });
        }
        self.bit_pos = next as usize;
        Ok(())
    }

    fn require_bits(&self, n: u64, field: &str) -> Result<(), DataError> {
        if self.remaining_bits() < n as usize {
            return Err(DataError::DataShort {
                field: field.into(),
                needed: n,
            });
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool, DataError> {
        self.require_bits(1, "<bit>")?;
        let bit = get_bit(&self.cell.data, self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn read_bool(&mut self) -> Result<bool, DataError> {
        self.read_bit()
    }

    pub fn read_bits_vec(&mut self, n: u64) -> Result<Vec<bool>, DataError> {
        self.require_bits(n, "<bits>")?;
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            out.push(get_bit(&self.cell.data, self.bit_pos));
            self.bit_pos += 1;
        }
        Ok(out)
    }

    /// Reads up to 64 bits as an unsigned integer, most significant bit
    /// first.
    pub fn read_uint(&mut self, n: u32, field: &str) -> Result<u64, DataError> {
        debug_assert!(n <= 64);
        self.require_bits(n as u64, field)?;
        let mut reader = BitReader::endian(Cursor::new(&self.cell.data[..]), BigEndian);
        reader
            .skip(self.bit_pos as u32)
            .map_err(|e| DataError::BadInput(e.to_string()))?;
        let value: u64 = if n == 0 {
            0
        } else {
            reader
                .read::<u64>(n)
                .map_err(|e| DataError::BadInput(e.to_string()))?
        };
        self.bit_pos += n as usize;
        Ok(value)
    }

    /// Reads an arbitrary-width (possibly >64-bit) integer as a
    /// [`BigInt`], interpreting it as two's complement when `signed`.
    pub fn read_bigint(&mut self, bits: u64, signed: bool, field: &str) -> Result<BigInt, DataError> {
        if bits == 0 {
            return Ok(BigInt::from(0));
        }
        let bits_vec = self.read_bits_vec(bits)?;
        let mut magnitude = BigInt::from(0);
        for bit in &bits_vec {
            magnitude = (magnitude << 1) + if *bit { 1 } else { 0 };
        }
        if signed && bits_vec[0] {
            let modulus = BigInt::from(1) << bits_vec.len();
            magnitude -= modulus;
        }
        let _ = field;
        Ok(magnitude)
    }

    /// `VarInteger`/`Coins` codec: a length prefix (`ceil(log2(bound))`
    /// bits) followed by `length * 8` value bits.
    pub fn read_var_int(&mut self, bound: u64, signed: bool) -> Result<BigInt, DataError> {
        let len_bits = bits_to_represent(bound);
        let len = self.read_uint(len_bits, "<var_int_len>")?;
        self.read_bigint(len * 8, signed, "<var_int_value>")
    }

    pub fn read_ref(&mut self) -> Result<Arc<Cell>, DataError> {
        if self.ref_pos >= self.cell.references.len() {
            return Err(DataError::DataShort {
                field: "<ref>".into(),
                needed: 1,
            });
        }
        let r = self.cell.references[self.ref_pos].clone();
        self.ref_pos += 1;
        Ok(r)
    }

    /// Simplified `MsgAddress`: `addr_none$00`, or `addr_std$10` with no
    /// anycast, an 8-bit signed workchain and a 256-bit account id.
    pub fn read_address(&mut self) -> Result<String, DataError> {
        let tag = self.read_uint(2, "<addr_tag>")?;
        match tag {
            0b00 => Ok("none".to_string()),
            0b10 => {
                let anycast = self.read_bit()?;
                if anycast {
                    return Err(DataError::AddressLoadFailed(
                        "anycast addresses are not supported".into(),
                    ));
                }
                let workchain = self.read_uint(8, "<addr_workchain>")? as u8 as i8;
                let account = self.read_bigint(256, false, "<addr_account>")?;
                Ok(format!("{workchain}:{:064x}", account))
            }
            other => Err(DataError::AddressLoadFailed(format!(
                "unsupported address tag {other:#04b}"
            ))),
        }
    }
}

/// Append-only companion to [`CellSlice`]: accumulates bits and
/// references, then freezes into a [`Cell`].
pub struct CellBuilder {
    writer: BitWriter<Vec<u8>, BigEndian>,
    bit_len: usize,
    references: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        CellBuilder {
            writer: BitWriter::endian(Vec::new(), BigEndian),
            bit_len: 0,
            references: Vec::new(),
        }
    }

    fn check_capacity(&self, extra_bits: usize) -> Result<(), DataError> {
        if self.bit_len + extra_bits > MAX_BITS {
            return Err(DataError::BadInput(format!(
                "builder overflow: {} + {extra_bits} exceeds {MAX_BITS} bits",
                self.bit_len
            )));
        }
        Ok(())
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<(), DataError> {
        self.check_capacity(1)?;
        self.writer
            .write_bit(bit)
            .map_err(|e| DataError::BadInput(e.to_string()))?;
        self.bit_len += 1;
        Ok(())
    }

    pub fn write_uint(&mut self, n: u32, value: u64) -> Result<(), DataError> {
        self.check_capacity(n as usize)?;
        if n > 0 {
            self.writer
                .write(n, value)
                .map_err(|e| DataError::BadInput(e.to_string()))?;
        }
        self.bit_len += n as usize;
        Ok(())
    }

    pub fn write_bits(&mut self, bits: &[bool]) -> Result<(), DataError> {
        for b in bits {
            self.write_bit(*b)?;
        }
        Ok(())
    }

    pub fn write_bigint(&mut self, bits: u64, value: &BigInt, signed: bool) -> Result<(), DataError> {
        if bits == 0 {
            return Ok(());
        }
        self.check_capacity(bits as usize)?;
        let mut magnitude = value.clone();
        if signed && magnitude.sign() == Sign::Minus {
            let modulus = BigInt::from(1) << bits;
            magnitude += modulus;
        }
        if magnitude.sign() == Sign::Minus || magnitude.bits() > bits {
            return Err(DataError::BadInput(format!(
                "value {value} does not fit in {bits} bits"
            )));
        }
        for i in (0..bits).rev() {
            let bit = (&magnitude >> i) & BigInt::from(1);
            self.write_bit(bit == BigInt::from(1))?;
        }
        Ok(())
    }

    pub fn write_var_int(&mut self, bound: u64, value: &BigInt, signed: bool) -> Result<(), DataError> {
        let len_bits = bits_to_represent(bound);
        let needed_bits = if signed {
            value.bits() + 1
        } else {
            value.bits().max(1)
        };
        let len_bytes = ((needed_bits + 7) / 8).max(0);
        self.write_uint(len_bits, len_bytes)?;
        self.write_bigint(len_bytes * 8, value, signed)
    }

    pub fn write_address(&mut self, addr: &str) -> Result<(), DataError> {
        if addr == "none" {
            return self.write_uint(2, 0b00);
        }
        let (wc, hex) = addr
            .split_once(':')
            .ok_or_else(|| DataError::AddressLoadFailed(format!("malformed address `{addr}`")))?;
        let workchain: i8 = wc
            .parse()
            .map_err(|_| DataError::AddressLoadFailed(format!("bad workchain in `{addr}`")))?;
        let account = BigInt::parse_bytes(hex.as_bytes(), 16)
            .ok_or_else(|| DataError::AddressLoadFailed(format!("bad account id in `{addr}`")))?;
        self.write_uint(2, 0b10)?;
        self.write_bit(false)?;
        self.write_uint(8, workchain as u8 as u64)?;
        self.write_bigint(256, &account, false)
    }

    pub fn add_ref(&mut self, cell: Arc<Cell>) -> Result<(), DataError> {
        if self.references.len() >= MAX_REFS {
            return Err(DataError::BadInput(format!(
                "builder already has {MAX_REFS} references"
            )));
        }
        self.references.push(cell);
        Ok(())
    }

    pub fn finish(mut self) -> Result<Arc<Cell>, DataError> {
        self.writer
            .byte_align()
            .map_err(|e| DataError::BadInput(e.to_string()))?;
        let data = self.writer.into_writer();
        Cell::new(data, self.bit_len, self.references)
    }
}

impl Default for CellBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn get_bit(data: &[u8], idx: usize) -> bool {
    let byte = data[idx / 8];
    (byte >> (7 - idx % 8)) & 1 == 1
}

/// Packs a bit vector (`len` assumed a multiple of 8) into MSB-first bytes.
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, b| (acc << 1) | (*b as u8)))
        .collect()
}

/// Inverse of [`pack_bits`]: expands bytes into MSB-first bits.
pub(crate) fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1))
        .collect()
}

/// `ceil(log2(bound))`, the width of a `VarInteger n`'s length prefix.
pub(crate) fn bits_to_represent(bound: u64) -> u32 {
    if bound <= 1 {
        0
    } else {
        64 - (bound - 1).leading_zeros()
    }
}

// --- Bag-of-Cells: simplified single-root serialization --------------

fn write_be(out: &mut Vec<u8>, value: u64, n_bytes: usize) {
    for i in (0..n_bytes).rev() {
        out.push(((value >> (i * 8)) & 0xff) as u8);
    }
}

fn read_be(bytes: &[u8], n_bytes: usize) -> u64 {
    let mut v = 0u64;
    for &b in &bytes[..n_bytes] {
        v = (v << 8) | b as u64;
    }
    v
}

fn bytes_needed(value: u64) -> usize {
    let mut n = 1;
    while (1u64 << (n * 8)) <= value && n < 8 {
        n += 1;
    }
    n
}

fn flatten_cells(
    cell: &Arc<Cell>,
    list: &mut Vec<Arc<Cell>>,
    index_of: &mut FxHashMap<usize, usize>,
) -> usize {
    let ptr = Arc::as_ptr(cell) as usize;
    if let Some(&idx) = index_of.get(&ptr) {
        return idx;
    }
    let idx = list.len();
    list.push(cell.clone());
    index_of.insert(ptr, idx);
    for r in &cell.references {
        flatten_cells(r, list, index_of);
    }
    idx
}

fn pack_cell_payload(cell: &Cell) -> Vec<u8> {
    let data_len = (cell.bit_len + 7) / 8;
    let mut bytes = cell.data[..data_len].to_vec();
    let valid_bits = cell.bit_len % 8;
    if valid_bits != 0 {
        let last = bytes.last_mut().unwrap();
        let keep_mask = 0xffu8 << (8 - valid_bits);
        let marker = 1u8 << (7 - valid_bits);
        *last = (*last & keep_mask) | marker;
    }
    bytes
}

fn unpack_cell_payload(bytes: &[u8]) -> Result<(Vec<u8>, usize), DataError> {
    if bytes.is_empty() {
        return Ok((Vec::new(), 0));
    }
    let last = *bytes.last().unwrap();
    if last == 0 {
        return Err(DataError::BadInput(
            "cell payload missing completion marker".into(),
        ));
    }
    let valid_bits = 7 - last.trailing_zeros() as usize;
    let bit_len = (bytes.len() - 1) * 8 + valid_bits;
    Ok((bytes.to_vec(), bit_len))
}

fn serialize_boc(root: &Arc<Cell>) -> Vec<u8> {
    let mut list = Vec::new();
    let mut index_of = FxHashMap::default();
    flatten_cells(root, &mut list, &mut index_of);

    let size_bytes = bytes_needed(list.len() as u64).max(1);

    let mut cell_data = Vec::new();
    for cell in &list {
        let refs_count = cell.references.len() as u8;
        let payload = pack_cell_payload(cell);
        let full_bytes = cell.bit_len / 8;
        let has_partial = cell.bit_len % 8 != 0;
        let d1 = refs_count;
        let d2 = (full_bytes * 2 + if has_partial { 1 } else { 0 }) as u8;
        cell_data.push(d1);
        cell_data.push(d2);
        cell_data.extend_from_slice(&payload);
        for r in &cell.references {
            let idx = index_of[&(Arc::as_ptr(r) as usize)];
            write_be(&mut cell_data, idx as u64, size_bytes);
        }
    }

    let off_bytes = bytes_needed(cell_data.len() as u64).max(1);

    let mut out = Vec::new();
    write_be(&mut out, BOC_MAGIC as u64, 4);
    out.push(size_bytes as u8);
    out.push(off_bytes as u8);
    write_be(&mut out, list.len() as u64, size_bytes);
    write_be(&mut out, 1, size_bytes); // roots_count
    write_be(&mut out, 0, size_bytes); // absent_count
    write_be(&mut out, cell_data.len() as u64, off_bytes);
    write_be(&mut out, 0, size_bytes); // root index
    out.extend_from_slice(&cell_data);
    out
}

fn deserialize_boc(bytes: &[u8]) -> Result<Arc<Cell>, DataError> {
    if bytes.len() < 6 {
        return Err(DataError::BadInput("BoC payload too short".into()));
    }
    let magic = read_be(bytes, 4) as u32;
    if magic != BOC_MAGIC {
        return Err(DataError::BadInput(format!(
            "unrecognized BoC magic {magic:#x}"
        )));
    }
    let mut pos = 4;
    let flags_byte = bytes[pos];
    pos += 1;
    let has_idx = flags_byte & 0x80 != 0;
    let has_crc32c = flags_byte & 0x40 != 0;
    let size_bytes = (flags_byte & 0x07) as usize;
    let off_bytes = bytes[pos] as usize;
    pos += 1;

    let cells_count = read_be(&bytes[pos..], size_bytes) as usize;
    pos += size_bytes;
    let _roots_count = read_be(&bytes[pos..], size_bytes) as usize;
    pos += size_bytes;
    let _absent_count = read_be(&bytes[pos..], size_bytes) as usize;
    pos += size_bytes;
    let tot_cells_size = read_be(&bytes[pos..], off_bytes) as usize;
    pos += off_bytes;

    let root_index = read_be(&bytes[pos..], size_bytes) as usize;
    pos += size_bytes;

    if has_idx {
        pos += cells_count * off_bytes;
    }

    let cell_data = &bytes[pos..pos + tot_cells_size];
    pos += tot_cells_size;
    if has_crc32c && bytes.len() < pos + 4 {
        return Err(DataError::BadInput("BoC payload truncated before crc32c".into()));
    }

    // Parse cell descriptors sequentially, then build Arc<Cell>s from the
    // last index backward so every reference already has a built child.
    struct Raw {
        refs_count: usize,
        bit_len: usize,
        payload: Vec<u8>,
        ref_indices: Vec<usize>,
    }

    let mut cursor = 0usize;
    let mut raws = Vec::with_capacity(cells_count);
    for _ in 0..cells_count {
        if cursor + 2 > cell_data.len() {
            return Err(DataError::BadInput("truncated cell descriptor".into()));
        }
        let d1 = cell_data[cursor];
        let d2 = cell_data[cursor + 1];
        cursor += 2;
        let refs_count = (d1 & 0x07) as usize;
        if d1 & 0x08 != 0 {
            return Err(DataError::BadInput("exotic cells are not supported".into()));
        }
        let full_bytes = (d2 >> 1) as usize;
        let has_partial = d2 & 1 != 0;
        let payload_len = full_bytes + if has_partial { 1 } else { 0 };
        if cursor + payload_len > cell_data.len() {
            return Err(DataError::BadInput("truncated cell payload".into()));
        }
        let raw_payload = &cell_data[cursor..cursor + payload_len];
        cursor += payload_len;
        let (payload, bit_len) = unpack_cell_payload(raw_payload)?;

        let mut ref_indices = Vec::with_capacity(refs_count);
        for _ in 0..refs_count {
            if cursor + size_bytes > cell_data.len() {
                return Err(DataError::BadInput("truncated reference index".into()));
            }
            ref_indices.push(read_be(&cell_data[cursor..], size_bytes) as usize);
            cursor += size_bytes;
        }

        raws.push(Raw {
            refs_count,
            bit_len,
            payload,
            ref_indices,
        });
    }

    let mut built: Vec<Option<Arc<Cell>>> = vec![None; raws.len()];
    for i in (0..raws.len()).rev() {
        let raw = &raws[i];
        let mut refs = Vec::with_capacity(raw.refs_count);
        for &ri in &raw.ref_indices {
            let child = built
                .get(ri)
                .and_then(|c| c.clone())
                .ok_or_else(|| DataError::BadInput("reference to unbuilt/forward cell".into()))?;
            refs.push(child);
        }
        built[i] = Some(Cell::new(raw.payload.clone(), raw.bit_len, refs)?);
    }

    built[root_index]
        .clone()
        .ok_or_else(|| DataError::BadInput("root cell missing".into()))
}
