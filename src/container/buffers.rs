// This module implements the buffer table of one export attempt. Buffer 0 is always the empty
// buffer. Every tensor gets a buffer slot; constant tensors carry their payload, everything
// else an empty record. In the inline layout the payload is embedded as the buffer's data
// vector as soon as it is allocated, after a guard that refuses payloads that would push the
// container past the size ceiling; a refused payload flags the attempt for the out-of-band
// restart and leaves an empty record behind. In the out-of-band layout payloads are kept in a
// side list and the record gets placeholder offset/size fields of 1 so both are physically
// present. After the container is finished, append_out_of_band lays the payloads out behind
// it, 16-byte aligned, collapsing identical payloads (blake3 hash plus byte comparison) and
// returning the patches that write the real offsets. Constants with an identical attribute
// share one slot unless the caller suppresses deduplication. Payload encoders for 4-bit
// integers and string tensors live here as well.

//! Buffer table with constant deduplication and the out-of-band layout.

use hashbrown::HashMap;

use super::patch::Patch;
use super::schema::vt;
use super::{ByteVector, Fbb, TableOffset};
use crate::ir::{ElementType, ElementsAttr, ElementsData};

/// Alignment of every out-of-band payload.
pub const OUT_OF_BAND_ALIGNMENT: usize = 16;

/// Placeholder written into offset/size fields that are patched later.
pub const PLACEHOLDER: u64 = 1;

/// Where constant payloads are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLayout {
    Inline,
    OutOfBand,
}

#[derive(Debug, Clone, Copy)]
enum Record {
    Empty,
    Data(ByteVector),
    Placeholder,
}

/// Custom options stored behind the container.
#[derive(Debug, Clone)]
pub struct DeferredOptions {
    pub subgraph: usize,
    pub operator: usize,
    pub payload: Vec<u8>,
    pub alignment: usize,
}

/// Buffer records of one attempt.
#[derive(Debug)]
pub struct BufferTable {
    layout: BufferLayout,
    max_size: usize,
    records: Vec<Record>,
    constants: HashMap<ElementsAttr, u32>,
    out_of_band: Vec<(u32, Vec<u8>)>,
    deferred_options: Vec<DeferredOptions>,
    needs_out_of_band: bool,
}

impl BufferTable {
    pub fn new(layout: BufferLayout, max_size: usize) -> Self {
        Self {
            layout,
            max_size,
            records: vec![Record::Empty],
            constants: HashMap::new(),
            out_of_band: Vec::new(),
            deferred_options: Vec::new(),
            needs_out_of_band: false,
        }
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Set when an inline payload was refused by the size guard.
    pub fn needs_out_of_band(&self) -> bool {
        self.needs_out_of_band
    }

    pub fn flag_out_of_band(&mut self) {
        self.needs_out_of_band = true;
    }

    /// True when `len` more bytes still fit under the ceiling.
    pub fn fits_inline(&self, fbb: &Fbb, len: usize) -> bool {
        len <= self.max_size.saturating_sub(fbb.unfinished_data().len())
    }

    /// Reserve a slot without payload.
    pub fn empty_slot(&mut self) -> u32 {
        self.records.push(Record::Empty);
        (self.records.len() - 1) as u32
    }

    /// Store a payload in a new slot, honoring the layout.
    pub fn allocate(&mut self, fbb: &mut Fbb, payload: &[u8]) -> u32 {
        match self.layout {
            BufferLayout::Inline => self.allocate_inline(fbb, payload),
            BufferLayout::OutOfBand => {
                let index = self.records.len() as u32;
                self.records.push(Record::Placeholder);
                self.out_of_band.push((index, payload.to_vec()));
                index
            }
        }
    }

    /// Store a payload inside the container regardless of the layout.
    pub fn allocate_inline(&mut self, fbb: &mut Fbb, payload: &[u8]) -> u32 {
        if !self.fits_inline(fbb, payload.len()) {
            log::debug!(
                "buffer of {} bytes exceeds the {} byte ceiling, switching to out-of-band",
                payload.len(),
                self.max_size
            );
            self.needs_out_of_band = true;
            return self.empty_slot();
        }
        let data = fbb.create_vector(payload);
        self.records.push(Record::Data(data));
        (self.records.len() - 1) as u32
    }

    /// Store a constant. Identical constants share one slot when `dedup` is set.
    /// Returns the slot and whether it was reused.
    pub fn allocate_constant(&mut self, fbb: &mut Fbb, value: &ElementsAttr, dedup: bool) -> (u32, bool) {
        if dedup {
            if let Some(&index) = self.constants.get(value) {
                return (index, true);
            }
        }
        let payload = encode_elements(value);
        let index = self.allocate(fbb, &payload);
        if dedup && !self.needs_out_of_band {
            self.constants.insert(value.clone(), index);
        }
        (index, false)
    }

    /// Keep custom options of one operator for the area behind the container.
    pub fn defer_custom_options(&mut self, options: DeferredOptions) {
        self.deferred_options.push(options);
    }

    /// Build the buffer table records.
    pub fn finish(&self, fbb: &mut Fbb) -> Vec<TableOffset> {
        self.records
            .iter()
            .map(|record| {
                let start = fbb.start_table();
                match record {
                    Record::Empty => {}
                    Record::Data(data) => fbb.push_slot_always(vt::buffer::DATA, *data),
                    Record::Placeholder => {
                        fbb.push_slot_always::<u64>(vt::buffer::OFFSET, PLACEHOLDER);
                        fbb.push_slot_always::<u64>(vt::buffer::SIZE, PLACEHOLDER);
                    }
                }
                fbb.end_table(start)
            })
            .collect()
    }

    /// Append out-of-band payloads and deferred options behind `bytes`.
    /// Returns the patches that record their locations.
    pub fn append_out_of_band(&self, bytes: &mut Vec<u8>) -> Vec<Patch> {
        let mut patches = Vec::new();
        pad_to(bytes, OUT_OF_BAND_ALIGNMENT);

        let mut seen: HashMap<[u8; 32], Vec<(usize, usize)>> = HashMap::new();
        for (buffer, payload) in &self.out_of_band {
            let hash = *blake3::hash(payload).as_bytes();
            let candidates = seen.entry(hash).or_default();
            let existing = candidates
                .iter()
                .copied()
                .find(|&(offset, size)| bytes[offset..offset + size] == payload[..]);
            let (offset, size) = match existing {
                Some(location) => location,
                None => {
                    let location = (bytes.len(), payload.len());
                    bytes.extend_from_slice(payload);
                    pad_to(bytes, OUT_OF_BAND_ALIGNMENT);
                    candidates.push(location);
                    location
                }
            };
            patches.push(Patch::BufferLocation {
                buffer: *buffer as usize,
                offset: offset as u64,
                size: size as u64,
            });
        }

        // Zero block so readers may prefetch past the last payload.
        bytes.extend_from_slice(&[0u8; OUT_OF_BAND_ALIGNMENT]);
        pad_to(bytes, OUT_OF_BAND_ALIGNMENT);

        for options in &self.deferred_options {
            pad_to(bytes, OUT_OF_BAND_ALIGNMENT);
            pad_to(bytes, options.alignment.max(1));
            let offset = bytes.len();
            bytes.extend_from_slice(&options.payload);
            patches.push(Patch::LargeCustomOptions {
                subgraph: options.subgraph,
                operator: options.operator,
                offset: offset as u64,
                size: options.payload.len() as u64,
            });
        }
        patches
    }
}

/// Zero-pad `bytes` to a multiple of `alignment`.
pub fn pad_to(bytes: &mut Vec<u8>, alignment: usize) {
    let rem = bytes.len() % alignment;
    if rem != 0 {
        bytes.resize(bytes.len() + alignment - rem, 0);
    }
}

/// Grow the gap behind the file identifier of a finished container until its
/// length is a multiple of `alignment`. Data is addressed from the end of the
/// builder, so every vector keeps its alignment relative to the end.
pub fn realign_finished(bytes: &mut Vec<u8>, alignment: usize) {
    if alignment <= 1 || bytes.len() < 8 {
        return;
    }
    let pad = (alignment - bytes.len() % alignment) % alignment;
    if pad == 0 {
        return;
    }
    let mut root = [0u8; 4];
    root.copy_from_slice(&bytes[..4]);
    let root = u32::from_le_bytes(root) + pad as u32;
    bytes[..4].copy_from_slice(&root.to_le_bytes());
    bytes.splice(8..8, std::iter::repeat(0u8).take(pad));
}

/// Payload bytes of a constant as stored in a buffer.
pub fn encode_elements(value: &ElementsAttr) -> Vec<u8> {
    match &value.data {
        ElementsData::Strings(items) => encode_string_tensor(items),
        ElementsData::Raw(bytes) => match value.ty.element {
            ElementType::Int { width: 4, .. } => pack_int4(bytes),
            _ => bytes.clone(),
        },
    }
}

/// Pack one-byte-per-element 4-bit values two per byte, low nibble first.
pub fn pack_int4(values: &[u8]) -> Vec<u8> {
    values
        .chunks(2)
        .map(|pair| {
            let low = pair[0] & 0x0f;
            let high = pair.get(1).map_or(0, |v| v & 0x0f);
            low | (high << 4)
        })
        .collect()
}

/// String tensor layout: element count, n + 1 offsets from the start of the
/// buffer, then the concatenated bytes. All integers are little-endian i32.
pub fn encode_string_tensor(items: &[Vec<u8>]) -> Vec<u8> {
    let header = 4 * (items.len() + 2);
    let total: usize = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(header + total);
    out.extend_from_slice(&(items.len() as i32).to_le_bytes());
    let mut offset = header;
    for item in items {
        out.extend_from_slice(&(offset as i32).to_le_bytes());
        offset += item.len();
    }
    out.extend_from_slice(&(offset as i32).to_le_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::patch::apply_all;
    use crate::container::reader::Model;
    use crate::container::schema::FILE_IDENTIFIER;
    use flatbuffers::FlatBufferBuilder;
    use proptest::prelude::*;

    fn finish_model(fbb: &mut Fbb, table: &BufferTable) -> Vec<u8> {
        let records = table.finish(fbb);
        let buffers = fbb.create_vector(&records);
        let start = fbb.start_table();
        fbb.push_slot::<u32>(vt::model::VERSION, 3, 0);
        fbb.push_slot_always(vt::model::BUFFERS, buffers);
        let model = fbb.end_table(start);
        fbb.finish(model, Some(FILE_IDENTIFIER));
        fbb.finished_data().to_vec()
    }

    #[test]
    fn test_buffer_zero_is_empty() {
        let mut fbb = FlatBufferBuilder::with_capacity(64);
        let mut table = BufferTable::new(BufferLayout::Inline, usize::MAX);
        let slot = table.allocate(&mut fbb, &[9, 9]);
        assert_eq!(slot, 1);
        let bytes = finish_model(&mut fbb, &table);
        let model = Model::parse(&bytes).unwrap();
        assert_eq!(model.buffer_data(0), None);
        assert_eq!(model.buffer_data(1), Some(&[9u8, 9][..]));
    }

    #[test]
    fn test_constant_dedup() {
        let mut fbb = FlatBufferBuilder::with_capacity(64);
        let mut table = BufferTable::new(BufferLayout::Inline, usize::MAX);
        let a = ElementsAttr::from_f32(&[2], &[1.0, 2.0]);
        let b = ElementsAttr::from_f32(&[2], &[1.0, 3.0]);

        let (first, reused) = table.allocate_constant(&mut fbb, &a, true);
        assert!(!reused);
        assert_eq!(table.allocate_constant(&mut fbb, &a, true), (first, true));
        assert_ne!(table.allocate_constant(&mut fbb, &b, true).0, first);
        // Suppressed dedup always gets a fresh slot.
        assert_ne!(table.allocate_constant(&mut fbb, &a, false).0, first);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_inline_guard() {
        let mut fbb = FlatBufferBuilder::with_capacity(64);
        let mut table = BufferTable::new(BufferLayout::Inline, 64);
        table.allocate(&mut fbb, &[1u8; 8]);
        assert!(!table.needs_out_of_band());
        let slot = table.allocate(&mut fbb, &[1u8; 128]);
        assert!(table.needs_out_of_band());
        assert_eq!(slot, 2);
    }

    #[test]
    fn test_inline_guard_boundary() {
        let mut fbb = FlatBufferBuilder::with_capacity(64);
        let used = fbb.unfinished_data().len();
        let mut table = BufferTable::new(BufferLayout::Inline, 100);
        table.allocate(&mut fbb, &vec![0u8; 100 - used]);
        assert!(!table.needs_out_of_band());

        let mut fbb = FlatBufferBuilder::with_capacity(64);
        let used = fbb.unfinished_data().len();
        let mut table = BufferTable::new(BufferLayout::Inline, 100);
        table.allocate(&mut fbb, &vec![0u8; 101 - used]);
        assert!(table.needs_out_of_band());
    }

    #[test]
    fn test_out_of_band_layout() {
        let mut fbb = FlatBufferBuilder::with_capacity(64);
        let mut table = BufferTable::new(BufferLayout::OutOfBand, usize::MAX);
        let a = table.allocate(&mut fbb, &[1, 2, 3]);
        let b = table.allocate(&mut fbb, &[4; 20]);
        let c = table.allocate(&mut fbb, &[1, 2, 3]);

        let mut bytes = finish_model(&mut fbb, &table);
        let container_len = bytes.len();
        let patches = table.append_out_of_band(&mut bytes);
        apply_all(&mut bytes, &patches).unwrap();
        assert_eq!(bytes.len() % OUT_OF_BAND_ALIGNMENT, 0);

        let model = Model::parse(&bytes).unwrap();
        assert_eq!(model.buffer_data(a as usize), Some(&[1u8, 2, 3][..]));
        assert_eq!(model.buffer_data(b as usize), Some(&[4u8; 20][..]));
        assert_eq!(model.buffers[a as usize].offset, model.buffers[c as usize].offset);
        for index in [a, b] {
            let offset = model.buffers[index as usize].offset as usize;
            assert!(offset >= container_len);
            assert_eq!(offset % OUT_OF_BAND_ALIGNMENT, 0);
        }
    }

    #[test]
    fn test_realign_finished() {
        let mut fbb = FlatBufferBuilder::with_capacity(64);
        let mut table = BufferTable::new(BufferLayout::Inline, usize::MAX);
        table.allocate(&mut fbb, &[1, 2, 3, 4, 5]);
        let mut bytes = finish_model(&mut fbb, &table);
        let before = bytes.len();
        realign_finished(&mut bytes, 64);
        assert_eq!(bytes.len() % 64, 0);
        assert!(bytes.len() >= before);
        assert_eq!(&bytes[4..8], FILE_IDENTIFIER.as_bytes());
        let model = Model::parse(&bytes).unwrap();
        assert_eq!(model.buffer_data(1), Some(&[1u8, 2, 3, 4, 5][..]));
    }

    #[test]
    fn test_string_tensor_layout() {
        let bytes = encode_string_tensor(&[b"ab".to_vec(), b"".to_vec(), b"xyz".to_vec()]);
        let words: Vec<i32> = bytes[..20]
            .chunks(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, vec![3, 20, 22, 22, 25]);
        assert_eq!(&bytes[20..], b"abxyz");
    }

    #[test]
    fn test_pack_int4() {
        assert_eq!(pack_int4(&[0x1, 0x2, 0xf]), vec![0x21, 0x0f]);
        assert_eq!(pack_int4(&[]), Vec::<u8>::new());
    }

    proptest! {
        #[test]
        fn prop_int4_packing_roundtrips(values in proptest::collection::vec(0u8..16, 0..64)) {
            let packed = pack_int4(&values);
            prop_assert_eq!(packed.len(), (values.len() + 1) / 2);
            for (i, v) in values.iter().enumerate() {
                let byte = packed[i / 2];
                let nibble = if i % 2 == 0 { byte & 0x0f } else { byte >> 4 };
                prop_assert_eq!(nibble, *v);
            }
        }
    }
}
