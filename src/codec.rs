//! Binary Property Codec
//!
//! Hand-encoded wire format for properties and property blocks. All integers
//! are fixed width and big-endian; strings are `u32` length prefixed UTF-8.
//!
//! Object property block:
//!
//! ```text
//! u32 marker | u32 shared_count | shared_count x Property(kind = 0)
//! u32 marker | u32 observer_count | observer_count x Property(kind = 1)
//! u32 marker
//! ```
//!
//! Property: `string name | u8 exportable | u8 kind | payload` where the shared
//! payload is one tagged variant and the observer payload is
//! `u32 count | count x (i32 context, tagged variant) | i32 last_changed_context`.
//!
//! Decoding never panics; malformed input is reported as [`CodecError`].

use crate::error::{CodecError, MarkerSection};
use crate::property::{ObserverProperty, PropertyKey, PropertyStore, PropertyTypes, SharedProperty, Variant};
use crate::types::SessionId;
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// Section marker of an object property block.
pub const PROPERTY_SECTION_MARKER: u32 = 0xCCCC_CCCC;

const KIND_SHARED: u8 = 0;
const KIND_OBSERVER: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_STRING_LIST: u8 = 6;

// Smallest possible encodings, used to bound counts against the stream length.
const MIN_STRING_LEN: usize = 4;
const MIN_VARIANT_LEN: usize = 1;
const MIN_PROPERTY_LEN: usize = MIN_STRING_LEN + 2 + MIN_VARIANT_LEN;
const MIN_CONTEXT_PAIR_LEN: usize = 4 + MIN_VARIANT_LEN;

/// Append-only big-endian writer.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn write_str(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked big-endian reader over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Read a `u32` element count and check that `count * min_element_len`
    /// bytes could still follow.
    pub fn read_count(&mut self, min_element_len: usize) -> Result<usize, CodecError> {
        let count = self.read_u32()?;
        self.check_count(count as u64, min_element_len)
    }

    /// Same as [`read_count`](Self::read_count) for counts stored as `i32`.
    pub fn read_signed_count(&mut self, min_element_len: usize) -> Result<usize, CodecError> {
        let count = self.read_i32()?;
        if count < 0 {
            return Err(CodecError::NegativeCount(count));
        }
        self.check_count(count as u64, min_element_len)
    }

    fn check_count(&self, count: u64, min_element_len: usize) -> Result<usize, CodecError> {
        let needed = count.saturating_mul(min_element_len as u64);
        if needed > self.remaining() as u64 {
            return Err(CodecError::CountOutOfBounds {
                count,
                remaining: self.remaining(),
            });
        }
        Ok(count as usize)
    }

    pub fn expect_marker(&mut self, section: MarkerSection) -> Result<(), CodecError> {
        let found = self.read_u32()?;
        if found != PROPERTY_SECTION_MARKER {
            return Err(CodecError::MarkerMismatch { section, found });
        }
        Ok(())
    }
}

pub fn write_variant(w: &mut ByteWriter, value: &Variant) {
    match value {
        Variant::Null => w.write_u8(TAG_NULL),
        Variant::Bool(v) => {
            w.write_u8(TAG_BOOL);
            w.write_bool(*v);
        }
        Variant::Int(v) => {
            w.write_u8(TAG_INT);
            w.write_i64(*v);
        }
        Variant::Double(v) => {
            w.write_u8(TAG_DOUBLE);
            w.write_f64(*v);
        }
        Variant::String(v) => {
            w.write_u8(TAG_STRING);
            w.write_str(v);
        }
        Variant::Bytes(v) => {
            w.write_u8(TAG_BYTES);
            w.write_bytes(v);
        }
        Variant::StringList(items) => {
            w.write_u8(TAG_STRING_LIST);
            w.write_u32(items.len() as u32);
            for item in items {
                w.write_str(item);
            }
        }
    }
}

pub fn read_variant(r: &mut ByteReader<'_>) -> Result<Variant, CodecError> {
    match r.read_u8()? {
        TAG_NULL => Ok(Variant::Null),
        TAG_BOOL => Ok(Variant::Bool(r.read_bool()?)),
        TAG_INT => Ok(Variant::Int(r.read_i64()?)),
        TAG_DOUBLE => Ok(Variant::Double(r.read_f64()?)),
        TAG_STRING => Ok(Variant::String(r.read_string()?)),
        TAG_BYTES => Ok(Variant::Bytes(r.read_bytes()?)),
        TAG_STRING_LIST => {
            let count = r.read_count(MIN_STRING_LEN)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(r.read_string()?);
            }
            Ok(Variant::StringList(items))
        }
        tag => Err(CodecError::UnknownVariantTag(tag)),
    }
}

/// A decoded property of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Shared(SharedProperty),
    Observer(ObserverProperty),
}

pub fn write_shared_property(w: &mut ByteWriter, property: &SharedProperty) {
    w.write_str(property.key.name());
    w.write_bool(property.exportable);
    w.write_u8(KIND_SHARED);
    write_variant(w, &property.value);
}

pub fn write_observer_property(w: &mut ByteWriter, property: &ObserverProperty) {
    w.write_str(property.key.name());
    w.write_bool(property.exportable);
    w.write_u8(KIND_OBSERVER);
    w.write_u32(property.context_count() as u32);
    for (context, value) in property.values() {
        w.write_i32(*context);
        write_variant(w, value);
    }
    w.write_i32(property.last_changed_context());
}

pub fn read_property(r: &mut ByteReader<'_>) -> Result<Property, CodecError> {
    let name = r.read_string()?;
    if name.is_empty() {
        return Err(CodecError::InvalidProperty("empty property name".to_string()));
    }
    let key = PropertyKey::from_name(&name);
    let exportable = r.read_bool()?;
    match r.read_u8()? {
        KIND_SHARED => Ok(Property::Shared(SharedProperty {
            key,
            exportable,
            value: read_variant(r)?,
        })),
        KIND_OBSERVER => {
            let count = r.read_count(MIN_CONTEXT_PAIR_LEN)?;
            let mut values: BTreeMap<SessionId, Variant> = BTreeMap::new();
            for _ in 0..count {
                let context = r.read_i32()?;
                let value = read_variant(r)?;
                if values.insert(context, value).is_some() {
                    return Err(CodecError::InvalidProperty(format!(
                        "duplicate context {} in property {}",
                        context, name
                    )));
                }
            }
            let last_changed = r.read_i32()?;
            Ok(Property::Observer(ObserverProperty::from_parts(
                key,
                exportable,
                values,
                last_changed,
            )))
        }
        kind => Err(CodecError::UnknownPropertyKind(kind)),
    }
}

/// Properties decoded from one object property block, not yet applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBlock {
    pub shared: Vec<SharedProperty>,
    pub observer: Vec<ObserverProperty>,
}

impl PropertyBlock {
    pub fn has_visitor_id(&self) -> bool {
        self.shared.iter().any(|p| p.key == PropertyKey::VisitorId)
    }

    /// Apply every decoded property to `store`.
    pub fn apply_to(self, store: &mut PropertyStore) {
        for property in self.shared {
            store.set_shared(property);
        }
        for property in self.observer {
            store.set_observer(property);
        }
    }

    /// Apply the shared properties only and hand back the observer-scoped
    /// ones, whose context keys still belong to the exporting session.
    pub fn apply_shared_to(self, store: &mut PropertyStore) -> Vec<ObserverProperty> {
        for property in self.shared {
            store.set_shared(property);
        }
        self.observer
    }
}

/// Write the exportable properties of `store` as an object property block.
///
/// `label` only feeds log messages.
pub fn write_property_block(
    w: &mut ByteWriter,
    store: &PropertyStore,
    types: PropertyTypes,
    label: &str,
) {
    w.write_u32(PROPERTY_SECTION_MARKER);

    let shared = store.exportable_shared();
    if types.contains(PropertyTypes::SHARED) {
        trace!(count = shared.len(), object = label, "Streaming shared properties");
        w.write_u32(shared.len() as u32);
        for property in &shared {
            trace!(property = %property.key, "Streaming shared property");
            write_shared_property(w, property);
        }
        if !shared.iter().any(|p| p.key == PropertyKey::VisitorId) {
            warn!(object = label, "No visitor id property found on object");
        }
    } else {
        w.write_u32(0);
    }

    w.write_u32(PROPERTY_SECTION_MARKER);

    if types.contains(PropertyTypes::OBSERVER) {
        let observer = store.exportable_observer();
        trace!(count = observer.len(), object = label, "Streaming observer properties");
        w.write_u32(observer.len() as u32);
        for property in observer {
            trace!(property = %property.key, "Streaming observer property");
            write_observer_property(w, property);
        }
    } else {
        w.write_u32(0);
    }

    w.write_u32(PROPERTY_SECTION_MARKER);
}

/// Decode an object property block, validating all three markers.
pub fn read_property_block(r: &mut ByteReader<'_>) -> Result<PropertyBlock, CodecError> {
    let mut block = PropertyBlock::default();

    r.expect_marker(MarkerSection::Start)?;
    let shared_count = r.read_count(MIN_PROPERTY_LEN)?;
    for _ in 0..shared_count {
        match read_property(r)? {
            Property::Shared(p) => block.shared.push(p),
            Property::Observer(p) => {
                return Err(CodecError::InvalidProperty(format!(
                    "observer property {} in shared section",
                    p.key
                )))
            }
        }
    }

    r.expect_marker(MarkerSection::Middle)?;
    let observer_count = r.read_count(MIN_PROPERTY_LEN)?;
    for _ in 0..observer_count {
        match read_property(r)? {
            Property::Observer(p) => block.observer.push(p),
            Property::Shared(p) => {
                return Err(CodecError::InvalidProperty(format!(
                    "shared property {} in observer section",
                    p.key
                )))
            }
        }
    }

    r.expect_marker(MarkerSection::End)?;
    Ok(block)
}
