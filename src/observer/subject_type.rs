//! Filter accepting subjects by meta type.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::CodecError;
use crate::observer::filter::{FilterTag, FilterView, SubjectFilter};
use crate::observer::Evaluation;
use crate::types::ObjectId;
use std::collections::BTreeSet;

/// Accepts only objects whose type tag is known, or only unknown ones when
/// inverse filtering is on. An empty known set accepts everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectTypeFilter {
    known_types: BTreeSet<String>,
    inverse: bool,
}

impl SubjectTypeFilter {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_types: types.into_iter().map(Into::into).collect(),
            inverse: false,
        }
    }

    pub fn add_subject_type(&mut self, type_tag: impl Into<String>) {
        self.known_types.insert(type_tag.into());
    }

    pub fn known_types(&self) -> impl Iterator<Item = &str> {
        self.known_types.iter().map(String::as_str)
    }

    pub fn is_known_type(&self, type_tag: &str) -> bool {
        self.known_types.contains(type_tag)
    }

    pub fn set_inverse_filtering(&mut self, inverse: bool) {
        self.inverse = inverse;
    }

    pub fn inverse_filtering(&self) -> bool {
        self.inverse
    }

    pub fn accepts(&self, type_tag: &str) -> bool {
        if self.known_types.is_empty() {
            return true;
        }
        self.is_known_type(type_tag) != self.inverse
    }
}

impl SubjectFilter for SubjectTypeFilter {
    fn tag(&self) -> FilterTag {
        FilterTag::SubjectType
    }

    fn evaluate_attachment(&self, view: &FilterView<'_>, object: ObjectId) -> Evaluation {
        match view.object(object) {
            Some(data) if self.accepts(&data.type_tag) => Evaluation::Allowed,
            _ => Evaluation::Rejected,
        }
    }

    fn export_binary(&self, w: &mut ByteWriter) {
        w.write_bool(self.inverse);
        w.write_u32(self.known_types.len() as u32);
        for type_tag in &self.known_types {
            w.write_str(type_tag);
        }
    }

    fn import_binary(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.inverse = r.read_bool()?;
        let count = r.read_count(4)?;
        self.known_types.clear();
        for _ in 0..count {
            self.known_types.insert(r.read_string()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_known_types() {
        let filter = SubjectTypeFilter::new(["File"]);
        assert!(filter.accepts("File"));
        assert!(!filter.accepts("Folder"));
    }

    #[test]
    fn test_inverse_filtering() {
        let mut filter = SubjectTypeFilter::new(["File"]);
        filter.set_inverse_filtering(true);
        assert!(!filter.accepts("File"));
        assert!(filter.accepts("Folder"));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        assert!(SubjectTypeFilter::default().accepts("Anything"));
    }

    #[test]
    fn test_binary_round_trip() {
        let mut filter = SubjectTypeFilter::new(["File", "Folder"]);
        filter.set_inverse_filtering(true);
        let mut w = ByteWriter::new();
        filter.export_binary(&mut w);
        let bytes = w.into_bytes();
        let mut imported = SubjectTypeFilter::default();
        imported.import_binary(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(imported, filter);
    }
}
