//! Property-based tests: decoders never panic on arbitrary input

use obsgraph::codec::{read_property_block, read_variant, write_variant, ByteReader, ByteWriter};
use obsgraph::property::Variant;
use obsgraph::{ObjectManager, RelationalTable, TransferResult};
use proptest::prelude::*;

/// Arbitrary bytes never make the block or table decoders panic
#[test]
fn test_decoders_tolerate_garbage() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&any::<Vec<u8>>(), |bytes| {
            let _ = read_property_block(&mut ByteReader::new(&bytes));
            let _ = RelationalTable::import_binary(&mut ByteReader::new(&bytes));
            Ok(())
        })
        .unwrap();
}

/// A failed import leaves no objects behind
#[test]
fn test_import_of_garbage_never_leaks_objects() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&proptest::collection::vec(any::<u8>(), 0..256), |bytes| {
            let mut manager = ObjectManager::new();
            let (session_id, _) = manager.create_observer("target");
            let result = manager.import_observer_binary(&mut ByteReader::new(&bytes), session_id);
            if result == TransferResult::Failed {
                prop_assert_eq!(manager.object_count(), 1);
            }
            Ok(())
        })
        .unwrap();
}

fn variant_strategy() -> impl Strategy<Value = Variant> {
    prop_oneof![
        Just(Variant::Null),
        any::<bool>().prop_map(Variant::Bool),
        any::<i64>().prop_map(Variant::Int),
        ".{0,16}".prop_map(Variant::String),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(Variant::Bytes),
        proptest::collection::vec(".{0,8}", 0..4).prop_map(Variant::StringList),
    ]
}

/// Every variant value reads back as written and consumes exactly its own bytes
#[test]
fn test_variant_encoding_is_self_delimiting() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(variant_strategy(), any::<u32>()), |(value, trailer)| {
            let mut w = ByteWriter::new();
            write_variant(&mut w, &value);
            w.write_u32(trailer);
            let bytes = w.into_bytes();

            let mut r = ByteReader::new(&bytes);
            prop_assert_eq!(read_variant(&mut r).unwrap(), value);
            prop_assert_eq!(r.read_u32().unwrap(), trailer);
            prop_assert!(r.is_at_end());
            Ok(())
        })
        .unwrap();
}
