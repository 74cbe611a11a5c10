//! Malformed stream handling

use obsgraph::cli::build_demo_graph;
use obsgraph::codec::{read_property_block, write_property_block, ByteReader, ByteWriter};
use obsgraph::error::{CodecError, MarkerSection};
use obsgraph::observer::{ActionHints, FilterSlot, NamingPolicyFilter, SubjectTypeFilter};
use obsgraph::property::{ObserverProperty, PropertyKey, PropertyStore, PropertyTypes};
use obsgraph::{ObjectManager, Ownership, RelationalTable, TransferResult};

fn empty_block() -> Vec<u8> {
    let mut w = ByteWriter::new();
    write_property_block(&mut w, &PropertyStore::new(), PropertyTypes::ALL, "empty");
    w.into_bytes()
}

#[test]
fn test_each_marker_is_checked() {
    let block = empty_block();
    assert_eq!(block.len(), 20);
    assert!(read_property_block(&mut ByteReader::new(&block)).is_ok());

    for (offset, section) in [
        (0, MarkerSection::Start),
        (8, MarkerSection::Middle),
        (16, MarkerSection::End),
    ] {
        let mut corrupt = block.clone();
        corrupt[offset] = 0;
        match read_property_block(&mut ByteReader::new(&corrupt)) {
            Err(CodecError::MarkerMismatch { section: found, .. }) => assert_eq!(found, section),
            other => panic!("expected {} marker failure, got {:?}", section, other),
        }
    }
}

#[test]
fn test_oversized_counts_are_refused() {
    let bytes = [0xff, 0xff, 0xff, 0xff];
    assert_eq!(
        RelationalTable::import_binary(&mut ByteReader::new(&bytes)).unwrap_err(),
        CodecError::CountOutOfBounds {
            count: u32::MAX as u64,
            remaining: 0
        }
    );
}

#[test]
fn test_corrupt_root_block_discards_imported_objects() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 3, true).unwrap();
    let mut w = ByteWriter::new();
    source.export_observer_binary(root, &mut w);
    let mut bytes = w.into_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;

    let mut target = ObjectManager::new();
    let (session_id, _) = target.create_observer("incoming");
    let before = target.object_count();
    let result = target.import_observer_binary(&mut ByteReader::new(&bytes), session_id);

    assert_eq!(result, TransferResult::Failed);
    assert_eq!(target.object_count(), before);
    assert_eq!(target.contexts().count(), 2);
    assert!(target.observer_reference(session_id).unwrap().subjects().is_empty());
}

#[test]
fn test_empty_stream_fails_cleanly() {
    let mut target = ObjectManager::new();
    let (session_id, _) = target.create_observer("incoming");
    assert_eq!(
        target.import_observer_binary(&mut ByteReader::new(&[]), session_id),
        TransferResult::Failed
    );
    assert_eq!(target.object_count(), 1);
}

#[test]
fn test_dangling_session_key_fails_and_restores_target() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 2, false).unwrap();
    source
        .observer_mut(root)
        .unwrap()
        .set_action_hints(ActionHints::RENAME_ITEM);
    let item = source.observer_reference(root).unwrap().subjects()[0];
    let mut weight = ObserverProperty::new(PropertyKey::custom("weight"));
    weight.set_context(99, 1i64);
    source.object_mut(item).unwrap().properties.set_observer(weight);
    let mut w = ByteWriter::new();
    source.export_observer_binary(root, &mut w);
    let bytes = w.into_bytes();

    let mut target = ObjectManager::new();
    let (session_id, host) = target.create_observer("incoming");
    let mut naming = NamingPolicyFilter::default();
    naming.set_validation_pattern("^[a-z]+$").unwrap();
    let context = target.observer_mut(session_id).unwrap();
    context.install_filter(FilterSlot::Naming(naming));
    context.install_filter(FilterSlot::SubjectType(SubjectTypeFilter::new(["Object"])));
    let host_properties = target.object(host).unwrap().properties.clone();

    let result = target.import_observer_binary(&mut ByteReader::new(&bytes), session_id);
    assert_eq!(result, TransferResult::Failed);
    assert_eq!(target.object_count(), 1);

    let context = target.observer_reference(session_id).unwrap();
    assert_eq!(context.name(), "incoming");
    assert_eq!(context.action_hints(), ActionHints::empty());
    assert!(context.subjects().is_empty());
    assert_eq!(context.naming_filter().unwrap().validation_pattern(), "^[a-z]+$");
    assert!(context.subject_type_filter().is_some());
    let host_data = target.object(host).unwrap();
    assert_eq!(host_data.name, "incoming");
    assert_eq!(host_data.properties, host_properties);
}

#[test]
fn test_truncated_stream_leaves_target_unrenamed() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 2, true).unwrap();
    let mut w = ByteWriter::new();
    source.export_observer_binary(root, &mut w);
    let bytes = w.into_bytes();

    let mut target = ObjectManager::new();
    let (session_id, host) = target.create_observer("incoming");
    let result = target.import_observer_binary(&mut ByteReader::new(&bytes[..bytes.len() - 4]), session_id);
    assert_eq!(result, TransferResult::Failed);

    let context = target.observer_reference(session_id).unwrap();
    assert_eq!(context.name(), "incoming");
    assert!(context.naming_filter().is_none());
    assert_eq!(target.object(host).unwrap().name, "incoming");
}

#[test]
fn test_unresolvable_parent_downgrades_import() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 2, false).unwrap();
    let mut w = ByteWriter::new();
    source.export_observer_binary(root, &mut w);
    let bytes = w.into_bytes();

    // point the first subject at a parent the table does not know
    let mut r = ByteReader::new(&bytes);
    let mut table = RelationalTable::import_binary(&mut r).unwrap();
    let rest = &bytes[r.position()..];
    table.entry_mut(1).unwrap().parents = vec![42];
    let mut rewritten = ByteWriter::new();
    table.export_binary(&mut rewritten);
    let mut stream = rewritten.into_bytes();
    stream.extend_from_slice(rest);

    let mut target = ObjectManager::new();
    let (session_id, _) = target.create_observer("incoming");
    let result = target.import_observer_binary(&mut ByteReader::new(&stream), session_id);
    assert_eq!(result, TransferResult::Incomplete);
    assert_eq!(target.object_count(), 3);

    let context = target.observer_reference(session_id).unwrap();
    assert_eq!(context.subject_count(), 1);
    let attached = target.object(context.subjects()[0]).unwrap();
    assert_eq!(attached.ownership(), Ownership::ObserverScope);
}
