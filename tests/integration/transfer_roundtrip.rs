//! Export and re-import of whole context trees

use obsgraph::cli::build_demo_graph;
use obsgraph::codec::{ByteReader, ByteWriter};
use obsgraph::observer::ObserverEvent;
use obsgraph::property::{ObserverProperty, PropertyKey, SharedProperty, Variant};
use obsgraph::{ObjectId, ObjectManager, Ownership, SessionId, TransferResult};

fn export(manager: &mut ObjectManager, session_id: SessionId) -> Vec<u8> {
    let mut w = ByteWriter::new();
    let result = manager.export_observer_binary(session_id, &mut w);
    assert_eq!(result, TransferResult::Complete);
    w.into_bytes()
}

fn import(bytes: &[u8]) -> (ObjectManager, SessionId, TransferResult) {
    let mut target = ObjectManager::new();
    let (session_id, _) = target.create_observer("incoming");
    let result = target.import_observer_binary(&mut ByteReader::new(bytes), session_id);
    (target, session_id, result)
}

fn names_in(manager: &ObjectManager, session_id: SessionId) -> Vec<String> {
    let mut names: Vec<String> = manager
        .observer_reference(session_id)
        .unwrap()
        .subjects()
        .iter()
        .map(|id| manager.object(*id).unwrap().name_in(session_id).to_string())
        .collect();
    names.sort();
    names
}

fn subject_named(manager: &ObjectManager, session_id: SessionId, name: &str) -> ObjectId {
    *manager
        .observer_reference(session_id)
        .unwrap()
        .subjects()
        .iter()
        .find(|id| manager.object(**id).unwrap().name_in(session_id) == name)
        .unwrap()
}

#[test]
fn test_nested_tree_survives_round_trip() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 3, true).unwrap();
    let bytes = export(&mut source, root);

    let (target, new_root, result) = import(&bytes);
    assert_eq!(result, TransferResult::Complete);

    let context = target.observer_reference(new_root).unwrap();
    assert_eq!(context.name(), "demo");
    assert!(context.naming_filter().is_some());
    assert_eq!(names_in(&target, new_root), vec!["item", "item_1", "item_2", "nested"]);

    let nested_host = subject_named(&target, new_root, "nested");
    let host = target.object(nested_host).unwrap();
    assert_eq!(host.ownership(), Ownership::SpecificObserver);
    assert_eq!(host.observer_parent(), new_root);

    let inner = target.context_of(nested_host).unwrap();
    assert_ne!(inner, new_root);
    assert!(target.observer_reference(inner).unwrap().naming_filter().is_some());
    assert_eq!(names_in(&target, inner), vec!["item", "leaf", "leaf_1"]);

    let shared = subject_named(&target, new_root, "item");
    let shared_data = target.object(shared).unwrap();
    assert!(shared_data.is_attached_to(new_root));
    assert!(shared_data.is_attached_to(inner));
    assert_eq!(shared_data.ownership(), Ownership::ObserverScope);
}

#[test]
fn test_round_trip_leaves_no_visitor_ids_behind() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 2, true).unwrap();
    let bytes = export(&mut source, root);
    let (target, _, _) = import(&bytes);

    for manager in [&source, &target] {
        assert!(manager
            .objects()
            .all(|o| !o.properties.contains(&PropertyKey::VisitorId)));
    }
}

#[test]
fn test_exporting_twice_gives_identical_streams() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 4, true).unwrap();
    let first = export(&mut source, root);
    let second = export(&mut source, root);
    assert_eq!(first, second);
}

#[test]
fn test_exportable_properties_follow_the_objects() {
    let mut source = ObjectManager::new();
    let (ctx, _) = source.create_observer("props");
    let item = source.create_object("painted", "Object");
    source.attach_subject(ctx, item, Ownership::ObserverScope).unwrap();
    source
        .set_shared_property(item, SharedProperty::new(PropertyKey::custom("color"), "red"))
        .unwrap();
    let mut weight = ObserverProperty::new(PropertyKey::custom("weight"));
    weight.set_context(ctx, 5i64);
    source.object_mut(item).unwrap().properties.set_observer(weight);

    let bytes = export(&mut source, ctx);
    let (target, new_ctx, result) = import(&bytes);
    assert_eq!(result, TransferResult::Complete);

    let painted = target.object(subject_named(&target, new_ctx, "painted")).unwrap();
    assert_eq!(
        painted.properties.shared_value(&PropertyKey::custom("color")),
        Some(&Variant::String("red".to_string()))
    );
    // observer scoped values are re-keyed to the importing context
    assert_eq!(
        painted.properties.observer_value(&PropertyKey::custom("weight"), new_ctx),
        Some(&Variant::Int(5))
    );
    assert_eq!(
        painted
            .properties
            .observer(&PropertyKey::custom("weight"))
            .unwrap()
            .context_count(),
        1
    );
}

#[test]
fn test_import_suppresses_attach_events_and_refreshes_once() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 3, false).unwrap();
    let bytes = export(&mut source, root);

    let mut target = ObjectManager::new();
    let (new_root, _) = target.create_observer("incoming");
    target.drain_events();
    let result = target.import_observer_binary(&mut ByteReader::new(&bytes), new_root);
    assert_eq!(result, TransferResult::Complete);

    let events = target.drain_events();
    assert!(!events.iter().any(|e| matches!(
        e,
        ObserverEvent::SubjectAttached { context, .. } if *context == new_root
    )));
    let refreshed = events
        .iter()
        .filter(|e| matches!(e, ObserverEvent::Refreshed { context } if *context == new_root))
        .count();
    assert_eq!(refreshed, 1);
}

#[test]
fn test_import_into_attached_host_keeps_its_name() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 1, false).unwrap();
    let bytes = export(&mut source, root);

    let mut target = ObjectManager::new();
    let (outer, _) = target.create_observer("outer");
    let (inner, inner_host) = target.create_observer("placeholder");
    target.attach_subject(outer, inner_host, Ownership::Manual).unwrap();

    let result = target.import_observer_binary(&mut ByteReader::new(&bytes), inner);
    assert_eq!(result, TransferResult::Complete);
    assert_eq!(target.object(inner_host).unwrap().name, "placeholder");
    assert_eq!(target.observer_reference(inner).unwrap().name(), "demo");
}

#[test]
fn test_root_owned_outside_the_export_is_not_an_error() {
    let mut source = ObjectManager::new();
    let (outer, _) = source.create_observer("outer");
    let (inner, inner_host) = source.create_observer("inner");
    source.attach_subject(outer, inner_host, Ownership::SpecificObserver).unwrap();
    let leaf = source.create_object("leaf", "Object");
    source.attach_subject(inner, leaf, Ownership::ObserverScope).unwrap();

    let bytes = export(&mut source, inner);
    let (target, new_inner, result) = import(&bytes);
    assert_eq!(result, TransferResult::Complete);
    assert_eq!(names_in(&target, new_inner), vec!["leaf"]);
}

fn weight_for(session_id: SessionId, value: i64) -> ObserverProperty {
    let mut weight = ObserverProperty::new(PropertyKey::custom("weight"));
    weight.set_context(session_id, value);
    weight
}

#[test]
fn test_import_leaves_live_keys_of_attached_host_alone() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 2, false).unwrap();
    let bytes = export(&mut source, root);

    let mut target = ObjectManager::new();
    let (outer, _) = target.create_observer("outer");
    let (inner, inner_host) = target.create_observer("inner");
    target.attach_subject(outer, inner_host, Ownership::Manual).unwrap();
    target
        .object_mut(inner_host)
        .unwrap()
        .properties
        .set_observer(weight_for(outer, 5));
    // the live key equals the exporting session id of the streamed root
    assert_eq!(outer, root);

    let result = target.import_observer_binary(&mut ByteReader::new(&bytes), inner);
    assert_eq!(result, TransferResult::Complete);

    let weight = target
        .object(inner_host)
        .unwrap()
        .properties
        .observer(&PropertyKey::custom("weight"))
        .unwrap();
    assert_eq!(weight.value(outer), Some(&Variant::Int(5)));
    assert_eq!(weight.value(inner), None);
    assert_eq!(weight.context_count(), 1);
}

#[test]
fn test_streamed_host_values_merge_with_live_ones() {
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "demo", 1, false).unwrap();
    let root_host = source.observer_reference(root).unwrap().host().unwrap();
    source
        .object_mut(root_host)
        .unwrap()
        .properties
        .set_observer(weight_for(root, 3));
    let bytes = export(&mut source, root);

    let mut target = ObjectManager::new();
    target.create_observer("scratch");
    let (outer, _) = target.create_observer("outer");
    let (inner, inner_host) = target.create_observer("inner");
    target.attach_subject(outer, inner_host, Ownership::Manual).unwrap();
    target
        .object_mut(inner_host)
        .unwrap()
        .properties
        .set_observer(weight_for(outer, 5));

    let result = target.import_observer_binary(&mut ByteReader::new(&bytes), inner);
    assert_eq!(result, TransferResult::Complete);
    assert_eq!(target.observer_reference(inner).unwrap().subject_count(), 1);

    let properties = &target.object(inner_host).unwrap().properties;
    let weight = PropertyKey::custom("weight");
    assert_eq!(properties.observer_value(&weight, outer), Some(&Variant::Int(5)));
    assert_eq!(properties.observer_value(&weight, inner), Some(&Variant::Int(3)));
}

fn register_folder_types(manager: &mut ObjectManager) {
    manager.register_factory("Folder", |m: &mut ObjectManager, name: &str| {
        let folder = m.create_object(name, "Folder");
        m.register_observer(folder, name).unwrap();
        folder
    });
    manager.register_factory("File", |m: &mut ObjectManager, name: &str| m.create_object(name, "File"));
}

#[test]
fn test_folder_with_scoped_file_is_rebuilt_under_new_session_ids() {
    let mut source = ObjectManager::new();
    register_folder_types(&mut source);
    let (library, _) = source.create_observer("library");
    let folder = source.create_object("Folder", "Folder");
    let folder_ctx = source.register_observer(folder, "Folder").unwrap();
    let file = source.create_object("File", "File");
    source.attach_subject(library, folder, Ownership::Manual).unwrap();
    source.attach_subject(folder_ctx, file, Ownership::ObserverScope).unwrap();
    source.attach_subject(library, file, Ownership::ObserverScope).unwrap();
    let mut opened = ObserverProperty::new(PropertyKey::custom("opened"));
    opened.set_context(folder_ctx, true);
    source.object_mut(file).unwrap().properties.set_observer(opened);
    let bytes = export(&mut source, library);

    let mut target = ObjectManager::new();
    register_folder_types(&mut target);
    target.create_observer("scratch");
    target.create_observer("scratch");
    let (incoming, _) = target.create_observer("incoming");
    let result = target.import_observer_binary(&mut ByteReader::new(&bytes), incoming);
    assert_eq!(result, TransferResult::Complete);

    assert_eq!(target.observer_reference(incoming).unwrap().subject_count(), 2);
    let new_folder = subject_named(&target, incoming, "Folder");
    let new_folder_ctx = target.context_of(new_folder).unwrap();
    assert_ne!(new_folder_ctx, folder_ctx);

    let new_file = target.object(subject_named(&target, incoming, "File")).unwrap();
    assert_eq!(new_file.ownership(), Ownership::ObserverScope);
    assert!(new_file.is_attached_to(new_folder_ctx));
    let opened = new_file
        .properties
        .observer(&PropertyKey::custom("opened"))
        .unwrap();
    assert_eq!(opened.contexts().collect::<Vec<_>>(), vec![new_folder_ctx]);
    assert_eq!(opened.value(new_folder_ctx), Some(&Variant::Bool(true)));
}
