//! Moving subjects between contexts

use obsgraph::observer::{
    FilterSlot, NamingPolicyFilter, ResolutionPolicy, SubjectTypeFilter, UniquenessPolicy,
};
use obsgraph::{ObjectManager, ObserverError, Ownership};

#[test]
fn test_last_scoped_subject_moves_without_being_destroyed() {
    let mut manager = ObjectManager::new();
    let (src, _) = manager.create_observer("src");
    let (dst, _) = manager.create_observer("dst");
    let item = manager.create_object("item", "Object");
    manager.attach_subject(src, item, Ownership::ObserverScope).unwrap();

    manager.move_subjects(&[item], src, dst).unwrap();

    assert!(manager.contains_object(item));
    assert!(!manager.observer_reference(src).unwrap().contains(item));
    assert!(manager.observer_reference(dst).unwrap().contains(item));
    assert_eq!(manager.object(item).unwrap().ownership(), Ownership::ObserverScope);
}

#[test]
fn test_manual_subject_keeps_its_ownership() {
    let mut manager = ObjectManager::new();
    let (src, _) = manager.create_observer("src");
    let (dst, _) = manager.create_observer("dst");
    let item = manager.create_object("item", "Object");
    manager.attach_subject(src, item, Ownership::Manual).unwrap();

    manager.move_subjects(&[item], src, dst).unwrap();

    assert_eq!(manager.object(item).unwrap().attached_contexts(), vec![dst]);
    assert_eq!(manager.object(item).unwrap().ownership(), Ownership::Manual);
}

#[test]
fn test_move_stops_at_first_rejected_subject() {
    let mut manager = ObjectManager::new();
    let (src, _) = manager.create_observer("src");
    let (dst, _) = manager.create_observer("dst");
    manager
        .observer_mut(dst)
        .unwrap()
        .install_filter(FilterSlot::SubjectType(SubjectTypeFilter::new(["Object"])));
    let first = manager.create_object("first", "Object");
    let folder = manager.create_object("folder", "Folder");
    let last = manager.create_object("last", "Object");
    for id in [first, folder, last] {
        manager.attach_subject(src, id, Ownership::Manual).unwrap();
    }

    let err = manager.move_subjects(&[first, folder, last], src, dst).unwrap_err();
    assert!(matches!(
        err,
        ObserverError::RejectedByPolicy { object, context, .. } if object == folder && context == dst
    ));

    let source = manager.observer_reference(src).unwrap();
    let destination = manager.observer_reference(dst).unwrap();
    assert!(destination.contains(first));
    assert!(source.contains(folder));
    assert!(source.contains(last));
    assert!(!destination.contains(last));
}

#[test]
fn test_owner_refuses_to_give_up_subject() {
    let mut manager = ObjectManager::new();
    let (src, _) = manager.create_observer("src");
    let (dst, _) = manager.create_observer("dst");
    let owned = manager.create_object("owned", "Object");
    manager.attach_subject(src, owned, Ownership::SpecificObserver).unwrap();

    let err = manager.move_subjects(&[owned], src, dst).unwrap_err();
    assert_eq!(
        err,
        ObserverError::IsParentObserver {
            object: owned,
            context: src
        }
    );
    assert!(manager.observer_reference(src).unwrap().contains(owned));
    assert_eq!(manager.object(owned).unwrap().observer_parent(), src);
}

#[test]
fn test_name_clash_in_destination_blocks_move() {
    let mut manager = ObjectManager::new();
    let (src, _) = manager.create_observer("src");
    let (dst, _) = manager.create_observer("dst");
    manager.observer_mut(dst).unwrap().install_filter(FilterSlot::Naming(
        NamingPolicyFilter::new(
            UniquenessPolicy::ProhibitDuplicateNames,
            ResolutionPolicy::Reject,
            ResolutionPolicy::Reject,
        ),
    ));
    let resident = manager.create_object("report", "Object");
    manager.attach_subject(dst, resident, Ownership::Manual).unwrap();
    let incoming = manager.create_object("report", "Object");
    manager.attach_subject(src, incoming, Ownership::ObserverScope).unwrap();

    assert!(manager.move_subjects(&[incoming], src, dst).is_err());
    assert!(manager.contains_object(incoming));
    assert!(manager.observer_reference(src).unwrap().contains(incoming));
    assert_eq!(manager.object(incoming).unwrap().name, "report");
    assert_eq!(manager.object(incoming).unwrap().ownership(), Ownership::ObserverScope);
}

#[test]
fn test_unknown_context_is_reported() {
    let mut manager = ObjectManager::new();
    let (src, _) = manager.create_observer("src");
    let item = manager.create_object("item", "Object");
    manager.attach_subject(src, item, Ownership::Manual).unwrap();

    assert_eq!(
        manager.move_subjects(&[item], src, 99),
        Err(ObserverError::ContextNotFound(99))
    );
    assert!(manager.observer_reference(src).unwrap().contains(item));
}
