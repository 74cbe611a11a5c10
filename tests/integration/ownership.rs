//! Ownership-driven lifetimes across context trees

use obsgraph::cli::build_demo_graph;
use obsgraph::observer::ObserverEvent;
use obsgraph::{ObjectManager, Ownership, GLOBAL_POOL_ID};

#[test]
fn test_destroying_root_tears_down_whole_tree() {
    let mut manager = ObjectManager::new();
    let root = build_demo_graph(&mut manager, "demo", 3, true).unwrap();
    assert_eq!(manager.object_count(), 7);

    assert!(manager.destroy_observer(root));

    assert_eq!(manager.object_count(), 0);
    assert!(manager.contexts().all(|c| c.session_id() == GLOBAL_POOL_ID));
    let destroyed = manager
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ObserverEvent::ObjectDestroyed { .. }))
        .count();
    assert_eq!(destroyed, 7);
}

#[test]
fn test_manual_subjects_outlive_their_context() {
    let mut manager = ObjectManager::new();
    let (ctx, host) = manager.create_observer("ctx");
    let kept = manager.create_object("kept", "Object");
    let scoped = manager.create_object("scoped", "Object");
    manager.attach_subject(ctx, kept, Ownership::Manual).unwrap();
    manager.attach_subject(ctx, scoped, Ownership::ObserverScope).unwrap();

    manager.destroy_object(host);

    assert!(manager.contains_object(kept));
    assert!(manager.object(kept).unwrap().attached_contexts().is_empty());
    assert!(!manager.contains_object(scoped));
    assert!(manager.observer_reference(ctx).is_none());
}

#[test]
fn test_scoped_subject_survives_while_another_context_holds_it() {
    let mut manager = ObjectManager::new();
    let (first, first_host) = manager.create_observer("first");
    let (second, _) = manager.create_observer("second");
    let shared = manager.create_object("shared", "Object");
    manager.attach_subject(first, shared, Ownership::ObserverScope).unwrap();
    manager.attach_subject(second, shared, Ownership::ObserverScope).unwrap();

    manager.destroy_object(first_host);
    assert!(manager.contains_object(shared));
    assert_eq!(manager.object(shared).unwrap().attached_contexts(), vec![second]);

    manager.detach_subject(second, shared).unwrap();
    assert!(!manager.contains_object(shared));
}

#[test]
fn test_subject_owned_dependents_follow_their_owner() {
    let mut manager = ObjectManager::new();
    let (ctx, _) = manager.create_observer("ctx");
    let owner = manager.create_object("owner", "Object");
    let dependent = manager.create_object("dependent", "Object");
    manager.attach_subject(ctx, owner, Ownership::Manual).unwrap();
    manager.attach_subject(ctx, dependent, Ownership::Manual).unwrap();
    manager.set_owning_subject(dependent, owner).unwrap();
    assert_eq!(manager.object(dependent).unwrap().owned_by(), Some(owner));

    manager.destroy_object(owner);

    assert!(!manager.contains_object(dependent));
    assert!(manager.observer_reference(ctx).unwrap().subjects().is_empty());
}

#[test]
fn test_structural_children_are_destroyed_with_parent() {
    let mut manager = ObjectManager::new();
    let parent = manager.create_object("parent", "Object");
    let child = manager.create_object("child", "Object");
    let grandchild = manager.create_object("grandchild", "Object");
    manager.add_child(parent, child).unwrap();
    manager.add_child(child, grandchild).unwrap();

    manager.destroy_object(parent);
    assert_eq!(manager.object_count(), 0);
}
