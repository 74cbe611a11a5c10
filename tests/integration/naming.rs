//! Naming policy behaviour seen through the manager

use obsgraph::observer::{
    ConflictDecision, ConflictRequest, FilterSlot, NameResolution, NamingPolicyFilter,
    ResolutionPolicy, UniquenessPolicy,
};
use obsgraph::{ObjectManager, ObserverError, Ownership, SessionId};
use std::cell::Cell;
use std::rc::Rc;

fn context_with_naming(
    manager: &mut ObjectManager,
    name: &str,
    uniqueness_resolution: ResolutionPolicy,
    validity_resolution: ResolutionPolicy,
    pattern: &str,
) -> SessionId {
    let (session_id, _) = manager.create_observer(name);
    let mut filter = NamingPolicyFilter::new(
        UniquenessPolicy::ProhibitDuplicateNames,
        uniqueness_resolution,
        validity_resolution,
    );
    filter.set_validation_pattern(pattern).unwrap();
    manager
        .observer_mut(session_id)
        .unwrap()
        .install_filter(FilterSlot::Naming(filter));
    session_id
}

#[test]
fn test_resolver_supplies_replacement_name() {
    let mut manager = ObjectManager::new();
    let ctx = context_with_naming(
        &mut manager,
        "ctx",
        ResolutionPolicy::PromptUser,
        ResolutionPolicy::Reject,
        "",
    );
    manager.set_conflict_resolver(|request: &ConflictRequest<'_>| {
        assert_eq!(request.name, "doc");
        assert_eq!(request.suggested_name, "doc_1");
        Some(ConflictDecision::once(NameResolution::Rename("notes".to_string())))
    });
    let first = manager.create_object("doc", "Object");
    let second = manager.create_object("doc", "Object");
    manager.attach_subject(ctx, first, Ownership::Manual).unwrap();
    manager.attach_subject(ctx, second, Ownership::Manual).unwrap();

    assert_eq!(manager.object(second).unwrap().name, "notes");
}

#[test]
fn test_unresolved_prompt_leaves_object_detached() {
    let mut manager = ObjectManager::new();
    let ctx = context_with_naming(
        &mut manager,
        "ctx",
        ResolutionPolicy::PromptUser,
        ResolutionPolicy::Reject,
        "",
    );
    let first = manager.create_object("doc", "Object");
    let second = manager.create_object("doc", "Object");
    manager.attach_subject(ctx, first, Ownership::Manual).unwrap();

    let err = manager.attach_subject(ctx, second, Ownership::Manual).unwrap_err();
    assert_eq!(
        err,
        ObserverError::ConflictRequiresResolution {
            object: second,
            context: ctx
        }
    );
    let data = manager.object(second).unwrap();
    assert_eq!(data.name, "doc");
    assert!(!data.is_attached_to(ctx));
    assert!(data.properties.shared_value(&obsgraph::PropertyKey::ObjectName).is_none());
}

#[test]
fn test_apply_to_all_decision_is_reused_within_batch() {
    let mut manager = ObjectManager::new();
    let ctx = context_with_naming(
        &mut manager,
        "ctx",
        ResolutionPolicy::PromptUser,
        ResolutionPolicy::Reject,
        "",
    );
    let asked = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&asked);
    manager.set_conflict_resolver(move |_request: &ConflictRequest<'_>| {
        counter.set(counter.get() + 1);
        Some(ConflictDecision {
            resolution: NameResolution::AutoRename,
            apply_to_all: true,
        })
    });
    let existing = manager.create_object("doc", "Object");
    manager.attach_subject(ctx, existing, Ownership::Manual).unwrap();

    let batch: Vec<_> = (0..2).map(|_| manager.create_object("doc", "Object")).collect();
    let results = manager.attach_subjects(ctx, &batch, Ownership::Manual);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(asked.get(), 1);
    assert_eq!(manager.object(batch[0]).unwrap().name, "doc_1");
    assert_eq!(manager.object(batch[1]).unwrap().name, "doc_2");
}

#[test]
fn test_invalid_names_are_rejected_or_repaired() {
    let mut manager = ObjectManager::new();
    let strict = context_with_naming(
        &mut manager,
        "strict",
        ResolutionPolicy::AutoRename,
        ResolutionPolicy::Reject,
        "[a-z_]+",
    );
    let lenient = context_with_naming(
        &mut manager,
        "lenient",
        ResolutionPolicy::AutoRename,
        ResolutionPolicy::AutoRename,
        "[a-z_]+",
    );

    let bad = manager.create_object("Bad", "Object");
    assert!(matches!(
        manager.attach_subject(strict, bad, Ownership::Manual),
        Err(ObserverError::RejectedByPolicy { .. })
    ));

    let spaced = manager.create_object("my report", "Object");
    manager.attach_subject(lenient, spaced, Ownership::Manual).unwrap();
    assert_eq!(manager.object(spaced).unwrap().name, "myreport");
}

#[test]
fn test_instance_name_only_changes_one_view() {
    let mut manager = ObjectManager::new();
    let first = context_with_naming(
        &mut manager,
        "first",
        ResolutionPolicy::AutoRename,
        ResolutionPolicy::Reject,
        "",
    );
    let second = context_with_naming(
        &mut manager,
        "second",
        ResolutionPolicy::AutoRename,
        ResolutionPolicy::Reject,
        "",
    );
    let doc = manager.create_object("doc", "Object");
    manager.attach_subject(first, doc, Ownership::Manual).unwrap();
    manager.attach_subject(second, doc, Ownership::Manual).unwrap();

    manager.rename_subject(second, doc, "alias").unwrap();

    let data = manager.object(doc).unwrap();
    assert_eq!(data.name_in(first), "doc");
    assert_eq!(data.name_in(second), "alias");
    assert_eq!(data.name, "doc");
}

#[test]
fn test_blocked_rename_is_rolled_back() {
    let mut manager = ObjectManager::new();
    let ctx = context_with_naming(
        &mut manager,
        "ctx",
        ResolutionPolicy::Reject,
        ResolutionPolicy::Reject,
        "",
    );
    let a = manager.create_object("a", "Object");
    let b = manager.create_object("b", "Object");
    manager.attach_subject(ctx, a, Ownership::Manual).unwrap();
    manager.attach_subject(ctx, b, Ownership::Manual).unwrap();

    let err = manager.rename_subject(ctx, b, "a").unwrap_err();
    assert!(matches!(err, ObserverError::PropertyChangeBlocked { object, .. } if object == b));
    assert_eq!(manager.object(b).unwrap().name, "b");
    assert_eq!(manager.object(b).unwrap().name_in(ctx), "b");
}
