use super::*;
use std::collections::BTreeMap;

use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, PartialEq, Default)]
struct Counter {
    value: i64,
    history: Vec<i64>,
}

fn counter_model() -> ModelDefinition<Counter> {
    ModelDefinition::builder("counter", Counter::default())
        .transition("add", |state: &Counter, amount: i64| Counter {
            value: state.value + amount,
            history: {
                let mut history = state.history.clone();
                history.push(amount);
                history
            },
        })
        .expect("add")
        .transition("reset", |_: &Counter, (): ()| Counter::default())
        .expect("reset")
        .build()
}

#[test]
fn read_falls_back_to_default_before_first_write() {
    let store = KeyedStore::new();
    let model = store.model(&counter_model()).expect("model");

    assert_eq!(*model.read().expect("read"), Counter::default());
    assert_eq!(model.revision().expect("revision"), 0);
}

#[test]
fn set_state_accepts_value_or_updater_and_bumps_revision() {
    let store = KeyedStore::new();
    let model = store.model(&counter_model()).expect("model");

    let first = model
        .set_state(Counter {
            value: 10,
            history: Vec::new(),
        })
        .expect("replace");
    let second = model
        .update(|state| Counter {
            value: state.value * 2,
            history: state.history.clone(),
        })
        .expect("apply");

    assert_eq!((first, second), (1, 2));
    assert_eq!(model.read().expect("read").value, 20);
}

#[test]
fn named_transition_is_applied_through_store() {
    let store = KeyedStore::new();
    let model = store.model(&counter_model()).expect("model");

    model.invoke("add", 5).expect("add 5");
    model.invoke("add", -2).expect("add -2");

    let state = model.read().expect("read");
    assert_eq!(state.value, 3);
    assert_eq!(state.history, vec![5, -2]);

    store
        .invoke_transition(model.key(), "reset", serde_json::Value::Null)
        .expect("reset");
    assert_eq!(*model.read().expect("read"), Counter::default());
}

#[test]
fn unknown_transition_fails_and_leaves_state_untouched() {
    let store = KeyedStore::new();
    let model = store.model(&counter_model()).expect("model");
    model.invoke("add", 1).expect("add");

    let err = model.invoke("unknownOp", ()).expect_err("should fail");

    assert!(matches!(
        err,
        ModelError::UnknownTransition { ref transition, .. } if transition == "unknownOp"
    ));
    assert_eq!(err.code(), ErrorCode::UnknownTransition);
    assert_eq!(model.revision().expect("revision"), 1);
}

#[test]
fn set_state_is_not_reachable_as_a_named_transition() {
    let store = KeyedStore::new();
    let model = store.model(&counter_model()).expect("model");

    let err = model
        .invoke("set_state", serde_json::json!({ "value": 1 }))
        .expect_err("reserved");
    assert_eq!(err.code(), ErrorCode::UnknownTransition);
}

#[test]
fn invalid_transition_args_are_rejected() {
    let store = KeyedStore::new();
    let model = store.model(&counter_model()).expect("model");

    let err = model.invoke("add", "not a number").expect_err("bad args");

    assert!(matches!(err, ModelError::InvalidTransitionArgs { .. }));
    assert_eq!(model.revision().expect("revision"), 0);
}

#[test]
fn reserved_and_repeated_transition_names_are_rejected_at_definition_time() {
    let reserved = ModelDefinition::builder("counter", Counter::default())
        .transition("set_state", |state: &Counter, (): ()| state.clone())
        .expect_err("reserved");
    assert_eq!(reserved.code(), ErrorCode::DuplicateRegistration);

    let repeated = ModelDefinition::builder("counter", Counter::default())
        .transition("add", |state: &Counter, (): ()| state.clone())
        .expect("first")
        .transition("add", |state: &Counter, (): ()| state.clone())
        .expect_err("second");
    assert!(matches!(
        repeated,
        ModelError::DuplicateRegistration { ref name, .. } if name == "add"
    ));
}

#[test]
fn definitions_sharing_a_name_get_distinct_keys_and_state() {
    let store = KeyedStore::new();
    let first = store.model(&counter_model()).expect("first");
    let second = store.model(&counter_model()).expect("second");

    assert_ne!(first.key(), second.key());
    first.invoke("add", 7).expect("add");

    assert_eq!(first.read().expect("first").value, 7);
    assert_eq!(second.read().expect("second").value, 0);
}

#[test]
fn registering_same_definition_twice_is_idempotent_but_key_collision_is_not() {
    let store = KeyedStore::new();
    let definition = ModelDefinition::builder("counter", Counter::default())
        .with_key(ModelKey(42))
        .build();
    store.register(&definition).expect("first");
    store.register(&definition).expect("again");

    let impostor = ModelDefinition::builder("other", Counter::default())
        .with_key(ModelKey(42))
        .build();
    let err = store.register(&impostor).expect_err("collision");

    assert!(matches!(err, ModelError::DuplicateModelKey { key, .. } if key == ModelKey(42)));
    assert_eq!(err.code(), ErrorCode::DuplicateRegistration);
}

#[test]
fn handle_outliving_store_reports_missing_subtree() {
    let store = KeyedStore::new();
    let model = store.model(&counter_model()).expect("model");
    drop(store);

    let read_err = model.read().expect_err("store gone");
    let write_err = model.invoke("add", 1).expect_err("store gone");

    assert_eq!(read_err.code(), ErrorCode::MissingStoreSubtree);
    assert_eq!(write_err.code(), ErrorCode::MissingStoreSubtree);
}

#[test]
fn store_level_access_requires_registration_and_matching_type() {
    let store = KeyedStore::new();
    let definition = counter_model();

    let err = store.read(definition.key()).expect_err("unregistered");
    assert!(matches!(err, ModelError::UnregisteredModel { .. }));

    store.register(&definition).expect("register");
    let err = store
        .write::<String>(definition.key(), String::from("wrong"))
        .expect_err("type mismatch");
    assert!(matches!(err, ModelError::StateTypeMismatch { .. }));

    let err = store
        .dispatch(Mutation {
            target_key: definition.key(),
            op: MutationOp::Replace(Arc::new(3_u8)),
        })
        .expect_err("type mismatch");
    assert!(matches!(err, ModelError::StateTypeMismatch { .. }));
}

#[test]
fn transitions_are_pure_with_respect_to_their_input() {
    let definition = counter_model();
    let state = Counter {
        value: 1,
        history: vec![1],
    };

    let first = definition.evaluate(&state, "add", 4).expect("first");
    let second = definition.evaluate(&state, "add", 4).expect("second");

    assert_eq!(first, second);
    assert_eq!(
        state,
        Counter {
            value: 1,
            history: vec![1],
        }
    );
    assert_eq!(definition.transition_names(), vec!["add", "reset"]);
}

#[tokio::test]
async fn subscribers_only_see_commits_for_their_key() {
    let store = KeyedStore::new();
    let watched = store.model(&counter_model()).expect("watched");
    let other = store.model(&counter_model()).expect("other");
    let mut subscription = watched.subscribe().expect("subscribe");

    other.invoke("add", 1).expect("other add");
    watched.invoke("add", 2).expect("watched add");

    let event = timeout(Duration::from_secs(1), subscription.changed())
        .await
        .expect("event in time")
        .expect("store alive");
    assert_eq!(event.target_key, watched.key());
    assert_eq!(event.kind, MutationKind::NamedTransition);
    assert_eq!(event.transition.as_deref(), Some("add"));
    assert_eq!(event.revision, 1);
}

#[tokio::test]
async fn concurrent_writers_never_lose_updates() {
    let store = KeyedStore::new();
    let model = store.model(&counter_model()).expect("model");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let model = model.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                model.invoke("add", 1).expect("add");
            }
        }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    assert_eq!(model.read().expect("read").value, 400);
    assert_eq!(model.revision().expect("revision"), 400);
}

#[test]
fn replace_events_are_reported_with_replace_kind() {
    let store = KeyedStore::new();
    let model = store
        .model(
            &ModelDefinition::builder("scores", BTreeMap::<String, u32>::new()).build(),
        )
        .expect("model");
    let mut events = store.subscribe();

    model
        .set_state(BTreeMap::from([("ada".to_string(), 3)]))
        .expect("replace");

    let event = events.try_recv().expect("event");
    assert_eq!(event.kind, MutationKind::Replace);
    assert_eq!(event.transition, None);
    assert_eq!(model.read().expect("read").get("ada"), Some(&3));
}
