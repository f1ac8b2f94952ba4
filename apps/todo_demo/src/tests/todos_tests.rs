use super::*;

use std::sync::Mutex;

use action_core::{Phase, RerunHandle, RunOptions, Settlement};

/// Error-handler calls as `(action, message, toast)`.
type Spy = Arc<Mutex<Vec<(String, String, Option<String>)>>>;

fn seed() -> Vec<Todo> {
    vec![
        Todo {
            id: 1,
            text: "Do the laundry".into(),
            completed: true,
        },
        Todo {
            id: 2,
            text: "Call mom".into(),
            completed: false,
        },
    ]
}

fn client() -> Arc<dyn TodosClient> {
    Arc::new(SimulatedTodosClient::new(Duration::ZERO, "error", seed()))
}

fn spying_config(spy: &Spy) -> SupervisorConfig {
    let spy = Arc::clone(spy);
    SupervisorConfig::new().on_error(move |action, error, options, _: RerunHandle| {
        let toast = options
            .get("toast")
            .and_then(|value| value.as_str())
            .map(str::to_string);
        spy.lock()
            .expect("spy lock")
            .push((action.to_string(), error.message(), toast));
    })
}

#[test]
fn todo_transitions_edit_by_id() {
    let model = todos_model().expect("model");
    let empty = model.default_state().expect("default");

    let added = model
        .evaluate(&empty, "add_todo", (3_u64, "Water plants"))
        .expect("add");
    let completed = model
        .evaluate(&added, "complete_todo", 3_u64)
        .expect("complete");
    assert!(completed[&3].completed);

    let undone = model.evaluate(&completed, "undo_todo", 3_u64).expect("undo");
    assert!(!undone[&3].completed);

    let renamed = model
        .evaluate(&undone, "update_todo_text", (3_u64, "Water all plants"))
        .expect("rename");
    assert_eq!(renamed[&3].text, "Water all plants");

    let deleted = model.evaluate(&renamed, "delete_todo", 3_u64).expect("delete");
    assert!(deleted.is_empty());

    let untouched = model
        .evaluate(&empty, "complete_todo", 99_u64)
        .expect("unknown id");
    assert!(untouched.is_empty());
}

#[test]
fn model_exposes_exactly_the_todo_transitions() {
    let model = todos_model().expect("model");
    assert_eq!(
        model.transition_names(),
        vec![
            "add_todo",
            "complete_todo",
            "delete_todo",
            "undo_todo",
            "update_todo_text"
        ]
    );
}

#[tokio::test]
async fn simulated_client_rejects_failure_text_and_numbers_after_seed() {
    let client = SimulatedTodosClient::new(Duration::ZERO, "error", seed());

    let created = client.create("Buy milk").await.expect("create");
    assert_eq!(created.id, 3);

    let err = client.create("error").await.expect_err("rejected");
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::Rejected { text }) if text == "error"
    ));
}

#[tokio::test]
async fn fetch_replaces_model_state_keyed_by_id() {
    let store = KeyedStore::new();
    let screen = TodoScreen::mount(&store, client(), SupervisorConfig::new()).expect("mount");

    assert!(!screen.summary().should_render_content());
    let settlement = screen
        .fetch_todos
        .run((), RunOptions::default())
        .await
        .expect("fetch");

    assert_eq!(settlement, Settlement::Succeeded);
    let todos = screen.todos().read().expect("todos");
    assert_eq!(todos.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert!(todos[&1].completed);
    assert!(!screen.summary().is_loading);
}

#[tokio::test]
async fn created_todo_is_added_through_transition_and_can_be_edited() {
    let store = KeyedStore::new();
    let screen = TodoScreen::mount(&store, client(), SupervisorConfig::new()).expect("mount");
    screen
        .fetch_todos
        .run((), RunOptions::default())
        .await
        .expect("fetch");

    screen
        .create_todo
        .run("Water plants".to_string(), RunOptions::clear())
        .await
        .expect("create");
    let created = screen
        .create_todo
        .snapshot()
        .shared_response()
        .expect("created todo");

    screen.complete(created.id).expect("complete");
    screen.rename(created.id, "Water all plants").expect("rename");
    let todos = screen.todos().read().expect("todos");
    assert_eq!(todos.len(), 3);
    assert!(todos[&created.id].completed);
    assert_eq!(todos[&created.id].text, "Water all plants");

    screen.undo(created.id).expect("undo");
    screen.delete(1).expect("delete");
    let todos = screen.todos().read().expect("todos");
    assert!(!todos[&created.id].completed);
    assert!(!todos.contains_key(&1));
}

#[tokio::test]
async fn failed_create_reports_toast_and_leaves_model_alone() {
    let spy = Spy::default();
    let store = KeyedStore::new();
    let screen = TodoScreen::mount(&store, client(), spying_config(&spy)).expect("mount");
    let revision = screen.todos().revision().expect("revision");

    let settlement = screen
        .create_todo
        .run("error".to_string(), RunOptions::clear())
        .await
        .expect("create");

    assert_eq!(settlement, Settlement::Failed);
    let snapshot = screen.create_todo.snapshot();
    assert_eq!(snapshot.phase(), Phase::Failed);
    assert_eq!(
        spy.lock().expect("spy lock").clone(),
        vec![(
            "create_todo".to_string(),
            "Error adding the todo `error`".to_string(),
            Some("Could not add the todo".to_string())
        )]
    );
    assert_eq!(screen.todos().revision().expect("revision"), revision);
}

#[tokio::test]
async fn unmounted_screen_ignores_late_responses() {
    let store = KeyedStore::new();
    let slow = Arc::new(SimulatedTodosClient::new(
        Duration::from_millis(20),
        "error",
        seed(),
    ));
    let screen = TodoScreen::mount(&store, slow, SupervisorConfig::new()).expect("mount");
    let todos = screen.todos().clone();

    let pending = screen.fetch_todos.spawn((), RunOptions::default());
    screen.unmount();

    assert_eq!(
        pending.await.expect("join").expect("run"),
        Settlement::Discarded
    );
    assert!(todos.read().expect("todos").is_empty());
}

#[test]
fn render_marks_completed_todos() {
    let todos = seed()
        .into_iter()
        .map(|todo| (todo.id, todo))
        .collect::<Todos>();
    assert_eq!(
        render(&todos),
        "[x] #1 Do the laundry\n[ ] #2 Call mom\n"
    );
}
