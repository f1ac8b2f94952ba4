use std::{
    collections::BTreeMap,
    fmt::Write as _,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use action_core::{
    Action, ActionDef, ActionOptions, ActionSupervisor, CancelHandle, LoadingSummary,
    OperationError, SupervisorConfig,
};
use async_trait::async_trait;
use model_store::{KeyedStore, ModelDefinition, ModelError, ModelHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub type TodoId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: TodoId,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

pub type Todos = BTreeMap<TodoId, Todo>;

fn with_todo(todos: &Todos, id: TodoId, edit: impl FnOnce(&mut Todo)) -> Todos {
    let mut next = todos.clone();
    if let Some(todo) = next.get_mut(&id) {
        edit(todo);
    }
    next
}

/// Todo list keyed by id. Edits to unknown ids leave the list unchanged.
pub fn todos_model() -> Result<ModelDefinition<Todos>, ModelError> {
    Ok(ModelDefinition::builder("todos", Todos::new())
        .transition("add_todo", |todos: &Todos, (id, text): (TodoId, String)| {
            let mut next = todos.clone();
            next.insert(
                id,
                Todo {
                    id,
                    text,
                    completed: false,
                },
            );
            next
        })?
        .transition("complete_todo", |todos: &Todos, id: TodoId| {
            with_todo(todos, id, |todo| todo.completed = true)
        })?
        .transition("undo_todo", |todos: &Todos, id: TodoId| {
            with_todo(todos, id, |todo| todo.completed = false)
        })?
        .transition(
            "update_todo_text",
            |todos: &Todos, (id, text): (TodoId, String)| {
                with_todo(todos, id, |todo| todo.text = text)
            },
        )?
        .transition("delete_todo", |todos: &Todos, id: TodoId| {
            let mut next = todos.clone();
            next.remove(&id);
            next
        })?
        .build())
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Error adding the todo `{text}`")]
    Rejected { text: String },
}

/// Backend the todo screen talks to.
#[async_trait]
pub trait TodosClient: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<Todo>>;
    async fn create(&self, text: &str) -> anyhow::Result<Todo>;
}

/// In-memory backend with a fixed latency. Creating a todo whose text equals
/// `failure_text` is rejected.
pub struct SimulatedTodosClient {
    latency: Duration,
    failure_text: String,
    seed: Vec<Todo>,
    next_id: AtomicU64,
}

impl SimulatedTodosClient {
    pub fn new(latency: Duration, failure_text: impl Into<String>, seed: Vec<Todo>) -> Self {
        let next_id = seed.iter().map(|todo| todo.id).max().unwrap_or(0) + 1;
        Self {
            latency,
            failure_text: failure_text.into(),
            seed,
            next_id: AtomicU64::new(next_id),
        }
    }
}

#[async_trait]
impl TodosClient for SimulatedTodosClient {
    async fn list(&self) -> anyhow::Result<Vec<Todo>> {
        tokio::time::sleep(self.latency).await;
        debug!(count = self.seed.len(), "client: listed todos");
        Ok(self.seed.clone())
    }

    async fn create(&self, text: &str) -> anyhow::Result<Todo> {
        tokio::time::sleep(self.latency).await;
        if text == self.failure_text {
            return Err(ClientError::Rejected {
                text: text.to_string(),
            }
            .into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, text, "client: created todo");
        Ok(Todo {
            id,
            text: text.to_string(),
            completed: false,
        })
    }
}

pub struct TodoContext {
    pub client: Arc<dyn TodosClient>,
    pub todos: ModelHandle<Todos>,
}

async fn list_todos(
    cancel: CancelHandle,
    context: Arc<TodoContext>,
    _: (),
) -> Result<Vec<Todo>, OperationError> {
    tokio::select! {
        listed = context.client.list() => Ok(listed?),
        _ = cancel.cancelled() => Err(OperationError::Cancelled),
    }
}

async fn submit_todo(
    cancel: CancelHandle,
    context: Arc<TodoContext>,
    text: String,
) -> Result<Todo, OperationError> {
    tokio::select! {
        created = context.client.create(&text) => Ok(created?),
        _ = cancel.cancelled() => Err(OperationError::Cancelled),
    }
}

fn replace_todos(listed: &Vec<Todo>, _: &(), context: &TodoContext) -> anyhow::Result<()> {
    let keyed = listed
        .iter()
        .map(|todo| (todo.id, todo.clone()))
        .collect::<Todos>();
    context.todos.set_state(keyed)?;
    Ok(())
}

fn insert_created(created: &Todo, _: &String, context: &TodoContext) -> anyhow::Result<()> {
    context
        .todos
        .invoke("add_todo", (created.id, created.text.as_str()))?;
    Ok(())
}

/// The todo screen: the todos model plus the two actions that feed it.
///
/// Dropping the screen tears its supervisor down.
pub struct TodoScreen {
    supervisor: ActionSupervisor<TodoContext>,
    pub fetch_todos: Action<TodoContext, (), Vec<Todo>>,
    pub create_todo: Action<TodoContext, String, Todo>,
}

impl TodoScreen {
    pub fn mount(
        store: &KeyedStore,
        client: Arc<dyn TodosClient>,
        config: SupervisorConfig,
    ) -> anyhow::Result<Self> {
        let definition = todos_model()?;
        let todos = store.model(&definition)?;
        let transitions = definition
            .transition_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut builder =
            ActionSupervisor::builder_with_config(TodoContext { client, todos }, config)
                .reserve_names(transitions);
        let fetch_todos =
            builder.action("fetch_todos", ActionDef::plain(list_todos).after(replace_todos))?;
        let create_todo = builder.action(
            "create_todo",
            ActionDef::with_options(
                submit_todo,
                ActionOptions::new().with("toast", "Could not add the todo"),
            )
            .after(insert_created),
        )?;

        Ok(Self {
            supervisor: builder.build(),
            fetch_todos,
            create_todo,
        })
    }

    pub fn todos(&self) -> &ModelHandle<Todos> {
        &self.supervisor.context().todos
    }

    pub fn summary(&self) -> LoadingSummary {
        self.supervisor.loading_summary()
    }

    pub fn complete(&self, id: TodoId) -> Result<u64, ModelError> {
        self.todos().invoke("complete_todo", id)
    }

    pub fn undo(&self, id: TodoId) -> Result<u64, ModelError> {
        self.todos().invoke("undo_todo", id)
    }

    pub fn rename(&self, id: TodoId, text: &str) -> Result<u64, ModelError> {
        self.todos().invoke("update_todo_text", (id, text))
    }

    pub fn delete(&self, id: TodoId) -> Result<u64, ModelError> {
        self.todos().invoke("delete_todo", id)
    }

    pub fn unmount(self) {
        self.supervisor.teardown();
    }
}

pub fn render(todos: &Todos) -> String {
    let mut out = String::new();
    for todo in todos.values() {
        let mark = if todo.completed { 'x' } else { ' ' };
        let _ = writeln!(out, "[{mark}] #{} {}", todo.id, todo.text);
    }
    out
}

#[cfg(test)]
#[path = "tests/todos_tests.rs"]
mod tests;
