use std::{collections::HashSet, fmt, sync::Arc};

use futures::{
    future::{self, BoxFuture},
    FutureExt,
};
use parking_lot::Mutex;
use shared::domain::{is_reserved_name, InvocationId, Phase};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error};

use crate::{
    config::{RerunHandle, SupervisorConfig},
    definition::{ActionDef, AfterHook},
    derived::{ActionStatus, LoadingSummary},
    ActionFailure, ActionOptions, CancelHandle, Operation, OperationError, RunOptions,
    Settlement, SupervisorError,
};

/// Observable state of one action.
///
/// `phase` is derived from the other fields and never stored on its own.
pub struct ActionSnapshot<R> {
    name: &'static str,
    in_flight: Option<InvocationId>,
    last_response: Option<Arc<R>>,
    last_error: Option<ActionFailure>,
}

impl<R> Clone for ActionSnapshot<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            in_flight: self.in_flight,
            last_response: self.last_response.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for ActionSnapshot<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSnapshot")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .field("last_response", &self.last_response)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<R> ActionSnapshot<R> {
    fn idle(name: &'static str) -> Self {
        Self {
            name,
            in_flight: None,
            last_response: None,
            last_error: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phase(&self) -> Phase {
        if self.in_flight.is_some() {
            Phase::Loading
        } else if self.last_error.is_some() {
            Phase::Failed
        } else if self.last_response.is_some() {
            Phase::Succeeded
        } else {
            Phase::Idle
        }
    }

    pub fn in_flight(&self) -> Option<InvocationId> {
        self.in_flight
    }

    pub fn response(&self) -> Option<&R> {
        self.last_response.as_deref()
    }

    pub fn shared_response(&self) -> Option<Arc<R>> {
        self.last_response.clone()
    }

    pub fn error(&self) -> Option<&ActionFailure> {
        self.last_error.as_ref()
    }
}

impl<R> ActionStatus for ActionSnapshot<R> {
    fn phase(&self) -> Phase {
        ActionSnapshot::phase(self)
    }

    fn has_response(&self) -> bool {
        self.last_response.is_some()
    }

    fn has_error(&self) -> bool {
        self.last_error.is_some()
    }
}

/// Type-erased view the supervisor keeps of each of its actions.
trait SupervisedAction: Send + Sync {
    fn name(&self) -> &'static str;
    fn status(&self) -> &dyn ActionStatus;
    fn teardown(&self);
}

struct SlotState {
    live: Option<CancelHandle>,
    issued: u64,
    torn_down: bool,
}

impl SlotState {
    fn is_current(&self, invocation: InvocationId) -> bool {
        !self.torn_down
            && self
                .live
                .as_ref()
                .is_some_and(|live| live.invocation() == invocation)
    }
}

struct ActionSlot<C, P, R> {
    name: &'static str,
    operation: Arc<dyn Operation<C, P, R>>,
    after: Option<AfterHook<C, P, R>>,
    options: ActionOptions,
    context: Arc<C>,
    config: SupervisorConfig,
    state: Mutex<SlotState>,
    snapshot: watch::Sender<ActionSnapshot<R>>,
}

impl<C, P, R> ActionSlot<C, P, R>
where
    C: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Supersedes any in-flight invocation and marks the action loading.
    fn begin(&self, options: RunOptions) -> Result<CancelHandle, SupervisorError> {
        let mut state = self.state.lock();
        if state.torn_down {
            return Err(SupervisorError::TornDown { action: self.name });
        }

        if let Some(previous) = state.live.take() {
            previous.cancel();
            debug!(
                action = self.name,
                invocation = %previous.invocation(),
                "action: superseded in-flight invocation"
            );
        }

        state.issued += 1;
        let handle = CancelHandle::new(
            self.name,
            InvocationId(state.issued),
            self.config.issue_token(),
        );
        state.live = Some(handle.clone());

        let invocation = handle.invocation();
        self.snapshot.send_modify(|snapshot| {
            snapshot.in_flight = Some(invocation);
            if options.clear {
                snapshot.last_response = None;
                snapshot.last_error = None;
            }
        });
        debug!(
            action = self.name,
            invocation = %invocation,
            clear = options.clear,
            "action: started"
        );

        Ok(handle)
    }

    async fn drive(
        self: Arc<Self>,
        mut pending: PendingInvocation<C, P, R>,
        params: P,
        options: RunOptions,
    ) -> Result<Settlement, SupervisorError> {
        let handle = pending.handle.clone();
        let outcome = self
            .operation
            .call(handle.clone(), Arc::clone(&self.context), params.clone())
            .await;
        pending.settled = true;

        let failure = {
            let mut state = self.state.lock();
            if !state.is_current(handle.invocation()) {
                debug!(
                    action = self.name,
                    invocation = %handle.invocation(),
                    torn_down = state.torn_down,
                    "action: discarded stale completion"
                );
                return Ok(Settlement::Discarded);
            }

            if handle.is_cancelled() {
                state.live = None;
                self.snapshot
                    .send_modify(|snapshot| snapshot.in_flight = None);
                debug!(
                    action = self.name,
                    invocation = %handle.invocation(),
                    code = ?outcome.as_ref().err().map(OperationError::code),
                    "action: cancelled, result dropped"
                );
                return Ok(Settlement::Discarded);
            }

            let failure = match outcome {
                Ok(response) => {
                    if let Some(after) = &self.after {
                        if let Err(source) = after(&response, &params, self.context.as_ref()) {
                            state.live = None;
                            self.snapshot
                                .send_modify(|snapshot| snapshot.in_flight = None);
                            return Err(SupervisorError::AfterHook {
                                action: self.name,
                                source,
                            });
                        }
                    }

                    state.live = None;
                    self.snapshot.send_modify(|snapshot| {
                        snapshot.in_flight = None;
                        snapshot.last_response = Some(Arc::new(response));
                        snapshot.last_error = None;
                    });
                    debug!(
                        action = self.name,
                        invocation = %handle.invocation(),
                        "action: succeeded"
                    );
                    return Ok(Settlement::Succeeded);
                }
                Err(OperationError::Cancelled) => ActionFailure::new(anyhow::anyhow!(
                    "operation of action `{}` reported cancellation but its handle was not cancelled",
                    self.name
                )),
                Err(OperationError::Failed(source)) => ActionFailure::new(source),
            };

            state.live = None;
            self.snapshot.send_modify(|snapshot| {
                snapshot.in_flight = None;
                snapshot.last_error = Some(failure.clone());
            });
            debug!(
                action = self.name,
                invocation = %handle.invocation(),
                error = %failure,
                "action: failed"
            );
            failure
        };

        self.report_failure(&failure, params, options);
        Ok(Settlement::Failed)
    }

    fn report_failure(
        self: &Arc<Self>,
        failure: &ActionFailure,
        params: P,
        options: RunOptions,
    ) {
        if self.state.lock().torn_down {
            debug!(
                action = self.name,
                error = %failure,
                "action: torn down before the failure was reported"
            );
            return;
        }

        match self.config.error_handler() {
            Some(handler) => {
                let rerun = self.rerun_handle(params, options);
                handler.handle(self.name, failure, &self.options, rerun);
            }
            None => {
                error!(
                    action = self.name,
                    error = %failure,
                    "action: operation failed with no error handler configured"
                );
            }
        }
    }

    fn rerun_handle(self: &Arc<Self>, params: P, options: RunOptions) -> RerunHandle {
        let action = Action {
            slot: Arc::clone(self),
        };
        RerunHandle::new(self.name, move || action.run(params.clone(), options))
    }
}

impl<C, P, R> ActionSlot<C, P, R> {
    /// Releases `handle` if it is still the live one. Used when the future
    /// driving an invocation is dropped before the operation settles.
    fn abandon(&self, handle: &CancelHandle) {
        let mut state = self.state.lock();
        let live = state
            .live
            .as_ref()
            .is_some_and(|live| live.invocation() == handle.invocation());
        if !live {
            return;
        }

        state.live = None;
        handle.cancel();
        self.snapshot.send_modify(|snapshot| snapshot.in_flight = None);
        debug!(
            action = self.name,
            invocation = %handle.invocation(),
            "action: invocation dropped before settling"
        );
    }
}

/// An invocation that has begun but whose operation has not returned yet.
struct PendingInvocation<C, P, R> {
    slot: Arc<ActionSlot<C, P, R>>,
    handle: CancelHandle,
    settled: bool,
}

impl<C, P, R> Drop for PendingInvocation<C, P, R> {
    fn drop(&mut self) {
        if !self.settled {
            self.slot.abandon(&self.handle);
        }
    }
}

impl<C, P, R> ActionStatus for ActionSlot<C, P, R> {
    fn phase(&self) -> Phase {
        self.snapshot.borrow().phase()
    }

    fn has_response(&self) -> bool {
        self.snapshot.borrow().has_response()
    }

    fn has_error(&self) -> bool {
        self.snapshot.borrow().has_error()
    }
}

impl<C, P, R> SupervisedAction for ActionSlot<C, P, R>
where
    C: Send + Sync,
    P: Send + Sync,
    R: Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn status(&self) -> &dyn ActionStatus {
        self
    }

    fn teardown(&self) {
        let mut state = self.state.lock();
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        if let Some(live) = state.live.take() {
            live.cancel();
            debug!(
                action = self.name,
                invocation = %live.invocation(),
                "action: cancelled on teardown"
            );
        }
    }
}

/// Typed, identity-stable handle used to run one named action.
///
/// Clones refer to the same action; see [`Action::same_action`].
pub struct Action<C, P, R> {
    slot: Arc<ActionSlot<C, P, R>>,
}

impl<C, P, R> Clone for Action<C, P, R> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<C, P, R> fmt::Debug for Action<C, P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.slot.name)
            .finish()
    }
}

impl<C, P, R> Action<C, P, R>
where
    C: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn name(&self) -> &'static str {
        self.slot.name
    }

    pub fn options(&self) -> &ActionOptions {
        &self.slot.options
    }

    /// Starts a new invocation.
    ///
    /// The start happens before this returns: any in-flight invocation of the
    /// same action is cancelled and the action is marked loading (with retained
    /// data dropped when `options.clear` is set). The returned future awaits the
    /// operation and applies its result unless it was superseded or cancelled in
    /// between. Dropping the future before it settles cancels the invocation and
    /// releases its loading state.
    pub fn run(
        &self,
        params: P,
        options: RunOptions,
    ) -> BoxFuture<'static, Result<Settlement, SupervisorError>> {
        match self.slot.begin(options) {
            Ok(handle) => {
                let pending = PendingInvocation {
                    slot: Arc::clone(&self.slot),
                    handle,
                    settled: false,
                };
                Arc::clone(&self.slot)
                    .drive(pending, params, options)
                    .boxed()
            }
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    /// Starts a new invocation and drives it on the tokio runtime.
    pub fn spawn(
        &self,
        params: P,
        options: RunOptions,
    ) -> JoinHandle<Result<Settlement, SupervisorError>> {
        tokio::spawn(self.run(params, options))
    }

    pub fn snapshot(&self) -> ActionSnapshot<R> {
        self.slot.snapshot.borrow().clone()
    }

    /// Receiver that is notified on every observable state change.
    pub fn subscribe(&self) -> watch::Receiver<ActionSnapshot<R>> {
        self.slot.snapshot.subscribe()
    }

    pub fn same_action(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.slot.state.lock().torn_down
    }
}

impl<C, P, R> ActionStatus for Action<C, P, R> {
    fn phase(&self) -> Phase {
        self.slot.phase()
    }

    fn has_response(&self) -> bool {
        self.slot.has_response()
    }

    fn has_error(&self) -> bool {
        self.slot.has_error()
    }
}

/// Declares the actions of one supervisor. Names are validated here, once.
pub struct SupervisorBuilder<C> {
    context: Arc<C>,
    config: SupervisorConfig,
    reserved: HashSet<String>,
    names: Vec<&'static str>,
    actions: Vec<Arc<dyn SupervisedAction>>,
}

impl<C> SupervisorBuilder<C>
where
    C: Send + Sync + 'static,
{
    /// Reserves additional names, typically the transition names of a model
    /// the actions share a namespace with.
    pub fn reserve_names<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.reserved.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn action<P, R>(
        &mut self,
        name: &'static str,
        definition: ActionDef<C, P, R>,
    ) -> Result<Action<C, P, R>, SupervisorError>
    where
        P: Clone + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(SupervisorError::EmptyName);
        }
        if is_reserved_name(name) || self.reserved.contains(name) {
            return Err(SupervisorError::ReservedName(name.to_string()));
        }
        if self.names.contains(&name) {
            return Err(SupervisorError::DuplicateAction(name.to_string()));
        }

        let normalized = definition.normalize();
        let (snapshot, _) = watch::channel(ActionSnapshot::idle(name));
        let slot = Arc::new(ActionSlot {
            name,
            operation: normalized.operation,
            after: normalized.after,
            options: normalized.options,
            context: Arc::clone(&self.context),
            config: self.config.clone(),
            state: Mutex::new(SlotState {
                live: None,
                issued: 0,
                torn_down: false,
            }),
            snapshot,
        });

        self.names.push(name);
        self.actions.push(Arc::clone(&slot) as Arc<dyn SupervisedAction>);
        Ok(Action { slot })
    }

    pub fn build(self) -> ActionSupervisor<C> {
        debug!(actions = ?self.names, "supervisor: configured");
        ActionSupervisor {
            context: self.context,
            names: self.names,
            actions: self.actions,
        }
    }
}

/// Owns a fixed set of named actions and their in-flight invocations.
///
/// Dropping the supervisor tears it down: every live cancel handle is
/// cancelled and late completions are discarded without touching state or
/// calling hooks.
pub struct ActionSupervisor<C> {
    context: Arc<C>,
    names: Vec<&'static str>,
    actions: Vec<Arc<dyn SupervisedAction>>,
}

impl<C> ActionSupervisor<C>
where
    C: Send + Sync + 'static,
{
    /// Builder using the process-wide default config.
    pub fn builder(context: C) -> SupervisorBuilder<C> {
        Self::builder_with_config(context, SupervisorConfig::process_default())
    }

    pub fn builder_with_config(context: C, config: SupervisorConfig) -> SupervisorBuilder<C> {
        SupervisorBuilder {
            context: Arc::new(context),
            config,
            reserved: HashSet::new(),
            names: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn action_names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn phase_of(&self, name: &str) -> Option<Phase> {
        self.actions
            .iter()
            .find(|action| action.name() == name)
            .map(|action| action.status().phase())
    }

    /// Aggregate over every action owned by this supervisor.
    pub fn loading_summary(&self) -> LoadingSummary {
        let statuses = self
            .actions
            .iter()
            .map(|action| action.status())
            .collect::<Vec<_>>();
        LoadingSummary::of(&statuses)
    }

    pub fn teardown(&self) {
        for action in &self.actions {
            action.teardown();
        }
    }
}

impl<C> Drop for ActionSupervisor<C> {
    fn drop(&mut self) {
        for action in &self.actions {
            action.teardown();
        }
    }
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
