//! Re-running an action when selected inputs change.

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{Action, RunOptions, SupervisorError};

impl<C, P, R> Action<C, P, R>
where
    C: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Runs the action for the current inputs, then again every time the key
    /// selected from them changes. Updates that leave the key equal do not
    /// re-run it.
    ///
    /// Runs are not awaited by the watcher, so a change arriving while a run is
    /// in flight supersedes it. The watcher stops once the input sender is
    /// dropped or the supervisor is torn down.
    pub fn run_on_change<S, K, KF, PF>(
        &self,
        mut inputs: watch::Receiver<S>,
        key: KF,
        params: PF,
    ) -> JoinHandle<()>
    where
        S: Send + Sync + 'static,
        K: PartialEq + Send + 'static,
        KF: Fn(&S) -> K + Send + 'static,
        PF: Fn(&S) -> P + Send + 'static,
    {
        let action = self.clone();
        tokio::spawn(async move {
            let (mut last, first) = {
                let current = inputs.borrow_and_update();
                (key(&current), params(&current))
            };
            if !action.start_detached(first) {
                return;
            }

            while inputs.changed().await.is_ok() {
                let next = {
                    let current = inputs.borrow_and_update();
                    let selected = key(&current);
                    if selected == last {
                        None
                    } else {
                        last = selected;
                        Some(params(&current))
                    }
                };
                if let Some(next) = next {
                    if !action.start_detached(next) {
                        return;
                    }
                }
            }
            debug!(action = action.name(), "trigger: inputs closed");
        })
    }

    /// Returns `false` once the action can no longer run.
    fn start_detached(&self, params: P) -> bool {
        if self.is_torn_down() {
            debug!(action = self.name(), "trigger: supervisor torn down");
            return false;
        }

        let name = self.name();
        let run = self.run(params, RunOptions::default());
        tokio::spawn(async move {
            match run.await {
                Ok(_) => {}
                Err(SupervisorError::TornDown { .. }) => {
                    debug!(action = name, "trigger: supervisor torn down");
                }
                Err(err) => warn!(action = name, error = %err, "trigger: run failed"),
            }
        });
        true
    }
}
