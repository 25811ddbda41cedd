//! Callback Dispatcher
//!
//! Delivers role-change notifications to the host. Owned by a single
//! coordinator and driven through `&mut self`, so callbacks are delivered
//! one at a time and in order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Invoked once per acquisition with a token cancelled on demotion
pub type StartedLeadingFn = Arc<dyn Fn(CancellationToken) + Send + Sync>;
/// Invoked once per demotion
pub type StoppedLeadingFn = Arc<dyn Fn() + Send + Sync>;
/// Invoked when the observed leader changes to a new identity
pub type NewLeaderFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Host callbacks for leadership changes.
///
/// Callbacks run on the election task and must return promptly. Work that
/// should run while leading belongs in a task spawned from
/// `on_started_leading`, watching the token it receives.
#[derive(Clone)]
pub struct LeaderCallbacks {
    on_started_leading: StartedLeadingFn,
    on_stopped_leading: StoppedLeadingFn,
    on_new_leader: Option<NewLeaderFn>,
}

impl LeaderCallbacks {
    pub fn new<S, T>(on_started_leading: S, on_stopped_leading: T) -> Self
    where
        S: Fn(CancellationToken) + Send + Sync + 'static,
        T: Fn() + Send + Sync + 'static,
    {
        Self {
            on_started_leading: Arc::new(on_started_leading),
            on_stopped_leading: Arc::new(on_stopped_leading),
            on_new_leader: None,
        }
    }

    /// Also report leader changes, including this participant becoming leader
    pub fn on_new_leader<F>(mut self, on_new_leader: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_new_leader = Some(Arc::new(on_new_leader));
        self
    }
}

impl std::fmt::Debug for LeaderCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderCallbacks")
            .field("on_new_leader", &self.on_new_leader.is_some())
            .finish_non_exhaustive()
    }
}

/// De-duplicating, sequential delivery of [`LeaderCallbacks`]
#[derive(Debug)]
pub(crate) struct Dispatcher {
    callbacks: LeaderCallbacks,
    /// Token handed to the current leading term, if leading
    leading: Option<CancellationToken>,
    last_reported_leader: Option<String>,
    closed: bool,
}

impl Dispatcher {
    pub(crate) fn new(callbacks: LeaderCallbacks) -> Self {
        Self {
            callbacks,
            leading: None,
            last_reported_leader: None,
            closed: false,
        }
    }

    pub(crate) fn is_leading(&self) -> bool {
        self.leading.is_some()
    }

    /// Start a leading term. The token is a child of `parent`, so cancelling
    /// the coordinator also cancels leader work.
    ///
    /// Returns whether the callback fired.
    pub(crate) fn started_leading(&mut self, parent: &CancellationToken) -> bool {
        if self.closed || self.leading.is_some() {
            return false;
        }
        let token = parent.child_token();
        self.leading = Some(token.clone());
        (self.callbacks.on_started_leading)(token);
        true
    }

    /// End the leading term: cancel its token, then notify.
    pub(crate) fn stopped_leading(&mut self) -> bool {
        let Some(token) = self.leading.take() else {
            return false;
        };
        token.cancel();
        if self.closed {
            return false;
        }
        (self.callbacks.on_stopped_leading)();
        true
    }

    /// Report `identity` as the observed leader if it is new and non-empty
    pub(crate) fn new_leader(&mut self, identity: &str) -> bool {
        if self.closed
            || identity.is_empty()
            || self.last_reported_leader.as_deref() == Some(identity)
        {
            return false;
        }
        self.last_reported_leader = Some(identity.to_string());
        match &self.callbacks.on_new_leader {
            Some(on_new_leader) => {
                on_new_leader(identity);
                true
            }
            None => false,
        }
    }

    /// No callbacks are delivered after this
    pub(crate) fn close(&mut self) {
        if let Some(token) = self.leading.take() {
            token.cancel();
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (LeaderCallbacks, Arc<Mutex<Vec<String>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let started = Arc::clone(&events);
        let stopped = Arc::clone(&events);
        let leader = Arc::clone(&events);
        let callbacks = LeaderCallbacks::new(
            move |_token| started.lock().unwrap().push("started".to_string()),
            move || stopped.lock().unwrap().push("stopped".to_string()),
        )
        .on_new_leader(move |id| leader.lock().unwrap().push(format!("leader:{}", id)));
        (callbacks, events)
    }

    #[test]
    fn test_started_and_stopped_alternate() {
        let (callbacks, events) = recording();
        let mut dispatcher = Dispatcher::new(callbacks);
        let parent = CancellationToken::new();

        assert!(!dispatcher.stopped_leading());
        assert!(dispatcher.started_leading(&parent));
        assert!(!dispatcher.started_leading(&parent));
        assert!(dispatcher.is_leading());
        assert!(dispatcher.stopped_leading());
        assert!(!dispatcher.stopped_leading());
        assert!(dispatcher.started_leading(&parent));

        assert_eq!(*events.lock().unwrap(), vec!["started", "stopped", "started"]);
    }

    #[test]
    fn test_leading_token_cancelled_before_stopped_callback() {
        let seen = Arc::new(Mutex::new(None::<CancellationToken>));
        let observed = Arc::new(Mutex::new(None::<bool>));
        let seen_in_start = Arc::clone(&seen);
        let seen_in_stop = Arc::clone(&seen);
        let observed_in_stop = Arc::clone(&observed);

        let callbacks = LeaderCallbacks::new(
            move |token| *seen_in_start.lock().unwrap() = Some(token),
            move || {
                let cancelled = seen_in_stop.lock().unwrap().as_ref().map(|t| t.is_cancelled());
                *observed_in_stop.lock().unwrap() = cancelled;
            },
        );
        let mut dispatcher = Dispatcher::new(callbacks);
        let parent = CancellationToken::new();
        dispatcher.started_leading(&parent);
        dispatcher.stopped_leading();

        assert_eq!(*observed.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_parent_cancellation_reaches_leader_work() {
        let (callbacks, _events) = recording();
        let mut dispatcher = Dispatcher::new(callbacks);
        let parent = CancellationToken::new();
        dispatcher.started_leading(&parent);
        let token = dispatcher.leading.clone().unwrap();

        parent.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_new_leader_is_deduplicated() {
        let (callbacks, events) = recording();
        let mut dispatcher = Dispatcher::new(callbacks);

        assert!(!dispatcher.new_leader(""));
        assert!(dispatcher.new_leader("node-a"));
        assert!(!dispatcher.new_leader("node-a"));
        assert!(dispatcher.new_leader("node-b"));
        assert!(dispatcher.new_leader("node-a"));

        assert_eq!(
            *events.lock().unwrap(),
            vec!["leader:node-a", "leader:node-b", "leader:node-a"]
        );
    }

    #[test]
    fn test_closed_dispatcher_is_silent() {
        let (callbacks, events) = recording();
        let mut dispatcher = Dispatcher::new(callbacks);
        let parent = CancellationToken::new();
        dispatcher.started_leading(&parent);
        let token = dispatcher.leading.clone().unwrap();

        dispatcher.close();
        assert!(token.is_cancelled());
        assert!(!dispatcher.started_leading(&parent));
        assert!(!dispatcher.new_leader("node-b"));
        assert!(!dispatcher.stopped_leading());
        assert_eq!(*events.lock().unwrap(), vec!["started"]);
    }
}
