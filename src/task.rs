//! Single-shot deferred results.
//!
//! A [`Task`] is the completion contract between route handlers and the
//! dispatcher. A handler may return an already-terminal task (synchronous
//! completion) or a `Waiting` task whose terminal transition happens on a
//! later tick, possibly from a different thread.
//!
//! State machine:
//!
//! ```text
//! Waiting ──finish(v)──▶ Finished(v)
//!    └─────fail(e)─────▶ Failed(e)
//! ```
//!
//! Transitions out of `Waiting` are terminal. A task carries exactly one
//! terminal-handler slot; installing a handler replaces any previous one,
//! and installing after completion fires it synchronously with the cached
//! outcome. Composition goes through `map`/`then`/`catch`/`always`, which
//! install that slot internally; callers never stack multiple observers
//! on one task.

use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::HttpError;

enum State<T> {
    Waiting,
    Finished(T),
    Failed(HttpError),
}

type Completion<T> = Box<dyn FnOnce(Result<T, HttpError>) + Send>;

struct Inner<T> {
    state: State<T>,
    handler: Option<Completion<T>>,
}

/// A single-shot deferred outcome.
///
/// Cloning a `Task` clones the handle, not the state: all clones observe
/// the same completion. Outcomes are cached, so `T` must be `Clone` to
/// replay them to late-installed handlers.
pub struct Task<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// A task in the `Waiting` state.
    pub fn pending() -> Self {
        Task {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Waiting,
                handler: None,
            })),
        }
    }

    /// An already-successful task.
    pub fn finished(value: T) -> Self {
        Task {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Finished(value),
                handler: None,
            })),
        }
    }

    /// An already-failed task.
    pub fn failed(error: HttpError) -> Self {
        Task {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Failed(error),
                handler: None,
            })),
        }
    }

    /// Complete the task successfully.
    ///
    /// # Panics
    /// Panics if the task is already terminal. Completing twice is a
    /// programmer error, not a runtime condition.
    pub fn finish(&self, value: T) {
        let handler = {
            let mut inner = self.inner.lock().expect("task lock poisoned");
            match inner.state {
                State::Waiting => {}
                _ => panic!("finish() called on a task that is already terminal"),
            }
            inner.state = State::Finished(value.clone());
            inner.handler.take()
        };
        // Fire outside the lock so the handler can touch this task again.
        if let Some(h) = handler {
            h(Ok(value));
        }
    }

    /// Complete the task with an error.
    ///
    /// # Panics
    /// Panics if the task is already terminal.
    pub fn fail(&self, error: HttpError) {
        let handler = {
            let mut inner = self.inner.lock().expect("task lock poisoned");
            match inner.state {
                State::Waiting => {}
                _ => panic!("fail() called on a task that is already terminal"),
            }
            inner.state = State::Failed(error.clone());
            inner.handler.take()
        };
        if let Some(h) = handler {
            h(Err(error));
        }
    }

    /// Install the terminal handler.
    ///
    /// Replaces any previously installed handler. If the task is already
    /// terminal the handler fires synchronously with the cached outcome;
    /// every later install fires again with the same outcome.
    pub fn when_complete<F>(&self, f: F)
    where
        F: FnOnce(Result<T, HttpError>) + Send + 'static,
    {
        let outcome = {
            let mut inner = self.inner.lock().expect("task lock poisoned");
            match &inner.state {
                State::Waiting => {
                    inner.handler = Some(Box::new(f));
                    return;
                }
                State::Finished(v) => Ok(v.clone()),
                State::Failed(e) => Err(e.clone()),
            }
        };
        f(outcome);
    }

    /// Run `f` only on success.
    pub fn on_finish<F>(&self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.when_complete(move |outcome| {
            if let Ok(v) = outcome {
                f(v);
            }
        });
    }

    /// Run `f` only on failure.
    pub fn on_fail<F>(&self, f: F)
    where
        F: FnOnce(HttpError) + Send + 'static,
    {
        self.when_complete(move |outcome| {
            if let Err(e) = outcome {
                f(e);
            }
        });
    }

    /// Transform a successful outcome; failures pass through.
    ///
    /// `f`'s error leg fails the derived task.
    pub fn map<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, HttpError> + Send + 'static,
    {
        let next = Task::pending();
        let chained = next.clone();
        self.when_complete(move |outcome| match outcome {
            Ok(v) => match f(v) {
                Ok(u) => chained.finish(u),
                Err(e) => chained.fail(e),
            },
            Err(e) => chained.fail(e),
        });
        next
    }

    /// Transform both legs; either leg's error fails the derived task.
    pub fn map_or_else<U, F, G>(&self, ok: F, err: G) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, HttpError> + Send + 'static,
        G: FnOnce(HttpError) -> Result<U, HttpError> + Send + 'static,
    {
        let next = Task::pending();
        let chained = next.clone();
        self.when_complete(move |outcome| {
            let mapped = match outcome {
                Ok(v) => ok(v),
                Err(e) => err(e),
            };
            match mapped {
                Ok(u) => chained.finish(u),
                Err(e) => chained.fail(e),
            }
        });
        next
    }

    /// Chain an asynchronous continuation.
    ///
    /// An error constructing the inner task fails the derived task; the
    /// inner task's outcome otherwise propagates verbatim.
    pub fn then<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Task<U>, HttpError> + Send + 'static,
    {
        let next = Task::pending();
        let chained = next.clone();
        self.when_complete(move |outcome| match outcome {
            Ok(v) => match f(v) {
                Ok(inner) => {
                    let sink = chained.clone();
                    inner.when_complete(move |o| match o {
                        Ok(u) => sink.finish(u),
                        Err(e) => sink.fail(e),
                    });
                }
                Err(e) => chained.fail(e),
            },
            Err(e) => chained.fail(e),
        });
        next
    }

    /// Chain continuations for both legs.
    pub fn then_or_else<U, F, G>(&self, ok: F, err: G) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Task<U>, HttpError> + Send + 'static,
        G: FnOnce(HttpError) -> Result<Task<U>, HttpError> + Send + 'static,
    {
        let next = Task::pending();
        let chained = next.clone();
        self.when_complete(move |outcome| {
            let continuation = match outcome {
                Ok(v) => ok(v),
                Err(e) => err(e),
            };
            match continuation {
                Ok(inner) => {
                    let sink = chained.clone();
                    inner.when_complete(move |o| match o {
                        Ok(u) => sink.finish(u),
                        Err(e) => sink.fail(e),
                    });
                }
                Err(e) => chained.fail(e),
            }
        });
        next
    }

    /// Recover from a failure; successes pass through untouched.
    pub fn catch<G>(&self, f: G) -> Task<T>
    where
        G: FnOnce(HttpError) -> Result<T, HttpError> + Send + 'static,
    {
        self.map_or_else(Ok, f)
    }

    /// Observe the outcome, then forward it.
    ///
    /// If `f` itself errs, the derived task fails with that error instead
    /// of the original outcome.
    pub fn always<F>(&self, f: F) -> Task<T>
    where
        F: FnOnce(&Result<T, HttpError>) -> Result<(), HttpError> + Send + 'static,
    {
        let next = Task::pending();
        let chained = next.clone();
        self.when_complete(move |outcome| match f(&outcome) {
            Ok(()) => match outcome {
                Ok(v) => chained.finish(v),
                Err(e) => chained.fail(e),
            },
            Err(e) => chained.fail(e),
        });
        next
    }

    /// Drive a future to completion on the tokio runtime and surface its
    /// result through a task.
    ///
    /// This is the suspension bridge for handlers: return
    /// `Task::spawn(async { ... })` and the terminal transition happens on
    /// a later event-loop tick, possibly on another worker thread.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(future: F) -> Task<T>
    where
        F: Future<Output = Result<T, HttpError>> + Send + 'static,
    {
        let task = Task::pending();
        let completer = task.clone();
        tokio::spawn(async move {
            match future.await {
                Ok(v) => completer.finish(v),
                Err(e) => completer.fail(e),
            }
        });
        task
    }

    /// Await the outcome from async code.
    pub async fn join(&self) -> Result<T, HttpError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.when_complete(move |outcome| {
            // Receiver dropped means nobody is waiting anymore.
            let _ = tx.send(outcome);
        });
        rx.await
            .unwrap_or_else(|_| Err(HttpError::Internal("task handler was replaced".into())))
    }

    pub fn is_waiting(&self) -> bool {
        matches!(
            self.inner.lock().expect("task lock poisoned").state,
            State::Waiting
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.inner.lock().expect("task lock poisoned").state,
            State::Finished(_)
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self.inner.lock().expect("task lock poisoned").state,
            State::Failed(_)
        )
    }

    /// Snapshot of the terminal outcome, if any.
    pub fn outcome(&self) -> Option<Result<T, HttpError>> {
        let inner = self.inner.lock().expect("task lock poisoned");
        match &inner.state {
            State::Waiting => None,
            State::Finished(v) => Some(Ok(v.clone())),
            State::Failed(e) => Some(Err(e.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn boom() -> HttpError {
        HttpError::BadRequest("boom".into())
    }

    #[test]
    fn test_finish_fires_installed_handler() {
        let task: Task<i32> = Task::pending();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        task.when_complete(move |o| *sink.lock().unwrap() = Some(o));
        task.finish(7);
        assert_eq!(seen.lock().unwrap().clone().unwrap().unwrap(), 7);
        assert!(task.is_finished());
    }

    #[test]
    fn test_late_install_fires_with_cached_outcome() {
        let task = Task::finished(41);
        // Repeated installs each observe the identical cached outcome.
        for _ in 0..3 {
            let seen = Arc::new(Mutex::new(None));
            let sink = seen.clone();
            task.when_complete(move |o| *sink.lock().unwrap() = Some(o));
            assert_eq!(seen.lock().unwrap().clone().unwrap().unwrap(), 41);
        }
    }

    #[test]
    fn test_handler_replacement() {
        let task: Task<i32> = Task::pending();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let a = first.clone();
        task.on_finish(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = second.clone();
        task.on_fail(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });
        // on_fail replaced the slot; only the second observer may fire.
        task.finish(1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[should_panic(expected = "already terminal")]
    fn test_double_finish_panics() {
        let task = Task::finished(1);
        task.finish(2);
    }

    #[test]
    #[should_panic(expected = "already terminal")]
    fn test_fail_after_finish_panics() {
        let task = Task::finished(1);
        task.fail(boom());
    }

    #[test]
    fn test_map_identity_preserves_outcome() {
        let ok = Task::finished(5).map(Ok);
        assert_eq!(ok.outcome().unwrap().unwrap(), 5);

        let err: Task<i32> = Task::failed(boom());
        let mapped = err.map(Ok);
        assert!(mapped.is_failed());
    }

    #[test]
    fn test_map_error_leg_fails_derived_task() {
        let task = Task::finished(5);
        let mapped: Task<i32> = task.map(|_| Err(boom()));
        match mapped.outcome().unwrap() {
            Err(HttpError::BadRequest(m)) => assert_eq!(m, "boom"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_then_identity_preserves_outcome() {
        let task = Task::finished(9);
        let chained = task.then(|v| Ok(Task::finished(v)));
        assert_eq!(chained.outcome().unwrap().unwrap(), 9);
    }

    #[test]
    fn test_then_waits_for_inner_task() {
        let outer: Task<i32> = Task::pending();
        let inner: Task<String> = Task::pending();
        let inner_handle = inner.clone();
        let chained = outer.then(move |v| {
            assert_eq!(v, 1);
            Ok(inner_handle)
        });
        outer.finish(1);
        assert!(chained.is_waiting());
        inner.finish("done".to_string());
        assert_eq!(chained.outcome().unwrap().unwrap(), "done");
    }

    #[test]
    fn test_then_inner_failure_propagates_verbatim() {
        let task = Task::finished(1);
        let chained: Task<i32> = task.then(|_| {
            Ok(Task::failed(HttpError::Http {
                status: 418,
                message: "teapot".into(),
            }))
        });
        match chained.outcome().unwrap() {
            Err(HttpError::Http { status, .. }) => assert_eq!(status, 418),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_catch_recovers() {
        let task: Task<i32> = Task::failed(boom());
        let recovered = task.catch(|_| Ok(0));
        assert_eq!(recovered.outcome().unwrap().unwrap(), 0);

        let passthrough = Task::finished(3).catch(|_| Ok(0));
        assert_eq!(passthrough.outcome().unwrap().unwrap(), 3);
    }

    #[test]
    fn test_always_forwards_original_outcome() {
        let observed = Arc::new(AtomicU32::new(0));
        let counter = observed.clone();
        let task = Task::finished(2).always(move |o| {
            assert!(o.is_ok());
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(task.outcome().unwrap().unwrap(), 2);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_always_error_replaces_outcome() {
        let task = Task::finished(2).always(|_| Err(boom()));
        assert!(task.is_failed());
    }

    #[test]
    fn test_terminal_state_is_monotonic() {
        let task = Task::finished(10);
        assert_eq!(task.outcome().unwrap().unwrap(), 10);
        let mapped = task.map(|v| Ok(v + 1));
        assert_eq!(mapped.outcome().unwrap().unwrap(), 11);
        // The source task is untouched by derivation.
        assert_eq!(task.outcome().unwrap().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_completion_from_another_thread() {
        let task: Task<i32> = Task::pending();
        let completer = task.clone();
        let join = std::thread::spawn(move || {
            completer.finish(99);
        });
        let out = task.join().await.unwrap();
        assert_eq!(out, 99);
        join.join().unwrap();
    }

    #[tokio::test]
    async fn test_spawn_completes_on_event_loop() {
        let task: Task<i32> = Task::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(123)
        });
        assert_eq!(task.join().await.unwrap(), 123);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let task: Task<i32> = Task::spawn(async { Err(boom()) });
        assert!(task.join().await.is_err());
    }
}
