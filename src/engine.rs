use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use futures_util::future::{FutureExt, LocalBoxFuture, Shared};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine load failed: {0}")]
    Load(String),
    #[error("engine unavailable: {0}")]
    Unavailable(&'static str),
}

pub type EngineResult<T> = Result<Rc<T>, EngineError>;
pub type EngineFuture<T> = Shared<LocalBoxFuture<'static, EngineResult<T>>>;

pub struct EngineCell<T: 'static> {
    load: RefCell<Option<EngineFuture<T>>>,
    attempts: Cell<u32>,
}

impl<T: 'static> Default for EngineCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EngineCell<T> {
    pub const fn new() -> Self {
        Self {
            load: RefCell::new(None),
            attempts: Cell::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    pub fn get(&self) -> Option<Rc<T>> {
        self.load
            .borrow()
            .as_ref()
            .and_then(|future| future.peek())
            .and_then(|result| result.as_ref().ok())
            .cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.load
            .borrow()
            .as_ref()
            .is_some_and(|future| future.peek().is_none())
    }

    /// Returns the shared load future, starting `loader` only if no load is
    /// in flight or complete.
    pub fn load<F, Fut>(&self, loader: F) -> EngineFuture<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>> + 'static,
    {
        let mut slot = self.load.borrow_mut();

        if let Some(existing) = slot.as_ref() {
            let failed = matches!(existing.peek(), Some(Err(_)));
            if !failed {
                return existing.clone();
            }
        }

        self.attempts.set(self.attempts.get() + 1);
        let future = loader().map(|result| result.map(Rc::new)).boxed_local().shared();
        *slot = Some(future.clone());
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join3;

    fn counting_loader(
        calls: Rc<Cell<u32>>,
        value: &'static str,
    ) -> impl FnOnce() -> LocalBoxFuture<'static, Result<String, EngineError>> {
        move || {
            calls.set(calls.get() + 1);
            async move {
                tokio::task::yield_now().await;
                Ok(value.to_string())
            }
            .boxed_local()
        }
    }

    #[tokio::test]
    async fn concurrent_first_use_loads_once() {
        let cell: EngineCell<String> = EngineCell::new();
        let calls = Rc::new(Cell::new(0));

        let a = cell.load(counting_loader(calls.clone(), "first"));
        let b = cell.load(counting_loader(calls.clone(), "second"));
        let c = cell.load(counting_loader(calls.clone(), "third"));
        assert!(cell.is_loading());
        assert_eq!(cell.get(), None);

        let (a, b, c) = join3(a, b, c).await;
        let a = a.expect("load succeeds");
        let b = b.expect("load succeeds");
        let c = c.expect("load succeeds");

        assert_eq!(calls.get(), 1);
        assert_eq!(cell.attempts(), 1);
        assert_eq!(a.as_str(), "first");
        assert!(Rc::ptr_eq(&a, &b) && Rc::ptr_eq(&b, &c));
    }

    #[tokio::test]
    async fn loaded_engine_is_reused_synchronously() {
        let cell: EngineCell<String> = EngineCell::new();
        let calls = Rc::new(Cell::new(0));

        cell.load(counting_loader(calls.clone(), "ready"))
            .await
            .expect("load succeeds");

        assert!(!cell.is_loading());
        assert_eq!(cell.get().as_deref().map(String::as_str), Some("ready"));

        let again = cell.load(counting_loader(calls.clone(), "other")).await;
        assert_eq!(again.expect("cached").as_str(), "ready");
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn failed_load_reaches_all_waiters_then_allows_a_new_attempt() {
        let cell: EngineCell<String> = EngineCell::new();

        let failing = || async { Err::<String, _>(EngineError::Load("fonts".to_string())) };
        let first = cell.load(failing);
        let second = cell.load(|| async { Ok("unused".to_string()) });

        assert_eq!(first.await, Err(EngineError::Load("fonts".to_string())));
        assert_eq!(second.await, Err(EngineError::Load("fonts".to_string())));
        assert_eq!(cell.get(), None);

        let retried = cell.load(|| async { Ok("second try".to_string()) }).await;
        assert_eq!(retried.expect("fresh attempt").as_str(), "second try");
        assert_eq!(cell.attempts(), 2);
    }
}
