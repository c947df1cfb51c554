use std::{future::Future, time::Duration};

/// Bridges the synchronous engine onto async network clients.
/// Owns a tokio runtime unless one is already running on this thread.
pub struct AsyncRuntime {
    runtime: Option<tokio::runtime::Runtime>,
}

impl Default for AsyncRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRuntime {
    pub fn new() -> Self {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(_) => None,
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("build tokio runtime");
                Some(runtime)
            }
        };
        Self { runtime }
    }
}

impl AsyncRuntime {
    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        match self.runtime {
            Some(ref rt) => rt.block_on(f),
            None => futures::executor::block_on(f),
        }
    }

    /// Drive `f` for at most `timeout`. `None` when the bound is exceeded.
    pub fn block_on_timeout<F: Future>(
        &self,
        f: F,
        timeout: Duration,
    ) -> Option<F::Output> {
        self.block_on(async move { tokio::time::timeout(timeout, f).await.ok() })
    }
}

impl Clone for AsyncRuntime {
    fn clone(&self) -> Self {
        Self::new()
    }
}
