//! Wrapping combinator and the process-wide default engine.
//!
//! `with_timeout(op)` turns any async operation into one that always yields a
//! `TimeoutResult`. Unless told otherwise it runs on the default engine, which
//! is built lazily on first use and can be swapped for an injected instance.

use std::any::type_name;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;

use crate::config::{Strategy, TimeoutConfig};
use crate::resilience::engine::{ExecuteOptions, TimeoutEngine};
use crate::resilience::error::ContextMap;
use crate::resilience::result::TimeoutResult;

static DEFAULT_ENGINE: OnceLock<ArcSwap<TimeoutEngine>> = OnceLock::new();

fn slot() -> &'static ArcSwap<TimeoutEngine> {
    DEFAULT_ENGINE.get_or_init(|| {
        tracing::debug!("Creating default timeout engine");
        ArcSwap::from_pointee(TimeoutEngine::new(TimeoutConfig::default()))
    })
}

/// The process-wide engine, created with default config on first use.
pub fn default_engine() -> Arc<TimeoutEngine> {
    slot().load_full()
}

/// Make `engine` the process-wide default, returning the previous one.
pub fn install_default_engine(engine: TimeoutEngine) -> Arc<TimeoutEngine> {
    slot().swap(Arc::new(engine))
}

/// Wrap `operation` so every call goes through a timeout engine.
pub fn with_timeout<F>(operation: F) -> TimeoutGuarded<F> {
    TimeoutGuarded {
        name: declared_name::<F>(),
        operation,
        options: ExecuteOptions::default(),
    }
}

/// An operation bound to a name and call options.
pub struct TimeoutGuarded<F> {
    operation: F,
    name: String,
    options: ExecuteOptions,
}

impl<F> TimeoutGuarded<F> {
    /// Override the name derived from the operation's type.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.options.strategy = Some(strategy);
        self
    }

    pub fn timeout(mut self, secs: f64) -> Self {
        self.options.timeout = Some(secs);
        self
    }

    pub fn context(mut self, context: ContextMap) -> Self {
        self.options.context = Some(context);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<F, Fut, T, E> TimeoutGuarded<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StdError + Send + Sync + 'static,
{
    /// Run on the process-wide default engine.
    pub async fn call(&mut self) -> TimeoutResult<T> {
        let engine = default_engine();
        self.call_with(&engine).await
    }

    /// Run on an explicit engine.
    pub async fn call_with(&mut self, engine: &TimeoutEngine) -> TimeoutResult<T> {
        engine
            .execute_async_with(&mut self.operation, &self.name, self.options.clone())
            .await
    }
}

/// Name of the function an operation was declared in.
///
/// `app::users::list_users::{{closure}}` becomes `list_users`.
fn declared_name<F>() -> String {
    let mut path = type_name::<F>();
    while let Some(stripped) = path.strip_suffix("::{{closure}}") {
        path = stripped;
    }
    // Drop generic arguments before splitting on `::`.
    let base = path.split('<').next().unwrap_or(path);
    base.rsplit("::")
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("operation")
        .to_string()
}
