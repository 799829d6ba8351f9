//! Guards that put a rate limit in front of an arbitrary callable.
//!
//! A [`GuardBuilder`] collects the limit, the storage and an optional key
//! builder, then wraps a target into a [`Guarded`] callable. Every call is
//! checked against the limiter first; denied calls never reach the target and
//! fail with [`RatewardenError::RateLimitExceeded`].
//!
//! ```no_run
//! # async fn demo() -> ratewarden::error::Result<()> {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ratewarden::guard::GuardBuilder;
//! use ratewarden::storage::MemoryStorage;
//!
//! struct Login {
//!     username: String,
//! }
//!
//! let login = GuardBuilder::new(Arc::new(MemoryStorage::new()), 2, Duration::from_secs(1))
//!     .name("login")
//!     .key_builder(|_, args: &Login| args.username.clone().into())
//!     .wrap(|args: Login| async move { format!("welcome {}", args.username) })?;
//!
//! let greeting = login.call(Login { username: "alice".into() }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::{Future, Ready};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::error::{RatewardenError, Result};
use crate::ratelimit::{Limiter, LockedRateLimiter, RateKey, RateLimiter};
use crate::storage::Storage;

/// Derives the rate limit key of a call from the callable's name and its arguments.
pub type KeyBuilder<A> = Arc<dyn Fn(&str, &A) -> RateKey + Send + Sync>;

/// Arguments that carry their own rate limit key.
///
/// A guard built with [`GuardBuilder::keyed`] counts each call against the
/// key its arguments report, so no key builder is needed.
pub trait KeyedArgs {
    fn key(&self) -> RateKey;
}

impl KeyedArgs for RateKey {
    fn key(&self) -> RateKey {
        self.clone()
    }
}

impl KeyedArgs for String {
    fn key(&self) -> RateKey {
        RateKey::from(self)
    }
}

enum Engine {
    Build {
        storage: Arc<dyn Storage>,
        max_requests: u64,
        time_window: Duration,
        locking: bool,
        clock: Option<Arc<dyn Clock>>,
    },
    Shared(Arc<dyn Limiter>),
}

/// Configuration for a [`Guarded`] callable.
///
/// `A` is the argument type of the target: a tuple for positional
/// arguments, or a struct when arguments are named.
pub struct GuardBuilder<A> {
    engine: Engine,
    name: Option<String>,
    key_builder: Option<KeyBuilder<A>>,
}

impl<A> GuardBuilder<A> {
    /// Guard with a new limiter admitting `max_requests` per `time_window`.
    ///
    /// The limiter is lock-coordinated unless
    /// [`unsynchronized`](Self::unsynchronized) is called.
    pub fn new(storage: Arc<dyn Storage>, max_requests: u64, time_window: Duration) -> Self {
        Self {
            engine: Engine::Build {
                storage,
                max_requests,
                time_window,
                locking: true,
                clock: None,
            },
            name: None,
            key_builder: None,
        }
    }

    /// Guard with an existing limiter, sharing its budgets.
    pub fn from_limiter(limiter: Arc<dyn Limiter>) -> Self {
        Self {
            engine: Engine::Shared(limiter),
            name: None,
            key_builder: None,
        }
    }

    /// Name the guarded callable. Defaults to the target's type name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Derive each call's key from the callable name and its arguments.
    ///
    /// Without a key builder, and unless the guard is [`keyed`](Self::keyed),
    /// every call shares the empty key and therefore one budget.
    pub fn key_builder<K>(mut self, key_builder: K) -> Self
    where
        K: Fn(&str, &A) -> RateKey + Send + Sync + 'static,
    {
        self.key_builder = Some(Arc::new(key_builder));
        self
    }

    /// Count each call against the key carried by its arguments.
    ///
    /// Replaces any key builder set earlier.
    pub fn keyed(self) -> Self
    where
        A: KeyedArgs + 'static,
    {
        self.key_builder(|_, args: &A| args.key())
    }

    /// Use the non-locking limiter.
    ///
    /// Only correct when calls for one key never overlap. Has no effect on a
    /// guard built [`from_limiter`](Self::from_limiter).
    pub fn unsynchronized(mut self) -> Self {
        if let Engine::Build { locking, .. } = &mut self.engine {
            *locking = false;
        }
        self
    }

    /// Replace the limiter's wall clock. Has no effect on a shared limiter.
    pub fn clock(mut self, new_clock: Arc<dyn Clock>) -> Self {
        if let Engine::Build { clock, .. } = &mut self.engine {
            *clock = Some(new_clock);
        }
        self
    }

    /// Wrap an async target.
    ///
    /// Fails if the limit is misconfigured.
    pub fn wrap<F, Fut>(self, target: F) -> Result<Guarded<A, F>>
    where
        F: Fn(A) -> Fut,
        Fut: Future,
    {
        let name = self
            .name
            .unwrap_or_else(|| std::any::type_name::<F>().to_string());

        let limiter: Arc<dyn Limiter> = match self.engine {
            Engine::Shared(limiter) => limiter,
            Engine::Build {
                storage,
                max_requests,
                time_window,
                locking,
                clock,
            } => {
                if locking {
                    let limiter = LockedRateLimiter::new(storage, max_requests, time_window)?;
                    match clock {
                        Some(clock) => Arc::new(limiter.with_clock(clock)),
                        None => Arc::new(limiter),
                    }
                } else {
                    let limiter = RateLimiter::new(storage, max_requests, time_window)?;
                    match clock {
                        Some(clock) => Arc::new(limiter.with_clock(clock)),
                        None => Arc::new(limiter),
                    }
                }
            }
        };

        debug!(name = %name, limit = ?limiter.config(), "Guard created");

        Ok(Guarded {
            name,
            limiter,
            key_builder: self.key_builder,
            target,
        })
    }

    /// Wrap a synchronous target.
    pub fn wrap_sync<F, R>(self, target: F) -> Result<Guarded<A, impl Fn(A) -> Ready<R>>>
    where
        F: Fn(A) -> R,
    {
        let builder = match self.name {
            Some(_) => self,
            None => self.name(std::any::type_name::<F>()),
        };
        builder.wrap(move |args| std::future::ready(target(args)))
    }
}

/// A callable whose every invocation is checked against a rate limit.
pub struct Guarded<A, F> {
    name: String,
    limiter: Arc<dyn Limiter>,
    key_builder: Option<KeyBuilder<A>>,
    target: F,
}

impl<A, F, Fut> Guarded<A, F>
where
    F: Fn(A) -> Fut,
    Fut: Future,
{
    /// Check the limit and, if admitted, run the target with `args`.
    ///
    /// The target's output is returned as-is, including any error it
    /// produced. A denial returns [`RatewardenError::RateLimitExceeded`]
    /// without running the target.
    pub async fn call(&self, args: A) -> Result<Fut::Output> {
        let key = self.key_for(&args);

        if !self.limiter.check_limit(&key).await? {
            debug!(name = %self.name, key = %key, "Guarded call denied");
            return Err(RatewardenError::RateLimitExceeded {
                name: self.name.clone(),
                key,
            });
        }

        Ok((self.target)(args).await)
    }
}

impl<A, F> Guarded<A, F> {
    /// The key a call with `args` is counted against.
    pub fn key_for(&self, args: &A) -> RateKey {
        match &self.key_builder {
            Some(build) => build(&self.name, args),
            None => RateKey::default(),
        }
    }

    /// Forget a key's budget.
    pub async fn reset(&self, key: impl Into<RateKey>) -> Result<()> {
        self.limiter.reset(&key.into()).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &Arc<dyn Limiter> {
        &self.limiter
    }
}
