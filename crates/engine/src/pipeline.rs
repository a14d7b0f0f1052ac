//! Handler Pipeline: the linear chain each GET traverses. Each
//! handler declares `supports`/`handle`; later handlers observe prior
//! handlers' effect on the mutable context.
//!
//! EVICT and CLEAR are fixed three-step sequences (immediate delete,
//! registry cleanup, scheduled delayed delete) rather than open chains, so
//! they are driven directly by the front door (`engine.rs`) instead of
//! through this module — only GET has enough handler variety to warrant
//! the chain-of-responsibility shape.

use crate::engine::CacheEngine;
use async_trait::async_trait;
use cache_common::now_ms;
use cache_domain::{CacheError, CacheResult, Codec, MethodDescriptor};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Per-invocation state threaded through the GET handler chain.
pub struct GetContext<V> {
    /// Cache namespace in effect for this call.
    pub cache_name: String,
    /// Resolved cache key (set by the key-generator handler).
    pub key: Option<String>,
    /// The descriptor governing this call.
    pub descriptor: MethodDescriptor,
    /// Value produced so far, if any handler has produced one.
    pub value: Option<V>,
    /// Whether the value in `value` came from a fresh load (vs. a cache hit).
    pub loaded: bool,
    /// Set by the breakdown-loader handler when its own writer step already
    /// persisted the freshly loaded value under lock — tells the cache-write
    /// handler not to write it again under a second, differently jittered TTL.
    pub already_written: bool,
    /// Errors surfaced by handlers that did not abort the chain.
    pub handler_errors: Vec<String>,
}

impl<V> GetContext<V> {
    /// Start a context for `cache_name` under `descriptor`.
    pub fn new(cache_name: impl Into<String>, descriptor: MethodDescriptor) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: None,
            descriptor,
            value: None,
            loaded: false,
            already_written: false,
            handler_errors: Vec::new(),
        }
    }
}

/// Outcome of a single handler's `handle` call.
pub enum HandlerOutcome<V> {
    /// Terminate the chain with this result.
    Handled(Option<V>),
    /// Pass control to the next handler.
    Continued,
    /// The handler failed; logged and, by default, treated as `Continued`
    /// unless the handler is marked stop-on-exception.
    Failed(CacheError),
}

impl<V> fmt::Debug for HandlerOutcome<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handled(_) => write!(f, "Handled"),
            Self::Continued => write!(f, "Continued"),
            Self::Failed(e) => write!(f, "Failed({e})"),
        }
    }
}

/// A single link in the GET chain.
#[async_trait]
pub trait GetHandler<V>: Send + Sync {
    /// Whether this handler participates given the current context
    /// (e.g. the bloom handler only supports calls with `use_bloom_filter`).
    fn supports(&self, context: &GetContext<V>) -> bool;

    /// Whether a failure from this handler should abort the chain instead
    /// of falling through to the next handler (default: `false`).
    fn stop_on_exception(&self) -> bool {
        false
    }

    /// Run this handler's logic.
    async fn handle(&self, context: &mut GetContext<V>) -> HandlerOutcome<V>;
}

/// Drive `context` through `handlers` in order, honoring each handler's
/// `supports`/`stop_on_exception` contract.
pub async fn run_get_chain<V>(
    handlers: &[Box<dyn GetHandler<V>>],
    mut context: GetContext<V>,
) -> CacheResult<Option<V>> {
    for handler in handlers {
        if !handler.supports(&context) {
            continue;
        }
        match handler.handle(&mut context).await {
            HandlerOutcome::Handled(value) => return Ok(value),
            HandlerOutcome::Continued => continue,
            HandlerOutcome::Failed(err) => {
                context.handler_errors.push(err.to_string());
                if handler.stop_on_exception() {
                    return Err(err);
                }
            }
        }
    }
    Ok(context.value)
}

/// GET step 2: bloom-filter penetration check. Only participates when the
/// descriptor enables `use_bloom_filter`; rejects with `Handled(None)` on a
/// confirmed-absent key, otherwise passes through to the next handler.
pub(crate) struct BloomStep {
    pub(crate) engine: CacheEngine,
    pub(crate) cache_name: String,
}

#[async_trait]
impl<V: Send + Sync> GetHandler<V> for BloomStep {
    fn supports(&self, context: &GetContext<V>) -> bool {
        context.descriptor.use_bloom_filter
    }

    async fn handle(&self, context: &mut GetContext<V>) -> HandlerOutcome<V> {
        let bloom = self.engine.bloom_filter(&self.cache_name);
        let key = context.key.clone().unwrap_or_default();
        if crate::protection::penetration_check(&bloom, &key, self.engine.protection_stats()).await {
            HandlerOutcome::Continued
        } else {
            HandlerOutcome::Handled(None)
        }
    }
}

/// GET step 3: cache read. On a live hit, also runs step 5 (the pre-refresh
/// trigger) before terminating the chain — the trigger needs the envelope
/// this handler just decoded, so it is folded into the read rather than
/// threaded through the context as a separate boxed handler.
pub(crate) struct CacheReadStep<C, L, LFut, V> {
    pub(crate) engine: CacheEngine,
    pub(crate) cache_name: String,
    pub(crate) key: String,
    pub(crate) storage_key: String,
    pub(crate) codec: Arc<C>,
    pub(crate) loader: L,
    pub(crate) _marker: PhantomData<fn() -> (V, LFut)>,
}

#[async_trait]
impl<V, C, L, LFut> GetHandler<V> for CacheReadStep<C, L, LFut, V>
where
    V: Clone + Send + Sync + 'static,
    C: Codec<V> + Send + Sync + 'static,
    L: Fn() -> LFut + Send + Sync + Clone + 'static,
    LFut: Future<Output = CacheResult<Option<V>>> + Send + 'static,
{
    fn supports(&self, _context: &GetContext<V>) -> bool {
        true
    }

    fn stop_on_exception(&self) -> bool {
        true
    }

    async fn handle(&self, context: &mut GetContext<V>) -> HandlerOutcome<V> {
        let envelope = match self.engine.read_envelope(&self.storage_key).await {
            Ok(envelope) => envelope,
            Err(err) => return HandlerOutcome::Failed(err),
        };

        let Some(envelope) = envelope else {
            return HandlerOutcome::Continued;
        };
        if envelope.is_expired(now_ms()) {
            return HandlerOutcome::Continued;
        }

        if context.descriptor.enable_pre_refresh
            && envelope.should_pre_refresh(now_ms(), context.descriptor.pre_refresh_threshold)
        {
            self.engine.trigger_pre_refresh(
                &self.cache_name,
                &self.key,
                context.descriptor.clone(),
                self.codec.clone(),
                self.loader.clone(),
            );
        }

        if envelope.is_null_sentinel() {
            return HandlerOutcome::Handled(None);
        }

        match self.codec.decode(envelope.value.as_ref().unwrap()) {
            Ok(value) => HandlerOutcome::Handled(Some(value)),
            Err(err) => HandlerOutcome::Failed(err),
        }
    }
}

/// GET step 4: breakdown-protected loader, run on a cache miss (or expired
/// entry). Records whether the protocol's own writer already persisted the
/// loaded value so the write handler doesn't write it again.
pub(crate) struct BreakdownLoaderStep<C, L, LFut, V> {
    pub(crate) engine: CacheEngine,
    pub(crate) cache_name: String,
    pub(crate) key: String,
    pub(crate) codec: Arc<C>,
    pub(crate) loader: L,
    pub(crate) _marker: PhantomData<fn() -> (V, LFut)>,
}

#[async_trait]
impl<V, C, L, LFut> GetHandler<V> for BreakdownLoaderStep<C, L, LFut, V>
where
    V: Clone + Send + Sync + 'static,
    C: Codec<V> + Send + Sync + 'static,
    L: Fn() -> LFut + Send + Sync + Clone + 'static,
    LFut: Future<Output = CacheResult<Option<V>>> + Send + 'static,
{
    fn supports(&self, _context: &GetContext<V>) -> bool {
        true
    }

    fn stop_on_exception(&self) -> bool {
        true
    }

    async fn handle(&self, context: &mut GetContext<V>) -> HandlerOutcome<V> {
        if context.descriptor.breakdown_protected() {
            match self
                .engine
                .run_breakdown(&self.cache_name, &self.key, &context.descriptor, self.codec.clone(), self.loader.clone())
                .await
            {
                Ok(Some((value, wrote))) => {
                    context.loaded = true;
                    context.already_written = wrote;
                    context.value = Some(value);
                }
                Ok(None) => {
                    context.loaded = true;
                    context.already_written = false;
                    context.value = None;
                }
                Err(err) => return HandlerOutcome::Failed(err),
            }
        } else {
            match (self.loader)().await {
                Ok(value) => {
                    context.loaded = true;
                    context.already_written = false;
                    context.value = value;
                }
                Err(err) => return HandlerOutcome::Failed(err),
            }
        }
        HandlerOutcome::Continued
    }
}

/// GET step 6: write-back on a fresh load. Skipped entirely when the value
/// came from a cache hit (the read handler already terminated the chain in
/// that case) or when the breakdown protocol's own writer already persisted it.
pub(crate) struct CacheWriteStep<C, V> {
    pub(crate) engine: CacheEngine,
    pub(crate) cache_name: String,
    pub(crate) key: String,
    pub(crate) codec: Arc<C>,
    pub(crate) _marker: PhantomData<fn() -> V>,
}

#[async_trait]
impl<V, C> GetHandler<V> for CacheWriteStep<C, V>
where
    V: Send + Sync + 'static,
    C: Codec<V> + Send + Sync + 'static,
{
    fn supports(&self, context: &GetContext<V>) -> bool {
        context.loaded && !context.already_written
    }

    fn stop_on_exception(&self) -> bool {
        true
    }

    async fn handle(&self, context: &mut GetContext<V>) -> HandlerOutcome<V> {
        let result = match &context.value {
            Some(value) => {
                self.engine
                    .write_value(&self.cache_name, &self.key, &context.descriptor, self.codec.as_ref(), value)
                    .await
            }
            None if context.descriptor.cache_null_values => {
                self.engine.write_null(&self.cache_name, &self.key, &context.descriptor).await
            }
            None => Ok(()),
        };
        match result {
            Ok(()) => HandlerOutcome::Continued,
            Err(err) => HandlerOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysMiss;

    #[async_trait]
    impl GetHandler<i32> for AlwaysMiss {
        fn supports(&self, _context: &GetContext<i32>) -> bool {
            true
        }
        async fn handle(&self, _context: &mut GetContext<i32>) -> HandlerOutcome<i32> {
            HandlerOutcome::Handled(None)
        }
    }

    struct NeverRuns;

    #[async_trait]
    impl GetHandler<i32> for NeverRuns {
        fn supports(&self, _context: &GetContext<i32>) -> bool {
            true
        }
        async fn handle(&self, _context: &mut GetContext<i32>) -> HandlerOutcome<i32> {
            panic!("should never run after a Handled outcome");
        }
    }

    #[tokio::test]
    async fn handled_short_circuits_the_chain() {
        let handlers: Vec<Box<dyn GetHandler<i32>>> = vec![Box::new(AlwaysMiss), Box::new(NeverRuns)];
        let context = GetContext::new("users", MethodDescriptor::default_for("users"));
        let result = run_get_chain(&handlers, context).await.unwrap();
        assert_eq!(result, None);
    }

    struct FailsButContinues;

    #[async_trait]
    impl GetHandler<i32> for FailsButContinues {
        fn supports(&self, _context: &GetContext<i32>) -> bool {
            true
        }
        async fn handle(&self, _context: &mut GetContext<i32>) -> HandlerOutcome<i32> {
            HandlerOutcome::Failed(CacheError::FilterFailure("boom".into()))
        }
    }

    struct SetsValue;

    #[async_trait]
    impl GetHandler<i32> for SetsValue {
        fn supports(&self, _context: &GetContext<i32>) -> bool {
            true
        }
        async fn handle(&self, context: &mut GetContext<i32>) -> HandlerOutcome<i32> {
            context.value = Some(99);
            HandlerOutcome::Continued
        }
    }

    #[tokio::test]
    async fn non_stopping_failure_falls_through_to_next_handler() {
        let handlers: Vec<Box<dyn GetHandler<i32>>> = vec![Box::new(FailsButContinues), Box::new(SetsValue)];
        let context = GetContext::new("users", MethodDescriptor::default_for("users"));
        let result = run_get_chain(&handlers, context).await.unwrap();
        assert_eq!(result, Some(99));
    }

    #[tokio::test]
    async fn unsupported_handler_is_skipped() {
        struct Gate;
        #[async_trait]
        impl GetHandler<i32> for Gate {
            fn supports(&self, _context: &GetContext<i32>) -> bool {
                false
            }
            async fn handle(&self, _context: &mut GetContext<i32>) -> HandlerOutcome<i32> {
                panic!("unsupported handler should not run");
            }
        }
        let handlers: Vec<Box<dyn GetHandler<i32>>> = vec![Box::new(Gate), Box::new(SetsValue)];
        let context = GetContext::new("users", MethodDescriptor::default_for("users"));
        let result = run_get_chain(&handlers, context).await.unwrap();
        assert_eq!(result, Some(99));
    }
}
