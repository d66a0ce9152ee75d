//! # Data Processor Module
//!
//! Wraps a transformer with result caching, retries and optional output
//! compression. Each [`DataProcessor::process`] call moves through
//! `cache check -> hit | attempt loop -> success | exhausted` and always
//! resolves to a [`ProcessingResult`]: failures are reported in the result
//! instead of being returned as errors, so one bad item never aborts a batch.

use crate::etl::cache::ResultCache;
use crate::etl::compression::{CompressedData, CompressionFormat, compress_json};
use crate::etl::error::{EtlError, Result};
use crate::etl::pipeline::{BoxedTransformer, Transformer};
use crate::etl::retry::RetryConfig;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorOptions {
    pub retry: RetryConfig,
    pub cache_results: bool,
    pub cache_ttl_ms: u64,
    /// Period of the background sweep of expired cache entries
    pub cleanup_interval_ms: u64,
    pub compress_data: bool,
    pub compression_format: CompressionFormat,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            cache_results: false,
            cache_ttl_ms: 300_000,
            cleanup_interval_ms: 60_000,
            compress_data: false,
            compression_format: CompressionFormat::Gzip,
        }
    }
}

impl ProcessorOptions {
    /// Parse options from JSON; missing keys keep their defaults.
    pub fn from_json(input: &Value) -> Result<Self> {
        serde_json::from_value(input.clone()).map_err(EtlError::from_serde)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub from_cache: bool,
    pub compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult<O> {
    pub data: Option<O>,
    pub success: bool,
    pub error: Option<EtlError>,
    pub stats: ProcessingStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed: Option<CompressedData>,
}

type CacheKeyFn<I> = Arc<dyn Fn(&I) -> Option<String> + Send + Sync>;
type SuccessHook<O> = Arc<dyn Fn(&O) + Send + Sync>;
type ErrorHook<I> = Arc<dyn Fn(&EtlError, &I) + Send + Sync>;

/// Default cache key: strings verbatim, `null` as `"null"`, anything else as
/// compact JSON text.
///
/// Objects serialize with sorted keys, so field order never splits keys.
/// Distinct inputs can still collide (`"1"` and `1`); supply a key function
/// with [`DataProcessor::with_cache_key`] when that matters.
pub fn default_cache_key<I: Serialize>(input: &I) -> Option<String> {
    match serde_json::to_value(input) {
        Ok(Value::String(s)) => Some(s),
        Ok(Value::Null) => Some("null".to_string()),
        Ok(other) => Some(other.to_string()),
        Err(e) => {
            warn!("Input cannot be used as a cache key: {}", e);
            None
        }
    }
}

struct Attempted<O> {
    outcome: std::result::Result<O, EtlError>,
    retry_count: u32,
}

pub struct DataProcessor<I: Send + 'static, O: Send + 'static> {
    pipeline: BoxedTransformer<I, O>,
    options: ProcessorOptions,
    cache: Arc<ResultCache<O>>,
    cache_key: CacheKeyFn<I>,
    on_success: Option<SuccessHook<O>>,
    on_error: Option<ErrorHook<I>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<I, O> DataProcessor<I, O>
where
    I: Serialize + Clone + Send + Sync + 'static,
    O: Serialize + Clone + Send + Sync + 'static,
{
    pub fn new<T>(pipeline: T, options: ProcessorOptions) -> Self
    where
        T: Transformer<I, O> + 'static,
    {
        Self::build(Arc::new(pipeline), options, Arc::new(default_cache_key::<I>))
    }
}

impl<I, O> DataProcessor<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Serialize + Clone + Send + Sync + 'static,
{
    /// Processor with a caller-supplied cache key.
    pub fn with_cache_key<T, K>(pipeline: T, options: ProcessorOptions, key: K) -> Self
    where
        T: Transformer<I, O> + 'static,
        K: Fn(&I) -> String + Send + Sync + 'static,
    {
        Self::build(Arc::new(pipeline), options, Arc::new(move |input: &I| Some(key(input))))
    }

    fn build(pipeline: BoxedTransformer<I, O>, options: ProcessorOptions, cache_key: CacheKeyFn<I>) -> Self {
        let cache = Arc::new(ResultCache::new(Duration::from_millis(options.cache_ttl_ms)));
        let sweeper = if options.cache_results {
            spawn_sweeper(
                Arc::downgrade(&cache),
                Duration::from_millis(options.cleanup_interval_ms.max(1)),
            )
        } else {
            None
        };

        Self {
            pipeline,
            options,
            cache,
            cache_key,
            on_success: None,
            on_error: None,
            sweeper,
        }
    }

    /// Called with the output of every successful call, cached or not.
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&O) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Called with the final error once retries are exhausted.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&EtlError, &I) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    pub async fn process(&self, input: I) -> ProcessingResult<O> {
        let start_time = Utc::now();
        let started = Instant::now();

        let key = if self.options.cache_results {
            (self.cache_key)(&input)
        } else {
            None
        };

        if let Some(data) = key.as_deref().and_then(|k| self.cache.get(k)) {
            debug!("Cache hit for key {:?}", key);
            return self.finish(Ok(data), 0, true, start_time, started);
        }

        let attempted = self.attempt(&input).await;
        match &attempted.outcome {
            Ok(data) => {
                if let Some(key) = key {
                    self.cache.insert(key, data.clone());
                }
            }
            Err(e) => {
                if let Some(hook) = &self.on_error {
                    hook(e, &input);
                }
            }
        }
        self.finish(attempted.outcome, attempted.retry_count, false, start_time, started)
    }

    /// Process every input concurrently. Results keep input order.
    pub async fn process_batch(&self, inputs: Vec<I>) -> Vec<ProcessingResult<O>> {
        info!("Processing batch of {} items", inputs.len());
        join_all(inputs.into_iter().map(|input| self.process(input))).await
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    async fn attempt(&self, input: &I) -> Attempted<O> {
        let retry = &self.options.retry;
        let mut retry_count = 0;

        loop {
            match self.pipeline.transform(input.clone()).await {
                Ok(data) => {
                    return Attempted {
                        outcome: Ok(data),
                        retry_count,
                    };
                }
                Err(e) => {
                    let exhausted = retry_count >= retry.max_retries;
                    if exhausted || (retry.retry_transient_only && !e.retryable()) {
                        warn!("Processing failed after {} retries: {}", retry_count, e);
                        return Attempted {
                            outcome: Err(e),
                            retry_count,
                        };
                    }

                    let delay = retry.calculate_delay(retry_count);
                    warn!(
                        "Attempt {} failed, retrying in {:?}: {}",
                        retry_count + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
            }
        }
    }

    fn finish(
        &self,
        outcome: std::result::Result<O, EtlError>,
        retry_count: u32,
        from_cache: bool,
        start_time: DateTime<Utc>,
        started: Instant,
    ) -> ProcessingResult<O> {
        let compressed = match &outcome {
            Ok(data) if self.options.compress_data => {
                match compress_json(data, self.options.compression_format) {
                    Ok(compressed) => Some(compressed),
                    Err(e) => {
                        warn!("Failed to compress processing output: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        if let (Ok(data), Some(hook)) = (&outcome, &self.on_success) {
            hook(data);
        }

        let stats = ProcessingStats {
            start_time,
            end_time: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            retry_count,
            from_cache,
            compressed: compressed.is_some(),
            original_size: compressed.as_ref().map(|c| c.original_size),
            compressed_size: compressed.as_ref().map(|c| c.compressed_size),
        };

        match outcome {
            Ok(data) => ProcessingResult {
                data: Some(data),
                success: true,
                error: None,
                stats,
                compressed,
            },
            Err(e) => ProcessingResult {
                data: None,
                success: false,
                error: Some(e),
                stats,
                compressed: None,
            },
        }
    }
}

fn spawn_sweeper<O>(cache: Weak<ResultCache<O>>, period: Duration) -> Option<JoinHandle<()>>
where
    O: Clone + Send + Sync + 'static,
{
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            warn!("No tokio runtime available, expired cache entries are only dropped on access");
            return None;
        }
    };

    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match cache.upgrade() {
                Some(cache) => {
                    cache.sweep_expired();
                }
                None => break,
            }
        }
    }))
}

impl<I: Send + 'static, O: Send + 'static> Drop for DataProcessor<I, O> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
