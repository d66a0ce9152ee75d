//! # Pipeline Composition Module
//!
//! Transformers are the unit of work: an async function from one value to
//! another. A [`Pipeline`] folds an ordered sequence of transformers over its
//! input, then runs an optional output validator and the success/failure
//! hooks. Pipelines are immutable once built and are themselves
//! transformers, so they nest inside other pipelines and processors.

use crate::etl::error::{EtlError, Result};
use async_trait::async_trait;
use log::{debug, error, warn};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// An async conversion from `I` to `O`.
///
/// Implement this for stages that need state or I/O; wrap plain closures
/// with [`FnTransformer`] or [`AsyncFnTransformer`].
#[async_trait]
pub trait Transformer<I: Send + 'static, O: Send + 'static>: Send + Sync {
    async fn transform(&self, input: I) -> Result<O>;
}

/// Shared, type-erased transformer
pub type BoxedTransformer<I, O> = Arc<dyn Transformer<I, O>>;

/// Wraps a synchronous closure `Fn(I) -> Result<O>`.
#[derive(Clone)]
pub struct FnTransformer<F>(pub F);

#[async_trait]
impl<I, O, F> Transformer<I, O> for FnTransformer<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Result<O> + Send + Sync,
{
    async fn transform(&self, input: I) -> Result<O> {
        (self.0)(input)
    }
}

/// Wraps a closure returning a future.
pub struct AsyncFnTransformer<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnTransformer<F, Fut> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F, Fut> Transformer<I, O> for AsyncFnTransformer<F, Fut>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    async fn transform(&self, input: I) -> Result<O> {
        (self.f)(input).await
    }
}

/// Passes its input through unchanged.
pub struct Identity<T>(PhantomData<fn() -> T>);

impl<T> Default for Identity<T> {
    fn default() -> Self {
        Identity(PhantomData)
    }
}

#[async_trait]
impl<T: Send + 'static> Transformer<T, T> for Identity<T> {
    async fn transform(&self, input: T) -> Result<T> {
        Ok(input)
    }
}

/// Runs `first`, then feeds its output to `second`.
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _middle: PhantomData<fn() -> M>,
}

impl<A, B, M> Chain<A, B, M> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _middle: PhantomData,
        }
    }
}

#[async_trait]
impl<I, M, O, A, B> Transformer<I, O> for Chain<A, B, M>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
    A: Transformer<I, M>,
    B: Transformer<M, O>,
{
    async fn transform(&self, input: I) -> Result<O> {
        let middle = self.first.transform(input).await?;
        self.second.transform(middle).await
    }
}

/// Left fold over a runtime list of `Value` stages.
///
/// This is the dynamic counterpart of [`Chain`] for stages assembled from
/// configuration, where the stage types are only known as JSON.
#[derive(Clone, Default)]
pub struct Stages {
    stages: Vec<BoxedTransformer<Value, Value>>,
}

impl Stages {
    pub fn new(stages: Vec<BoxedTransformer<Value, Value>>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl Transformer<Value, Value> for Stages {
    async fn transform(&self, input: Value) -> Result<Value> {
        let mut current = input;
        for (index, stage) in self.stages.iter().enumerate() {
            debug!("Running stage {} of {}", index + 1, self.stages.len());
            current = stage.transform(current).await?;
        }
        Ok(current)
    }
}

/// Final check on a pipeline's output. A `false` answer fails the run.
#[async_trait]
pub trait PipelineValidator<O>: Send + Sync {
    async fn validate(&self, output: &O) -> Result<bool>;
}

/// Wraps a synchronous predicate as a [`PipelineValidator`].
pub struct FnValidator<F>(pub F);

#[async_trait]
impl<O, F> PipelineValidator<O> for FnValidator<F>
where
    O: Send + Sync,
    F: Fn(&O) -> bool + Send + Sync,
{
    async fn validate(&self, output: &O) -> Result<bool> {
        Ok((self.0)(output))
    }
}

pub type SuccessHook<O> = Arc<dyn Fn(&O) + Send + Sync>;
pub type FailureHook<I> = Arc<dyn Fn(&EtlError, &I) + Send + Sync>;

const UNNAMED: &str = "unnamed";

/// An immutable, reusable composition of transformers.
pub struct Pipeline<I: Send + 'static, O: Send + 'static> {
    name: Option<String>,
    transformer: BoxedTransformer<I, O>,
    validator: Option<Arc<dyn PipelineValidator<O>>>,
    error_handler: Option<FailureHook<I>>,
    on_success: Option<SuccessHook<O>>,
    on_failure: Option<FailureHook<I>>,
}

/// A pipeline whose input and output are whole batches.
///
/// The batch is a single value to the fold; per-element work is expressed
/// with [`crate::etl::transform::map`] or [`crate::etl::transform::each`].
pub type BatchPipeline<T, R> = Pipeline<Vec<T>, Vec<R>>;

impl<I: Send + 'static, O: Send + 'static> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            transformer: Arc::clone(&self.transformer),
            validator: self.validator.clone(),
            error_handler: self.error_handler.clone(),
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
        }
    }
}

impl<I> Pipeline<I, I>
where
    I: Clone + Send + Sync + 'static,
{
    /// Start building a pipeline. Until a stage is added it is the identity.
    pub fn builder(name: impl Into<String>) -> PipelineBuilder<I, I, Identity<I>> {
        PipelineBuilder::new(Some(name.into()), Identity::default())
    }

    /// Start building an unnamed pipeline.
    pub fn unnamed() -> PipelineBuilder<I, I, Identity<I>> {
        PipelineBuilder::new(None, Identity::default())
    }
}

impl<T> Pipeline<Vec<T>, Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start building a batch pipeline over `Vec<T>`.
    pub fn batch(name: impl Into<String>) -> PipelineBuilder<Vec<T>, Vec<T>, Identity<Vec<T>>> {
        PipelineBuilder::new(Some(name.into()), Identity::default())
    }
}

impl Pipeline<Value, Value> {
    /// Build a pipeline from a runtime list of `Value` stages.
    pub fn from_stages(
        name: impl Into<String>,
        stages: Vec<BoxedTransformer<Value, Value>>,
    ) -> PipelineBuilder<Value, Value, Stages> {
        PipelineBuilder::new(Some(name.into()), Stages::new(stages))
    }
}

impl<I, O> Pipeline<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNNAMED)
    }

    /// Run the pipeline on one input.
    ///
    /// Either the fully transformed (and validated) output is returned, or
    /// the first error after the failure hooks have seen it.
    pub async fn run(&self, input: I) -> Result<O> {
        let original = (self.error_handler.is_some() || self.on_failure.is_some())
            .then(|| input.clone());
        debug!("Running pipeline: {}", self.name());

        match self.execute(input).await {
            Ok(output) => {
                if let Some(hook) = &self.on_success {
                    hook(&output);
                }
                debug!("Pipeline {} completed", self.name());
                Ok(output)
            }
            Err(e) => {
                error!("Pipeline {} failed: {}", self.name(), e);
                if let Some(original) = &original {
                    if let Some(handler) = &self.error_handler {
                        handler(&e, original);
                    }
                    if let Some(hook) = &self.on_failure {
                        hook(&e, original);
                    }
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, input: I) -> Result<O> {
        let output = self.transformer.transform(input).await?;
        if let Some(validator) = &self.validator {
            if !validator.validate(&output).await? {
                return Err(EtlError::Validation(format!(
                    "Validation failed for pipeline: {}",
                    self.name()
                )));
            }
        }
        Ok(output)
    }
}

#[async_trait]
impl<I, O> Transformer<I, O> for Pipeline<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn transform(&self, input: I) -> Result<O> {
        self.run(input).await
    }
}

/// Typed builder for [`Pipeline`].
///
/// Each call to [`stage`](PipelineBuilder::stage) appends a transformer whose
/// input type must match the current output type.
pub struct PipelineBuilder<I, O, T> {
    name: Option<String>,
    transformer: T,
    validator: Option<Arc<dyn PipelineValidator<O>>>,
    error_handler: Option<FailureHook<I>>,
    on_success: Option<SuccessHook<O>>,
    on_failure: Option<FailureHook<I>>,
}

impl<I, O, T> PipelineBuilder<I, O, T>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
    T: Transformer<I, O> + 'static,
{
    fn new(name: Option<String>, transformer: T) -> Self {
        Self {
            name,
            transformer,
            validator: None,
            error_handler: None,
            on_success: None,
            on_failure: None,
        }
    }

    /// Append a stage. Output validators and success hooks registered so
    /// far are typed by the old output; they are dropped with a warning, so
    /// register them after the last stage.
    pub fn stage<N, S>(self, next: S) -> PipelineBuilder<I, N, Chain<T, S, O>>
    where
        N: Send + Sync + 'static,
        S: Transformer<O, N> + 'static,
    {
        if self.validator.is_some() || self.on_success.is_some() {
            warn!(
                "Pipeline {}: output validator and success hook registered before a later stage are discarded",
                self.name.as_deref().unwrap_or(UNNAMED)
            );
        }
        PipelineBuilder {
            name: self.name,
            transformer: Chain::new(self.transformer, next),
            validator: None,
            error_handler: self.error_handler,
            on_success: None,
            on_failure: self.on_failure,
        }
    }

    /// Append a synchronous closure stage.
    pub fn map<N, F>(self, f: F) -> PipelineBuilder<I, N, Chain<T, FnTransformer<F>, O>>
    where
        N: Send + Sync + 'static,
        F: Fn(O) -> Result<N> + Send + Sync + 'static,
    {
        self.stage(FnTransformer(f))
    }

    pub fn validator<V>(mut self, validator: V) -> Self
    where
        V: PipelineValidator<O> + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Synchronous predicate validator.
    pub fn validate_with<F>(self, predicate: F) -> Self
    where
        F: Fn(&O) -> bool + Send + Sync + 'static,
    {
        self.validator(FnValidator(predicate))
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&EtlError, &I) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&O) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&EtlError, &I) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Pipeline<I, O> {
        Pipeline {
            name: self.name,
            transformer: Arc::new(self.transformer),
            validator: self.validator,
            error_handler: self.error_handler,
            on_success: self.on_success,
            on_failure: self.on_failure,
        }
    }
}
