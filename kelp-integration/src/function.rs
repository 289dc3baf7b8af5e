//! Replaceable handles for externally owned ML entry points.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kelp_core::{KelpResult, StorageError};
use serde_json::Value;
use thiserror::Error;

/// Failure reported by an ML entry point. Decorators pass it through
/// untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{target} failed: {reason}")]
pub struct CallError {
    pub target: String,
    pub reason: String,
}

impl CallError {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

pub type CallResult = Result<Value, CallError>;

/// An async ML entry point taking and returning JSON.
#[async_trait]
pub trait MlFunction: Send + Sync {
    async fn call(&self, args: Value) -> CallResult;
}

/// Adapts an async closure to [`MlFunction`].
pub struct FnFunction<F>(pub F);

#[async_trait]
impl<F, Fut> MlFunction for FnFunction<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = CallResult> + Send,
{
    async fn call(&self, args: Value) -> CallResult {
        (self.0)(args).await
    }
}

/// Wrap an async closure as a shareable [`MlFunction`].
pub fn ml_fn<F, Fut>(f: F) -> Arc<dyn MlFunction>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = CallResult> + Send + 'static,
{
    Arc::new(FnFunction(f))
}

/// Named slot holding the implementation callers currently reach.
///
/// Callers keep the slot and call through it, so swapping the
/// implementation never changes a call site.
pub struct FunctionSlot {
    name: String,
    current: RwLock<Arc<dyn MlFunction>>,
}

impl fmt::Debug for FunctionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSlot").field("name", &self.name).finish()
    }
}

impl FunctionSlot {
    /// `name` is the fully qualified name the slot is registered under.
    pub fn new(name: impl Into<String>, function: Arc<dyn MlFunction>) -> Self {
        Self {
            name: name.into(),
            current: RwLock::new(function),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> KelpResult<Arc<dyn MlFunction>> {
        self.current
            .read()
            .map(|f| Arc::clone(&*f))
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Install `function`, returning the one it replaced.
    pub fn replace(&self, function: Arc<dyn MlFunction>) -> KelpResult<Arc<dyn MlFunction>> {
        let mut current = self.current.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(std::mem::replace(&mut *current, function))
    }

    pub async fn call(&self, args: Value) -> CallResult {
        let function = self
            .current()
            .map_err(|e| CallError::new(&self.name, e.to_string()))?;
        function.call(args).await
    }
}

/// The entry points of the ML serving stack that get caching.
#[derive(Debug, Clone)]
pub struct MlEndpoints {
    pub predict: Arc<FunctionSlot>,
    pub prepare_training: Arc<FunctionSlot>,
    pub extract_features: Arc<FunctionSlot>,
    pub get_record: Arc<FunctionSlot>,
}

impl MlEndpoints {
    pub const PREDICT: &'static str = "ml.predict";
    pub const PREPARE_TRAINING: &'static str = "ml.prepare_training";
    pub const EXTRACT_FEATURES: &'static str = "ml.extract_features";
    pub const GET_RECORD: &'static str = "ml.get_record";

    pub fn new(
        predict: Arc<dyn MlFunction>,
        prepare_training: Arc<dyn MlFunction>,
        extract_features: Arc<dyn MlFunction>,
        get_record: Arc<dyn MlFunction>,
    ) -> Self {
        Self {
            predict: Arc::new(FunctionSlot::new(Self::PREDICT, predict)),
            prepare_training: Arc::new(FunctionSlot::new(Self::PREPARE_TRAINING, prepare_training)),
            extract_features: Arc::new(FunctionSlot::new(Self::EXTRACT_FEATURES, extract_features)),
            get_record: Arc::new(FunctionSlot::new(Self::GET_RECORD, get_record)),
        }
    }
}
