//! Observation hooks around saves, predictions and training runs.
//!
//! Hooks are observers: a hook that errors or panics is logged and counted,
//! and the operation it observed carries on.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use kelp_core::{KelpResult, StorageError, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where in an operation a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    BeforeSave,
    AfterSave,
    BeforePredict,
    AfterPredict,
    BeforeTrain,
    AfterTrain,
}

impl HookPoint {
    pub const ALL: [HookPoint; 6] = [
        HookPoint::BeforeSave,
        HookPoint::AfterSave,
        HookPoint::BeforePredict,
        HookPoint::AfterPredict,
        HookPoint::BeforeTrain,
        HookPoint::AfterTrain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPoint::BeforeSave => "before_save",
            HookPoint::AfterSave => "after_save",
            HookPoint::BeforePredict => "before_predict",
            HookPoint::AfterPredict => "after_predict",
            HookPoint::BeforeTrain => "before_train",
            HookPoint::AfterTrain => "after_train",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook is told.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    pub point: HookPoint,
    pub target_id: String,
    pub payload: Value,
    pub at: Timestamp,
}

impl HookEvent {
    pub fn new(point: HookPoint, target_id: impl Into<String>, payload: Value) -> Self {
        Self {
            point,
            target_id: target_id.into(),
            payload,
            at: chrono::Utc::now(),
        }
    }
}

pub type Hook = Arc<dyn Fn(&HookEvent) -> Result<(), String> + Send + Sync>;

/// Named hooks per hook point, called in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<HookPoint, Vec<(String, Hook)>>>,
    failures: AtomicU64,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("registered", &self.len())
            .field("failures", &self.failures())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, point: HookPoint, name: impl Into<String>, hook: F) -> KelpResult<()>
    where
        F: Fn(&HookEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut hooks = self.hooks.write().map_err(|_| StorageError::LockPoisoned)?;
        let at_point = hooks.entry(point).or_default();
        if at_point.iter().any(|(n, _)| n == &name) {
            return Err(ValidationError::DuplicateId { id: name }.into());
        }
        tracing::debug!(hook = %name, point = %point, "Hook registered");
        at_point.push((name, Arc::new(hook)));
        Ok(())
    }

    /// Returns whether a hook was removed.
    pub fn unregister(&self, point: HookPoint, name: &str) -> KelpResult<bool> {
        let mut hooks = self.hooks.write().map_err(|_| StorageError::LockPoisoned)?;
        let Some(at_point) = hooks.get_mut(&point) else {
            return Ok(false);
        };
        let before = at_point.len();
        at_point.retain(|(n, _)| n != name);
        Ok(at_point.len() != before)
    }

    /// Call every hook registered at `event.point`. Returns how many failed.
    pub fn fire(&self, event: &HookEvent) -> usize {
        // Snapshot so hooks may register or unregister hooks themselves.
        let snapshot: Vec<(String, Hook)> = match self.hooks.read() {
            Ok(hooks) => hooks.get(&event.point).cloned().unwrap_or_default(),
            Err(_) => {
                tracing::warn!(point = %event.point, "Hook registry lock poisoned, skipping hooks");
                return 0;
            }
        };

        let mut failed = 0;
        for (name, hook) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook(event)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(reason)) => reason,
                Err(panic) => panic_message(panic.as_ref()),
            };
            failed += 1;
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                hook = %name,
                point = %event.point,
                target_id = %event.target_id,
                reason = %reason,
                "Hook failed"
            );
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.hooks
            .read()
            .map(|h| h.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hook invocations that errored or panicked since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "hook panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_hooks_fire_in_order() {
        let registry = HookRegistry::new();
        let seen = Arc::new(RwLock::new(Vec::new()));
        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            registry
                .register(HookPoint::AfterSave, name, move |_| {
                    seen.write().unwrap().push(name);
                    Ok(())
                })
                .unwrap();
        }
        let failed = registry.fire(&HookEvent::new(HookPoint::AfterSave, "r1", json!({})));
        assert_eq!(failed, 0);
        assert_eq!(*seen.read().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let registry = HookRegistry::new();
        let after = Arc::new(AtomicUsize::new(0));
        registry
            .register(HookPoint::BeforePredict, "boom", |_| panic!("hook exploded"))
            .unwrap();
        registry
            .register(HookPoint::BeforePredict, "erroring", |_| Err("nope".to_string()))
            .unwrap();
        let counter = Arc::clone(&after);
        registry
            .register(HookPoint::BeforePredict, "survivor", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let failed = registry.fire(&HookEvent::new(HookPoint::BeforePredict, "m1", json!({})));
        assert_eq!(failed, 2);
        assert_eq!(registry.failures(), 2);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_name_rejected_per_point() {
        let registry = HookRegistry::new();
        registry.register(HookPoint::AfterTrain, "audit", |_| Ok(())).unwrap();
        assert!(registry.register(HookPoint::AfterTrain, "audit", |_| Ok(())).is_err());
        registry.register(HookPoint::BeforeTrain, "audit", |_| Ok(())).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister() {
        let registry = HookRegistry::new();
        registry.register(HookPoint::AfterSave, "audit", |_| Ok(())).unwrap();
        assert!(registry.unregister(HookPoint::AfterSave, "audit").unwrap());
        assert!(!registry.unregister(HookPoint::AfterSave, "audit").unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_hook_point_names() {
        let names: Vec<&str> = HookPoint::ALL.iter().map(HookPoint::as_str).collect();
        assert_eq!(names[0], "before_save");
        assert_eq!(names[5], "after_train");
    }
}
