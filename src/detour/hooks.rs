//! Hook callbacks and the per-target hook lists.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::{detour::ChainNext, proxy::Value, Result};

/// What a before-call hook decided.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeforeCallResult {
    /// The result of the call if `prevent` is set, ignored otherwise
    pub value: Value,
    /// Skip the remaining before-call hooks, the chain and the original
    pub prevent: bool,
}

impl BeforeCallResult {
    /// Let the call continue.
    #[must_use]
    pub fn proceed() -> Self {
        BeforeCallResult::default()
    }

    /// Stop the call here; `value` is handed to the after-call hooks as the result.
    #[must_use]
    pub fn prevent(value: impl Into<Value>) -> Self {
        BeforeCallResult {
            value: value.into(),
            prevent: true,
        }
    }
}

/// Runs before the original, in registration order: `(receiver, arguments)`.
pub type BeforeCallHook =
    Arc<dyn Fn(Option<&Value>, &mut [Value]) -> Result<BeforeCallResult> + Send + Sync>;

/// Wraps the original, most recently registered outermost:
/// `(next, receiver, arguments)`.
pub type ChainCallHook =
    Arc<dyn Fn(&ChainNext, Option<&Value>, &mut [Value]) -> Result<Value> + Send + Sync>;

/// Runs after the original, in registration order: `(result, receiver, arguments)`.
pub type AfterCallHook =
    Arc<dyn Fn(Value, Option<&Value>, &mut [Value]) -> Result<Value> + Send + Sync>;

/// The hooks installed on one target.
///
/// Each list is an immutable snapshot swapped on change, so a call captures a list with
/// one reference count increment and never sees it change while it runs. Hooks are
/// identified by their [`Arc`]: removing a hook removes the most recent addition of that
/// same `Arc`.
#[derive(Default)]
pub struct HookChain {
    before: RwLock<Arc<[BeforeCallHook]>>,
    chain: RwLock<Arc<[ChainCallHook]>>,
    after: RwLock<Arc<[AfterCallHook]>>,
}

impl HookChain {
    /// Append a before-call hook. Adding the same hook twice runs it twice.
    pub fn add_before(&self, hook: BeforeCallHook) {
        append(&self.before, hook, false);
    }

    /// Remove the most recent addition of `hook`; returns `false` if it is not installed.
    pub fn remove_before(&self, hook: &BeforeCallHook) -> bool {
        remove(&self.before, hook)
    }

    /// Snapshot of the before-call hooks, in registration order.
    #[must_use]
    pub fn before(&self) -> Arc<[BeforeCallHook]> {
        self.before.read().clone()
    }

    /// Append a chain hook; returns `false` if the hook is already installed.
    pub fn add_chain(&self, hook: ChainCallHook) -> bool {
        append(&self.chain, hook, true)
    }

    /// Remove a chain hook; returns `false` if it is not installed.
    pub fn remove_chain(&self, hook: &ChainCallHook) -> bool {
        remove(&self.chain, hook)
    }

    /// Snapshot of the chain hooks, in registration order.
    #[must_use]
    pub fn chain(&self) -> Arc<[ChainCallHook]> {
        self.chain.read().clone()
    }

    /// Append an after-call hook. Adding the same hook twice runs it twice.
    pub fn add_after(&self, hook: AfterCallHook) {
        append(&self.after, hook, false);
    }

    /// Remove the most recent addition of `hook`; returns `false` if it is not installed.
    pub fn remove_after(&self, hook: &AfterCallHook) -> bool {
        remove(&self.after, hook)
    }

    /// Snapshot of the after-call hooks, in registration order.
    #[must_use]
    pub fn after(&self) -> Arc<[AfterCallHook]> {
        self.after.read().clone()
    }

    /// Returns `true` if no hook of any kind is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.before.read().is_empty() && self.chain.read().is_empty() && self.after.read().is_empty()
    }
}

fn append<T: ?Sized>(list: &RwLock<Arc<[Arc<T>]>>, hook: Arc<T>, unique: bool) -> bool {
    let current = list.upgradable_read();
    if unique && current.iter().any(|installed| Arc::ptr_eq(installed, &hook)) {
        return false;
    }

    let updated: Arc<[Arc<T>]> = current.iter().cloned().chain(Some(hook)).collect();
    *RwLockUpgradableReadGuard::upgrade(current) = updated;
    true
}

fn remove<T: ?Sized>(list: &RwLock<Arc<[Arc<T>]>>, hook: &Arc<T>) -> bool {
    let current = list.upgradable_read();
    let Some(position) = current.iter().rposition(|installed| Arc::ptr_eq(installed, hook)) else {
        return false;
    };

    let updated: Arc<[Arc<T>]> = current
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != position)
        .map(|(_, installed)| installed.clone())
        .collect();
    *RwLockUpgradableReadGuard::upgrade(current) = updated;
    true
}
