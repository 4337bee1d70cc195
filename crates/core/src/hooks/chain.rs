//! Hook chains
//!
//! A [`HookRegistry`] holds the hooks registered for one interceptable operation,
//! ordered by descending [`HookPriority`] and by registration order within a
//! priority. Dispatching walks that order: every hook receives a [`Hook`] it
//! can use to continue the chain or to jump straight to the original function.
//!
//! # Example
//!
//! ```ignore
//! let key = goldhook.player_hooks().take_damage.register_hook(
//!     |hook, args| {
//!         args.damage *= 0.5;
//!         hook.call_next(args)
//!     },
//!     HookPriority::High,
//! );
//! ```
//!
//! Mutation takes a write lock and publishes a new snapshot of the order.
//! Dispatch clones the current snapshot and releases the lock before any hook
//! runs, so hooks may register or unregister other hooks while being called.

use std::cmp::Ordering as CmpOrdering;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use slotmap::{new_key_type, SlotMap};

use super::binding::ChainBinding;

new_key_type! {
    /// Handle for a registered hook
    pub struct HookKey;
}

/// Hook priority, higher runs first
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HookPriority {
    Uninterruptable = 255,
    High = 192,
    #[default]
    Default = 128,
    Medium = 64,
    Low = 0,
}

impl Ord for HookPriority {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (*self as u8).cmp(&(*other as u8))
    }
}

impl PartialOrd for HookPriority {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Whether a registered hook takes part in dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Enabled,
    Disabled,
}

/// Hook callback for an operation taking `A` and returning `R`
pub type HookCallback<A, R> = dyn Fn(&Hook<'_, A, R>, &mut A) -> R + Send + Sync;

struct HookEntry<A, R> {
    key: HookKey,
    priority: HookPriority,
    origin: usize,
    enabled: AtomicBool,
    callback: Box<HookCallback<A, R>>,
}

struct ChainInner<A, R> {
    entries: SlotMap<HookKey, Arc<HookEntry<A, R>>>,
    order: Arc<Vec<Arc<HookEntry<A, R>>>>,
}

struct BindingState {
    binding: Option<Arc<dyn ChainBinding>>,
    attached: bool,
}

/// Code address inside the module that instantiated `F`
///
/// Closures are local types, so `origin_marker::<F>` is monomorphized in the
/// crate that wrote the closure, which is the plugin library for plugin hooks.
fn origin_of<F>() -> usize {
    origin_marker::<F> as fn() as usize
}

#[inline(never)]
fn origin_marker<F>() {
    std::hint::black_box(std::any::type_name::<F>());
}

/// Per-call handle passed to every hook
///
/// Lives on the dispatch stack frame. Each hook gets its own `Hook` that
/// continues the chain after it.
pub struct Hook<'a, A, R> {
    remaining: &'a [Arc<HookEntry<A, R>>],
    last: Option<&'a dyn Fn(&mut A) -> R>,
    original: &'a dyn Fn(&mut A) -> R,
}

impl<A, R> Hook<'_, A, R> {
    /// Call the next enabled hook, or the bottom of the chain when none is left
    ///
    /// The bottom is the `last` function if the chain was dispatched with one,
    /// otherwise the original function.
    pub fn call_next(&self, args: &mut A) -> R {
        let mut rest = self.remaining;
        while let Some((entry, tail)) = rest.split_first() {
            rest = tail;
            if entry.enabled.load(Ordering::Acquire) {
                let next = Hook {
                    remaining: tail,
                    last: self.last,
                    original: self.original,
                };
                return (entry.callback)(&next, args);
            }
        }

        match self.last {
            Some(last) => last(args),
            None => (self.original)(args),
        }
    }

    /// Call the original function, skipping every remaining hook
    pub fn call_original(&self, args: &mut A) -> R {
        (self.original)(args)
    }
}

/// Ordered hook collection for one operation
pub struct HookRegistry<A, R> {
    name: &'static str,
    inner: RwLock<ChainInner<A, R>>,
    binding: Mutex<BindingState>,
}

impl<A, R> HookRegistry<A, R> {
    /// Create an empty registry
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(ChainInner {
                entries: SlotMap::with_key(),
                order: Arc::new(Vec::new()),
            }),
            binding: Mutex::new(BindingState {
                binding: None,
                attached: false,
            }),
        }
    }

    /// Operation name, for logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a hook
    ///
    /// The first registration on a bound chain attaches the binding.
    pub fn register_hook<F>(&self, callback: F, priority: HookPriority) -> HookKey
    where
        F: Fn(&Hook<'_, A, R>, &mut A) -> R + Send + Sync + 'static,
    {
        let key = {
            let mut inner = self.inner.write();
            let callback: Box<HookCallback<A, R>> = Box::new(callback);
            let key = inner.entries.insert_with_key(|key| {
                Arc::new(HookEntry {
                    key,
                    priority,
                    origin: origin_of::<F>(),
                    enabled: AtomicBool::new(true),
                    callback,
                })
            });

            let entry = Arc::clone(&inner.entries[key]);
            let mut order = Vec::clone(&inner.order);
            let position = order
                .iter()
                .position(|e| e.priority < priority)
                .unwrap_or(order.len());
            order.insert(position, entry);
            inner.order = Arc::new(order);
            key
        };

        tracing::debug!("Registered hook on '{}' ({:?})", self.name, priority);
        self.sync_binding();
        key
    }

    /// Remove a hook
    ///
    /// Removing the last hook of a bound chain detaches the binding.
    /// Returns false if the key is unknown.
    pub fn unregister_hook(&self, key: HookKey) -> bool {
        {
            let mut inner = self.inner.write();
            if inner.entries.remove(key).is_none() {
                return false;
            }
            let order: Vec<_> = inner.order.iter().filter(|e| e.key != key).cloned().collect();
            inner.order = Arc::new(order);
        }

        tracing::debug!("Unregistered hook on '{}'", self.name);
        self.sync_binding();
        true
    }

    /// Remove every hook whose callback was instantiated inside `code`
    ///
    /// Used before unloading a plugin library. Returns the number removed.
    pub fn unregister_within(&self, code: &Range<usize>) -> usize {
        let removed = {
            let mut inner = self.inner.write();
            let keys: Vec<_> = inner
                .entries
                .iter()
                .filter(|(_, e)| code.contains(&e.origin))
                .map(|(key, _)| key)
                .collect();
            if keys.is_empty() {
                return 0;
            }
            for key in &keys {
                inner.entries.remove(*key);
            }
            let order: Vec<_> = inner
                .order
                .iter()
                .filter(|e| !code.contains(&e.origin))
                .cloned()
                .collect();
            inner.order = Arc::new(order);
            keys.len()
        };

        tracing::debug!("Unregistered {} hook(s) on '{}'", removed, self.name);
        self.sync_binding();
        removed
    }

    /// Address recorded for a hook by [`Self::unregister_within`]
    pub fn origin(&self, key: HookKey) -> Option<usize> {
        self.inner.read().entries.get(key).map(|e| e.origin)
    }

    /// Enable or disable a hook without changing its position
    ///
    /// Returns false if the key is unknown.
    pub fn set_state(&self, key: HookKey, state: HookState) -> bool {
        let inner = self.inner.read();
        match inner.entries.get(key) {
            Some(entry) => {
                entry
                    .enabled
                    .store(state == HookState::Enabled, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// State of a hook, None if the key is unknown
    pub fn state(&self, key: HookKey) -> Option<HookState> {
        self.inner.read().entries.get(key).map(|e| {
            if e.enabled.load(Ordering::Acquire) {
                HookState::Enabled
            } else {
                HookState::Disabled
            }
        })
    }

    /// Number of registered hooks, enabled or not
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch with `original` at the bottom of the chain
    pub fn call_chain<F>(&self, original: F, args: &mut A) -> R
    where
        F: Fn(&mut A) -> R,
    {
        let order = self.snapshot();
        let hook = Hook {
            remaining: &order,
            last: None,
            original: &original,
        };
        hook.call_next(args)
    }

    /// Dispatch with `last` at the bottom of the chain
    ///
    /// `last` runs when the chain is exhausted. [`Hook::call_original`] still
    /// reaches `original`.
    pub fn call_chain_with_last<L, F>(&self, last: L, original: F, args: &mut A) -> R
    where
        L: Fn(&mut A) -> R,
        F: Fn(&mut A) -> R,
    {
        let order = self.snapshot();
        let hook = Hook {
            remaining: &order,
            last: Some(&last),
            original: &original,
        };
        hook.call_next(args)
    }

    /// Attach what this chain patches in the game library
    ///
    /// Attaches immediately when hooks are already registered. Replaces and
    /// detaches any previous binding.
    pub fn bind(&self, binding: Arc<dyn ChainBinding>) {
        let previous = {
            let mut state = self.binding.lock();
            let previous = state.binding.replace(binding);
            let was_attached = std::mem::replace(&mut state.attached, false);
            previous.filter(|_| was_attached)
        };
        if let Some(previous) = previous {
            if let Err(e) = previous.detach() {
                tracing::error!("Failed to detach previous binding of '{}': {}", self.name, e);
            }
        }
        self.sync_binding();
    }

    /// Detach and forget the binding
    pub fn unbind(&self) {
        let mut state = self.binding.lock();
        if let Some(binding) = state.binding.take() {
            if state.attached {
                if let Err(e) = binding.detach() {
                    tracing::error!("Failed to detach '{}': {}", self.name, e);
                }
            }
        }
        state.attached = false;
    }

    /// Whether the binding is currently attached
    pub fn is_attached(&self) -> bool {
        self.binding.lock().attached
    }

    fn snapshot(&self) -> Arc<Vec<Arc<HookEntry<A, R>>>> {
        Arc::clone(&self.inner.read().order)
    }

    fn sync_binding(&self) {
        let mut state = self.binding.lock();
        let Some(binding) = state.binding.clone() else {
            return;
        };

        let wanted = !self.is_empty();
        if wanted == state.attached {
            return;
        }

        let result = if wanted {
            binding.attach()
        } else {
            binding.detach()
        };
        match result {
            Ok(()) => {
                state.attached = wanted;
                tracing::info!(
                    "{} '{}'",
                    if wanted { "Attached" } else { "Detached" },
                    self.name
                );
            }
            Err(e) => tracing::error!("Failed to update binding of '{}': {}", self.name, e),
        }
    }
}

/// A group of hook registries that can be cleaned up together
pub trait HookChains {
    /// Remove every hook registered from `code`, returning how many went
    fn unregister_within(&self, code: &Range<usize>) -> usize;

    /// Detach and forget every binding
    fn unbind_all(&self);
}

impl<A, R> HookChains for HookRegistry<A, R> {
    fn unregister_within(&self, code: &Range<usize>) -> usize {
        HookRegistry::unregister_within(self, code)
    }

    fn unbind_all(&self) {
        self.unbind();
    }
}

/// Implement [`HookChains`] for a struct of registries
macro_rules! hook_chains {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::hooks::HookChains for $ty {
            fn unregister_within(&self, code: &::std::ops::Range<usize>) -> usize {
                0 $(+ self.$field.unregister_within(code))+
            }

            fn unbind_all(&self) {
                $(self.$field.unbind();)+
            }
        }
    };
}

pub(crate) use hook_chains;

impl<A, R> Drop for HookRegistry<A, R> {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookError;
    use std::sync::atomic::AtomicUsize;

    type Trace = Arc<parking_lot::Mutex<Vec<&'static str>>>;

    fn tracing_hook(
        trace: &Trace,
        name: &'static str,
    ) -> impl Fn(&Hook<'_, i32, i32>, &mut i32) -> i32 + Send + Sync + 'static {
        let trace = Arc::clone(trace);
        move |hook, args| {
            trace.lock().push(name);
            hook.call_next(args)
        }
    }

    #[test]
    fn test_priority_order() {
        assert!(HookPriority::Uninterruptable > HookPriority::High);
        assert!(HookPriority::High > HookPriority::Default);
        assert!(HookPriority::Default > HookPriority::Medium);
        assert!(HookPriority::Medium > HookPriority::Low);
    }

    #[test]
    fn test_dispatch_order_is_priority_then_fifo() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let trace: Trace = Default::default();

        registry.register_hook(tracing_hook(&trace, "low"), HookPriority::Low);
        registry.register_hook(tracing_hook(&trace, "default1"), HookPriority::Default);
        registry.register_hook(tracing_hook(&trace, "high"), HookPriority::High);
        registry.register_hook(tracing_hook(&trace, "default2"), HookPriority::Default);
        registry.register_hook(tracing_hook(&trace, "top"), HookPriority::Uninterruptable);

        let mut args = 0;
        registry.call_chain(|_| 0, &mut args);

        assert_eq!(
            *trace.lock(),
            vec!["top", "high", "default1", "default2", "low"]
        );
    }

    #[test]
    fn test_no_hooks_calls_original_once() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let calls = AtomicUsize::new(0);

        let mut args = 21;
        let result = registry.call_chain(
            |a| {
                calls.fetch_add(1, Ordering::SeqCst);
                *a * 2
            },
            &mut args,
        );

        assert_eq!(result, 42);
        assert_eq!(args, 21);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_short_circuit() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let trace: Trace = Default::default();

        registry.register_hook(|_, _| -1, HookPriority::High);
        registry.register_hook(tracing_hook(&trace, "never"), HookPriority::Low);

        let mut args = 0;
        let result = registry.call_chain(|_| panic!("original must not run"), &mut args);

        assert_eq!(result, -1);
        assert!(trace.lock().is_empty());
    }

    #[test]
    fn test_call_original_skips_remaining() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let trace: Trace = Default::default();

        registry.register_hook(|hook, args| hook.call_original(args) + 1, HookPriority::High);
        registry.register_hook(tracing_hook(&trace, "skipped"), HookPriority::Low);

        let mut args = 10;
        let result = registry.call_chain_with_last(|_| panic!("last must not run"), |a| *a, &mut args);

        assert_eq!(result, 11);
        assert!(trace.lock().is_empty());
    }

    #[test]
    fn test_last_runs_at_bottom_only() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let trace: Trace = Default::default();
        registry.register_hook(tracing_hook(&trace, "a"), HookPriority::Default);

        let mut args = 0;
        let result = registry.call_chain_with_last(
            |_| {
                trace.lock().push("last");
                7
            },
            |_| {
                trace.lock().push("original");
                9
            },
            &mut args,
        );

        assert_eq!(result, 7);
        assert_eq!(*trace.lock(), vec!["a", "last"]);
    }

    #[test]
    fn test_disable_keeps_position() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let trace: Trace = Default::default();

        registry.register_hook(tracing_hook(&trace, "first"), HookPriority::Default);
        let middle = registry.register_hook(tracing_hook(&trace, "middle"), HookPriority::Default);
        registry.register_hook(tracing_hook(&trace, "last"), HookPriority::Default);

        assert!(registry.set_state(middle, HookState::Disabled));
        assert_eq!(registry.state(middle), Some(HookState::Disabled));
        let mut args = 0;
        registry.call_chain(|_| 0, &mut args);
        assert_eq!(*trace.lock(), vec!["first", "last"]);

        trace.lock().clear();
        registry.set_state(middle, HookState::Enabled);
        registry.call_chain(|_| 0, &mut args);
        assert_eq!(*trace.lock(), vec!["first", "middle", "last"]);
    }

    #[test]
    fn test_order_survives_reregistration() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let trace: Trace = Default::default();

        let a = registry.register_hook(tracing_hook(&trace, "a"), HookPriority::Medium);
        registry.register_hook(tracing_hook(&trace, "b"), HookPriority::Medium);
        assert!(registry.unregister_hook(a));
        assert!(!registry.unregister_hook(a));
        registry.register_hook(tracing_hook(&trace, "a2"), HookPriority::Medium);
        registry.register_hook(tracing_hook(&trace, "h"), HookPriority::High);

        let mut args = 0;
        registry.call_chain(|_| 0, &mut args);
        assert_eq!(*trace.lock(), vec!["h", "b", "a2"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_reentrant_registration_during_dispatch() {
        let registry = Arc::new(HookRegistry::<i32, i32>::new("test"));
        let inner = Arc::clone(&registry);

        registry.register_hook(
            move |hook, args| {
                inner.register_hook(|h, a| h.call_next(a), HookPriority::Low);
                hook.call_next(args)
            },
            HookPriority::High,
        );

        let mut args = 3;
        assert_eq!(registry.call_chain(|a| *a, &mut args), 3);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_nested_dispatch() {
        let registry = Arc::new(HookRegistry::<i32, i32>::new("test"));
        let inner = Arc::clone(&registry);

        registry.register_hook(
            move |hook, args| {
                if *args > 0 {
                    let mut nested = *args - 1;
                    let below = inner.call_chain(|a| *a, &mut nested);
                    return below + hook.call_next(args);
                }
                hook.call_next(args)
            },
            HookPriority::Default,
        );

        let mut args = 2;
        // (0 + 1) + 2
        assert_eq!(registry.call_chain(|a| *a, &mut args), 3);
    }

    #[derive(Default)]
    struct CountingBinding {
        attached: AtomicUsize,
        detached: AtomicUsize,
    }

    impl ChainBinding for CountingBinding {
        fn attach(&self) -> Result<(), HookError> {
            self.attached.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn detach(&self) -> Result<(), HookError> {
            self.detached.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_binding_follows_registrations() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let binding = Arc::new(CountingBinding::default());
        registry.bind(binding.clone());
        assert!(!registry.is_attached());

        let a = registry.register_hook(|h, a| h.call_next(a), HookPriority::Default);
        let b = registry.register_hook(|h, a| h.call_next(a), HookPriority::Default);
        assert_eq!(binding.attached.load(Ordering::SeqCst), 1);
        assert!(registry.is_attached());

        registry.unregister_hook(a);
        assert_eq!(binding.detached.load(Ordering::SeqCst), 0);
        registry.unregister_hook(b);
        assert_eq!(binding.detached.load(Ordering::SeqCst), 1);
        assert!(!registry.is_attached());
    }

    fn module_a_hook() -> impl Fn(&Hook<'_, i32, i32>, &mut i32) -> i32 + Send + Sync + 'static {
        |_, _| 1
    }

    fn module_b_hook() -> impl Fn(&Hook<'_, i32, i32>, &mut i32) -> i32 + Send + Sync + 'static {
        |_, _| 2
    }

    #[test]
    fn test_unregister_within_removes_only_that_code() {
        let registry = HookRegistry::<i32, i32>::new("test");
        let binding = Arc::new(CountingBinding::default());
        registry.bind(binding.clone());

        let a = registry.register_hook(module_a_hook(), HookPriority::High);
        let b = registry.register_hook(module_b_hook(), HookPriority::Low);
        let origin_a = registry.origin(a).unwrap();
        assert_ne!(origin_a, registry.origin(b).unwrap());

        assert_eq!(registry.unregister_within(&(origin_a..origin_a + 1)), 1);
        assert_eq!(registry.state(a), None);
        assert_eq!(registry.state(b), Some(HookState::Enabled));

        let mut args = 0;
        assert_eq!(registry.call_chain(|_| 0, &mut args), 2);
        assert!(registry.is_attached());

        let origin_b = registry.origin(b).unwrap();
        assert_eq!(registry.unregister_within(&(origin_b..origin_b + 1)), 1);
        assert!(registry.is_empty());
        assert_eq!(binding.detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_within_empty_range() {
        let registry = HookRegistry::<i32, i32>::new("test");
        registry.register_hook(module_a_hook(), HookPriority::Default);
        assert_eq!(registry.unregister_within(&(0..0)), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_bind_after_registration_attaches() {
        let registry = HookRegistry::<i32, i32>::new("test");
        registry.register_hook(|h, a| h.call_next(a), HookPriority::Default);

        let binding = Arc::new(CountingBinding::default());
        registry.bind(binding.clone());
        assert_eq!(binding.attached.load(Ordering::SeqCst), 1);

        drop(registry);
        assert_eq!(binding.detached.load(Ordering::SeqCst), 1);
    }
}
