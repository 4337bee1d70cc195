//! Chain bindings
//!
//! A binding is what a [`HookRegistry`](super::HookRegistry) patches in the game
//! library while it has hooks: a vtable slot for the Valve game library, or a
//! registration on a ReGameDLL hookchain for Counter-Strike.

use std::ffi::{c_int, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::vtable;
use super::{call_member, member_fn, HookError};

/// Installs and removes the trampoline of a hook chain
pub trait ChainBinding: Send + Sync {
    /// Route calls of the foreign function through the chain
    fn attach(&self) -> Result<(), HookError>;

    /// Restore the foreign function
    fn detach(&self) -> Result<(), HookError>;
}

/// Trampoline written into a vtable slot
pub struct VTableBinding {
    name: &'static str,
    slot: usize,
    trampoline: usize,
    /// Non-zero while installed
    original: AtomicUsize,
}

impl VTableBinding {
    /// Bind slot `index` of `vtable` to `trampoline`
    ///
    /// # Safety
    /// `vtable` must be a live vtable with at least `index + 1` slots and
    /// `trampoline` must have the signature of that slot.
    pub unsafe fn new(name: &'static str, vtable: *mut usize, index: usize, trampoline: usize) -> Self {
        Self {
            name,
            slot: vtable::slot_address(vtable, index) as usize,
            trampoline,
            original: AtomicUsize::new(0),
        }
    }

    /// Address of the patched slot
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_installed(&self) -> bool {
        self.original.load(Ordering::Acquire) != 0
    }

    /// The function the slot held before patching
    ///
    /// While not installed the slot still holds it.
    pub fn original(&self) -> usize {
        match self.original.load(Ordering::Acquire) {
            // SAFETY: the slot was validated on construction
            0 => unsafe { vtable::read_slot(self.slot as *const usize) },
            original => original,
        }
    }
}

impl ChainBinding for VTableBinding {
    fn attach(&self) -> Result<(), HookError> {
        if self.is_installed() {
            return Err(HookError::AlreadyInstalled);
        }
        // SAFETY: see `VTableBinding::new`
        let original = unsafe { vtable::install(self.slot as *mut usize, self.trampoline)? };
        self.original.store(original, Ordering::Release);
        tracing::debug!("Installed vtable hook '{}'", self.name);
        Ok(())
    }

    fn detach(&self) -> Result<(), HookError> {
        let original = self.original.load(Ordering::Acquire);
        if original == 0 {
            return Err(HookError::NotInstalled);
        }
        unsafe { vtable::uninstall(self.slot as *mut usize, original)? };
        self.original.store(0, Ordering::Release);
        tracing::debug!("Removed vtable hook '{}'", self.name);
        Ok(())
    }
}

/// Priority our hook functions are registered with on ReGameDLL hookchains
pub const REGAMEDLL_HOOK_PRIORITY: c_int = 128;

/// `IHookChainRegistry` method slots
#[derive(Debug, Clone, Copy)]
pub struct HookchainSlots {
    pub register_hook: usize,
    pub unregister_hook: usize,
}

impl Default for HookchainSlots {
    fn default() -> Self {
        Self {
            register_hook: 0,
            unregister_hook: 1,
        }
    }
}

/// Hook function registered on a foreign ReGameDLL `IHookChainRegistry`
pub struct HookchainBinding {
    name: &'static str,
    registry: usize,
    hook: usize,
    slots: HookchainSlots,
}

impl HookchainBinding {
    /// # Safety
    /// `registry` must be a live `IHookChainRegistry` whose hook function type
    /// matches `hook`.
    pub unsafe fn new(
        name: &'static str,
        registry: *mut c_void,
        hook: usize,
        slots: HookchainSlots,
    ) -> Result<Self, HookError> {
        if registry.is_null() {
            return Err(HookError::InvalidAddress(0));
        }
        Ok(Self {
            name,
            registry: registry as usize,
            hook,
            slots,
        })
    }
}

type RegisterHookFn = member_fn!((usize, c_int) -> ());
type UnregisterHookFn = member_fn!((usize) -> ());

impl ChainBinding for HookchainBinding {
    fn attach(&self) -> Result<(), HookError> {
        let this = self.registry as *mut c_void;
        unsafe {
            let f: RegisterHookFn =
                std::mem::transmute(vtable::virtual_function(this, self.slots.register_hook));
            call_member!(f, this, self.hook, REGAMEDLL_HOOK_PRIORITY);
        }
        tracing::debug!("Registered hookchain '{}'", self.name);
        Ok(())
    }

    fn detach(&self) -> Result<(), HookError> {
        let this = self.registry as *mut c_void;
        unsafe {
            let f: UnregisterHookFn =
                std::mem::transmute(vtable::virtual_function(this, self.slots.unregister_hook));
            call_member!(f, this, self.hook);
        }
        tracing::debug!("Unregistered hookchain '{}'", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{member_trampoline, HookPriority, HookRegistry};
    use std::sync::Arc;

    extern "C" fn original_fn() -> i32 {
        1
    }

    extern "C" fn trampoline_fn() -> i32 {
        2
    }

    #[test]
    fn test_vtable_binding_restores_slot() {
        let mut table: Box<[usize]> = vec![0xAA, original_fn as usize, 0xBB].into();
        let before = table.to_vec();
        let binding = Arc::new(unsafe {
            VTableBinding::new("test", table.as_mut_ptr(), 1, trampoline_fn as usize)
        });

        assert_eq!(binding.original(), original_fn as usize);

        let registry = HookRegistry::<(), i32>::new("test");
        registry.bind(binding.clone());
        assert_eq!(table[1], original_fn as usize);

        let key = registry.register_hook(|h, a| h.call_next(a), HookPriority::Default);
        assert_eq!(table[1], trampoline_fn as usize);
        assert!(binding.is_installed());
        assert_eq!(binding.original(), original_fn as usize);

        registry.unregister_hook(key);
        assert_eq!(table.to_vec(), before);
        assert!(!binding.is_installed());
    }

    #[test]
    fn test_vtable_binding_double_attach() {
        let mut table: Box<[usize]> = vec![original_fn as usize].into();
        let binding = unsafe { VTableBinding::new("test", table.as_mut_ptr(), 0, trampoline_fn as usize) };

        binding.attach().unwrap();
        assert!(matches!(binding.attach(), Err(HookError::AlreadyInstalled)));
        binding.detach().unwrap();
        assert!(matches!(binding.detach(), Err(HookError::NotInstalled)));
        assert_eq!(table[0], original_fn as usize);
    }

    // Fake IHookChainRegistry: vtable + a record of calls
    #[repr(C)]
    struct FakeChainRegistry {
        vtable: *const usize,
        registered: usize,
        priority: c_int,
    }

    member_trampoline! {
        fn fake_register(this, hook: usize, priority: c_int) -> () {
            let registry = unsafe { &mut *(this as *mut FakeChainRegistry) };
            registry.registered = hook;
            registry.priority = priority;
        }
    }

    member_trampoline! {
        fn fake_unregister(this, hook: usize) -> () {
            let registry = unsafe { &mut *(this as *mut FakeChainRegistry) };
            if registry.registered == hook {
                registry.registered = 0;
            }
        }
    }

    #[test]
    fn test_hookchain_binding() {
        let table = [fake_register as usize, fake_unregister as usize];
        let mut fake = FakeChainRegistry {
            vtable: table.as_ptr(),
            registered: 0,
            priority: 0,
        };
        let ptr = &mut fake as *mut FakeChainRegistry as *mut c_void;
        let binding =
            unsafe { HookchainBinding::new("test", ptr, 0x1234, HookchainSlots::default()) }.unwrap();

        binding.attach().unwrap();
        assert_eq!(fake.registered, 0x1234);
        assert_eq!(fake.priority, REGAMEDLL_HOOK_PRIORITY);

        binding.detach().unwrap();
        assert_eq!(fake.registered, 0);
    }
}
