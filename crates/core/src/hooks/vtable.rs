//! VTable access and slot patching
//!
//! All raw pointer arithmetic on foreign objects lives here. Slot indices
//! always come from gamedata.

use std::ffi::c_void;
use std::mem::size_of;

use super::HookError;

/// Read the primary vtable pointer of an object (its first word)
///
/// # Safety
/// `object` must point to a live polymorphic C++ object.
pub unsafe fn vtable_of(object: *const c_void) -> *mut usize {
    *(object as *const *mut usize)
}

/// Address of slot `index` in a vtable, no bounds checking
///
/// # Safety
/// `index` must be inside the vtable.
pub unsafe fn slot_address(vtable: *mut usize, index: usize) -> *mut usize {
    vtable.add(index)
}

/// Read the function pointer stored in a slot
///
/// # Safety
/// `slot` must be readable.
pub unsafe fn read_slot(slot: *const usize) -> usize {
    slot.read_volatile()
}

/// Read slot `index` of an object's vtable
///
/// # Safety
/// See [`vtable_of`] and [`slot_address`].
pub unsafe fn virtual_function(object: *const c_void, index: usize) -> usize {
    read_slot(slot_address(vtable_of(object), index))
}

/// Swap `replacement` into a slot, returning the original pointer
///
/// The page is made writable for the duration of the write. The previous
/// protection is restored when the guard is dropped. If the protection
/// change is denied, nothing is written.
///
/// # Safety
/// `slot` must be a vtable slot and `replacement` a function with the
/// slot's signature.
pub unsafe fn install(slot: *mut usize, replacement: usize) -> Result<usize, HookError> {
    if slot.is_null() || replacement == 0 {
        return Err(HookError::InvalidAddress(slot as usize));
    }

    let original = write_slot(slot, replacement)?;

    tracing::debug!(
        "Patched slot {:#x}: {:#x} -> {:#x}",
        slot as usize,
        original,
        replacement
    );
    Ok(original)
}

/// Write the original pointer back into a slot
///
/// # Safety
/// `original` must be the value returned by the matching [`install`].
pub unsafe fn uninstall(slot: *mut usize, original: usize) -> Result<(), HookError> {
    if slot.is_null() || original == 0 {
        return Err(HookError::InvalidAddress(slot as usize));
    }

    write_slot(slot, original)?;

    tracing::debug!("Restored slot {:#x} to {:#x}", slot as usize, original);
    Ok(())
}

unsafe fn write_slot(slot: *mut usize, value: usize) -> Result<usize, HookError> {
    let _guard =
        region::protect_with_handle(slot as *const u8, size_of::<usize>(), region::Protection::READ_WRITE)
            .map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    let previous = slot.read_volatile();
    slot.write_volatile(value);
    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn original_fn() -> i32 {
        1
    }

    extern "C" fn replacement_fn() -> i32 {
        2
    }

    /// Fake object: first word points at a boxed vtable
    struct FakeObject {
        _vtable: Box<[usize]>,
        object: Box<*mut usize>,
    }

    fn fake_object(slots: &[usize]) -> FakeObject {
        let mut vtable: Box<[usize]> = slots.into();
        let object = Box::new(vtable.as_mut_ptr());
        FakeObject {
            _vtable: vtable,
            object,
        }
    }

    impl FakeObject {
        fn ptr(&self) -> *const c_void {
            &*self.object as *const *mut usize as *const c_void
        }
    }

    #[test]
    fn test_vtable_access() {
        let fake = fake_object(&[0x10, 0x20, 0x30]);
        unsafe {
            let vtable = vtable_of(fake.ptr());
            assert_eq!(vtable, *fake.object);
            assert_eq!(slot_address(vtable, 2) as usize, vtable as usize + 2 * size_of::<usize>());
            assert_eq!(virtual_function(fake.ptr(), 1), 0x20);
        }
    }

    #[test]
    fn test_install_uninstall_restores_slot() {
        let fake = fake_object(&[0, original_fn as usize, 0]);
        unsafe {
            let slot = slot_address(vtable_of(fake.ptr()), 1);
            let before = read_slot(slot);

            let original = install(slot, replacement_fn as usize).unwrap();
            assert_eq!(original, original_fn as usize);
            assert_eq!(read_slot(slot), replacement_fn as usize);

            let f: extern "C" fn() -> i32 = std::mem::transmute(read_slot(slot));
            assert_eq!(f(), 2);

            uninstall(slot, original).unwrap();
            assert_eq!(read_slot(slot), before);
        }
    }

    #[test]
    fn test_install_rejects_null() {
        unsafe {
            assert!(matches!(
                install(std::ptr::null_mut(), replacement_fn as usize),
                Err(HookError::InvalidAddress(0))
            ));
        }
    }
}
