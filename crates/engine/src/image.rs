//! In-memory images of loaded modules
//!
//! Pattern scans run over the mapped image of the game library. The image is
//! the address range covered by the module's loadable segments.

use std::ptr::NonNull;

use crate::error::EngineError;

/// Address range of a module mapped into the process
#[derive(Debug, Clone, Copy)]
pub struct ModuleImage {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the image is a read-only view of code and data that stays mapped
// for as long as the module is loaded.
unsafe impl Send for ModuleImage {}
unsafe impl Sync for ModuleImage {}

impl ModuleImage {
    /// Describe an arbitrary memory range as an image
    ///
    /// # Safety
    /// `base..base + len` must stay readable for the lifetime of the image.
    pub unsafe fn from_raw(base: *const u8, len: usize) -> Option<Self> {
        NonNull::new(base as *mut u8).map(|base| Self { base, len })
    }

    /// Image base address
    pub fn base(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Image size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `addr` falls inside the image
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.base.as_ptr() as usize;
        addr >= start && addr - start < self.len
    }

    /// The image bytes
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: guaranteed readable by construction
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    /// Find a module already mapped into the process by file name
    #[cfg(target_os = "linux")]
    pub fn find_loaded(name: &str) -> Result<Self, EngineError> {
        use std::ffi::{c_int, c_void, CStr};

        struct Search<'a> {
            name: &'a str,
            found: Option<(usize, usize)>,
        }

        unsafe extern "C" fn callback(
            info: *mut libc::dl_phdr_info,
            _size: usize,
            data: *mut c_void,
        ) -> c_int {
            let search = &mut *(data as *mut Search<'_>);
            let info = &*info;
            if info.dlpi_name.is_null() {
                return 0;
            }
            let path = CStr::from_ptr(info.dlpi_name).to_string_lossy();
            let file = path.rsplit('/').next().unwrap_or_default();
            if file != search.name {
                return 0;
            }

            let phdrs = std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize);
            let mut start = usize::MAX;
            let mut end = 0usize;
            for phdr in phdrs.iter().filter(|p| p.p_type == libc::PT_LOAD) {
                start = start.min(phdr.p_vaddr as usize);
                end = end.max(phdr.p_vaddr as usize + phdr.p_memsz as usize);
            }
            if start < end {
                search.found = Some((info.dlpi_addr as usize + start, end - start));
                return 1;
            }
            0
        }

        let mut search = Search { name, found: None };
        unsafe {
            libc::dl_iterate_phdr(Some(callback), &mut search as *mut Search<'_> as *mut c_void);
        }

        let (base, len) = search
            .found
            .ok_or_else(|| EngineError::ModuleNotFound(name.to_string()))?;
        tracing::debug!("Module image {}: {:#x} (+{:#x})", name, base, len);
        unsafe { Self::from_raw(base as *const u8, len) }
            .ok_or_else(|| EngineError::NullPointer(name.to_string()))
    }

    /// Find a module already mapped into the process by file name
    #[cfg(windows)]
    pub fn find_loaded(name: &str) -> Result<Self, EngineError> {
        use std::ffi::CString;
        use winapi::um::libloaderapi::GetModuleHandleA;
        use winapi::um::processthreadsapi::GetCurrentProcess;
        use winapi::um::psapi::{GetModuleInformation, MODULEINFO};

        let cname = CString::new(name)
            .map_err(|_| EngineError::InvalidVersionString(name.to_string()))?;

        unsafe {
            let handle = GetModuleHandleA(cname.as_ptr());
            if handle.is_null() {
                return Err(EngineError::ModuleNotFound(name.to_string()));
            }

            let mut info: MODULEINFO = std::mem::zeroed();
            let ok = GetModuleInformation(
                GetCurrentProcess(),
                handle,
                &mut info,
                std::mem::size_of::<MODULEINFO>() as u32,
            );
            if ok == 0 {
                return Err(EngineError::ModuleNotFound(name.to_string()));
            }

            Self::from_raw(info.lpBaseOfDll as *const u8, info.SizeOfImage as usize)
                .ok_or_else(|| EngineError::NullPointer(name.to_string()))
        }
    }

    /// Find a module already mapped into the process by file name
    #[cfg(not(any(target_os = "linux", windows)))]
    pub fn find_loaded(name: &str) -> Result<Self, EngineError> {
        Err(EngineError::ModuleNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_from_buffer() {
        let buffer = vec![0x90u8; 64];
        let image = unsafe { ModuleImage::from_raw(buffer.as_ptr(), buffer.len()) }.unwrap();

        assert_eq!(image.len(), 64);
        assert_eq!(image.bytes(), &buffer[..]);
        assert!(image.contains(buffer.as_ptr() as usize));
        assert!(image.contains(buffer.as_ptr() as usize + 63));
        assert!(!image.contains(buffer.as_ptr() as usize + 64));
    }

    #[test]
    fn test_null_image() {
        assert!(unsafe { ModuleImage::from_raw(std::ptr::null(), 16) }.is_none());
    }

    #[test]
    fn test_missing_module() {
        assert!(matches!(
            ModuleImage::find_loaded("goldhook_missing.so"),
            Err(EngineError::ModuleNotFound(_))
        ));
    }
}
