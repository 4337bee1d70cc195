//! Shared library loading and the CreateInterface pattern

use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use goldhook_sdk::{versions, CreateInterfaceFn};

use crate::error::EngineError;
use crate::image::ModuleImage;

/// A shared library opened by us (the game library or a plugin)
pub struct SystemModule {
    library: libloading::Library,
    path: PathBuf,
}

impl std::fmt::Debug for SystemModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemModule").field("path", &self.path).finish()
    }
}

impl SystemModule {
    /// Open a shared library
    ///
    /// On Linux the library is opened with `RTLD_DEEPBIND` so that it binds to
    /// its own symbols before those already exported by the engine.
    ///
    /// # Safety
    /// Running the library's initialisers is arbitrary foreign code.
    pub unsafe fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let library = Self::open_library(path).map_err(|source| EngineError::ModuleLoad {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!("Loaded module {}", path.display());
        Ok(Self {
            library,
            path: path.to_path_buf(),
        })
    }

    #[cfg(target_os = "linux")]
    unsafe fn open_library(path: &Path) -> Result<libloading::Library, libloading::Error> {
        use libloading::os::unix::Library;
        let flags = libc::RTLD_NOW | libc::RTLD_LOCAL | libc::RTLD_DEEPBIND;
        Library::open(Some(path), flags).map(Into::into)
    }

    #[cfg(not(target_os = "linux"))]
    unsafe fn open_library(path: &Path) -> Result<libloading::Library, libloading::Error> {
        libloading::Library::new(path)
    }

    /// Path the module was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the module (e.g. "cs.so")
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Look up an exported symbol as a typed value (usually a function pointer)
    ///
    /// # Arguments
    /// * `name` - Null-terminated symbol name (e.g. b"GiveFnptrsToDll\0")
    ///
    /// # Safety
    /// `T` must match the actual type of the export.
    pub unsafe fn symbol<T: Copy>(&self, name: &[u8]) -> Result<T, EngineError> {
        let display = symbol_display(name)?;
        self.library
            .get::<T>(name)
            .map(|sym| *sym)
            .map_err(|_| EngineError::SymbolNotFound(format!("{} in {}", display, self.path.display())))
    }

    /// Look up an optional export, returning None when it is absent
    ///
    /// # Safety
    /// Same as `symbol`
    pub unsafe fn try_symbol<T: Copy>(&self, name: &[u8]) -> Option<T> {
        self.symbol(name).ok()
    }

    /// Address of an exported symbol
    ///
    /// # Safety
    /// The returned address is only meaningful while the module stays loaded.
    pub unsafe fn symbol_address(&self, name: &str) -> Result<NonNull<u8>, EngineError> {
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        let ptr: *mut u8 = self.symbol(&bytes)?;
        NonNull::new(ptr).ok_or_else(|| EngineError::NullPointer(name.to_string()))
    }

    /// The module's `CreateInterface` export
    pub fn interface_factory(&self) -> Result<InterfaceFactory, EngineError> {
        // SAFETY: CreateInterface has the same signature in every module that exports it
        let factory = unsafe { self.symbol::<CreateInterfaceFn>(versions::CREATE_INTERFACE)? };
        Ok(InterfaceFactory::new(factory, self.file_name().unwrap_or("module").to_string()))
    }

    /// In-memory image of the module
    pub fn image(&self) -> Result<ModuleImage, EngineError> {
        let name = self
            .file_name()
            .ok_or_else(|| EngineError::ModuleNotFound(self.path.display().to_string()))?;
        ModuleImage::find_loaded(name)
    }
}

fn symbol_display(name: &[u8]) -> Result<String, EngineError> {
    CStr::from_bytes_with_nul(name)
        .map(|s| s.to_string_lossy().into_owned())
        .map_err(|_| EngineError::InvalidVersionString(String::from_utf8_lossy(name).into_owned()))
}

/// Wrapper around a CreateInterface factory function
pub struct InterfaceFactory {
    factory: CreateInterfaceFn,
    name: String,
}

impl InterfaceFactory {
    /// Create a new factory wrapper
    ///
    /// # Arguments
    /// * `factory` - The CreateInterface function pointer
    /// * `name` - Human-readable name for error messages (e.g., "cs.so")
    pub fn new(factory: CreateInterfaceFn, name: impl Into<String>) -> Self {
        Self {
            factory,
            name: name.into(),
        }
    }

    /// Get an interface by version string
    ///
    /// # Arguments
    /// * `version` - Null-terminated version string (e.g., b"ReGameDLL_005\0")
    ///
    /// # Safety
    /// The returned pointer is only valid if T matches the actual interface type
    pub unsafe fn get<T>(&self, version: &[u8]) -> Result<NonNull<T>, EngineError> {
        let version_str = CStr::from_bytes_with_nul(version).map_err(|_| {
            EngineError::InvalidVersionString(String::from_utf8_lossy(version).into_owned())
        })?;

        let mut ret_code: i32 = 0;
        let ptr = (self.factory)(version_str.as_ptr(), &mut ret_code);

        NonNull::new(ptr as *mut T).ok_or_else(|| {
            EngineError::NullPointer(format!("{} from {}", version_str.to_string_lossy(), self.name))
        })
    }

    /// Try to get an interface, returning None on failure instead of error
    ///
    /// # Safety
    /// Same as `get`
    pub unsafe fn try_get<T>(&self, version: &[u8]) -> Option<NonNull<T>> {
        self.get(version).ok()
    }
}

/// Path of the module containing `address`
///
/// Used to find our own module, whose location decides every other path.
#[cfg(unix)]
pub fn module_path_of(address: *const std::ffi::c_void) -> Result<PathBuf, EngineError> {
    use std::os::unix::ffi::OsStrExt;

    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    if unsafe { libc::dladdr(address, &mut info) } == 0 || info.dli_fname.is_null() {
        return Err(EngineError::ModuleNotFound(format!("{:p}", address)));
    }
    let name = unsafe { CStr::from_ptr(info.dli_fname) };
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(name.to_bytes())))
}

/// Path of the module containing `address`
///
/// Used to find our own module, whose location decides every other path.
#[cfg(windows)]
pub fn module_path_of(address: *const std::ffi::c_void) -> Result<PathBuf, EngineError> {
    use std::os::windows::ffi::OsStringExt;
    use winapi::shared::minwindef::{HMODULE, MAX_PATH};
    use winapi::um::libloaderapi::{
        GetModuleFileNameW, GetModuleHandleExW, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
        GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
    };

    let mut handle: HMODULE = std::ptr::null_mut();
    let flags = GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT;
    if unsafe { GetModuleHandleExW(flags, address as *const u16, &mut handle) } == 0 {
        return Err(EngineError::ModuleNotFound(format!("{:p}", address)));
    }

    let mut buffer = [0u16; MAX_PATH];
    let len = unsafe { GetModuleFileNameW(handle, buffer.as_mut_ptr(), buffer.len() as u32) } as usize;
    if len == 0 {
        return Err(EngineError::ModuleNotFound(format!("{:p}", address)));
    }
    Ok(PathBuf::from(std::ffi::OsString::from_wide(&buffer[..len])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_char, c_int, c_void};

    static mut API: u32 = 0xC0FFEE;

    unsafe extern "C" fn fake_factory(name: *const c_char, code: *mut c_int) -> *mut c_void {
        if CStr::from_ptr(name).to_bytes() == b"ReGameDLL_005" {
            *code = 0;
            std::ptr::addr_of_mut!(API) as *mut c_void
        } else {
            *code = 1;
            std::ptr::null_mut()
        }
    }

    #[test]
    fn test_factory_get() {
        let factory = InterfaceFactory::new(fake_factory, "cs.so");
        let api = unsafe { factory.get::<u32>(versions::REGAMEDLL_API) }.unwrap();
        assert_eq!(unsafe { *api.as_ptr() }, 0xC0FFEE);
    }

    #[test]
    fn test_factory_missing() {
        let factory = InterfaceFactory::new(fake_factory, "cs.so");
        let err = unsafe { factory.get::<u32>(b"ReGameDLL_004\0") }.unwrap_err();
        assert!(err.to_string().contains("ReGameDLL_004 from cs.so"));
        assert!(unsafe { factory.try_get::<u32>(b"ReGameDLL_004\0") }.is_none());
    }

    #[test]
    fn test_factory_rejects_unterminated() {
        let factory = InterfaceFactory::new(fake_factory, "cs.so");
        assert!(matches!(
            unsafe { factory.get::<u32>(b"ReGameDLL_005") },
            Err(EngineError::InvalidVersionString(_))
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_module_path_of_own_code() {
        let path = module_path_of(fake_factory as *const c_void).unwrap();
        assert!(path.file_name().is_some());
    }

    #[test]
    fn test_open_missing_module() {
        let err = unsafe { SystemModule::open("/nonexistent/goldhook_missing.so") }.unwrap_err();
        assert!(matches!(err, EngineError::ModuleLoad { .. }));
    }
}
