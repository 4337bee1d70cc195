//! Global engine context storage
//!
//! The engine function table is copied once during `GiveFnptrsToDll` and
//! stored here. Access is thread-safe via OnceLock.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};
use std::sync::OnceLock;
use std::thread::ThreadId;

use goldhook_sdk::{edict_t, entvars_t, string_t, EngineFuncs, GlobalVars};

use crate::error::EngineError;

/// Size of the buffer handed to `pfnGetGameDir`
const GAME_DIR_LEN: usize = 260;

/// Engine state shared with the rest of the framework
pub struct EngineContext {
    funcs: EngineFuncs,
    globals: NonNull<GlobalVars>,
    game_dir: String,

    /// Recorded on ServerActivate
    edict_list: AtomicPtr<edict_t>,
    max_clients: AtomicI32,

    /// Main game thread ID for thread safety checks
    pub main_thread_id: ThreadId,
}

// SAFETY: the table and the globals block live for the entire process lifetime.
// The engine only calls us from its main thread; the mutable fields are atomics.
unsafe impl Send for EngineContext {}
unsafe impl Sync for EngineContext {}

/// Global engine context storage
static ENGINE: OnceLock<EngineContext> = OnceLock::new();

/// Initialize the engine context
///
/// Called once during `GiveFnptrsToDll`. Returns error if already initialized.
pub fn init_engine(context: EngineContext) -> Result<&'static EngineContext, EngineError> {
    ENGINE
        .set(context)
        .map_err(|_| EngineError::AlreadyInitialized)?;
    ENGINE.get().ok_or(EngineError::NotInitialized)
}

/// Get the engine context
///
/// # Panics
/// Panics if called before `init_engine`
pub fn engine() -> &'static EngineContext {
    ENGINE.get().expect("Engine not initialized")
}

/// Try to get the engine context without panicking
pub fn try_engine() -> Result<&'static EngineContext, EngineError> {
    ENGINE.get().ok_or(EngineError::NotInitialized)
}

/// Check if engine is initialized
pub fn is_engine_initialized() -> bool {
    ENGINE.get().is_some()
}

/// Check if current thread is the main game thread
pub fn is_main_thread() -> bool {
    ENGINE
        .get()
        .map(|e| std::thread::current().id() == e.main_thread_id)
        .unwrap_or(false)
}

macro_rules! engine_fn {
    ($self:ident . $name:ident) => {
        $self
            .funcs
            .$name
            .ok_or(EngineError::MissingEngineFunction(stringify!($name)))
    };
}

impl EngineContext {
    /// Create a new context from the table the engine handed us
    ///
    /// # Safety
    /// `globals` must point to the engine's global variables block.
    pub unsafe fn new(funcs: &EngineFuncs, globals: *mut GlobalVars) -> Result<Self, EngineError> {
        let globals =
            NonNull::new(globals).ok_or_else(|| EngineError::NullPointer("globalvars_t".into()))?;

        let get_game_dir = funcs
            .pfn_get_game_dir
            .ok_or(EngineError::MissingEngineFunction("pfn_get_game_dir"))?;
        let mut buffer = [0 as c_char; GAME_DIR_LEN];
        get_game_dir(buffer.as_mut_ptr());
        let game_dir = CStr::from_ptr(buffer.as_ptr()).to_string_lossy().into_owned();

        Ok(Self::with_game_dir(*funcs, globals, game_dir))
    }

    /// Create a context with a known game directory
    pub fn with_game_dir(funcs: EngineFuncs, globals: NonNull<GlobalVars>, game_dir: String) -> Self {
        Self {
            funcs,
            globals,
            game_dir,
            edict_list: AtomicPtr::new(std::ptr::null_mut()),
            max_clients: AtomicI32::new(0),
            main_thread_id: std::thread::current().id(),
        }
    }

    /// Copy of the engine function table
    pub fn funcs(&self) -> &EngineFuncs {
        &self.funcs
    }

    /// Engine global variables pointer
    pub fn globals_ptr(&self) -> *mut GlobalVars {
        self.globals.as_ptr()
    }

    /// Game directory name as reported by the engine (e.g. "cstrike")
    pub fn game_dir(&self) -> &str {
        &self.game_dir
    }

    /// Current server time
    pub fn time(&self) -> f32 {
        // SAFETY: globals outlive the process
        unsafe { self.globals.as_ref().time }
    }

    /// Maximum number of clients
    ///
    /// Recorded on ServerActivate, falls back to the engine globals before that.
    pub fn max_clients(&self) -> i32 {
        match self.max_clients.load(Ordering::Acquire) {
            0 => unsafe { self.globals.as_ref().max_clients },
            n => n,
        }
    }

    /// First edict of the world, recorded on ServerActivate
    pub fn edict_list(&self) -> Option<NonNull<edict_t>> {
        NonNull::new(self.edict_list.load(Ordering::Acquire))
    }

    /// Record ServerActivate state
    pub fn set_server_state(&self, edict_list: *mut edict_t, max_clients: i32) {
        self.edict_list.store(edict_list, Ordering::Release);
        self.max_clients.store(max_clients, Ordering::Release);
        tracing::debug!(max_clients, edict_list = ?edict_list, "Server state recorded");
    }

    /// Clear ServerActivate state when the map unloads
    pub fn clear_server_state(&self) {
        self.edict_list.store(std::ptr::null_mut(), Ordering::Release);
        self.max_clients.store(0, Ordering::Release);
    }

    /// Engine index of an edict
    pub fn index_of_edict(&self, edict: *const edict_t) -> Result<i32, EngineError> {
        if edict.is_null() {
            return Err(EngineError::NullPointer("edict".into()));
        }
        let f = engine_fn!(self.pfn_index_of_edict)?;
        Ok(unsafe { f(edict) })
    }

    /// Edict at an engine index
    pub fn edict_of_index(&self, index: i32) -> Result<Option<NonNull<edict_t>>, EngineError> {
        let f = engine_fn!(self.pfn_pent_of_ent_index)?;
        Ok(NonNull::new(unsafe { f(index) }))
    }

    /// Edict owning an entity variables block
    pub fn edict_of_entvars(
        &self,
        pev: *mut entvars_t,
    ) -> Result<Option<NonNull<edict_t>>, EngineError> {
        if pev.is_null() {
            return Ok(None);
        }
        let f = engine_fn!(self.pfn_find_entity_by_vars)?;
        Ok(NonNull::new(unsafe { f(pev) }))
    }

    /// Allocate a fresh edict
    pub fn create_entity(&self) -> Result<NonNull<edict_t>, EngineError> {
        let f = engine_fn!(self.pfn_create_entity)?;
        NonNull::new(unsafe { f() }).ok_or_else(|| EngineError::NullPointer("pfnCreateEntity".into()))
    }

    /// Free an edict
    pub fn remove_entity(&self, edict: NonNull<edict_t>) -> Result<(), EngineError> {
        let f = engine_fn!(self.pfn_remove_entity)?;
        unsafe { f(edict.as_ptr()) };
        Ok(())
    }

    /// Call the engine allocator for an entity's game object
    pub fn alloc_ent_private_data(
        &self,
        edict: *mut edict_t,
        size: c_int,
    ) -> Result<*mut c_void, EngineError> {
        let f = engine_fn!(self.pfn_alloc_ent_private_data)?;
        Ok(unsafe { f(edict, size) })
    }

    /// Print a line to the server console
    pub fn server_print(&self, message: &str) {
        let Some(print) = self.funcs.pfn_server_print else {
            return;
        };
        let mut line = message.replace('\0', " ");
        if !line.ends_with('\n') {
            line.push('\n');
        }
        if let Ok(line) = CString::new(line) {
            unsafe { print(line.as_ptr()) };
        }
    }

    /// Resolve a `string_t` against the engine string pool
    pub fn string_from_offset(&self, offset: string_t) -> Option<String> {
        // SAFETY: globals outlive the process
        let base = unsafe { self.globals.as_ref().p_string_base };
        string_at(base, offset)
    }
}

/// Read the string at `base + offset`, `None` for empty strings
pub(crate) fn string_at(base: *const c_char, offset: string_t) -> Option<String> {
    if base.is_null() || offset == 0 {
        return None;
    }
    let ptr = base.wrapping_offset(offset as isize);
    // SAFETY: offsets handed out by the engine always land in its string pool
    let s = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
    (!s.is_empty()).then(|| s.into_owned())
}
