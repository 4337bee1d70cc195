//! Gamedata: offsets and addresses of the game library, loaded from JSON
//!
//! Gamedata is deployed per game variant as `configs/gamedata/<variant>.json`.
//! This allows supporting new game library builds without recompiling.
//!
//! ```json
//! {
//!     "offsets": {
//!         "spawn": { "linux": 2, "windows": 0 }
//!     },
//!     "addresses": {
//!         "global": {
//!             "g_pGameRules": {
//!                 "linux": { "symbol": "g_pGameRules" },
//!                 "windows": { "pattern": [139, 13, 63, 63, 63, 63], "var": true }
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! Addresses are resolved either by exported symbol or by scanning the module
//! image for a byte pattern. `pattern` uses a mask byte (default `0x3F`) as the
//! wildcard; `signature` takes the textual form `"8B 0D ? ? ? ?"`.

use std::collections::HashMap;
use std::path::Path;

use dashmap::DashMap;
use goldhook_engine::{ModuleImage, SystemModule};
use serde::Deserialize;
use thiserror::Error;

/// Default wildcard byte of `pattern` locators
pub const DEFAULT_PATTERN_MASK: u8 = 0x3F;

/// Errors that can occur when loading or resolving gamedata
#[derive(Debug, Error)]
pub enum GamedataError {
    #[error("Failed to read gamedata file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse gamedata JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Offset not found: {0}")]
    OffsetNotFound(String),

    #[error("Address not found: {0}")]
    AddressNotFound(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("Failed to find signature in memory: {0}")]
    ScanFailed(String),

    #[error("Address resolved to null: {0}")]
    NullAddress(String),
}

/// Platform-specific offset entry
#[derive(Debug, Deserialize)]
pub struct OffsetEntry {
    /// Windows offset value
    pub windows: Option<i64>,
    /// Linux offset value
    pub linux: Option<i64>,
}

/// How to find an address in the game library
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    /// Bare string: exported symbol name
    Name(String),
    /// Exported symbol
    Symbol { symbol: String },
    /// Raw bytes where `mask` matches anything
    Pattern {
        pattern: Vec<u8>,
        #[serde(default = "default_mask")]
        mask: u8,
        #[serde(default)]
        var: bool,
    },
    /// Textual signature, `?` or `??` matches anything
    Signature {
        signature: String,
        #[serde(default)]
        var: bool,
    },
}

fn default_mask() -> u8 {
    DEFAULT_PATTERN_MASK
}

/// Platform-specific address entry
#[derive(Debug, Deserialize)]
pub struct AddressEntry {
    /// Windows locator
    pub windows: Option<Locator>,
    /// Linux locator
    pub linux: Option<Locator>,
}

#[derive(Debug, Default, Deserialize)]
struct GamedataFile {
    #[serde(default)]
    offsets: HashMap<String, OffsetEntry>,
    #[serde(default)]
    addresses: HashMap<String, HashMap<String, AddressEntry>>,
}

/// Where addresses are looked up
pub trait ModuleView {
    /// Address of an exported symbol
    fn symbol_address(&self, name: &str) -> Option<usize>;

    /// Mapped image to scan for patterns
    fn image(&self) -> Option<ModuleImage>;
}

impl ModuleView for SystemModule {
    fn symbol_address(&self, name: &str) -> Option<usize> {
        // SAFETY: only the address is taken
        unsafe { SystemModule::symbol_address(self, name) }
            .ok()
            .map(|p| p.as_ptr() as usize)
    }

    fn image(&self) -> Option<ModuleImage> {
        SystemModule::image(self)
            .map_err(|e| tracing::warn!("No image for {}: {}", self.path().display(), e))
            .ok()
    }
}

/// Loaded gamedata
#[derive(Debug, Default)]
pub struct Gamedata {
    offsets: HashMap<String, OffsetEntry>,
    addresses: HashMap<String, HashMap<String, AddressEntry>>,
    resolved: DashMap<(String, String), usize>,
}

impl Gamedata {
    /// Load gamedata from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GamedataError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Load gamedata from a JSON string
    pub fn load_from_str(json: &str) -> Result<Self, GamedataError> {
        let file: GamedataFile = serde_json::from_str(json)?;

        tracing::info!(
            "Loaded gamedata: {} offsets, {} address classes",
            file.offsets.len(),
            file.addresses.len()
        );

        Ok(Self {
            offsets: file.offsets,
            addresses: file.addresses,
            resolved: DashMap::new(),
        })
    }

    /// Get an offset by name for the current platform
    pub fn get_offset(&self, name: &str) -> Result<i64, GamedataError> {
        let entry = self
            .offsets
            .get(name)
            .ok_or_else(|| GamedataError::OffsetNotFound(name.to_string()))?;

        for_platform(entry.linux, entry.windows).ok_or_else(|| {
            GamedataError::OffsetNotFound(format!("{} (no offset for this platform)", name))
        })
    }

    /// Get an offset that is used as an index or byte offset
    pub fn get_index(&self, name: &str) -> Result<usize, GamedataError> {
        let offset = self.get_offset(name)?;
        usize::try_from(offset)
            .map_err(|_| GamedataError::OffsetNotFound(format!("{} (negative: {})", name, offset)))
    }

    /// Get the locator of an address for the current platform
    pub fn get_locator(&self, class: &str, name: &str) -> Result<&Locator, GamedataError> {
        let entry = self
            .addresses
            .get(class)
            .and_then(|names| names.get(name))
            .ok_or_else(|| GamedataError::AddressNotFound(format!("{}::{}", class, name)))?;

        for_platform(entry.linux.as_ref(), entry.windows.as_ref()).ok_or_else(|| {
            GamedataError::AddressNotFound(format!("{}::{} (no address for this platform)", class, name))
        })
    }

    /// Resolve an address in `module`, caching the result
    ///
    /// Never returns a null address.
    pub fn get_address(
        &self,
        class: &str,
        name: &str,
        module: &dyn ModuleView,
    ) -> Result<usize, GamedataError> {
        let key = (class.to_string(), name.to_string());
        if let Some(address) = self.resolved.get(&key) {
            return Ok(*address);
        }

        let locator = self.get_locator(class, name)?;
        let address = resolve(locator, module)?;
        if address == 0 {
            return Err(GamedataError::NullAddress(format!("{}::{}", class, name)));
        }

        tracing::debug!("Resolved {}::{} = {:#x}", class, name, address);
        self.resolved.insert(key, address);
        Ok(address)
    }
}

fn for_platform<T>(linux: Option<T>, windows: Option<T>) -> Option<T> {
    #[cfg(target_os = "linux")]
    let value = {
        let _ = windows;
        linux
    };

    #[cfg(target_os = "windows")]
    let value = {
        let _ = linux;
        windows
    };

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    let value = {
        let _ = (linux, windows);
        None
    };

    value
}

fn resolve(locator: &Locator, module: &dyn ModuleView) -> Result<usize, GamedataError> {
    let (pattern, var) = match locator {
        Locator::Name(symbol) | Locator::Symbol { symbol } => {
            return module
                .symbol_address(symbol)
                .ok_or_else(|| GamedataError::SymbolNotFound(symbol.clone()));
        }
        Locator::Pattern { pattern, mask, var } => (BytePattern::from_masked(pattern, *mask)?, *var),
        Locator::Signature { signature, var } => (BytePattern::parse(signature)?, *var),
    };

    let image = module
        .image()
        .ok_or_else(|| GamedataError::ScanFailed("module image unavailable".to_string()))?;
    let offset = pattern
        .find(image.bytes())
        .ok_or_else(|| GamedataError::ScanFailed(pattern.to_string()))?;
    let address = image.base() as usize + offset;

    if var {
        if offset + std::mem::size_of::<usize>() > image.len() {
            return Err(GamedataError::ScanFailed(format!("{} (pointer past image end)", pattern)));
        }
        // SAFETY: bounds checked against the image above
        Ok(unsafe { (address as *const usize).read_unaligned() })
    } else {
        Ok(address)
    }
}

/// Byte pattern with wildcards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern(Vec<Option<u8>>);

impl BytePattern {
    /// Parse a textual signature
    pub fn parse(signature: &str) -> Result<Self, GamedataError> {
        parse_signature(signature).map(Self)
    }

    /// Build from raw bytes where `mask` is the wildcard
    pub fn from_masked(bytes: &[u8], mask: u8) -> Result<Self, GamedataError> {
        if bytes.is_empty() {
            return Err(GamedataError::InvalidSignature(
                "Empty signature pattern".to_string(),
            ));
        }
        Ok(Self(
            bytes
                .iter()
                .map(|&b| if b == mask { None } else { Some(b) })
                .collect(),
        ))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Offset of the first (lowest) match in `haystack`
    pub fn find(&self, haystack: &[u8]) -> Option<usize> {
        let pattern = &self.0;
        if pattern.is_empty() || haystack.len() < pattern.len() {
            return None;
        }

        let end = haystack.len() - pattern.len();

        'outer: for offset in 0..=end {
            for (i, expected) in pattern.iter().enumerate() {
                if let Some(byte) = expected {
                    if haystack[offset + i] != *byte {
                        continue 'outer;
                    }
                }
            }
            // All bytes matched
            return Some(offset);
        }

        None
    }
}

impl std::fmt::Display for BytePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match byte {
                Some(b) => write!(f, "{:02X}", b)?,
                None => f.write_str("?")?,
            }
        }
        Ok(())
    }
}

/// Parse a signature pattern string into bytes
///
/// Supports:
/// - Hex bytes: "55 8B EC"
/// - Wildcards: "55 ? 8B EC" or "55 ?? 8B EC"
pub fn parse_signature(pattern: &str) -> Result<Vec<Option<u8>>, GamedataError> {
    let mut result = Vec::new();

    for part in pattern.split_whitespace() {
        if part == "?" || part == "??" {
            result.push(None); // Wildcard
        } else {
            let byte = u8::from_str_radix(part, 16).map_err(|_| {
                GamedataError::InvalidSignature(format!("Invalid hex byte: {}", part))
            })?;
            result.push(Some(byte));
        }
    }

    if result.is_empty() {
        return Err(GamedataError::InvalidSignature(
            "Empty signature pattern".to_string(),
        ));
    }

    Ok(result)
}
