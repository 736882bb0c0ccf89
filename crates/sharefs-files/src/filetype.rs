//! Extension ↔ filetype mapping.

use std::collections::HashMap;

/// Maps file extensions to RISC OS filetypes and back
pub trait FiletypeMapper: Send + Sync {
    /// Filetype for a (lower-case) extension
    fn filetype_for_extension(&self, ext: &str) -> Option<u16>;

    /// Preferred extension for a filetype
    fn extension_for_filetype(&self, filetype: u16) -> Option<&str>;
}

/// Built-in table of common types
const BUILTIN: &[(&str, u16)] = &[
    ("txt", 0xFFF),
    ("html", 0xFAF),
    ("htm", 0xFAF),
    ("jpg", 0xC85),
    ("jpeg", 0xC85),
    ("png", 0xB60),
    ("gif", 0x695),
    ("pdf", 0xADF),
    ("zip", 0xA91),
    ("csv", 0xDFE),
    ("xml", 0xF80),
    ("ps", 0xFF5),
    ("css", 0xF79),
    ("js", 0xF81),
    ("tif", 0xFF0),
    ("bas", 0xFFB),
];

/// A fixed mapping, seeded with common types
#[derive(Debug, Clone)]
pub struct StaticMimeMap {
    by_ext: HashMap<String, u16>,
    by_type: HashMap<u16, String>,
}

impl Default for StaticMimeMap {
    fn default() -> Self {
        let mut map = Self::empty();
        for (ext, ft) in BUILTIN {
            map.insert(ext, *ft);
        }
        map
    }
}

impl StaticMimeMap {
    /// A map with no entries
    pub fn empty() -> Self {
        Self {
            by_ext: HashMap::new(),
            by_type: HashMap::new(),
        }
    }

    /// Add a pair; the first extension registered for a type is its preferred one
    pub fn insert(&mut self, ext: &str, filetype: u16) {
        let ext = ext.to_ascii_lowercase();
        self.by_type
            .entry(filetype & 0xFFF)
            .or_insert_with(|| ext.clone());
        self.by_ext.insert(ext, filetype & 0xFFF);
    }
}

impl FiletypeMapper for StaticMimeMap {
    fn filetype_for_extension(&self, ext: &str) -> Option<u16> {
        self.by_ext.get(&ext.to_ascii_lowercase()).copied()
    }

    fn extension_for_filetype(&self, filetype: u16) -> Option<&str> {
        self.by_type.get(&filetype).map(String::as_str)
    }
}
