//! Extension to MIME type table.

use std::collections::HashMap;

const DEFAULT_TYPES: &[(&str, &str)] = &[
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("gif", "image/gif"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/x-icon"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("svg", "image/svg+xml"),
    ("txt", "text/plain"),
    ("wasm", "application/wasm"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

/// Case-insensitive extension lookup.
#[derive(Debug, Clone)]
pub struct MimeTypeManager {
    types: HashMap<String, String>,
}

impl Default for MimeTypeManager {
    fn default() -> Self {
        Self {
            types: DEFAULT_TYPES
                .iter()
                .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
                .collect(),
        }
    }
}

impl MimeTypeManager {
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Add or replace the type for `extension` (with or without leading dot).
    pub fn add(&mut self, extension: &str, mime_type: &str) {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.types.insert(ext, mime_type.to_string());
    }

    /// MIME type for a file name such as `site.CSS`.
    pub fn mime_type(&self, filename: &str) -> Option<&str> {
        let (_, ext) = filename.rsplit_once('.')?;
        self.types
            .get(&ext.to_ascii_lowercase())
            .map(String::as_str)
    }
}
