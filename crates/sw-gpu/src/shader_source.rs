//! Shader text loading and assembly.
//!
//! A pass's source is built from zero or more shared imports followed by
//! the stage's own main file. Every piece may start with a `#version`
//! directive; only the first one survives assembly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error type for shader text lookup.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader source not found: {0}")]
    NotFound(String),

    #[error("failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A pure `path → text` lookup for shader sources.
pub trait ShaderSource {
    fn load(&self, path: &str) -> Result<String, ShaderError>;
}

/// Shader sources read from files under a root directory.
#[derive(Clone, Debug)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShaderSource for DirectorySource {
    fn load(&self, path: &str) -> Result<String, ShaderError> {
        let full = self.root.join(path);
        std::fs::read_to_string(&full).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ShaderError::NotFound(path.to_string())
            } else {
                ShaderError::Io { path: full, source }
            }
        })
    }
}

/// Shader sources held in memory, keyed by path.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, text: impl Into<String>) {
        self.files.insert(path.into(), text.into());
    }

    pub fn with(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }
}

impl ShaderSource for MemorySource {
    fn load(&self, path: &str) -> Result<String, ShaderError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ShaderError::NotFound(path.to_string()))
    }
}

/// Concatenate shader pieces, keeping only the first `#version` line.
pub fn assemble<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    let mut seen_version = false;
    for part in parts {
        for line in part.as_ref().lines() {
            if line.trim_start().starts_with("#version") {
                if seen_version {
                    continue;
                }
                seen_version = true;
            }
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// True if `ident` occurs in `source` as a whole identifier.
pub fn contains_identifier(source: &str, ident: &str) -> bool {
    if ident.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    source.match_indices(ident).any(|(pos, _)| {
        let before = source[..pos].chars().next_back();
        let after = source[pos + ident.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

/// True if `source` declares `name` as a fragment `out` variable.
pub fn declares_output(source: &str, name: &str) -> bool {
    source.split(';').any(|statement| {
        let mut words = statement.split_whitespace();
        let has_out = statement.split_whitespace().any(|w| w == "out" || w.ends_with(")out"));
        has_out && words.next_back() == Some(name)
    })
}

/// Assembled vertex and fragment text of one program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderProgramSource {
    /// Program label, conventionally the fragment main path.
    pub label: String,
    pub vertex: String,
    pub fragment: String,
}

impl ShaderProgramSource {
    /// Build from already assembled text.
    pub fn from_strings(
        label: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    /// Load and assemble both stages from `source`. The fragment main path
    /// becomes the label.
    pub fn load(
        source: &dyn ShaderSource,
        vertex_imports: &[&str],
        vertex_path: &str,
        fragment_imports: &[&str],
        fragment_path: &str,
    ) -> Result<Self, ShaderError> {
        let vertex = load_pieces(source, vertex_imports, vertex_path)?;
        let fragment = load_pieces(source, fragment_imports, fragment_path)?;
        Ok(Self {
            label: fragment_path.to_string(),
            vertex: assemble(&vertex),
            fragment: assemble(&fragment),
        })
    }
}

fn load_pieces(
    source: &dyn ShaderSource,
    imports: &[&str],
    main: &str,
) -> Result<Vec<String>, ShaderError> {
    imports
        .iter()
        .chain(std::iter::once(&main))
        .map(|path| source.load(path))
        .collect()
}
