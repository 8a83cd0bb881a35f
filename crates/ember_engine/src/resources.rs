//! Resource path resolution
//!
//! Maps logical resource names (`"triangle.vert.spv"`) to filesystem paths.
//! The renderer only ever consumes the resolved paths.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::ResourceConfig;

/// Resource lookup errors
#[derive(Error, Debug)]
pub enum ResourceError {
    /// None of the configured roots exist
    #[error("No resource root found (tried: {tried})")]
    RootNotFound {
        /// Roots that were searched
        tried: String,
    },

    /// The name could not be resolved in any search location
    #[error("Resource '{name}' not found in {category}")]
    NotFound {
        /// Logical name that was requested
        name: String,
        /// Category folder that was searched
        category: &'static str,
    },
}

/// Resource category, each with its own folder under a root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Compiled SPIR-V shaders
    Shader,
    /// Texture images
    Texture,
    /// Model files
    Model,
}

impl ResourceKind {
    fn folder(self) -> &'static str {
        match self {
            Self::Shader => "shaders",
            Self::Texture => "textures",
            Self::Model => "models",
        }
    }
}

/// Resolved resource locations
#[derive(Debug, Clone)]
pub struct ResourcePaths {
    roots: Vec<PathBuf>,
    compiled_shader_dir: PathBuf,
}

impl ResourcePaths {
    /// Probe the configured roots and keep the ones that exist
    pub fn discover(config: &ResourceConfig) -> Result<Self, ResourceError> {
        let roots: Vec<PathBuf> = config
            .roots
            .iter()
            .map(PathBuf::from)
            .filter(|root| root.is_dir())
            .collect();

        if roots.is_empty() {
            return Err(ResourceError::RootNotFound {
                tried: config.roots.join(", "),
            });
        }

        log::debug!("Resource roots: {:?}", roots);
        Ok(Self {
            roots,
            compiled_shader_dir: PathBuf::from(&config.compiled_shader_dir),
        })
    }

    /// Build from explicit roots without probing
    pub fn with_roots(roots: Vec<PathBuf>, compiled_shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            roots,
            compiled_shader_dir: compiled_shader_dir.into(),
        }
    }

    /// Resolve a logical name within a category
    ///
    /// A name that is already a valid path wins; otherwise each root's
    /// category folder is searched in order. Shaders also fall back to the
    /// shader build output directory.
    pub fn resolve(&self, kind: ResourceKind, name: &str) -> Result<PathBuf, ResourceError> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }

        let mut candidates: Vec<PathBuf> =
            self.roots.iter().map(|root| root.join(kind.folder()).join(name)).collect();
        if kind == ResourceKind::Shader {
            candidates.push(self.compiled_shader_dir.join(name));
        }

        candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ResourceError::NotFound {
                name: name.to_string(),
                category: kind.folder(),
            })
    }

    /// Resolve a compiled shader by logical name
    pub fn shader(&self, name: &str) -> Result<PathBuf, ResourceError> {
        self.resolve(ResourceKind::Shader, name)
    }

    /// Roots that were found on disk
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"\x03\x02\x23\x07").unwrap();
    }

    #[test]
    fn test_discover_skips_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResourceConfig {
            roots: vec![
                dir.path().join("missing").display().to_string(),
                dir.path().display().to_string(),
            ],
            compiled_shader_dir: "target/shaders".to_string(),
        };

        let paths = ResourcePaths::discover(&config).unwrap();
        assert_eq!(paths.roots(), &[dir.path().to_path_buf()]);
    }

    #[test]
    fn test_discover_fails_without_roots() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResourceConfig {
            roots: vec![dir.path().join("nope").display().to_string()],
            compiled_shader_dir: "target/shaders".to_string(),
        };

        assert!(matches!(ResourcePaths::discover(&config), Err(ResourceError::RootNotFound { .. })));
    }

    #[test]
    fn test_first_root_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(&first.path().join("shaders/a.spv"));
        touch(&second.path().join("shaders/a.spv"));

        let paths = ResourcePaths::with_roots(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            "unused",
        );
        assert_eq!(paths.shader("a.spv").unwrap(), first.path().join("shaders/a.spv"));
    }

    #[test]
    fn test_shader_falls_back_to_build_output() {
        let root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        touch(&out.path().join("triangle.vert.spv"));

        let paths = ResourcePaths::with_roots(vec![root.path().to_path_buf()], out.path());
        assert_eq!(paths.shader("triangle.vert.spv").unwrap(), out.path().join("triangle.vert.spv"));

        // Models never look in the shader output
        assert!(paths.resolve(ResourceKind::Model, "triangle.vert.spv").is_err());
    }

    #[test]
    fn test_existing_path_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("direct.spv");
        touch(&file);

        let paths = ResourcePaths::with_roots(vec![], "unused");
        let name = file.display().to_string();
        assert_eq!(paths.shader(&name).unwrap(), file);
    }
}
