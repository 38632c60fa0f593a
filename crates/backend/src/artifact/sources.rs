//! The sources descriptor: which TEAL file and source map belong to each
//! program hash appearing in the trace.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::trace::ProgramHash;

/// Raw Source Map v3 document, restricted to the fields we consume.
#[derive(Clone, Debug, Deserialize)]
pub struct RawSourceMap {
    pub version: u64,
    #[serde(default)]
    pub sources: Vec<String>,
    pub mappings: String,
}

/// One `txn-group-sources` entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceEntry {
    pub hash: ProgramHash,
    pub filename: PathBuf,
    /// The source map, embedded directly in the descriptor.
    #[serde(default)]
    pub source_map: Option<RawSourceMap>,
    /// Alternative to `source-map`: a path to the map document.
    #[serde(default)]
    pub source_map_path: Option<PathBuf>,
}

/// The descriptor document.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourcesDescriptor {
    pub txn_group_sources: Vec<SourceEntry>,
}

/// Resolves a descriptor-relative path against the descriptor's directory.
pub(crate) fn resolve_path(base: Option<&Path>, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        match base {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}
