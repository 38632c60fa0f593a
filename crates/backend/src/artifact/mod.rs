//! Loading of the simulation trace and its program sources.

pub mod sources;
pub mod trace;

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use crate::{
    error::{ReplayError, Result},
    sourcemap::{FileId, FileTable, SourceMap},
};
use sources::{resolve_path, SourceEntry, SourcesDescriptor};
use trace::{ExecTrace, ProgramHash, SimulateResponse};

/// Byte-level read access to the files referenced by a launch.
///
/// All reads happen while loading; the stepping engine never performs I/O.
pub trait FileReader {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads from the process's file system.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFileReader;

impl FileReader for OsFileReader {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// An in-memory file set, for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct MemoryFileReader {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryFileReader {
    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }
}

impl FileReader for MemoryFileReader {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

/// The sources of one executed program.
#[derive(Clone, Debug)]
pub struct ProgramSource {
    /// The TEAL file the program was assembled from.
    pub filename: PathBuf,
    pub file_id: FileId,
    pub text: String,
    pub map: SourceMap,
}

/// Everything a session needs, loaded once at launch and immutable after.
#[derive(Clone, Debug)]
pub struct TraceAssets {
    pub response: SimulateResponse,
    /// The response document as parsed, for pseudo-source rendering.
    pub raw_response: serde_json::Value,
    pub files: FileTable,
    sources: HashMap<ProgramHash, ProgramSource>,
}

impl TraceAssets {
    /// Loads and validates the simulate response and the sources descriptor.
    ///
    /// Every program executed anywhere in the trace must have a matching
    /// descriptor entry; otherwise loading fails with `MissingSource`.
    pub fn load(
        reader: &dyn FileReader,
        response_path: &Path,
        sources_path: &Path,
    ) -> Result<Self> {
        let raw_response = read_json(reader, response_path)?;
        let response: SimulateResponse = serde_json::from_value(raw_response.clone())
            .map_err(|e| ReplayError::bad_trace(e.to_string()))?;

        let descriptor_bytes = reader
            .read(sources_path)
            .map_err(|e| ReplayError::io(sources_path, e))?;
        let descriptor: SourcesDescriptor = serde_json::from_slice(&descriptor_bytes)
            .map_err(|e| ReplayError::bad_trace(format!("invalid sources descriptor: {e}")))?;

        let base = sources_path.parent();
        let mut files = FileTable::default();
        let mut sources = HashMap::new();
        for entry in &descriptor.txn_group_sources {
            let source = load_program_source(reader, base, entry, &mut files)?;
            sources.insert(entry.hash, source);
        }

        let assets = Self { response, raw_response, files, sources };
        for group in &assets.response.txn_groups {
            for txn in &group.txn_results {
                if let Some(exec) = &txn.exec_trace {
                    assets.check_sources(exec)?;
                }
            }
        }
        debug!(
            programs = assets.sources.len(),
            files = assets.files.len(),
            groups = assets.response.txn_groups.len(),
            "loaded trace assets"
        );
        Ok(assets)
    }

    pub fn source(&self, hash: &ProgramHash) -> Option<&ProgramSource> {
        self.sources.get(hash)
    }

    pub fn programs(&self) -> impl Iterator<Item = &ProgramSource> {
        self.sources.values()
    }

    fn check_sources(&self, exec: &ExecTrace) -> Result<()> {
        let traces = [
            (&exec.approval_program_trace, &exec.approval_program_hash, "approval"),
            (&exec.clear_state_program_trace, &exec.clear_state_program_hash, "clear-state"),
            (&exec.logic_sig_trace, &exec.logic_sig_hash, "logic-sig"),
        ];
        for (trace, hash, what) in traces {
            match hash {
                None if trace.is_empty() => {}
                None => {
                    return Err(ReplayError::bad_trace(format!(
                        "{what} trace carries no program hash"
                    )))
                }
                Some(hash) if !self.sources.contains_key(hash) => {
                    return Err(ReplayError::MissingSource { hash: hash.to_string() });
                }
                Some(_) => {}
            }
        }
        for inner in &exec.inner_trace {
            self.check_sources(inner)?;
        }
        Ok(())
    }
}

fn read_json(reader: &dyn FileReader, path: &Path) -> Result<serde_json::Value> {
    let bytes = reader.read(path).map_err(|e| ReplayError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ReplayError::bad_trace(format!("{}: {e}", path.display())))
}

fn load_program_source(
    reader: &dyn FileReader,
    base: Option<&Path>,
    entry: &SourceEntry,
    files: &mut FileTable,
) -> Result<ProgramSource> {
    let filename = resolve_path(base, &entry.filename);
    let text_bytes = reader.read(&filename).map_err(|e| ReplayError::io(&filename, e))?;
    let text = String::from_utf8_lossy(&text_bytes).into_owned();
    let file_id = files.intern(filename.clone());

    let raw_map = match (&entry.source_map, &entry.source_map_path) {
        (Some(map), _) => map.clone(),
        (None, Some(path)) => {
            let map_path = resolve_path(base, path);
            let value = read_json(reader, &map_path)?;
            serde_json::from_value(value)
                .map_err(|e| ReplayError::bad_trace(format!("{}: {e}", map_path.display())))?
        }
        (None, None) => {
            return Err(ReplayError::bad_trace(format!(
                "source entry {} has no source map",
                entry.hash
            )))
        }
    };

    // Intern the map's own sources; an empty list means the mappings refer
    // to the entry's file itself.
    let map_files: Vec<FileId> = if raw_map.sources.is_empty() {
        vec![file_id]
    } else {
        raw_map
            .sources
            .iter()
            .map(|s| files.intern(resolve_path(base, Path::new(s))))
            .collect()
    };
    let map = SourceMap::decode(&raw_map, &map_files)?;

    Ok(ProgramSource { filename, file_id, text, map })
}
