//! PC-keyed Source Map v3 decoding and the session-wide location index.
//!
//! TEAL source maps reuse the standard v3 encoding but key each mapping
//! group by program counter instead of generated line: group `pc` of the
//! `mappings` string describes the instruction at byte offset `pc`.

use std::{
    collections::{BTreeMap, HashMap},
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use crate::{
    artifact::sources::RawSourceMap,
    error::{ReplayError, Result},
};

pub type FileId = usize;

/// Interns source file paths shared by every program in the session.
#[derive(Clone, Debug, Default)]
pub struct FileTable {
    paths: Vec<PathBuf>,
    index: HashMap<PathBuf, FileId>,
}

impl FileTable {
    pub fn intern(&mut self, path: PathBuf) -> FileId {
        if let Some(&id) = self.index.get(&path) {
            return id;
        }
        let id = self.paths.len();
        self.index.insert(path.clone(), id);
        self.paths.push(path);
        id
    }

    pub fn id(&self, path: &Path) -> Option<FileId> {
        self.index.get(path).copied()
    }

    pub fn path(&self, id: FileId) -> &Path {
        &self.paths[id]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileId, &Path)> {
        self.paths.iter().enumerate().map(|(id, p)| (id, p.as_path()))
    }
}

/// A resolved source position. Lines and columns are 0-based here; the DAP
/// layer shifts them to the client's numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceLoc {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

/// The decoded map of a single program: one optional location per PC.
#[derive(Clone, Debug)]
pub struct SourceMap {
    entries: Vec<Option<SourceLoc>>,
}

impl SourceMap {
    /// Decodes `mappings`, mapping each group's source index through
    /// `files` (the pre-interned ids of the map's `sources` array).
    pub fn decode(raw: &RawSourceMap, files: &[FileId]) -> Result<Self> {
        if raw.version != 3 {
            return Err(ReplayError::bad_trace(format!(
                "unsupported source map version {}",
                raw.version
            )));
        }

        let mut entries = Vec::new();
        // Source index, line and column accumulate across groups; the
        // generated column resets per group and is irrelevant here.
        let (mut src, mut line, mut col) = (0i64, 0i64, 0i64);
        for group in raw.mappings.split(';') {
            let mut entry = None;
            for segment in group.split(',').filter(|s| !s.is_empty()) {
                let fields = decode_vlq(segment)?;
                if fields.len() >= 4 {
                    src += fields[1];
                    line += fields[2];
                    col += fields[3];
                    if entry.is_none() {
                        let file = usize::try_from(src)
                            .ok()
                            .and_then(|i| files.get(i).copied())
                            .ok_or_else(|| {
                                ReplayError::bad_trace(format!("source index {src} out of range"))
                            })?;
                        if line < 0 || col < 0 {
                            return Err(ReplayError::bad_trace(
                                "negative source position in mappings",
                            ));
                        }
                        entry = Some(SourceLoc { file, line: line as u32, column: col as u32 });
                    }
                }
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn pc_to_loc(&self, pc: u64) -> Option<SourceLoc> {
        self.entries.get(pc as usize).copied().flatten()
    }

    pub fn mapped_pcs(&self) -> impl Iterator<Item = (u64, SourceLoc)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(pc, loc)| loc.map(|l| (pc as u64, l)))
    }
}

fn b64_value(c: u8) -> Option<i64> {
    match c {
        b'A'..=b'Z' => Some((c - b'A') as i64),
        b'a'..=b'z' => Some((c - b'a') as i64 + 26),
        b'0'..=b'9' => Some((c - b'0') as i64 + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Decodes one comma-separated segment of base64 VLQ fields.
fn decode_vlq(segment: &str) -> Result<Vec<i64>> {
    let mut fields = Vec::with_capacity(5);
    let mut value = 0i64;
    let mut shift = 0u32;
    for c in segment.bytes() {
        let digit = b64_value(c)
            .ok_or_else(|| ReplayError::bad_trace(format!("invalid VLQ digit {:?}", c as char)))?;
        value |= (digit & 0x1f) << shift;
        if digit & 0x20 != 0 {
            shift += 5;
        } else {
            let negative = value & 1 == 1;
            let magnitude = value >> 1;
            fields.push(if negative { -magnitude } else { magnitude });
            value = 0;
            shift = 0;
        }
    }
    if shift != 0 {
        return Err(ReplayError::bad_trace("truncated VLQ segment"));
    }
    Ok(fields)
}

/// Session-wide location index aggregated over every program's map.
///
/// Serves breakpoint-location enumeration, breakpoint verification and the
/// inverse location-to-PC lookup.
#[derive(Clone, Debug, Default)]
pub struct SourceIndex {
    // (file, line) -> sorted, deduplicated (column, pc) entries.
    line_entries: BTreeMap<(FileId, u32), Vec<(u32, u64)>>,
}

impl SourceIndex {
    pub fn add_program(&mut self, map: &SourceMap) {
        for (pc, loc) in map.mapped_pcs() {
            let entries = self.line_entries.entry((loc.file, loc.line)).or_default();
            entries.push((loc.column, pc));
        }
        for entries in self.line_entries.values_mut() {
            entries.sort_unstable();
            entries.dedup();
        }
    }

    /// All (line, column) pairs recorded for `file` within `lines`,
    /// deduplicated and sorted.
    pub fn breakpoint_locations(
        &self,
        file: FileId,
        lines: RangeInclusive<u32>,
    ) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let range = (file, *lines.start())..=(file, *lines.end());
        for (&(_, line), entries) in self.line_entries.range(range) {
            let mut last = None;
            for &(column, _) in entries {
                if last != Some(column) {
                    out.push((line, column));
                    last = Some(column);
                }
            }
        }
        out
    }

    /// Resolves a requested breakpoint position to the first mapping on the
    /// line at or after the requested column.
    pub fn resolve(&self, file: FileId, line: u32, column: Option<u32>) -> Option<(u32, u32)> {
        let entries = self.line_entries.get(&(file, line))?;
        let wanted = column.unwrap_or(0);
        entries.iter().find(|&&(col, _)| col >= wanted).map(|&(col, _)| (line, col))
    }

    /// The PCs (across all programs) mapped to exactly this position.
    pub fn location_to_pcs(&self, file: FileId, line: u32, column: u32) -> Vec<u64> {
        self.line_entries
            .get(&(file, line))
            .map(|entries| {
                entries.iter().filter(|&&(col, _)| col == column).map(|&(_, pc)| pc).collect()
            })
            .unwrap_or_default()
    }
}
