//! Sorted chunk files and the k-way merge over them
//!
//! A chunk file holds the packages of one repository sorted by `effname`:
//! a bincode `u64` record count followed by that many bincode `Package`
//! records. The whole stream may be wrapped in gzip or zstd.

use crate::error::{Result, UnifyError};
use crate::package::Package;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CHUNK_SIZE: usize = 10240;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCompression {
    None,
    Gzip,
    #[default]
    Zstd,
}

impl ChunkCompression {
    fn extension(&self) -> &'static str {
        match self {
            ChunkCompression::None => "chunk",
            ChunkCompression::Gzip => "chunk.gz",
            ChunkCompression::Zstd => "chunk.zst",
        }
    }

    /// Guess from a chunk file name
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => ChunkCompression::Gzip,
            Some("zst") => ChunkCompression::Zstd,
            _ => ChunkCompression::None,
        }
    }
}

fn write_records<W: Write>(writer: &mut W, packages: &[Package]) -> Result<()> {
    bincode::serialize_into(&mut *writer, &(packages.len() as u64))?;
    for package in packages {
        bincode::serialize_into(&mut *writer, package)?;
    }
    Ok(())
}

fn write_chunk(path: &Path, packages: &[Package], compression: ChunkCompression) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);

    match compression {
        ChunkCompression::None => {
            let mut writer = file;
            write_records(&mut writer, packages)?;
            writer.flush()?;
        }
        ChunkCompression::Gzip => {
            let mut encoder = GzEncoder::new(file, flate2::Compression::default());
            write_records(&mut encoder, packages)?;
            encoder.finish()?.flush()?;
        }
        ChunkCompression::Zstd => {
            let mut encoder = zstd::stream::write::Encoder::new(file, 3)?;
            write_records(&mut encoder, packages)?;
            encoder.finish()?.flush()?;
        }
    }

    Ok(())
}

/// Buffers one repository's packages and writes them as sorted chunks
pub struct ChunkWriter {
    dir: PathBuf,
    prefix: String,
    chunk_size: usize,
    compression: ChunkCompression,
    buffer: Vec<Package>,
    paths: Vec<PathBuf>,
    total: usize,
}

impl ChunkWriter {
    /// Chunks land in `dir` as `<prefix>.<n>.chunk[.gz|.zst]`
    pub fn new<P: AsRef<Path>>(
        dir: P,
        prefix: &str,
        chunk_size: usize,
        compression: ChunkCompression,
    ) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
            chunk_size: chunk_size.max(1),
            compression,
            buffer: Vec::new(),
            paths: Vec::new(),
            total: 0,
        })
    }

    pub fn add(&mut self, package: Package) -> Result<()> {
        self.buffer.push(package);
        if self.buffer.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        // stable sort keeps parser order within one effname
        self.buffer.sort_by(|a, b| a.effname.cmp(&b.effname));

        let path = self.dir.join(format!(
            "{}.{}.{}",
            self.prefix,
            self.paths.len(),
            self.compression.extension()
        ));
        write_chunk(&path, &self.buffer, self.compression)?;
        debug!(path = %path.display(), packages = self.buffer.len(), "Wrote chunk");

        self.total += self.buffer.len();
        self.buffer.clear();
        self.paths.push(path);
        Ok(())
    }

    /// Write the final partial chunk and return every chunk path in write order
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        self.flush()?;
        Ok(self.paths)
    }

    pub fn total(&self) -> usize {
        self.total + self.buffer.len()
    }
}

/// Streams the packages of one chunk file
pub struct ChunkReader {
    reader: Box<dyn Read>,
    remaining: u64,
    path: PathBuf,
}

impl ChunkReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = BufReader::new(File::open(path)?);
        let mut reader: Box<dyn Read> = match ChunkCompression::from_path(path) {
            ChunkCompression::None => Box::new(file),
            ChunkCompression::Gzip => Box::new(GzDecoder::new(file)),
            ChunkCompression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(file)?),
        };
        let remaining: u64 = bincode::deserialize_from(&mut reader)?;

        Ok(Self {
            reader,
            remaining,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Package>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        match bincode::deserialize_from(&mut self.reader) {
            Ok(package) => Some(Ok(package)),
            Err(e) => {
                self.remaining = 0;
                Some(Err(UnifyError::Serialization(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                ))))
            }
        }
    }
}

/// Heap entry: the head package of one cursor
struct Head {
    package: Package,
    cursor: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        self.package
            .effname
            .cmp(&other.package.effname)
            .then(self.cursor.cmp(&other.cursor))
    }
}

/// K-way merge over chunk files, yielding one group per effname
///
/// Groups come out in ascending effname order. Inside a group packages are
/// ordered by cursor (chunk path order), then by position in the chunk.
pub struct ProjectMerger {
    cursors: Vec<ChunkReader>,
    last: Vec<Option<String>>,
    heap: BinaryHeap<Reverse<Head>>,
    failed: bool,
}

/// Open every chunk and prime the merge heap
pub fn heap_merge<P: AsRef<Path>>(paths: &[P]) -> Result<ProjectMerger> {
    let cursors = paths
        .iter()
        .map(ChunkReader::open)
        .collect::<Result<Vec<_>>>()?;

    let mut merger = ProjectMerger {
        last: vec![None; cursors.len()],
        cursors,
        heap: BinaryHeap::new(),
        failed: false,
    };
    for cursor in 0..merger.cursors.len() {
        merger.advance(cursor)?;
    }

    Ok(merger)
}

impl ProjectMerger {
    /// Pull the next package of `cursor` into the heap
    fn advance(&mut self, cursor: usize) -> Result<()> {
        let Some(next) = self.cursors[cursor].next() else {
            return Ok(());
        };
        let package = next?;

        if let Some(previous) = &self.last[cursor] {
            if package.effname < *previous {
                return Err(UnifyError::MergeOrder {
                    stream: "chunk",
                    previous: previous.clone(),
                    next: package.effname.clone(),
                });
            }
        }
        self.last[cursor] = Some(package.effname.clone());

        self.heap.push(Reverse(Head { package, cursor }));
        Ok(())
    }

    fn next_group(&mut self) -> Result<Option<Vec<Package>>> {
        let Some(Reverse(first)) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(first.cursor)?;

        let effname = first.package.effname.clone();
        let mut group = vec![first.package];

        while self
            .heap
            .peek()
            .is_some_and(|Reverse(head)| head.package.effname == effname)
        {
            if let Some(Reverse(head)) = self.heap.pop() {
                self.advance(head.cursor)?;
                group.push(head.package);
            }
        }

        Ok(Some(group))
    }
}

impl Iterator for ProjectMerger {
    type Item = Result<Vec<Package>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_group() {
            Ok(group) => group.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
