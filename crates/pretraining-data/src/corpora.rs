use crate::errors::{DataError, Result};
use log::{debug, info, warn};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::reader::RowIter;
use parquet::record::Field;
use parquet::schema::types::Type;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

pub const DEFAULT_TEXT_COLUMN: &str = "text";

/// Where a record came from: row index for columnar files, 1-based line number
/// for line files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub path: PathBuf,
    pub offset: u64,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub text: String,
    pub source: SourceRef,
}

/// Trait for corpus types that can stream raw records. Every call to
/// [`TextCorpus::stream`] starts a fresh single-pass stream.
pub trait TextCorpus {
    type Stream: Iterator<Item = RawRecord>;
    fn stream(&self) -> Result<Self::Stream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Columnar,
    Lines,
}

/// Columnar (`*.parquet`) and line (`*.txt`) files, read columnar first and
/// each group in sorted path order.
#[derive(Clone, Debug)]
pub struct CorpusSources {
    columnar: Vec<PathBuf>,
    lines: Vec<PathBuf>,
    text_column: String,
}

impl CorpusSources {
    pub fn new(columnar: Vec<PathBuf>, lines: Vec<PathBuf>, text_column: impl Into<String>) -> Self {
        Self {
            columnar,
            lines,
            text_column: text_column.into(),
        }
    }

    /// Lists `*.parquet` under `columnar_dir` and `*.txt` under `text_dir`.
    /// Missing directories are logged and contribute nothing.
    pub fn discover(
        columnar_dir: Option<&Path>,
        text_dir: Option<&Path>,
        text_column: impl Into<String>,
    ) -> Result<Self> {
        let columnar = match columnar_dir {
            Some(dir) => get_files_with_extension(dir, "parquet")?,
            None => Vec::new(),
        };
        let lines = match text_dir {
            Some(dir) => get_files_with_extension(dir, "txt")?,
            None => Vec::new(),
        };
        info!(
            "corpus: found {} columnar and {} line file(s)",
            columnar.len(),
            lines.len()
        );
        Ok(Self::new(columnar, lines, text_column))
    }
}

impl TextCorpus for CorpusSources {
    type Stream = CorpusStream;

    fn stream(&self) -> Result<Self::Stream> {
        let queue = self
            .columnar
            .iter()
            .map(|p| (p.clone(), SourceKind::Columnar))
            .chain(self.lines.iter().map(|p| (p.clone(), SourceKind::Lines)))
            .collect();
        Ok(CorpusStream::new(queue, self.text_column.clone()))
    }
}

enum OpenSource {
    Lines {
        path: PathBuf,
        lines: io::Lines<BufReader<File>>,
        line_no: u64,
    },
    Columnar {
        path: PathBuf,
        rows: RowIter<'static>,
        row: u64,
    },
}

/// Counters kept while streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub files_opened: usize,
    pub files_skipped: usize,
    pub records: usize,
}

/// Single-pass stream over every configured file. A file that fails to open or
/// fails mid-read is logged and the stream moves on to the next file.
pub struct CorpusStream {
    queue: VecDeque<(PathBuf, SourceKind)>,
    current: Option<OpenSource>,
    text_column: String,
    exhausted: bool,
    stats: StreamStats,
}

impl CorpusStream {
    fn new(queue: VecDeque<(PathBuf, SourceKind)>, text_column: String) -> Self {
        Self {
            queue,
            current: None,
            text_column,
            exhausted: false,
            stats: StreamStats::default(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    fn open_next(&mut self) -> bool {
        while let Some((path, kind)) = self.queue.pop_front() {
            let opened = match kind {
                SourceKind::Lines => open_lines(&path),
                SourceKind::Columnar => open_columnar(&path, &self.text_column),
            };
            match opened {
                Ok(source) => {
                    debug!("corpus: streaming {}", path.display());
                    self.stats.files_opened += 1;
                    self.current = Some(source);
                    return true;
                }
                Err(err) => self.skip_file(err),
            }
        }
        false
    }

    fn skip_file(&mut self, err: DataError) {
        warn!("corpus: skipping file: {err}");
        self.stats.files_skipped += 1;
        self.current = None;
    }

    /// Next record from the open file, `Ok(None)` at its end.
    fn next_from_current(&mut self) -> Result<Option<RawRecord>> {
        let Some(current) = self.current.as_mut() else {
            return Ok(None);
        };

        match current {
            OpenSource::Lines {
                path,
                lines,
                line_no,
            } => {
                for line in lines.by_ref() {
                    *line_no += 1;
                    let line = line.map_err(|e| DataError::source_read(path.clone(), e))?;
                    let text = line.trim();
                    if !text.is_empty() {
                        return Ok(Some(RawRecord {
                            text: text.to_owned(),
                            source: SourceRef {
                                path: path.clone(),
                                offset: *line_no,
                            },
                        }));
                    }
                }
                Ok(None)
            }
            OpenSource::Columnar { path, rows, row } => {
                for record in rows.by_ref() {
                    let offset = *row;
                    *row += 1;
                    let record = record.map_err(|e| DataError::source_read(path.clone(), e))?;
                    for (_, field) in record.get_column_iter() {
                        if let Some(text) = field_text(field, path)? {
                            return Ok(Some(RawRecord {
                                text,
                                source: SourceRef {
                                    path: path.clone(),
                                    offset,
                                },
                            }));
                        }
                    }
                }
                Ok(None)
            }
        }
    }
}

impl Iterator for CorpusStream {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        loop {
            if self.current.is_none() && !self.open_next() {
                self.exhausted = true;
                info!(
                    "corpus: exhausted after {} records ({} file(s) read, {} skipped)",
                    self.stats.records, self.stats.files_opened, self.stats.files_skipped
                );
                return None;
            }

            match self.next_from_current() {
                Ok(Some(record)) => {
                    self.stats.records += 1;
                    return Some(record);
                }
                Ok(None) => self.current = None,
                Err(err) => self.skip_file(err),
            }
        }
    }
}

impl FusedIterator for CorpusStream {}

fn open_lines(path: &Path) -> Result<OpenSource> {
    let file = File::open(path).map_err(|e| DataError::source_read(path, e))?;
    Ok(OpenSource::Lines {
        path: path.to_path_buf(),
        lines: BufReader::new(file).lines(),
        line_no: 0,
    })
}

fn open_columnar(path: &Path, column: &str) -> Result<OpenSource> {
    let file = File::open(path).map_err(|e| DataError::source_read(path, e))?;
    let reader = SerializedFileReader::new(file).map_err(|e| DataError::source_read(path, e))?;

    let schema = reader.metadata().file_metadata().schema();
    let field = schema
        .get_fields()
        .iter()
        .find(|field| field.name() == column)
        .cloned()
        .ok_or_else(|| DataError::source_read(path, format!("no '{column}' column")))?;
    let projection = Type::group_type_builder(schema.name())
        .with_fields(vec![field])
        .build()
        .map_err(|e| DataError::source_read(path, e))?;

    let rows = RowIter::from_file_into(Box::new(reader))
        .project(Some(projection))
        .map_err(|e| DataError::source_read(path, e))?;

    Ok(OpenSource::Columnar {
        path: path.to_path_buf(),
        rows,
        row: 0,
    })
}

/// Trimmed text of a string or UTF-8 binary cell; `None` for nulls and blanks.
fn field_text(field: &Field, path: &Path) -> Result<Option<String>> {
    let raw = match field {
        Field::Str(s) => s.as_str(),
        Field::Bytes(bytes) => bytes
            .as_utf8()
            .map_err(|e| DataError::source_read(path, e))?,
        Field::Null => return Ok(None),
        other => {
            return Err(DataError::source_read(
                path,
                format!("text column holds a non-string value: {other}"),
            ))
        }
    };
    let trimmed = raw.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_owned()))
}

/// Sorted regular files directly under `dir` with the given extension.
pub fn get_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        warn!("corpus: directory not found: {}", dir.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
