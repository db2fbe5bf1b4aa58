//! # aggsim-keys
//!
//! Key streams for aggsim.
//!
//! This crate provides:
//! - The [`KeySource`] trait the node pipeline pulls keys through
//! - [`FileKeySource`], a buffered replay of pre-generated `data-<fid>` files
//! - [`ReplaySource`], an in-memory sequence for tests and scripted scenarios
//! - A deterministic key-file generator ([`gen`])
//!
//! A corrupt key stream invalidates the whole experiment, so every failure
//! here is fatal to the run: missing files, unparseable tokens, and negative
//! values all carry the offending file, token position, and value.

pub mod gen;

pub use gen::KeyFileSpec;

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Maximum keys held by one `data-<fid>` file (2^30 / 32). The reader buffers
/// one file at a time, so this also bounds resident key memory.
pub const FILE_KEY_CAPACITY: usize = 33_554_432;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by key streams and the key-file generator.
#[derive(Debug, Error)]
pub enum KeyError {
    /// A key file could not be opened or read.
    #[error("failed to read key file {path}: {source}")]
    Open {
        /// Offending file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A token in a key file is not a decimal integer.
    #[error("key file {path}, token {pos}: cannot parse {token:?} as a key")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Zero-based token position within the file.
        pos: usize,
        /// The raw token.
        token: String,
    },

    /// A key file contains a negative value.
    #[error("key file {path}, token {pos}: negative key {value}")]
    Negative {
        /// Offending file.
        path: PathBuf,
        /// Zero-based token position within the file.
        pos: usize,
        /// The offending value.
        value: i64,
    },

    /// An in-memory replay sequence ran out of keys.
    #[error("replay key sequence exhausted after {count} keys")]
    Exhausted {
        /// Keys served before exhaustion.
        count: usize,
    },

    /// A key file could not be written.
    #[error("failed to write key file {path}: {source}")]
    Write {
        /// Offending file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The generator spec is out of range.
    #[error("invalid key generator spec: {0}")]
    InvalidSpec(String),
}

// ============================================================================
// Key Source Trait
// ============================================================================

/// A stream of non-negative application keys.
///
/// `next_key` is called from every worker thread during the generate phase,
/// so implementations serialize internally.
pub trait KeySource: Send + Sync {
    /// Fetch the next key. Always >= 0 on success.
    fn next_key(&self) -> Result<i64, KeyError>;
}

// ============================================================================
// File-Backed Source
// ============================================================================

struct FileState {
    keys: Vec<i64>,
    cursor: usize,
    next_fid: u32,
}

/// Replays the key sequence stored in numbered files `data-0`, `data-1`, …
/// under one directory.
///
/// One file is buffered at a time; when the buffer is drained the next file
/// in sequence is loaded. Refill and cursor advance are serialized under a
/// single mutex.
pub struct FileKeySource {
    dir: PathBuf,
    state: Mutex<FileState>,
}

impl FileKeySource {
    /// Create a source over `dir`. No file is touched until the first key is
    /// requested.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileKeySource {
            dir: dir.into(),
            state: Mutex::new(FileState {
                keys: Vec::new(),
                cursor: 0,
                next_fid: 0,
            }),
        }
    }

    fn refill(&self, state: &mut FileState) -> Result<(), KeyError> {
        let path = self.dir.join(format!("data-{}", state.next_fid));
        state.keys = load_key_file(&path)?;
        state.cursor = 0;
        state.next_fid += 1;
        info!(file = %path.display(), keys = state.keys.len(), "loaded key file");
        Ok(())
    }
}

impl KeySource for FileKeySource {
    fn next_key(&self) -> Result<i64, KeyError> {
        let mut state = self.state.lock();
        while state.cursor >= state.keys.len() {
            self.refill(&mut state)?;
        }
        let key = state.keys[state.cursor];
        state.cursor += 1;
        Ok(key)
    }
}

/// Parse one ASCII key file: non-negative decimal integers separated by
/// whitespace.
fn load_key_file(path: &Path) -> Result<Vec<i64>, KeyError> {
    let text = fs::read_to_string(path).map_err(|source| KeyError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut keys = Vec::new();
    for (pos, token) in text.split_ascii_whitespace().enumerate() {
        let value: i64 = token.parse().map_err(|_| KeyError::Parse {
            path: path.to_path_buf(),
            pos,
            token: token.to_string(),
        })?;
        if value < 0 {
            return Err(KeyError::Negative {
                path: path.to_path_buf(),
                pos,
                value,
            });
        }
        keys.push(value);
    }
    Ok(keys)
}

// ============================================================================
// In-Memory Source
// ============================================================================

/// Serves a fixed key sequence from memory. Intended for tests and scripted
/// scenarios where exact key placement matters.
pub struct ReplaySource {
    keys: Vec<i64>,
    cursor: Mutex<usize>,
    cycle: bool,
}

impl ReplaySource {
    /// One-shot sequence; exhaustion is an error.
    pub fn new(keys: Vec<i64>) -> Self {
        ReplaySource {
            keys,
            cursor: Mutex::new(0),
            cycle: false,
        }
    }

    /// Sequence that wraps around forever.
    pub fn cycling(keys: Vec<i64>) -> Self {
        ReplaySource {
            keys,
            cursor: Mutex::new(0),
            cycle: true,
        }
    }
}

impl KeySource for ReplaySource {
    fn next_key(&self) -> Result<i64, KeyError> {
        let mut cursor = self.cursor.lock();
        if *cursor >= self.keys.len() {
            if !self.cycle || self.keys.is_empty() {
                return Err(KeyError::Exhausted { count: *cursor });
            }
            *cursor = 0;
        }
        let key = self.keys[*cursor];
        *cursor += 1;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_file(dir: &Path, fid: u32, body: &str) {
        let mut f = fs::File::create(dir.join(format!("data-{}", fid))).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_reads_across_files_in_order() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), 0, "1 2 3\n4 5");
        write_file(dir.path(), 1, "6\n7 8");
        let source = FileKeySource::new(dir.path());
        let got: Vec<i64> = (0..8).map(|_| source.next_key().unwrap()).collect();
        assert_eq!(got, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), 0, "9");
        let source = FileKeySource::new(dir.path());
        assert_eq!(source.next_key().unwrap(), 9);
        let err = source.next_key().unwrap_err();
        assert!(matches!(err, KeyError::Open { .. }), "{err}");
    }

    #[test]
    fn test_non_integer_token_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), 0, "1 two 3");
        let source = FileKeySource::new(dir.path());
        let err = source.next_key().unwrap_err();
        match err {
            KeyError::Parse { pos, token, .. } => {
                assert_eq!(pos, 1);
                assert_eq!(token, "two");
            }
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[test]
    fn test_negative_key_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), 0, "0 5 -3");
        let source = FileKeySource::new(dir.path());
        let err = source.next_key().unwrap_err();
        match err {
            KeyError::Negative { pos, value, .. } => {
                assert_eq!(pos, 2);
                assert_eq!(value, -3);
            }
            other => panic!("expected negative-key error, got {other}"),
        }
    }

    #[test]
    fn test_empty_file_advances_to_next() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), 0, "   \n");
        write_file(dir.path(), 1, "11");
        let source = FileKeySource::new(dir.path());
        assert_eq!(source.next_key().unwrap(), 11);
    }

    #[test]
    fn test_concurrent_consumers_drain_exactly_once() {
        let dir = TempDir::new().unwrap();
        let body: String = (0..1000).map(|i| format!("{} ", i)).collect();
        write_file(dir.path(), 0, &body);
        let source = Arc::new(FileKeySource::new(dir.path()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let source = Arc::clone(&source);
            handles.push(std::thread::spawn(move || {
                let mut got = Vec::new();
                for _ in 0..250 {
                    got.push(source.next_key().unwrap());
                }
                got
            }));
        }
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<i64>>());
    }

    #[test]
    fn test_replay_exhaustion() {
        let source = ReplaySource::new(vec![1, 2]);
        assert_eq!(source.next_key().unwrap(), 1);
        assert_eq!(source.next_key().unwrap(), 2);
        assert!(matches!(
            source.next_key().unwrap_err(),
            KeyError::Exhausted { count: 2 }
        ));
    }

    #[test]
    fn test_replay_cycles() {
        let source = ReplaySource::cycling(vec![5, 6]);
        let got: Vec<i64> = (0..5).map(|_| source.next_key().unwrap()).collect();
        assert_eq!(got, vec![5, 6, 5, 6, 5]);
    }
}
