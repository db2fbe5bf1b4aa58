//! Deterministic key-file generation.
//!
//! Experiments replay a pre-generated key stream so runs are reproducible.
//! The generator writes `data-0 .. data-<files-1>` under a directory, one
//! decimal key per line, drawn from a seeded ChaCha8 stream. An optional
//! Zipf exponent skews the draw toward low keys, which is what gives the
//! compaction phases duplicates to harvest.

use crate::{KeyError, FILE_KEY_CAPACITY};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Zipf};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

/// What to generate.
#[derive(Debug, Clone)]
pub struct KeyFileSpec {
    /// Output directory. Must exist.
    pub dir: PathBuf,
    /// Number of `data-<fid>` files to write.
    pub files: u32,
    /// Keys per file. At most [`FILE_KEY_CAPACITY`].
    pub keys_per_file: usize,
    /// Keys are drawn from `[0, key_space)`.
    pub key_space: u64,
    /// Zipf skew exponent; `0.0` selects a uniform draw.
    pub zipf_exponent: f64,
    /// RNG seed. The same spec and seed produce identical files.
    pub seed: u64,
}

impl KeyFileSpec {
    fn validate(&self) -> Result<(), KeyError> {
        if self.files < 1 {
            return Err(KeyError::InvalidSpec("files must be >= 1".into()));
        }
        if self.keys_per_file < 1 {
            return Err(KeyError::InvalidSpec("keys_per_file must be >= 1".into()));
        }
        if self.keys_per_file > FILE_KEY_CAPACITY {
            return Err(KeyError::InvalidSpec(format!(
                "keys_per_file {} exceeds file capacity {}",
                self.keys_per_file, FILE_KEY_CAPACITY
            )));
        }
        if self.key_space < 1 {
            return Err(KeyError::InvalidSpec("key_space must be >= 1".into()));
        }
        if self.zipf_exponent < 0.0 {
            return Err(KeyError::InvalidSpec(format!(
                "zipf_exponent must be >= 0, got {}",
                self.zipf_exponent
            )));
        }
        Ok(())
    }
}

/// Write the key files described by `spec` and return their paths.
pub fn generate(spec: &KeyFileSpec) -> Result<Vec<PathBuf>, KeyError> {
    spec.validate()?;

    let mut rng = ChaCha8Rng::seed_from_u64(spec.seed);
    let zipf = if spec.zipf_exponent > 0.0 {
        let dist = Zipf::new(spec.key_space, spec.zipf_exponent)
            .map_err(|e| KeyError::InvalidSpec(format!("zipf: {e}")))?;
        Some(dist)
    } else {
        None
    };

    let mut paths = Vec::with_capacity(spec.files as usize);
    for fid in 0..spec.files {
        let path = spec.dir.join(format!("data-{}", fid));
        let file = File::create(&path).map_err(|source| KeyError::Write {
            path: path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        for _ in 0..spec.keys_per_file {
            let key: i64 = match &zipf {
                // Zipf ranks are 1..=n; shift down to a zero-based key.
                Some(dist) => dist.sample(&mut rng) as i64 - 1,
                None => rng.gen_range(0..spec.key_space) as i64,
            };
            writeln!(writer, "{}", key).map_err(|source| KeyError::Write {
                path: path.clone(),
                source,
            })?;
        }
        writer.flush().map_err(|source| KeyError::Write {
            path: path.clone(),
            source,
        })?;
        paths.push(path);
    }

    info!(
        files = spec.files,
        keys_per_file = spec.keys_per_file,
        key_space = spec.key_space,
        zipf = spec.zipf_exponent,
        seed = spec.seed,
        "generated key files"
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileKeySource, KeySource};
    use std::fs;
    use tempfile::TempDir;

    fn spec(dir: &TempDir) -> KeyFileSpec {
        KeyFileSpec {
            dir: dir.path().to_path_buf(),
            files: 2,
            keys_per_file: 500,
            key_space: 64,
            zipf_exponent: 0.0,
            seed: 42,
        }
    }

    #[test]
    fn test_generated_files_replay_cleanly() {
        let dir = TempDir::new().unwrap();
        let paths = generate(&spec(&dir)).unwrap();
        assert_eq!(paths.len(), 2);

        let source = FileKeySource::new(dir.path());
        for _ in 0..1000 {
            let key = source.next_key().unwrap();
            assert!((0..64).contains(&key));
        }
    }

    #[test]
    fn test_same_seed_same_files() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let mut spec_a = spec(&a);
        let mut spec_b = spec(&b);
        spec_a.zipf_exponent = 1.1;
        spec_b.zipf_exponent = 1.1;
        generate(&spec_a).unwrap();
        generate(&spec_b).unwrap();
        for fid in 0..2 {
            let body_a = fs::read(a.path().join(format!("data-{}", fid))).unwrap();
            let body_b = fs::read(b.path().join(format!("data-{}", fid))).unwrap();
            assert_eq!(body_a, body_b, "data-{}", fid);
        }
    }

    #[test]
    fn test_zipf_keys_stay_in_range() {
        let dir = TempDir::new().unwrap();
        let mut s = spec(&dir);
        s.files = 1;
        s.zipf_exponent = 1.3;
        generate(&s).unwrap();
        let source = FileKeySource::new(dir.path());
        for _ in 0..500 {
            let key = source.next_key().unwrap();
            assert!((0..64).contains(&key), "key {key} out of range");
        }
    }

    #[test]
    fn test_rejects_oversized_file() {
        let dir = TempDir::new().unwrap();
        let mut s = spec(&dir);
        s.keys_per_file = FILE_KEY_CAPACITY + 1;
        assert!(matches!(
            generate(&s).unwrap_err(),
            KeyError::InvalidSpec(_)
        ));
    }
}
