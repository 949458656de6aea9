//! GEI (gait energy image) descriptor store.
//!
//! Each tracklet has one precomputed descriptor on disk, a flat `.npy` array
//! of `descriptor_dim` floats. The store resolves a batch's metadata to file
//! names and stacks the descriptors into a `[batch, descriptor_dim]` block
//! whose rows follow the batch order exactly.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gaitfuse_core::{Config, GeiStore, Phase};
//!
//! let config = Config::load()?;
//! let store = GeiStore::new(&config.gei_dir(), &config.gei);
//! let block = store.load_batch(&batch.meta, Phase::Train)?;
//! assert_eq!(block.nrows(), batch.meta.len());
//! ```

mod key;

pub use key::KeyScheme;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ndarray::{Array1, Array2, ArrayD};
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use walkdir::WalkDir;

use crate::config::GeiConfig;
use crate::error::DataError;
use crate::types::{Phase, SampleMeta};

/// Loads GEI descriptors for batches of samples.
#[derive(Clone)]
pub struct GeiStore {
    root: PathBuf,
    scheme: KeyScheme,
    descriptor_dim: usize,
    /// Loaded descriptors by file name; `None` when caching is off.
    cache: Option<Arc<Mutex<HashMap<String, Array1<f32>>>>>,
}

impl GeiStore {
    /// Create a store rooted at `root` (already expanded).
    pub fn new(root: &Path, config: &GeiConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            scheme: KeyScheme::from_config(config),
            descriptor_dim: config.descriptor_dim,
            cache: config.cache.then(|| Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Length of every descriptor (D2).
    pub fn descriptor_dim(&self) -> usize {
        self.descriptor_dim
    }

    /// Key scheme used to name descriptor files.
    pub fn scheme(&self) -> &KeyScheme {
        &self.scheme
    }

    /// Full path of the descriptor for one sample.
    pub fn path_for(&self, meta: &SampleMeta, phase: Phase) -> PathBuf {
        self.root.join(self.scheme.file_name(meta, phase))
    }

    /// Load the descriptors of a batch as a `[batch, descriptor_dim]` block.
    ///
    /// Row `i` always belongs to `batch[i]`. The first missing or malformed
    /// file aborts the whole batch.
    pub fn load_batch(&self, batch: &[SampleMeta], phase: Phase) -> Result<Array2<f32>, DataError> {
        let mut block = Array2::zeros((batch.len(), self.descriptor_dim));
        for (mut row, meta) in block.rows_mut().into_iter().zip(batch) {
            let descriptor = self.load(meta, phase)?;
            row.assign(&descriptor);
        }
        Ok(block)
    }

    /// Load the descriptor of a single sample.
    pub fn load(&self, meta: &SampleMeta, phase: Phase) -> Result<Array1<f32>, DataError> {
        let name = self.scheme.file_name(meta, phase);

        if let Some(cache) = &self.cache {
            if let Some(hit) = lock(cache).get(&name) {
                return Ok(hit.clone());
            }
        }

        let path = self.root.join(&name);
        let descriptor = read_descriptor(&path, self.descriptor_dim)?;
        tracing::trace!("Loaded GEI descriptor {:?}", path);

        if let Some(cache) = &self.cache {
            lock(cache).insert(name, descriptor.clone());
        }
        Ok(descriptor)
    }

    /// Number of descriptors currently held in memory.
    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| lock(c).len())
    }

    /// List the descriptor file names present directly under the root.
    pub fn index(&self) -> HashSet<String> {
        WalkDir::new(&self.root)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| name.ends_with(".npy"))
            .collect()
    }

    /// Return the samples whose descriptor file is absent, in input order.
    pub fn missing<'a>(&self, samples: &'a [SampleMeta], phase: Phase) -> Vec<&'a SampleMeta> {
        let present = self.index();
        samples
            .iter()
            .filter(|meta| !present.contains(&self.scheme.file_name(meta, phase)))
            .collect()
    }
}

/// Entries are inserted whole, so a poisoned cache is still consistent.
fn lock(cache: &Mutex<HashMap<String, Array1<f32>>>) -> MutexGuard<'_, HashMap<String, Array1<f32>>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read a flat descriptor from an `.npy` file, accepting f32 or f64 data.
fn read_descriptor(path: &Path, expected_dim: usize) -> Result<Array1<f32>, DataError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DataError::DescriptorNotFound(path.to_path_buf()),
        _ => DataError::MalformedDescriptor {
            path: path.to_path_buf(),
            message: format!("Cannot read file: {e}"),
        },
    })?;

    let values: Vec<f32> = match ArrayD::<f32>::read_npy(bytes.as_slice()) {
        Ok(arr) => arr.iter().copied().collect(),
        Err(ReadNpyError::WrongDescriptor(_)) => ArrayD::<f64>::read_npy(bytes.as_slice())
            .map_err(|e| malformed(path, e))?
            .iter()
            .map(|&v| v as f32)
            .collect(),
        Err(e) => return Err(malformed(path, e)),
    };

    if values.len() != expected_dim {
        return Err(DataError::MalformedDescriptor {
            path: path.to_path_buf(),
            message: format!(
                "expected {} values, found {}",
                expected_dim,
                values.len()
            ),
        });
    }
    if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
        return Err(DataError::MalformedDescriptor {
            path: path.to_path_buf(),
            message: format!("non-finite value {} at index {}", values[pos], pos),
        });
    }
    Ok(Array1::from(values))
}

fn malformed(path: &Path, e: ReadNpyError) -> DataError {
    DataError::MalformedDescriptor {
        path: path.to_path_buf(),
        message: format!("NPY read error: {e}"),
    }
}
