//! Sample manifests for offline evaluation.
//!
//! A manifest is a JSON Lines file, one tracklet per line:
//!
//! ```text
//! {"identity": 75, "camera_id": 2, "sequence_type": "nm-05", "embedding": "emb/075-nm-05-c2.npy"}
//! ```
//!
//! `embedding` points at a `[num_clips, D1]` (or flat `[D1]`) `.npy` array of
//! clip embeddings exported by the backbone; relative paths resolve against
//! the manifest's directory. [`ManifestSource`] serves the tracklets one per
//! batch, which is what the query/gallery loaders require.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayD, Axis, Ix2};
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use serde::{Deserialize, Serialize};

use crate::data::{BatchSource, RawBatch};
use crate::error::{DataError, Result};
use crate::model::ClipEmbedder;
use crate::types::SampleMeta;

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub identity: u32,
    pub camera_id: u32,
    pub sequence_type: String,
    /// Clip embedding file, resolved to an absolute or manifest-relative path
    pub embedding: PathBuf,
}

impl ManifestEntry {
    pub fn meta(&self) -> SampleMeta {
        SampleMeta::new(self.identity, self.camera_id, self.sequence_type.clone())
    }
}

/// A parsed manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Read and parse a manifest file. Blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| DataError::Manifest {
            path: path.to_path_buf(),
            line: 0,
            message: format!("Cannot open: {e}"),
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut entry: ManifestEntry =
                serde_json::from_str(&line).map_err(|e| DataError::Manifest {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            if entry.embedding.is_relative() {
                entry.embedding = base.join(&entry.embedding);
            }
            entries.push(entry);
        }

        tracing::debug!("Loaded {} samples from {:?}", entries.len(), path);
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata of every sample, in manifest order.
    pub fn samples(&self) -> Vec<SampleMeta> {
        self.entries.iter().map(ManifestEntry::meta).collect()
    }

    /// Turn the manifest into a one-sample-per-batch source.
    pub fn into_source(self) -> ManifestSource {
        ManifestSource { manifest: self }
    }
}

/// Serves manifest samples as size-1 batches, reading clip embeddings lazily.
///
/// Frames are the embedding files' paths; [`PrecomputedEmbeddings`] turns them
/// into clip embeddings.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    manifest: Manifest,
}

impl ManifestSource {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

impl BatchSource for ManifestSource {
    type Frames = PathBuf;

    fn num_batches(&self) -> usize {
        self.manifest.len()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<RawBatch<PathBuf>>> + '_> {
        Box::new(
            self.manifest
                .entries
                .iter()
                .map(|entry| Ok(RawBatch::new(entry.embedding.clone(), vec![entry.meta()]))),
        )
    }
}

/// Clip embedder that reads embeddings exported to `.npy` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecomputedEmbeddings;

impl ClipEmbedder for PrecomputedEmbeddings {
    type Frames = PathBuf;

    fn embed_clips(&mut self, frames: &PathBuf) -> Result<Array2<f32>> {
        Ok(read_clip_embeddings(frames)?)
    }
}

/// Read a `[num_clips, D1]` array; a flat array counts as a single clip.
pub fn read_clip_embeddings(path: &Path) -> std::result::Result<Array2<f32>, DataError> {
    let bytes = std::fs::read(path).map_err(|e| clip_error(path, format!("Cannot read file: {e}")))?;

    let array = match ArrayD::<f32>::read_npy(bytes.as_slice()) {
        Ok(arr) => arr,
        Err(ReadNpyError::WrongDescriptor(_)) => ArrayD::<f64>::read_npy(bytes.as_slice())
            .map_err(|e| clip_error(path, format!("NPY read error: {e}")))?
            .mapv(|v| v as f32),
        Err(e) => return Err(clip_error(path, format!("NPY read error: {e}"))),
    };

    let array = match array.ndim() {
        1 => array.insert_axis(Axis(0)),
        2 => array,
        n => return Err(clip_error(path, format!("expected 1 or 2 dimensions, found {n}"))),
    };
    let clips = array
        .into_dimensionality::<Ix2>()
        .map_err(|e| clip_error(path, e.to_string()))?;
    if clips.nrows() == 0 {
        return Err(clip_error(path, "no clips".to_string()));
    }
    if clips.iter().any(|v| !v.is_finite()) {
        return Err(clip_error(path, "contains NaN or infinite values".to_string()));
    }
    Ok(clips)
}

fn clip_error(path: &Path, message: String) -> DataError {
    DataError::ClipEmbedding {
        path: path.to_path_buf(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GaitFuseError;
    use ndarray::{array, Array1};
    use ndarray_npy::WriteNpyExt;
    use std::io::Write;

    fn write_manifest(dir: &Path, lines: &[&str]) -> PathBuf {
        let path = dir.join("query.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            &[
                r#"{"identity": 75, "camera_id": 2, "sequence_type": "nm-05", "embedding": "emb/a.npy"}"#,
                "",
                r#"{"identity": 80, "camera_id": 1, "sequence_type": "bg-01", "embedding": "/abs/b.npy"}"#,
            ],
        );

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[0].embedding, dir.path().join("emb/a.npy"));
        assert_eq!(manifest.entries()[1].embedding, PathBuf::from("/abs/b.npy"));
        assert_eq!(manifest.samples()[1], SampleMeta::new(80, 1, "bg-01"));
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            &[
                r#"{"identity": 1, "camera_id": 1, "sequence_type": "nm-01", "embedding": "a.npy"}"#,
                r#"{"identity": "x"}"#,
            ],
        );

        let err = Manifest::load(&path).unwrap_err();
        assert!(matches!(
            err,
            GaitFuseError::Data(DataError::Manifest { line: 2, .. })
        ));
    }

    #[test]
    fn test_source_yields_single_sample_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            &[
                r#"{"identity": 1, "camera_id": 1, "sequence_type": "nm-01", "embedding": "a.npy"}"#,
                r#"{"identity": 2, "camera_id": 3, "sequence_type": "nm-02", "embedding": "b.npy"}"#,
            ],
        );

        let mut source = Manifest::load(&path).unwrap().into_source();
        assert_eq!(source.num_batches(), 2);
        let batches: Vec<_> = source.batches().collect::<Result<_>>().unwrap();
        assert!(batches.iter().all(|b| b.len() == 1));
        assert_eq!(batches[1].meta[0].camera_id, 3);
        assert_eq!(batches[1].frames, dir.path().join("b.npy"));
    }

    #[test]
    fn test_read_clip_embeddings_shapes() {
        let dir = tempfile::tempdir().unwrap();

        let multi = dir.path().join("multi.npy");
        array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]]
            .write_npy(std::fs::File::create(&multi).unwrap())
            .unwrap();
        assert_eq!(read_clip_embeddings(&multi).unwrap().dim(), (3, 2));

        let flat = dir.path().join("flat.npy");
        Array1::from(vec![0.5f64, 1.5, 2.5])
            .write_npy(std::fs::File::create(&flat).unwrap())
            .unwrap();
        let clips = PrecomputedEmbeddings.embed_clips(&flat).unwrap();
        assert_eq!(clips.dim(), (1, 3));
        assert_eq!(clips[[0, 2]], 2.5);
    }

    #[test]
    fn test_non_finite_clip_embedding_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.npy");
        array![[1.0f32, 2.0], [f32::INFINITY, 0.0]]
            .write_npy(std::fs::File::create(&path).unwrap())
            .unwrap();
        let err = read_clip_embeddings(&path).unwrap_err();
        assert!(err.to_string().contains("NaN or infinite"), "{err}");
    }

    #[test]
    fn test_missing_embedding_file() {
        let err = read_clip_embeddings(Path::new("/nonexistent/clip.npy")).unwrap_err();
        assert!(matches!(err, DataError::ClipEmbedding { .. }));
    }
}
