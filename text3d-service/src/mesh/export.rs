//! Writing encoded meshes to the output directory and handing the written
//! file back for the response.

use super::glb::{GlbHeader, HEADER_LEN};
use anyhow::Context;
use service_core::error::AppError;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use uuid::Uuid;

/// Appended to the prompt-derived stem.
pub const OUTPUT_SUFFIX: &str = "_model.glb";

/// Keeps `<stem>_model.glb` under the common 255-byte file name limit.
const MAX_STEM_BYTES: usize = 200;

/// File name for a prompt: whitespace becomes `_`, as do path separators
/// and characters most filesystems reject, and a leading dot.
///
/// `"a red chair"` maps to `a_red_chair_model.glb`.
pub fn output_file_name(prompt: &str) -> String {
    let mut stem = String::with_capacity(prompt.len());
    for c in prompt.chars() {
        let c = if c.is_whitespace()
            || c.is_control()
            || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        {
            '_'
        } else {
            c
        };
        if stem.len() + c.len_utf8() > MAX_STEM_BYTES {
            break;
        }
        stem.push(c);
    }
    if stem.starts_with('.') {
        stem.replace_range(..1, "_");
    }

    format!("{}{}", stem, OUTPUT_SUFFIX)
}

/// An exported mesh opened for streaming.
///
/// `file` is the handle the bytes were written through, positioned at the
/// start. It keeps reading this export's contents even if a later export
/// replaces `path`.
#[derive(Debug)]
pub struct ExportedModel {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub file: File,
}

/// Temporary sibling of an export target, removed on drop unless it was
/// renamed into place.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn persisted(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove temporary export file"
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeshExporter {
    dir: PathBuf,
}

impl MeshExporter {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
        }
        Ok(Self { dir })
    }

    pub fn path_for(&self, prompt: &str) -> PathBuf {
        self.dir.join(output_file_name(prompt))
    }

    /// Write `bytes` to the prompt's output path, replacing any previous
    /// file atomically, and return the written file ready for streaming.
    ///
    /// The data is written, synced and its GLB header checked in a uniquely
    /// named sibling, which is then renamed over the destination. The whole
    /// sequence runs on a blocking task, so dropping the returned future does
    /// not interrupt it: it either completes the rename or removes the
    /// temporary file.
    pub async fn export(&self, prompt: &str, bytes: Vec<u8>) -> Result<ExportedModel, AppError> {
        let file_name = output_file_name(prompt);
        let path = self.dir.join(&file_name);
        let tmp = TempFile::new(
            self.dir
                .join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple())),
        );

        let target = path.clone();
        let (file, size) =
            tokio::task::spawn_blocking(move || write_and_persist(tmp, &target, &bytes))
                .await
                .map_err(|e| AppError::InternalError(anyhow::anyhow!("Export task failed: {}", e)))?
                .map_err(|e| {
                    AppError::ExportFailed(e.context(format!("Failed to write {}", path.display())))
                })?;

        tracing::debug!(path = %path.display(), size, "Mesh exported");

        Ok(ExportedModel {
            file_name,
            path,
            size,
            file: File::from_std(file),
        })
    }
}

fn write_and_persist(
    tmp: TempFile,
    path: &Path,
    bytes: &[u8],
) -> anyhow::Result<(std::fs::File, u64)> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&tmp.path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    let size = verify_header(&mut file)?;

    std::fs::rename(&tmp.path, path)?;
    tmp.persisted();

    Ok((file, size))
}

/// Check the GLB header against the file size and rewind; returns the size.
fn verify_header(file: &mut std::fs::File) -> anyhow::Result<u64> {
    let size = file.metadata()?.len();
    file.rewind()?;

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header).context("unreadable header")?;
    let header = GlbHeader::parse(&header)?;
    if u64::from(header.length) != size {
        anyhow::bail!(
            "header declares {} bytes but file has {}",
            header.length,
            size
        );
    }

    file.rewind()?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{glb, ColoredMesh};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("text3d-export-{}", Uuid::new_v4()))
    }

    fn sample_glb(color: [u8; 3]) -> Vec<u8> {
        let mesh = ColoredMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
            vec![color; 3],
        )
        .unwrap();
        glb::encode(&mesh).unwrap()
    }

    #[test]
    fn spaces_become_underscores() {
        assert_eq!(output_file_name("a red chair"), "a_red_chair_model.glb");
        assert_eq!(output_file_name("tab\tand\nnewline"), "tab_and_newline_model.glb");
    }

    #[test]
    fn separators_cannot_escape_output_dir() {
        assert_eq!(output_file_name("../etc/passwd"), "_._etc_passwd_model.glb");
        assert_eq!(output_file_name("a\\b:c"), "a_b_c_model.glb");
        assert_eq!(output_file_name(".hidden"), "_hidden_model.glb");
    }

    #[test]
    fn long_prompts_are_truncated_on_char_boundary() {
        let name = output_file_name(&"é".repeat(300));
        assert!(name.len() <= MAX_STEM_BYTES + OUTPUT_SUFFIX.len());
        assert!(name.ends_with(OUTPUT_SUFFIX));
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    #[tokio::test]
    async fn export_returns_written_file() {
        let dir = scratch_dir();
        let exporter = MeshExporter::new(&dir).await.unwrap();
        let bytes = sample_glb([10, 20, 30]);

        let mut exported = exporter.export("a red chair", bytes.clone()).await.unwrap();
        assert_eq!(exported.path, dir.join("a_red_chair_model.glb"));
        assert_eq!(exported.file_name, "a_red_chair_model.glb");
        assert_eq!(exported.size, bytes.len() as u64);

        let mut read_back = Vec::new();
        exported.file.read_to_end(&mut read_back).await.unwrap();
        assert_eq!(read_back, bytes);
        assert_eq!(std::fs::read(&exported.path).unwrap(), bytes);
        assert!(temp_files(&dir).is_empty());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn overwritten_export_still_streams_its_own_bytes() {
        let dir = scratch_dir();
        let exporter = MeshExporter::new(&dir).await.unwrap();
        let red = sample_glb([255, 0, 0]);
        let blue = sample_glb([0, 0, 255]);

        let mut first = exporter.export("lamp", red.clone()).await.unwrap();
        let mut second = exporter.export("lamp", blue.clone()).await.unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(std::fs::read(&second.path).unwrap(), blue);

        let mut first_bytes = Vec::new();
        first.file.read_to_end(&mut first_bytes).await.unwrap();
        assert_eq!(first_bytes, red);
        let mut second_bytes = Vec::new();
        second.file.read_to_end(&mut second_bytes).await.unwrap();
        assert_eq!(second_bytes, blue);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn corrupt_bytes_never_replace_the_target() {
        let dir = scratch_dir();
        let exporter = MeshExporter::new(&dir).await.unwrap();
        let good = sample_glb([1, 2, 3]);
        exporter.export("broken", good.clone()).await.unwrap();

        let corrupt = exporter.export("broken", b"not a glb file".to_vec()).await;
        assert!(matches!(corrupt, Err(AppError::ExportFailed(_))));

        let mut truncated = good.clone();
        truncated.truncate(truncated.len() - 4);
        let truncated = exporter.export("broken", truncated).await;
        assert!(matches!(truncated, Err(AppError::ExportFailed(_))));

        assert_eq!(std::fs::read(dir.join("broken_model.glb")).unwrap(), good);
        assert!(temp_files(&dir).is_empty());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn dropped_export_leaves_no_temp_file() {
        let dir = scratch_dir();
        let exporter = MeshExporter::new(&dir).await.unwrap();
        let bytes = sample_glb([9, 9, 9]);

        for _ in 0..20 {
            let _ = tokio::time::timeout(Duration::ZERO, exporter.export("leak test", bytes.clone()))
                .await;
        }

        // The detached writes finish on their own; wait for them to settle.
        let target = dir.join("leak_test_model.glb");
        for _ in 0..100 {
            if target.exists() && temp_files(&dir).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(temp_files(&dir).is_empty(), "left behind: {:?}", temp_files(&dir));
        assert_eq!(std::fs::read(&target).unwrap(), bytes);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let dir = std::env::temp_dir().join(format!("text3d-export-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let tmp_path = dir.join(".chair_model.glb.tmp");

        let result = write_and_persist(
            TempFile::new(tmp_path.clone()),
            &dir.join("chair_model.glb"),
            b"glTF but not really",
        );
        assert!(result.is_err());
        assert!(!tmp_path.exists());
        assert!(!dir.join("chair_model.glb").exists());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn export_into_missing_directory_fails_cleanly() {
        let dir = scratch_dir();
        let exporter = MeshExporter::new(&dir).await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let result = exporter.export("chair", sample_glb([1, 1, 1])).await;
        assert!(matches!(result, Err(AppError::ExportFailed(_))));
    }
}
