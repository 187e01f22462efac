//! LVM-backed `BlockStorageDriver`.
//!
//! Shells out to `lvcreate`/`lvremove`/`lvs` for volume management and
//! `qemu-img convert`/`dd` for populate, per `spec.md` §9: argument arrays
//! only (never a shell string), captured stdout/stderr, non-zero exit turned
//! into [`BlockStorageError::ToolFailed`]. The `sync()`-before-`finalize()`
//! discipline mirrors the teacher's `storage::StorageWriter`.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use super::{BlockStorageDriver, VolumeInfo};
use crate::cancel::CancelToken;
use crate::error::BlockStorageError;
use crate::job::ImageFormat;
use crate::objectstore::ProgressTick;
use crate::retry::{run_with_retry, RetryOutcome, RetryPolicy};

pub struct LvmBlockStorageDriver {
    volume_group: String,
    populate_retry: RetryPolicy,
}

impl LvmBlockStorageDriver {
    /// Construct a driver owning `volume_group`. The group name is validated
    /// once, here, per `spec.md` §4.5.
    pub fn new(volume_group: String, populate_retry: RetryPolicy) -> Result<Self, BlockStorageError> {
        validate_name(&volume_group)?;
        Ok(Self { volume_group, populate_retry })
    }

    fn device_path(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("/dev/{}/{}", self.volume_group, name))
    }

    fn volume_ref(&self, name: &str) -> String {
        format!("{}/{}", self.volume_group, name)
    }

    async fn populate_once(
        &self,
        image_path: &Path,
        name: &str,
        format: ImageFormat,
        progress: ProgressTick<'_>,
    ) -> Result<(), BlockStorageError> {
        let device = self.device_path(name);
        let output = match format {
            ImageFormat::Compressed => {
                run_command(
                    "qemu-img",
                    &[
                        "convert".to_string(),
                        "-f".to_string(),
                        "qcow2".to_string(),
                        "-O".to_string(),
                        "raw".to_string(),
                        image_path.display().to_string(),
                        device.display().to_string(),
                    ],
                )
                .await?
            }
            ImageFormat::Raw => {
                let out = run_command(
                    "dd",
                    &[
                        format!("if={}", image_path.display()),
                        format!("of={}", device.display()),
                        "bs=4M".to_string(),
                        "conv=fsync".to_string(),
                    ],
                )
                .await?;
                out
            }
        };
        check_exit(&output, "qemu-img/dd")?;
        progress(1, 1);
        Ok(())
    }
}

#[async_trait]
impl BlockStorageDriver for LvmBlockStorageDriver {
    async fn create(&self, name: &str, size_gib: i64) -> Result<(), BlockStorageError> {
        validate_name(name)?;
        if self.exists(name).await? {
            return Err(BlockStorageError::AlreadyExists(name.to_string()));
        }
        let output = run_command(
            "lvcreate",
            &[
                "-L".to_string(),
                format!("{size_gib}G"),
                "-n".to_string(),
                name.to_string(),
                self.volume_group.clone(),
            ],
        )
        .await?;
        check_exit(&output, "lvcreate")
    }

    async fn populate(
        &self,
        image_path: &Path,
        name: &str,
        format: ImageFormat,
        cancel: &CancelToken,
        progress: ProgressTick<'_>,
    ) -> Result<(), BlockStorageError> {
        validate_name(name)?;
        run_with_retry(&self.populate_retry, cancel, is_retryable, || {
            self.populate_once(image_path, name, format, progress)
        })
        .await
        .map_err(retry_outcome_into_error)
    }

    async fn delete(&self, name: &str) -> Result<(), BlockStorageError> {
        validate_name(name)?;
        if !self.exists(name).await? {
            return Ok(());
        }
        let output = run_command("lvremove", &["-f".to_string(), self.volume_ref(name)]).await?;
        check_exit(&output, "lvremove")
    }

    async fn exists(&self, name: &str) -> Result<bool, BlockStorageError> {
        validate_name(name)?;
        let output = run_command("lvs", &[self.volume_ref(name)]).await?;
        Ok(output.status.success())
    }

    async fn info(&self, name: &str) -> Result<VolumeInfo, BlockStorageError> {
        validate_name(name)?;
        let output = run_command(
            "lvs",
            &[
                "--noheadings".to_string(),
                "--units".to_string(),
                "b".to_string(),
                "-o".to_string(),
                "lv_size,lv_attr".to_string(),
                self.volume_ref(name),
            ],
        )
        .await?;
        if !output.status.success() {
            return Err(BlockStorageError::NotFound(name.to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut fields = stdout.split_whitespace();
        let size_field = fields.next().unwrap_or("0B");
        let attrs = fields.next().unwrap_or("").to_string();
        let size_bytes = size_field.trim_end_matches('B').parse::<u64>().unwrap_or(0);
        Ok(VolumeInfo {
            name: name.to_string(),
            size_bytes,
            attributes: attrs,
        })
    }

    async fn list(&self) -> Result<Vec<String>, BlockStorageError> {
        let output = run_command(
            "lvs",
            &["--noheadings".to_string(), "-o".to_string(), "lv_name".to_string(), self.volume_group.clone()],
        )
        .await?;
        check_exit(&output, "lvs")?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }
}

/// Host identifiers only: ASCII alphanumeric, `-`, `_`. No separators, no
/// control characters, no `.` (rules out `..`).
fn validate_name(name: &str) -> Result<(), BlockStorageError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(BlockStorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

async fn run_command(tool: &str, args: &[String]) -> Result<Output, BlockStorageError> {
    Command::new(tool).args(args).output().await.map_err(BlockStorageError::Io)
}

fn check_exit(output: &Output, tool: &str) -> Result<(), BlockStorageError> {
    if output.status.success() {
        return Ok(());
    }
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Err(BlockStorageError::ToolFailed {
        tool: tool.to_string(),
        status: output.status.code().unwrap_or(-1),
        output: combined,
    })
}

fn is_retryable(err: &BlockStorageError) -> bool {
    matches!(err, BlockStorageError::ToolFailed { .. } | BlockStorageError::Io(_))
}

fn retry_outcome_into_error(outcome: RetryOutcome<BlockStorageError>) -> BlockStorageError {
    match outcome {
        RetryOutcome::Exhausted { source, .. } => source,
        RetryOutcome::Cancelled => BlockStorageError::ToolFailed {
            tool: "populate".to_string(),
            status: -1,
            output: "cancelled".to_string(),
        },
    }
}
