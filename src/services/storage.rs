// Copyright (c) 2025 Rajan Panneer Selvam
//
// Licensed under the Business Source License 1.1 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.mariadb.com/bsl11
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::errors::AppError;
use crate::models::directive::BlockStorageDirective;
use crate::services::validation;

/// Object-storage access the core consumes. Implementations move bytes;
/// the storage child owns bundle parsing and validation. Concrete cloud
/// SDK implementations live outside this crate.
#[async_trait]
pub trait StorageFunctions: Send + Sync {
    /// Download the bundle stored under `{bucket}/tests/{test_id}/` into
    /// `dest`, preserving relative paths.
    async fn fetch(&self, test_id: Uuid, bucket: &str, dest: &Path) -> Result<(), AppError>;

    /// Upload every file under `evidence_dir` to
    /// `{bucket}/tests/{test_id}/evidence/`, preserving relative paths.
    async fn store(&self, test_id: Uuid, bucket: &str, evidence_dir: &Path)
        -> Result<(), AppError>;
}

/// A fetched bundle: the parsed directive plus the process-local
/// filesystem view backing it. The staging directory lives as long as the
/// bundle value does.
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub directive: BlockStorageDirective,
    staging: Arc<TempDir>,
}

impl LoadedBundle {
    pub fn path(&self) -> &Path {
        self.staging.path()
    }

    pub fn evidence_dir(&self) -> PathBuf {
        self.staging.path().join(&self.directive.evidence_dir)
    }
}

/// Storage child: one per engine. Loads the bundle, parses and validates
/// the embedded directive file, writes evidence back.
pub struct StorageChild {
    functions: Arc<dyn StorageFunctions>,
}

impl StorageChild {
    pub fn new(functions: Arc<dyn StorageFunctions>) -> Self {
        Self { functions }
    }

    pub async fn load(&self, test_id: Uuid, bucket: &str) -> Result<LoadedBundle, AppError> {
        let staging = tempfile::tempdir()
            .map_err(|e| AppError::Storage(format!("Failed to stage bundle: {}", e)))?;
        self.functions
            .fetch(test_id, bucket, staging.path())
            .await?;

        let directive = parse_bundle_directive(staging.path(), bucket)?;
        validation::ensure_valid_topic_directives(&directive.topic_directives)?;

        info!(
            test_id = %test_id,
            bucket = bucket,
            topics = directive.topic_directives.len(),
            "Loaded test bundle"
        );
        Ok(LoadedBundle {
            directive,
            staging: Arc::new(staging),
        })
    }

    pub async fn store_evidence(
        &self,
        test_id: Uuid,
        bucket: &str,
        evidence_dir: &Path,
    ) -> Result<(), AppError> {
        if !evidence_dir.is_dir() {
            return Err(AppError::Storage(format!(
                "Evidence directory {} does not exist",
                evidence_dir.display()
            )));
        }
        self.functions.store(test_id, bucket, evidence_dir).await?;
        info!(test_id = %test_id, bucket = bucket, "Uploaded evidence");
        Ok(())
    }
}

/// The directive file is `test-config.yaml`, `test-config.yml` or
/// `test-config.json` at the bundle root.
fn parse_bundle_directive(dir: &Path, bucket: &str) -> Result<BlockStorageDirective, AppError> {
    for name in ["test-config.yaml", "test-config.yml"] {
        let candidate = dir.join(name);
        if candidate.is_file() {
            let raw = std::fs::read_to_string(&candidate)
                .map_err(|e| AppError::Storage(format!("Failed to read {}: {}", name, e)))?;
            return Ok(serde_yaml::from_str(&raw)?);
        }
    }
    let candidate = dir.join("test-config.json");
    if candidate.is_file() {
        let raw = std::fs::read_to_string(&candidate)
            .map_err(|e| AppError::Storage(format!("Failed to read test-config.json: {}", e)))?;
        return serde_json::from_str(&raw)
            .map_err(|e| AppError::Validation(format!("Malformed test-config.json: {}", e)));
    }
    Err(AppError::Storage(format!(
        "Bundle in bucket '{}' has no test-config.(yaml|json)",
        bucket
    )))
}

/// Local-filesystem object store: objects live under
/// `{root}/{bucket}/tests/{test-id}/...`. Used for local runs and tests;
/// production deployments inject a cloud-backed implementation.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn test_prefix(&self, test_id: Uuid, bucket: &str) -> PathBuf {
        self.root.join(bucket).join("tests").join(test_id.to_string())
    }
}

#[async_trait]
impl StorageFunctions for FsStorage {
    async fn fetch(&self, test_id: Uuid, bucket: &str, dest: &Path) -> Result<(), AppError> {
        let prefix = self.test_prefix(test_id, bucket);
        if !prefix.is_dir() {
            return Err(AppError::Storage(format!(
                "No bundle at {}",
                prefix.display()
            )));
        }
        for entry in WalkDir::new(&prefix) {
            let entry = entry.map_err(|e| AppError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&prefix)
                .map_err(|e| AppError::Storage(e.to_string()))?;
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Storage(e.to_string()))?;
            }
            std::fs::copy(entry.path(), &target)
                .map_err(|e| AppError::Storage(e.to_string()))?;
            debug!(object = %relative.display(), "Fetched bundle object");
        }
        Ok(())
    }

    async fn store(
        &self,
        test_id: Uuid,
        bucket: &str,
        evidence_dir: &Path,
    ) -> Result<(), AppError> {
        let prefix = self.test_prefix(test_id, bucket).join("evidence");
        for entry in WalkDir::new(evidence_dir) {
            let entry = entry.map_err(|e| AppError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(evidence_dir)
                .map_err(|e| AppError::Storage(e.to_string()))?;
            let target = prefix.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Storage(e.to_string()))?;
            }
            std::fs::copy(entry.path(), &target)
                .map_err(|e| AppError::Storage(e.to_string()))?;
            debug!(object = %relative.display(), "Stored evidence object");
        }
        Ok(())
    }
}
