use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    allocation::{BudgetAllocation, ExportedNode},
    store::{
        error::{StoreError, io_error, not_found, serialization_error, version_mismatch},
        ports::{AllocationStore, CampaignStore, ExportSink},
    },
    valuation::CampaignDefinition,
};

const PERSISTENCE_VERSION: u64 = 1;

const CAMPAIGNS_DIR: &str = "campaigns";
const ALLOCATIONS_DIR: &str = "allocations";
const EXPORTS_DIR: &str = "exports";

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDocument<T> {
    version: u64,
    data: T,
}

/// Versioned JSON documents under one state directory, one file per
/// campaign and kind. Writes go through a synced temp file and a rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    state_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn document_path(&self, kind: &str, campaign_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !campaign_id.is_empty()
            && !campaign_id.starts_with('.')
            && campaign_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(io_error(format!(
                "campaign id '{campaign_id}' cannot be used as a file name"
            )));
        }
        Ok(self.state_dir.join(kind).join(format!("{campaign_id}.json")))
    }

    pub async fn put_campaign(&self, campaign: &CampaignDefinition) -> Result<(), StoreError> {
        let path = self.document_path(CAMPAIGNS_DIR, &campaign.campaign_id)?;
        write_document(path, campaign).await
    }

    pub async fn load_exports(&self, campaign_id: &str) -> Result<Vec<ExportedNode>, StoreError> {
        let path = self.document_path(EXPORTS_DIR, campaign_id)?;
        read_document(path).await
    }
}

#[async_trait]
impl CampaignStore for JsonFileStore {
    async fn load_campaign(&self, campaign_id: &str) -> Result<CampaignDefinition, StoreError> {
        let path = self.document_path(CAMPAIGNS_DIR, campaign_id)?;
        read_document(path).await
    }
}

#[async_trait]
impl AllocationStore for JsonFileStore {
    async fn load_allocation(&self, campaign_id: &str) -> Result<BudgetAllocation, StoreError> {
        let path = self.document_path(ALLOCATIONS_DIR, campaign_id)?;
        read_document(path).await
    }

    async fn save_allocation(&self, allocation: &BudgetAllocation) -> Result<(), StoreError> {
        let path = self.document_path(ALLOCATIONS_DIR, &allocation.campaign_id)?;
        write_document(path, allocation).await
    }
}

#[async_trait]
impl ExportSink for JsonFileStore {
    async fn forward_exports(
        &self,
        campaign_id: &str,
        exports: Vec<ExportedNode>,
    ) -> Result<(), StoreError> {
        let path = self.document_path(EXPORTS_DIR, campaign_id)?;
        write_document(path, &exports).await
    }
}

async fn read_document<T>(path: PathBuf) -> Result<T, StoreError>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::task::spawn_blocking(move || read_document_blocking(&path))
        .await
        .map_err(|err| io_error(format!("document read task failed: {err}")))?
}

async fn write_document<T>(path: PathBuf, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let document = PersistedDocument {
        version: PERSISTENCE_VERSION,
        data: value,
    };
    let mut content = serde_json::to_vec_pretty(&document).map_err(|err| {
        serialization_error(format!("failed to serialize '{}': {err}", path.display()))
    })?;
    content.push(b'\n');

    let bytes = content.len();
    let written = path.clone();
    tokio::task::spawn_blocking(move || write_atomically(&path, &content))
        .await
        .map_err(|err| io_error(format!("document write task failed: {err}")))??;

    tracing::debug!(
        target: "store",
        path = %written.display(),
        bytes,
        "document_written"
    );
    Ok(())
}

fn read_document_blocking<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(not_found(format!("'{}' does not exist", path.display())));
        }
        Err(err) => {
            return Err(io_error(format!(
                "failed to read '{}': {err}",
                path.display()
            )));
        }
    };

    let parsed: PersistedDocument<T> = serde_json::from_str(&content).map_err(|err| {
        serialization_error(format!("failed to parse '{}': {err}", path.display()))
    })?;
    if parsed.version != PERSISTENCE_VERSION {
        return Err(version_mismatch(format!(
            "unsupported document version {} at '{}'",
            parsed.version,
            path.display()
        )));
    }
    Ok(parsed.data)
}

fn write_atomically(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| io_error(format!("'{}' has no parent directory", path.display())))?;
    fs::create_dir_all(parent).map_err(|err| {
        io_error(format!(
            "failed to create directory '{}': {err}",
            parent.display()
        ))
    })?;

    let tmp_path = path.with_extension("json.tmp");
    let file = fs::File::create(&tmp_path).map_err(|err| {
        io_error(format!(
            "failed to create temp file '{}': {err}",
            tmp_path.display()
        ))
    })?;
    {
        let mut writer = BufWriter::new(&file);
        writer.write_all(content).map_err(|err| {
            io_error(format!("failed to write '{}': {err}", tmp_path.display()))
        })?;
        writer.flush().map_err(|err| {
            io_error(format!("failed to flush '{}': {err}", tmp_path.display()))
        })?;
    }
    file.sync_all().map_err(|err| {
        io_error(format!("failed to sync '{}': {err}", tmp_path.display()))
    })?;

    fs::rename(&tmp_path, path).map_err(|err| {
        io_error(format!(
            "failed to replace '{}' from '{}': {err}",
            path.display(),
            tmp_path.display()
        ))
    })?;

    if let Ok(parent_file) = fs::File::open(parent) {
        let _ = parent_file.sync_all();
    }
    Ok(())
}
