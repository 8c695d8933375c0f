use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use tokio::fs as async_fs;

use crate::agent::AgentError;

/// Screenshot captured after a step, answering the planner's `call_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    pub call_id: String,
    pub png: Vec<u8>,
}

pub fn encode_png_base64(png: &[u8]) -> String {
    B64.encode(png)
}

pub fn encode_png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", encode_png_base64(png))
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, run_id: &str, iteration: usize, observation: &Observation) -> Result<(), AgentError>;
}

pub struct DiskSnapshotStore {
    base_dir: PathBuf,
}

impl DiskSnapshotStore {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self { base_dir: base.as_ref().to_path_buf() }
    }

    pub fn path_for(&self, run_id: &str, iteration: usize) -> PathBuf {
        self.base_dir.join(run_id).join(format!("step_{:03}.png", iteration))
    }
}

#[async_trait]
impl SnapshotStore for DiskSnapshotStore {
    async fn save(&self, run_id: &str, iteration: usize, observation: &Observation) -> Result<(), AgentError> {
        let dir = self.base_dir.join(run_id);
        async_fs::create_dir_all(&dir)
            .await
            .map_err(|e| AgentError::Snapshot(format!("create_dir: {}", e)))?;
        async_fs::write(self.path_for(run_id, iteration), &observation.png)
            .await
            .map_err(|e| AgentError::Snapshot(format!("write: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_wraps_base64() {
        let png = vec![0x89, b'P', b'N', b'G'];
        let b64 = encode_png_base64(&png);
        assert_eq!(B64.decode(&b64).expect("decode"), png);
        assert_eq!(encode_png_data_url(&png), format!("data:image/png;base64,{b64}"));
    }

    #[tokio::test]
    async fn disk_store_writes_numbered_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DiskSnapshotStore::new(dir.path());
        let obs = Observation { call_id: "call_1".into(), png: vec![1, 2, 3] };
        store.save("run_a", 4, &obs).await.expect("save");

        let written = tokio::fs::read(dir.path().join("run_a").join("step_004.png")).await.expect("read");
        assert_eq!(written, vec![1, 2, 3]);
    }
}
