// ── Device record store ──
//
// Devices and cameras in one TOML file. Every write rewrites the whole
// file through a temporary sibling and a rename, so a crash never leaves
// a half-written catalog behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use camstation_core::{Camera, CameraId, CoreError, Device, DeviceId, DeviceRecords, DeviceRepository};

use crate::ConfigError;

#[derive(Debug, Default, Deserialize, Serialize)]
struct RecordFile {
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    cameras: Vec<Camera>,
}

impl From<RecordFile> for DeviceRecords {
    fn from(file: RecordFile) -> Self {
        Self {
            devices: file.devices,
            cameras: file.cameras,
        }
    }
}

/// [`DeviceRepository`] backed by a TOML file. Last write wins.
#[derive(Debug, Clone)]
pub struct TomlDeviceStore {
    path: Arc<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl TomlDeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-modify-write under the store's lock, off the async runtime.
    async fn update(
        &self,
        mutate: impl FnOnce(&mut RecordFile) + Send + 'static,
    ) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let path = Arc::clone(&self.path);
        run_blocking(move || {
            let mut file = read_file(&path)?;
            mutate(&mut file);
            write_file(&path, &file)
        })
        .await
    }
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, ConfigError> + Send + 'static,
) -> Result<T, CoreError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Internal(format!("record store task failed: {e}")))?
        .map_err(|e| CoreError::Persistence {
            message: e.to_string(),
        })
}

fn read_file(path: &Path) -> Result<RecordFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(body) => toml::from_str(&body).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RecordFile::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_file(path: &Path, file: &RecordFile) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(file)?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    debug!(
        path = %path.display(),
        devices = file.devices.len(),
        cameras = file.cameras.len(),
        "device records written"
    );
    Ok(())
}

#[async_trait]
impl DeviceRepository for TomlDeviceStore {
    async fn load(&self) -> Result<DeviceRecords, CoreError> {
        let path = Arc::clone(&self.path);
        run_blocking(move || read_file(&path).map(DeviceRecords::from)).await
    }

    async fn save_device(&self, device: &Device) -> Result<(), CoreError> {
        let device = device.clone();
        self.update(move |f| {
            match f.devices.iter_mut().find(|d| d.id == device.id) {
                Some(existing) => *existing = device,
                None => f.devices.push(device),
            }
        })
        .await
    }

    async fn remove_device(&self, id: &DeviceId) -> Result<(), CoreError> {
        let id = id.clone();
        self.update(move |f| {
            f.devices.retain(|d| d.id != id);
            f.cameras.retain(|c| c.device != id);
        })
        .await
    }

    async fn save_camera(&self, camera: &Camera) -> Result<(), CoreError> {
        let camera = camera.clone();
        self.update(move |f| {
            match f.cameras.iter_mut().find(|c| c.id == camera.id) {
                Some(existing) => *existing = camera,
                None => f.cameras.push(camera),
            }
        })
        .await
    }

    async fn remove_camera(&self, id: &CameraId) -> Result<(), CoreError> {
        let id = id.clone();
        self.update(move |f| f.cameras.retain(|c| c.id != id)).await
    }
}
