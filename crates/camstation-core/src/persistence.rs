// ── Device record store seam ──
//
// A flat, last-write-wins record store for devices and cameras. The core
// reads it at startup and writes through on add/remove.

use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{Camera, CameraId, Device, DeviceId};

/// Everything persisted about the device catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRecords {
    pub devices: Vec<Device>,
    pub cameras: Vec<Camera>,
}

#[async_trait]
pub trait DeviceRepository: Send + Sync + 'static {
    async fn load(&self) -> Result<DeviceRecords, CoreError>;

    async fn save_device(&self, device: &Device) -> Result<(), CoreError>;

    /// Remove a device and every camera that belongs to it.
    async fn remove_device(&self, id: &DeviceId) -> Result<(), CoreError>;

    async fn save_camera(&self, camera: &Camera) -> Result<(), CoreError>;

    async fn remove_camera(&self, id: &CameraId) -> Result<(), CoreError>;
}

/// Volatile repository, for tests and embedders without storage.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<DeviceRecords>,
}

impl MemoryRepository {
    pub fn new(records: DeviceRecords) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut DeviceRecords) -> T) -> T {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[async_trait]
impl DeviceRepository for MemoryRepository {
    async fn load(&self) -> Result<DeviceRecords, CoreError> {
        Ok(self.with(|r| r.clone()))
    }

    async fn save_device(&self, device: &Device) -> Result<(), CoreError> {
        self.with(|r| {
            r.devices.retain(|d| d.id != device.id);
            r.devices.push(device.clone());
        });
        Ok(())
    }

    async fn remove_device(&self, id: &DeviceId) -> Result<(), CoreError> {
        self.with(|r| {
            r.devices.retain(|d| &d.id != id);
            r.cameras.retain(|c| &c.device != id);
        });
        Ok(())
    }

    async fn save_camera(&self, camera: &Camera) -> Result<(), CoreError> {
        self.with(|r| {
            r.cameras.retain(|c| c.id != camera.id);
            r.cameras.push(camera.clone());
        });
        Ok(())
    }

    async fn remove_camera(&self, id: &CameraId) -> Result<(), CoreError> {
        self.with(|r| r.cameras.retain(|c| &c.id != id));
        Ok(())
    }
}
