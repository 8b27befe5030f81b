// ── Device & camera catalog ──
//
// Reactive registry of what the station knows about. Lookups are
// lock-free so the stream manager can resolve cameras without I/O.

mod collection;

use std::sync::Arc;

use collection::Collection;

use crate::error::CoreError;
use crate::model::{Camera, CameraId, Device, DeviceId, DeviceIdentity};
use crate::persistence::DeviceRecords;
use crate::stream::CatalogSubscription;

/// Devices and cameras, each in its own reactive collection.
pub struct Catalog {
    devices: Collection<DeviceId, Device>,
    cameras: Collection<CameraId, Camera>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            devices: Collection::new(),
            cameras: Collection::new(),
        }
    }

    // ── Devices ──────────────────────────────────────────────────

    /// Insert or replace a device. Returns `true` if it was new.
    pub fn upsert_device(&self, device: Device) -> bool {
        self.devices.upsert(device.id.clone(), device)
    }

    /// Remove a device and its cameras. Returns the removed cameras.
    pub fn remove_device(&self, id: &DeviceId) -> Option<(Arc<Device>, Vec<Arc<Camera>>)> {
        let device = self.devices.remove(id)?;
        let cameras: Vec<Arc<Camera>> = self
            .cameras_for(id)
            .into_iter()
            .filter_map(|c| self.cameras.remove(&c.id))
            .collect();
        Some((device, cameras))
    }

    pub fn device(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    pub fn device_by_identity(&self, identity: &DeviceIdentity) -> Option<Arc<Device>> {
        self.devices
            .snapshot()
            .iter()
            .find(|d| &d.identity == identity)
            .cloned()
    }

    pub fn devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn subscribe_devices(&self) -> CatalogSubscription<Device> {
        CatalogSubscription::new(self.devices.subscribe())
    }

    // ── Cameras ──────────────────────────────────────────────────

    /// Insert or replace a camera. Its device must already be known.
    pub fn upsert_camera(&self, camera: Camera) -> Result<bool, CoreError> {
        if !self.devices.contains(&camera.device) {
            return Err(CoreError::UnknownDevice(camera.device));
        }
        Ok(self.cameras.upsert(camera.id.clone(), camera))
    }

    pub fn remove_camera(&self, id: &CameraId) -> Option<Arc<Camera>> {
        self.cameras.remove(id)
    }

    pub fn camera(&self, id: &CameraId) -> Option<Arc<Camera>> {
        self.cameras.get(id)
    }

    pub fn cameras(&self) -> Arc<Vec<Arc<Camera>>> {
        self.cameras.snapshot()
    }

    pub fn cameras_for(&self, device: &DeviceId) -> Vec<Arc<Camera>> {
        self.cameras
            .snapshot()
            .iter()
            .filter(|c| &c.device == device)
            .cloned()
            .collect()
    }

    pub fn subscribe_cameras(&self) -> CatalogSubscription<Camera> {
        CatalogSubscription::new(self.cameras.subscribe())
    }

    /// Look up a camera together with its device.
    pub fn resolve(&self, id: &CameraId) -> Result<(Arc<Camera>, Arc<Device>), CoreError> {
        let camera = self
            .camera(id)
            .ok_or_else(|| CoreError::UnknownCamera(id.clone()))?;
        let device = self
            .device(&camera.device)
            .ok_or_else(|| CoreError::UnknownDevice(camera.device.clone()))?;
        Ok((camera, device))
    }

    // ── Bulk load ────────────────────────────────────────────────

    /// Replace the catalog with a persisted record set.
    ///
    /// Cameras whose device is missing are skipped.
    pub fn load(&self, records: DeviceRecords) -> usize {
        let DeviceRecords { devices, cameras } = records;
        self.devices
            .upsert_and_prune(devices.into_iter().map(|d| (d.id.clone(), d)).collect());

        let mut skipped = 0;
        let cameras: Vec<(CameraId, Camera)> = cameras
            .into_iter()
            .filter(|c| {
                let known = self.devices.contains(&c.device);
                if !known {
                    tracing::warn!(camera = %c.id, device = %c.device, "camera references unknown device; skipped");
                    skipped += 1;
                }
                known
            })
            .map(|c| (c.id.clone(), c))
            .collect();
        self.cameras.upsert_and_prune(cameras);
        skipped
    }

    /// Current contents as persistable records.
    pub fn records(&self) -> DeviceRecords {
        DeviceRecords {
            devices: self.devices().iter().map(|d| (**d).clone()).collect(),
            cameras: self.cameras().iter().map(|c| (**c).clone()).collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{CredentialsRef, StreamProfile, Transport};
    use camstation_api::DeviceProtocol;

    fn device(id: &str) -> Device {
        Device {
            id: DeviceId::from(id),
            name: id.to_uppercase(),
            identity: DeviceIdentity {
                host: format!("{id}.local"),
                port: 80,
                transport: Transport::Http,
                protocol: DeviceProtocol::Isapi,
                credentials: CredentialsRef::from(id),
            },
            rtsp_port: 554,
        }
    }

    fn camera(id: &str, device: &str, channel: u32) -> Camera {
        Camera {
            id: CameraId::from(id),
            device: DeviceId::from(device),
            channel,
            name: id.into(),
            preferred_profile: StreamProfile::Sub,
            main_path: None,
            sub_path: None,
        }
    }

    #[test]
    fn camera_requires_known_device() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.upsert_camera(camera("c1", "nvr", 1)),
            Err(CoreError::UnknownDevice(_))
        ));
        catalog.upsert_device(device("nvr"));
        assert!(catalog.upsert_camera(camera("c1", "nvr", 1)).unwrap());
    }

    #[test]
    fn removing_device_removes_its_cameras() {
        let catalog = Catalog::new();
        catalog.upsert_device(device("nvr"));
        catalog.upsert_device(device("cam"));
        catalog.upsert_camera(camera("c1", "nvr", 1)).unwrap();
        catalog.upsert_camera(camera("c2", "nvr", 2)).unwrap();
        catalog.upsert_camera(camera("c3", "cam", 1)).unwrap();

        let (_, removed) = catalog.remove_device(&DeviceId::from("nvr")).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(catalog.cameras().len(), 1);
        assert!(catalog.resolve(&CameraId::from("c1")).is_err());
    }

    #[test]
    fn load_prunes_and_skips_orphans() {
        let catalog = Catalog::new();
        catalog.upsert_device(device("old"));

        let skipped = catalog.load(DeviceRecords {
            devices: vec![device("nvr")],
            cameras: vec![camera("c1", "nvr", 1), camera("orphan", "gone", 1)],
        });

        assert_eq!(skipped, 1);
        assert!(catalog.device(&DeviceId::from("old")).is_none());
        let (cam, dev) = catalog.resolve(&CameraId::from("c1")).unwrap();
        assert_eq!(cam.channel, 1);
        assert_eq!(dev.id.as_str(), "nvr");
        assert_eq!(catalog.records().cameras.len(), 1);
    }

    #[test]
    fn lookup_by_identity() {
        let catalog = Catalog::new();
        let nvr = device("nvr");
        catalog.upsert_device(nvr.clone());
        assert_eq!(catalog.device_by_identity(&nvr.identity).unwrap().id, nvr.id);
    }
}
