// === DEVICE REGISTRY ===
// Ordered snapshot of every enumerable device, rebuilt wholesale on refresh.
// Readers get an Arc of the snapshot: old or new, never a partial one.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::audio::backend::SoundSource;
use crate::audio::types::{DeviceDescriptor, DeviceKind};

pub struct DeviceRegistry {
    devices: RwLock<Arc<[DeviceDescriptor]>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Re-enumerates `sources` kind by kind in [`DeviceKind::ENUMERATION_ORDER`]
    ///
    /// A source failing to enumerate contributes nothing; the refresh itself never fails.
    pub fn refresh(&self, sources: &[Box<dyn SoundSource>]) {
        let mut devices = Vec::new();

        for kind in DeviceKind::ENUMERATION_ORDER {
            for source in sources.iter().filter(|s| s.kind() == kind) {
                match source.list_devices() {
                    Ok(found) => {
                        tracing::debug!(source = source.name(), count = found.len(), "enumerated");
                        // a source only lists its own kind
                        devices.extend(found.into_iter().filter(|d| d.kind() == kind));
                    }
                    Err(e) => {
                        tracing::warn!(source = source.name(), "enumeration failed: {}", e);
                    }
                }
            }
        }

        *self.devices.write() = Arc::from(devices);
    }

    /// Devices matching `filter` (`DeviceKind::None` = all), in enumeration order
    pub fn list_devices(&self, filter: DeviceKind) -> Vec<DeviceDescriptor> {
        self.snapshot()
            .iter()
            .filter(|d| filter.matches(d.kind()))
            .cloned()
            .collect()
    }

    pub fn last_of_kind(&self, kind: DeviceKind) -> Option<DeviceDescriptor> {
        self.snapshot().iter().rev().find(|d| d.kind() == kind).cloned()
    }

    pub fn snapshot(&self) -> Arc<[DeviceDescriptor]> {
        Arc::clone(&self.devices.read())
    }
}
