//! Linux observer backed by `nusb` enumeration and hotplug.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use futures_lite::stream;
use nusb::hotplug::HotplugEvent;
use nusb::{DeviceId, DeviceInfo};

use super::{ChannelFeed, DeviceEvent, DeviceFilter, DeviceHandle, DeviceObserver, EventFeed, InterfaceClass};
use crate::error::{UpdaterError, UpdaterResult};

const CDC_ACM_DRIVER: &str = "cdc_acm";

/// Feeds fed by the shared hotplug thread.
#[derive(Debug, Default)]
struct Subscribers {
    senders: Vec<mpsc::Sender<DeviceEvent>>,
    running: bool,
}

impl Subscribers {
    /// Deliver `event` to every live feed, forgetting dropped ones.
    fn broadcast(&mut self, event: &DeviceEvent) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn shutdown(&mut self) {
        self.running = false;
        self.senders.clear();
    }
}

/// Observer over the running kernel's USB device tree.
///
/// One hotplug thread is started on the first `watch` and shared by every
/// feed after it.
#[derive(Debug, Default)]
pub struct UsbObserver {
    hotplug: Arc<Mutex<Subscribers>>,
}

impl UsbObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceObserver for UsbObserver {
    fn list(&self, filter: &DeviceFilter) -> UpdaterResult<Vec<DeviceHandle>> {
        let devices = nusb::list_devices()?
            .map(|info| device_handle(&info))
            .filter(|device| filter.matches(device))
            .collect();
        Ok(devices)
    }

    fn watch(&self, filter: &DeviceFilter) -> UpdaterResult<Box<dyn EventFeed>> {
        let (events_tx, events_rx) = mpsc::channel();

        let mut hotplug = self
            .hotplug
            .lock()
            .map_err(|_| UpdaterError::EventFeedClosed)?;
        if !hotplug.running {
            spawn_hotplug(Arc::clone(&self.hotplug))?;
            hotplug.running = true;
        }
        hotplug.senders.push(events_tx);

        Ok(Box::new(ChannelFeed::new(events_rx, filter.clone())))
    }
}

/// Start the hotplug thread and wait until it is subscribed to the kernel.
fn spawn_hotplug(subscribers: Arc<Mutex<Subscribers>>) -> UpdaterResult<()> {
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);

    thread::Builder::new()
        .name("usb-hotplug".into())
        .spawn(move || {
            let watch = match nusb::watch_devices() {
                Ok(watch) => {
                    let _ = ready_tx.send(Ok(()));
                    watch
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Disconnect events only carry the opaque id.
            let mut paths: HashMap<DeviceId, String> = HashMap::new();
            if let Ok(devices) = nusb::list_devices() {
                for info in devices {
                    paths.insert(info.id(), physical_path(&info));
                }
            }

            for event in stream::block_on(Box::pin(watch)) {
                let event = match event {
                    HotplugEvent::Connected(info) => {
                        let device = device_handle(&info);
                        paths.insert(info.id(), device.physical_path.clone());
                        DeviceEvent::bind(device)
                    }
                    HotplugEvent::Disconnected(id) => match paths.remove(&id) {
                        Some(path) => DeviceEvent::unbind(&path),
                        None => continue,
                    },
                };
                log::debug!("USB {:?} {}", event.action, event.physical_path);
                match subscribers.lock() {
                    Ok(mut subscribers) => subscribers.broadcast(&event),
                    Err(_) => return,
                }
            }

            log::warn!("USB hotplug stream ended");
            if let Ok(mut subscribers) = subscribers.lock() {
                subscribers.shutdown();
            }
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(UpdaterError::Io(e)),
        Err(_) => Err(UpdaterError::EventFeedClosed),
    }
}

fn physical_path(info: &DeviceInfo) -> String {
    info.sysfs_path()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn device_handle(info: &DeviceInfo) -> DeviceHandle {
    DeviceHandle {
        physical_path: physical_path(info),
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        device_version: info.device_version(),
        serial: info.serial_number().map(str::to_string),
        interfaces: info
            .interfaces()
            .map(|i| InterfaceClass {
                number: i.interface_number(),
                class: i.class(),
                subclass: i.subclass(),
            })
            .collect(),
        device_nodes: acm_nodes(info.sysfs_path()),
    }
}

/// `/dev/tty*` nodes of interfaces bound to `cdc_acm`, sorted.
///
/// Interface directories are named `<device>:<config>.<interface>`.
fn acm_nodes(sysfs_path: &Path) -> Vec<PathBuf> {
    let Some(device_name) = sysfs_path.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };
    let prefix = format!("{}:", device_name);
    let Ok(entries) = fs::read_dir(sysfs_path) else {
        return Vec::new();
    };

    let mut nodes: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .filter(|interface| bound_driver(interface).as_deref() == Some(CDC_ACM_DRIVER))
        .flat_map(|interface| tty_names(&interface))
        .map(|tty| Path::new("/dev").join(tty))
        .collect();
    nodes.sort();
    nodes
}

fn bound_driver(interface: &Path) -> Option<String> {
    let target = fs::read_link(interface.join("driver")).ok()?;
    Some(target.file_name()?.to_string_lossy().into_owned())
}

fn tty_names(interface: &Path) -> Vec<String> {
    fs::read_dir(interface.join("tty"))
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn test_acm_nodes_from_sysfs_layout() {
        let root = tempdir().unwrap();
        let device = root.path().join("1-2.3");
        let drivers = root.path().join("drivers");
        fs::create_dir_all(drivers.join("cdc_acm")).unwrap();
        fs::create_dir_all(drivers.join("usbhid")).unwrap();

        let acm = device.join("1-2.3:1.0");
        fs::create_dir_all(acm.join("tty/ttyACM1")).unwrap();
        symlink(drivers.join("cdc_acm"), acm.join("driver")).unwrap();

        let hid = device.join("1-2.3:1.2");
        fs::create_dir_all(hid.join("tty/ttyS9")).unwrap();
        symlink(drivers.join("usbhid"), hid.join("driver")).unwrap();

        fs::create_dir_all(device.join("power")).unwrap();

        assert_eq!(acm_nodes(&device), vec![PathBuf::from("/dev/ttyACM1")]);
    }

    #[test]
    fn test_broadcast_forgets_dropped_feeds() {
        let mut subscribers = Subscribers::default();
        let (kept_tx, kept_rx) = mpsc::channel();
        let (dropped_tx, dropped_rx) = mpsc::channel();
        subscribers.senders.push(kept_tx);
        subscribers.senders.push(dropped_tx);
        drop(dropped_rx);

        subscribers.broadcast(&DeviceEvent::unbind("1-2.3"));

        assert_eq!(subscribers.senders.len(), 1);
        assert_eq!(kept_rx.try_recv().unwrap(), DeviceEvent::unbind("1-2.3"));
    }

    #[test]
    fn test_shutdown_closes_feeds() {
        let mut subscribers = Subscribers::default();
        let (tx, rx) = mpsc::channel::<DeviceEvent>();
        subscribers.senders.push(tx);
        subscribers.running = true;

        subscribers.shutdown();

        assert!(!subscribers.running);
        assert!(matches!(rx.try_recv(), Err(mpsc::TryRecvError::Disconnected)));
    }

    #[test]
    fn test_acm_nodes_missing_dir() {
        assert!(acm_nodes(Path::new("/nonexistent/1-9")).is_empty());
    }
}
