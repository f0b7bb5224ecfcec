use std::collections::VecDeque;
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;

use crate::error::UpdaterResult;
use crate::observer::{
    ChannelFeed, DeviceAction, DeviceEvent, DeviceFilter, DeviceHandle, DeviceObserver, EventFeed,
};

/// Observer over a fixed device table whose feeds replay scripted events.
///
/// Each `watch` call takes the next scripted batch. The batch is applied to
/// the device table immediately, so a `list` after the watch sees the
/// post-rebind state. Senders are kept alive so an exhausted feed times out
/// instead of closing.
#[derive(Default)]
pub struct FakeObserver {
    devices: Mutex<Vec<DeviceHandle>>,
    scripts: Mutex<VecDeque<Vec<DeviceEvent>>>,
    senders: Mutex<Vec<Sender<DeviceEvent>>>,
    watch_count: Mutex<usize>,
}

impl FakeObserver {
    pub fn new(devices: Vec<DeviceHandle>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Self::default()
        }
    }

    /// Queue the events the next `watch` call will deliver.
    pub fn script(self, events: Vec<DeviceEvent>) -> Self {
        self.scripts.lock().unwrap().push_back(events);
        self
    }

    pub fn watch_count(&self) -> usize {
        *self.watch_count.lock().unwrap()
    }

    fn apply(&self, event: &DeviceEvent) {
        let mut devices = self.devices.lock().unwrap();
        devices.retain(|d| d.physical_path != event.physical_path);
        if let (DeviceAction::Bind, Some(device)) = (event.action, &event.device) {
            devices.push(device.clone());
        }
    }
}

impl DeviceObserver for FakeObserver {
    fn list(&self, filter: &DeviceFilter) -> UpdaterResult<Vec<DeviceHandle>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    fn watch(&self, filter: &DeviceFilter) -> UpdaterResult<Box<dyn EventFeed>> {
        *self.watch_count.lock().unwrap() += 1;
        let events = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

        let (tx, rx) = mpsc::channel();
        for event in events {
            self.apply(&event);
            tx.send(event).unwrap();
        }
        self.senders.lock().unwrap().push(tx);
        Ok(Box::new(ChannelFeed::new(rx, filter.clone())))
    }
}
