//! Per-device update state machine.
//!
//! 1. CheckBootloader - compare the DFU bcdDevice with the bootloader target
//! 2. On mismatch: switch to SAM-BA, flash the bootloader, wait for DFU again
//! 3. CheckBle - compare the radio revision (only with a radio target)
//! 4. CheckMcu - flash the MCU image, or detach alt 0 to boot the firmware
//!
//! Comparisons are exact: an older target is flashed like a newer one.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{Config, UsbId, BLE_ALT_SETTING, MCU_ALT_SETTING};
use crate::error::{UpdaterError, UpdaterResult};
use crate::flasher::{DfuFlasher, SambaFlasher, SambaOptions};
use crate::metadata::{image_digest, FirmwareImage, TargetRevisions};
use crate::mode_switch::ModeSwitch;
use crate::observer::DeviceObserver;
use crate::records::{parse_programmer_info, ProgrammerInfo};
use crate::resolver::{DfuFilter, ResolvedDevice, Resolver};

/// Step of the update sequence an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    CheckBootloader,
    SwitchToSamba,
    AwaitSamba,
    FlashBootloader,
    AwaitDfu,
    CheckBle,
    FlashBle,
    AwaitBle,
    CheckMcu,
    FlashMcu,
    ResetToFirmware,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CheckBootloader => "check bootloader",
            Stage::SwitchToSamba => "switch to SAM-BA",
            Stage::AwaitSamba => "await SAM-BA rebind",
            Stage::FlashBootloader => "flash bootloader",
            Stage::AwaitDfu => "await DFU rebind",
            Stage::CheckBle => "check BLE",
            Stage::FlashBle => "flash BLE",
            Stage::AwaitBle => "await BLE rebind",
            Stage::CheckMcu => "check MCU",
            Stage::FlashMcu => "flash MCU",
            Stage::ResetToFirmware => "reset to firmware",
        };
        f.write_str(name)
    }
}

/// Firmware component reconciled by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Component {
    Bootloader,
    Ble,
    Mcu,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Bootloader => "Bootloader",
            Component::Ble => "BLE",
            Component::Mcu => "MCU",
        })
    }
}

/// Progress events for callers that report the update as it runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", content = "data")]
pub enum UpdateStage {
    /// Device resolved in DFU mode.
    Resolved { physical_path: String, usb_id: UsbId },
    /// On-device revision already equals the target.
    RevisionMatches { component: Component, revision: u32 },
    /// On-device revision differs from the target.
    RevisionMismatch {
        component: Component,
        current: Option<u32>,
        target: u32,
    },
    SwitchingToSamba,
    WaitingForRebind { personality: &'static str },
    /// SAM-BA programmer details read before flashing.
    Programmer { info: ProgrammerInfo },
    Flashing {
        component: Component,
        image: PathBuf,
        sha256: String,
    },
    ResettingToFirmware,
    Complete,
}

impl UpdateStage {
    /// Get a human-readable message for this stage.
    pub fn message(&self) -> String {
        match self {
            UpdateStage::Resolved {
                physical_path,
                usb_id,
            } => format!("Found DFU device {} [{}]", physical_path, usb_id),
            UpdateStage::RevisionMatches {
                component,
                revision,
            } => format!("{} revision {}: OK!", component, revision),
            UpdateStage::RevisionMismatch {
                component,
                current: Some(current),
                target,
            } => format!("{} revision {} doesn't match {}", component, current, target),
            UpdateStage::RevisionMismatch {
                component, target, ..
            } => format!("{} revision unknown, target {}", component, target),
            UpdateStage::SwitchingToSamba => "Switching to SAM-BA for bootloader update...".into(),
            UpdateStage::WaitingForRebind { personality } => {
                format!("Waiting for device to return in {} mode...", personality)
            }
            UpdateStage::Programmer { info } => match &info.device_name {
                Some(name) => format!("SAM-BA programmer: {}", name),
                None => "SAM-BA programmer ready".into(),
            },
            UpdateStage::Flashing {
                component, image, ..
            } => format!("Flashing {} firmware {}...", component, image.display()),
            UpdateStage::ResettingToFirmware => {
                "Booting to firmware as no actions are necessary".into()
            }
            UpdateStage::Complete => "Update complete!".into(),
        }
    }
}

/// What happened to one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome")]
pub enum StageOutcome {
    AlreadyCurrent { revision: u32 },
    Flashed { from: Option<u32>, to: u32 },
    /// No target was given.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReport {
    pub component: Component,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// Result of reconciling one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub physical_path: String,
    /// Identifiers of the device as last resolved.
    pub usb_id: UsbId,
    pub components: Vec<ComponentReport>,
}

impl UpdateReport {
    pub fn outcome(&self, component: Component) -> Option<StageOutcome> {
        self.components
            .iter()
            .find(|c| c.component == component)
            .map(|c| c.outcome)
    }

    pub fn flashed_any(&self) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c.outcome, StageOutcome::Flashed { .. }))
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.physical_path, self.usb_id)?;
        for report in &self.components {
            match report.outcome {
                StageOutcome::AlreadyCurrent { revision } => {
                    write!(f, "\n  {}: revision {} already matches", report.component, revision)?
                }
                StageOutcome::Flashed { from: Some(from), to } => {
                    write!(f, "\n  {}: flashed {} -> {}", report.component, from, to)?
                }
                StageOutcome::Flashed { from: None, to } => {
                    write!(f, "\n  {}: flashed -> {}", report.component, to)?
                }
                StageOutcome::Skipped => write!(f, "\n  {}: skipped", report.component)?,
            }
        }
        Ok(())
    }
}

/// Firmware images an update run reconciles a device to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub bootloader: FirmwareImage,
    pub mcu: FirmwareImage,
    pub ble: Option<FirmwareImage>,
}

impl UpdatePlan {
    /// Read target revisions from the build metadata beside each image.
    pub fn locate(bootloader: &Path, mcu: &Path, ble: Option<&Path>) -> UpdaterResult<Self> {
        Ok(Self {
            bootloader: FirmwareImage::locate(bootloader)?,
            mcu: FirmwareImage::locate(mcu)?,
            ble: ble.map(FirmwareImage::locate).transpose()?,
        })
    }

    pub fn targets(&self) -> TargetRevisions {
        TargetRevisions {
            bootloader: self.bootloader.revision,
            mcu: self.mcu.revision,
            ble: self.ble.as_ref().map(|image| image.revision),
        }
    }
}

/// Drives one device through the update sequence.
pub struct Updater<'a> {
    dfu: &'a dyn DfuFlasher,
    samba: &'a dyn SambaFlasher,
    observer: &'a dyn DeviceObserver,
    config: &'a Config,
}

impl<'a> Updater<'a> {
    pub fn new(
        dfu: &'a dyn DfuFlasher,
        samba: &'a dyn SambaFlasher,
        observer: &'a dyn DeviceObserver,
        config: &'a Config,
    ) -> Self {
        Self {
            dfu,
            samba,
            observer,
            config,
        }
    }

    fn mode_switch(&self) -> ModeSwitch<'a> {
        ModeSwitch::new(self.dfu, self.observer, self.config)
    }

    /// Reconcile the device at `physical_path` to `plan`.
    ///
    /// Any failure aborts the sequence and is tagged with the path and stage.
    pub fn run<F>(&self, physical_path: &str, plan: &UpdatePlan, on_progress: F) -> UpdaterResult<UpdateReport>
    where
        F: Fn(UpdateStage),
    {
        let at = move |stage: Stage| move |e: UpdaterError| e.in_stage(physical_path, stage);
        let mut components = Vec::with_capacity(3);

        let device = Resolver::new(self.dfu, self.observer, self.config)
            .resolve_dfu(&DfuFilter::path(physical_path))
            .map_err(at(Stage::CheckBootloader))?;
        on_progress(UpdateStage::Resolved {
            physical_path: device.physical_path.clone(),
            usb_id: device.usb_id,
        });

        let (device, outcome) = self.reconcile_bootloader(device, &plan.bootloader, &on_progress)?;
        components.push(ComponentReport {
            component: Component::Bootloader,
            outcome,
        });

        let (device, outcome) = match &plan.ble {
            Some(image) => self.reconcile_ble(device, image, &on_progress)?,
            None => (device, StageOutcome::Skipped),
        };
        components.push(ComponentReport {
            component: Component::Ble,
            outcome,
        });

        let outcome = self.reconcile_mcu(&device, &plan.mcu, &on_progress)?;
        components.push(ComponentReport {
            component: Component::Mcu,
            outcome,
        });

        on_progress(UpdateStage::Complete);
        Ok(UpdateReport {
            physical_path: device.physical_path,
            usb_id: device.usb_id,
            components,
        })
    }

    fn reconcile_bootloader<F>(
        &self,
        device: ResolvedDevice,
        image: &FirmwareImage,
        on_progress: &F,
    ) -> UpdaterResult<(ResolvedDevice, StageOutcome)>
    where
        F: Fn(UpdateStage),
    {
        let current = u32::from(
            device
                .interface(MCU_ALT_SETTING)
                .map_err(|e| e.in_stage(&device.physical_path, Stage::CheckBootloader))?
                .firmware_version,
        );
        if current == image.revision {
            log::info!("Bootloader revision {}: OK!", current);
            on_progress(UpdateStage::RevisionMatches {
                component: Component::Bootloader,
                revision: current,
            });
            return Ok((device, StageOutcome::AlreadyCurrent { revision: current }));
        }

        log::warn!(
            "Running revision {} doesn't match {}, switching to SAM-BA for bootloader update",
            current,
            image.revision
        );
        on_progress(UpdateStage::RevisionMismatch {
            component: Component::Bootloader,
            current: Some(current),
            target: image.revision,
        });

        let device = self.flash_bootloader(device, &image.path, &image.sha256, on_progress)?;
        Ok((
            device,
            StageOutcome::Flashed {
                from: Some(current),
                to: image.revision,
            },
        ))
    }

    /// Resolve the DFU device at `physical_path` and reflash its bootloader
    /// regardless of revision.
    pub fn reflash_bootloader<F>(
        &self,
        physical_path: &str,
        image: &Path,
        on_progress: F,
    ) -> UpdaterResult<ResolvedDevice>
    where
        F: Fn(UpdateStage),
    {
        let at = move |stage: Stage| move |e: UpdaterError| e.in_stage(physical_path, stage);
        let sha256 = image_digest(image).map_err(at(Stage::FlashBootloader))?;
        let device = Resolver::new(self.dfu, self.observer, self.config)
            .resolve_dfu(&DfuFilter::path(physical_path))
            .map_err(at(Stage::CheckBootloader))?;
        let device = self.flash_bootloader(device, image, &sha256, &on_progress)?;
        on_progress(UpdateStage::Complete);
        Ok(device)
    }

    /// DFU -> SAM-BA, write the bootloader with lock bracketing, and wait for
    /// the device to come back in DFU mode with possibly new identifiers.
    fn flash_bootloader<F>(
        &self,
        device: ResolvedDevice,
        image: &Path,
        sha256: &str,
        on_progress: &F,
    ) -> UpdaterResult<ResolvedDevice>
    where
        F: Fn(UpdateStage),
    {
        let path = device.physical_path.clone();
        let at = |stage: Stage| {
            let path = path.clone();
            move |e: UpdaterError| e.in_stage(&path, stage)
        };
        let switch = self.mode_switch();
        let timeout = self.config.rebind_timeout();

        on_progress(UpdateStage::SwitchingToSamba);
        let watch = switch.watch_rebind(&path).map_err(at(Stage::SwitchToSamba))?;
        switch
            .switch_to_samba(&device)
            .map_err(at(Stage::SwitchToSamba))?;

        on_progress(UpdateStage::WaitingForRebind {
            personality: "SAM-BA",
        });
        let samba = switch
            .await_reenumeration(watch, timeout)
            .map_err(at(Stage::AwaitSamba))?;
        let port = samba
            .samba_port()
            .map_err(at(Stage::AwaitSamba))?
            .to_path_buf();

        let info = parse_programmer_info(&self.samba.info(&port).map_err(at(Stage::FlashBootloader))?);
        log::info!("{}", info);
        on_progress(UpdateStage::Programmer { info });

        on_progress(UpdateStage::Flashing {
            component: Component::Bootloader,
            image: image.to_path_buf(),
            sha256: sha256.to_string(),
        });
        let watch = switch.watch_rebind(&path).map_err(at(Stage::FlashBootloader))?;
        self.samba
            .run(
                &port,
                &SambaOptions::bootloader(image, &self.config.bootloader_regions),
            )
            .map_err(at(Stage::FlashBootloader))?;

        on_progress(UpdateStage::WaitingForRebind { personality: "DFU" });
        let device = switch
            .await_reenumeration(watch, timeout)
            .map_err(at(Stage::AwaitDfu))?;
        device.expect_dfu().map_err(at(Stage::AwaitDfu))?;
        Ok(device)
    }

    fn reconcile_ble<F>(
        &self,
        device: ResolvedDevice,
        image: &FirmwareImage,
        on_progress: &F,
    ) -> UpdaterResult<(ResolvedDevice, StageOutcome)>
    where
        F: Fn(UpdateStage),
    {
        let path = device.physical_path.clone();
        let at = |stage: Stage| {
            let path = path.clone();
            move |e: UpdaterError| e.in_stage(&path, stage)
        };

        let current = device
            .interface(BLE_ALT_SETTING)
            .map_err(at(Stage::CheckBle))?
            .serial
            .ble_revision;
        if current == Some(image.revision) {
            log::info!("BLE revision {}: OK!", image.revision);
            on_progress(UpdateStage::RevisionMatches {
                component: Component::Ble,
                revision: image.revision,
            });
            return Ok((
                device,
                StageOutcome::AlreadyCurrent {
                    revision: image.revision,
                },
            ));
        }

        log::warn!(
            "BLE revision {:?} doesn't match {}, flashing BLE firmware",
            current,
            image.revision
        );
        on_progress(UpdateStage::RevisionMismatch {
            component: Component::Ble,
            current,
            target: image.revision,
        });

        let switch = self.mode_switch();
        let watch = switch.watch_rebind(&path).map_err(at(Stage::FlashBle))?;
        on_progress(UpdateStage::Flashing {
            component: Component::Ble,
            image: image.path.clone(),
            sha256: image.sha256.clone(),
        });
        self.dfu
            .download(&device.dfu_target(BLE_ALT_SETTING), &image.path)
            .map_err(at(Stage::FlashBle))?;

        on_progress(UpdateStage::WaitingForRebind { personality: "DFU" });
        let device = switch
            .await_reenumeration(watch, self.config.rebind_timeout())
            .map_err(at(Stage::AwaitBle))?;
        device.expect_dfu().map_err(at(Stage::AwaitBle))?;

        Ok((
            device,
            StageOutcome::Flashed {
                from: current,
                to: image.revision,
            },
        ))
    }

    fn reconcile_mcu<F>(
        &self,
        device: &ResolvedDevice,
        image: &FirmwareImage,
        on_progress: &F,
    ) -> UpdaterResult<StageOutcome>
    where
        F: Fn(UpdateStage),
    {
        let path = device.physical_path.as_str();
        let at = move |stage: Stage| move |e: UpdaterError| e.in_stage(path, stage);
        let target = device.dfu_target(MCU_ALT_SETTING);

        let current = device
            .interface(MCU_ALT_SETTING)
            .map_err(at(Stage::CheckMcu))?
            .serial
            .mcu_revision;
        if current == Some(image.revision) {
            log::info!("MCU revision {}: OK!", image.revision);
            on_progress(UpdateStage::RevisionMatches {
                component: Component::Mcu,
                revision: image.revision,
            });

            log::info!("Booting to firmware as no actions are necessary");
            on_progress(UpdateStage::ResettingToFirmware);
            self.dfu
                .detach(&target)
                .map_err(at(Stage::ResetToFirmware))?;
            return Ok(StageOutcome::AlreadyCurrent {
                revision: image.revision,
            });
        }

        log::warn!(
            "MCU revision {:?} doesn't match {}, flashing MCU firmware",
            current,
            image.revision
        );
        on_progress(UpdateStage::RevisionMismatch {
            component: Component::Mcu,
            current,
            target: image.revision,
        });
        on_progress(UpdateStage::Flashing {
            component: Component::Mcu,
            image: image.path.clone(),
            sha256: image.sha256.clone(),
        });
        self.dfu
            .download(&target, &image.path)
            .map_err(at(Stage::FlashMcu))?;

        Ok(StageOutcome::Flashed {
            from: current,
            to: image.revision,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mockall::Sequence;

    use super::*;
    use crate::flasher::{MockDfuFlasher, MockSambaFlasher};
    use crate::observer::DeviceEvent;
    use crate::test_helpers::fixtures::{dfu_list_output, DeviceHandleBuilder, InterfaceInfoBuilder};
    use crate::test_helpers::observer::FakeObserver;

    const PATH: &str = "1-2.3";

    const SAMBA_INFO: &str = "Device       : ATSAM4S8\n\
                              Version      : v1.1 Dec 15 2010 19:25:04\n\
                              Address      : 0x400000\n\
                              Pages        : 1024\n\
                              Page Size    : 512 bytes\n\
                              Total Size   : 512KB\n\
                              Planes       : 1\n\
                              Lock Regions : 64\n\
                              Locked       : 0,1,2\n\
                              Security     : false\n\
                              Boot Flash   : true\n";

    fn image(name: &str, revision: u32) -> FirmwareImage {
        FirmwareImage {
            path: PathBuf::from(format!("/firmware/{}", name)),
            revision,
            sha256: "0".repeat(64),
        }
    }

    fn plan(bootloader: u32, mcu: u32, ble: Option<u32>) -> UpdatePlan {
        UpdatePlan {
            bootloader: image("bootloader.bin", bootloader),
            mcu: image("kiibohd.dfu.bin", mcu),
            ble: ble.map(|revision| image("ble.bin", revision)),
        }
    }

    fn listing(version: u16, mcu: u32, ble: Option<u32>) -> String {
        let mut interfaces = vec![InterfaceInfoBuilder::new(PATH).version(version).revisions(mcu, ble)];
        if ble.is_some() {
            interfaces.push(
                InterfaceInfoBuilder::new(PATH)
                    .version(version)
                    .revisions(mcu, ble)
                    .alt(1)
                    .name("Kiibohd Bootloader - BLE"),
            );
        }
        dfu_list_output(&interfaces)
    }

    #[test]
    fn test_everything_current_only_resets() {
        let mut dfu = MockDfuFlasher::new();
        let output = listing(0x04E3, 0x0501, Some(0x0102));
        dfu.expect_list_interfaces()
            .times(1)
            .returning(move |_| Ok(output.clone()));
        dfu.expect_detach()
            .withf(|target| target.alt_setting == 0 && target.physical_path == PATH)
            .times(1)
            .returning(|_| Ok(()));
        let samba = MockSambaFlasher::new();
        let observer = FakeObserver::default();
        let config = Config::default();

        let stages = Mutex::new(Vec::new());
        let report = Updater::new(&dfu, &samba, &observer, &config)
            .run(PATH, &plan(0x04E3, 0x0501, Some(0x0102)), |stage| {
                stages.lock().unwrap().push(stage.message())
            })
            .unwrap();

        assert!(!report.flashed_any());
        assert_eq!(
            report.outcome(Component::Bootloader),
            Some(StageOutcome::AlreadyCurrent { revision: 0x04E3 })
        );
        assert_eq!(
            report.outcome(Component::Ble),
            Some(StageOutcome::AlreadyCurrent { revision: 0x0102 })
        );
        assert_eq!(observer.watch_count(), 0);

        let stages = stages.into_inner().unwrap();
        assert!(stages.contains(&"Booting to firmware as no actions are necessary".to_string()));
        assert_eq!(stages.last().map(String::as_str), Some("Update complete!"));
    }

    #[test]
    fn test_bootloader_mismatch_goes_through_samba() {
        let mut dfu = MockDfuFlasher::new();
        let mut samba = MockSambaFlasher::new();
        let mut seq = Sequence::new();

        let before = listing(1200, 0x0501, None);
        dfu.expect_list_interfaces()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(before.clone()));
        dfu.expect_add_suffix()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        dfu.expect_download()
            .withf(|target, _| target.alt_setting == 0)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        samba
            .expect_info()
            .withf(|port| port == Path::new("/dev/ttyACM0"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(SAMBA_INFO.to_string()));
        samba
            .expect_run()
            .withf(|port, options| {
                port == Path::new("/dev/ttyACM0")
                    && options.file.as_deref() == Some(Path::new("/firmware/bootloader.bin"))
                    && options.unlock_regions == vec![0, 1, 2]
                    && options.lock_regions == vec![0, 1, 2]
                    && options.boot_flash
                    && options.write
                    && options.verify
                    && options.reset
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let after = listing(1400, 0x0501, None);
        dfu.expect_list_interfaces()
            .withf(|filter| filter.physical_path.as_deref() == Some(PATH))
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(after.clone()));
        dfu.expect_detach()
            .withf(|target| target.alt_setting == 0)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let observer = FakeObserver::new(vec![DeviceHandleBuilder::dfu(PATH).build()])
            .script(vec![
                DeviceEvent::unbind(PATH),
                DeviceEvent::bind(DeviceHandleBuilder::samba(PATH, "/dev/ttyACM0").build()),
            ])
            .script(vec![
                DeviceEvent::unbind(PATH),
                DeviceEvent::bind(DeviceHandleBuilder::dfu(PATH).build()),
            ]);
        let config = Config {
            min_switch_revision: 1000,
            rebind_timeout_ms: 500,
            ..Config::default()
        };

        let report = Updater::new(&dfu, &samba, &observer, &config)
            .run(PATH, &plan(1400, 0x0501, None), |_| {})
            .unwrap();

        assert_eq!(
            report.outcome(Component::Bootloader),
            Some(StageOutcome::Flashed {
                from: Some(1200),
                to: 1400
            })
        );
        assert_eq!(report.outcome(Component::Ble), Some(StageOutcome::Skipped));
        assert_eq!(
            report.outcome(Component::Mcu),
            Some(StageOutcome::AlreadyCurrent { revision: 0x0501 })
        );
        assert_eq!(observer.watch_count(), 2);
    }

    #[test]
    fn test_ble_mismatch_flashes_alt_one() {
        let mut dfu = MockDfuFlasher::new();
        let mut seq = Sequence::new();

        let before = listing(0x04E3, 0x0501, Some(0x0101));
        dfu.expect_list_interfaces()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(before.clone()));
        dfu.expect_download()
            .withf(|target, file| target.alt_setting == 1 && file == Path::new("/firmware/ble.bin"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let after = listing(0x04E3, 0x0501, Some(0x0102));
        dfu.expect_list_interfaces()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(after.clone()));
        dfu.expect_detach()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let samba = MockSambaFlasher::new();
        let observer = FakeObserver::default()
            .script(vec![DeviceEvent::bind(DeviceHandleBuilder::dfu(PATH).build())]);
        let config = Config::default();

        let report = Updater::new(&dfu, &samba, &observer, &config)
            .run(PATH, &plan(0x04E3, 0x0501, Some(0x0102)), |_| {})
            .unwrap();

        assert_eq!(
            report.outcome(Component::Ble),
            Some(StageOutcome::Flashed {
                from: Some(0x0101),
                to: 0x0102
            })
        );
    }

    #[test]
    fn test_mcu_mismatch_downloads_without_reset() {
        let mut dfu = MockDfuFlasher::new();
        let output = listing(0x04E3, 0x0400, None);
        dfu.expect_list_interfaces()
            .returning(move |_| Ok(output.clone()));
        dfu.expect_download()
            .withf(|target, file| {
                target.alt_setting == 0 && file == Path::new("/firmware/kiibohd.dfu.bin")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        dfu.expect_detach().never();
        let samba = MockSambaFlasher::new();
        let observer = FakeObserver::default();
        let config = Config::default();

        // An older target is still flashed.
        let report = Updater::new(&dfu, &samba, &observer, &config)
            .run(PATH, &plan(0x04E3, 0x0300, None), |_| {})
            .unwrap();

        assert_eq!(
            report.outcome(Component::Mcu),
            Some(StageOutcome::Flashed {
                from: Some(0x0400),
                to: 0x0300
            })
        );
    }

    #[test]
    fn test_missing_ble_alt_is_reported() {
        let mut dfu = MockDfuFlasher::new();
        let output = listing(0x04E3, 0x0501, None);
        dfu.expect_list_interfaces()
            .returning(move |_| Ok(output.clone()));
        let samba = MockSambaFlasher::new();
        let observer = FakeObserver::default();
        let config = Config::default();

        let err = Updater::new(&dfu, &samba, &observer, &config)
            .run(PATH, &plan(0x04E3, 0x0501, Some(0x0102)), |_| {})
            .unwrap_err();

        match err {
            UpdaterError::Stage { stage, source, .. } => {
                assert_eq!(stage, Stage::CheckBle);
                assert!(matches!(*source, UpdaterError::MissingAltSetting { alt: 1, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lost_device_times_out_with_stage() {
        let mut dfu = MockDfuFlasher::new();
        let output = listing(0x04E3, 0x0501, None);
        dfu.expect_list_interfaces()
            .returning(move |_| Ok(output.clone()));
        dfu.expect_add_suffix().returning(|_, _| Ok(()));
        dfu.expect_download().returning(|_, _| Ok(()));
        let samba = MockSambaFlasher::new();
        let observer = FakeObserver::default();
        let config = Config {
            rebind_timeout_ms: 50,
            ..Config::default()
        };

        let err = Updater::new(&dfu, &samba, &observer, &config)
            .run(PATH, &plan(1400, 0x0501, None), |_| {})
            .unwrap_err();

        assert_eq!(err.error_code(), "UPD-031");
        match &err {
            UpdaterError::Stage {
                physical_path,
                stage,
                ..
            } => {
                assert_eq!(physical_path, PATH);
                assert_eq!(*stage, Stage::AwaitSamba);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tool_failure_aborts_sequence() {
        let mut dfu = MockDfuFlasher::new();
        let output = listing(0x04E3, 0x0400, None);
        dfu.expect_list_interfaces()
            .returning(move |_| Ok(output.clone()));
        dfu.expect_download().returning(|_, _| {
            Err(UpdaterError::ToolInvocationFailed {
                tool: "dfu-util".into(),
                args: vec![],
                code: Some(74),
                stderr: String::new(),
            })
        });
        let samba = MockSambaFlasher::new();
        let observer = FakeObserver::default();
        let config = Config::default();

        let err = Updater::new(&dfu, &samba, &observer, &config)
            .run(PATH, &plan(0x04E3, 0x0501, None), |_| {})
            .unwrap_err();

        assert!(err.to_string().starts_with("1-2.3 [flash MCU]"));
    }

    #[test]
    fn test_reflash_ignores_revision() {
        let mut dfu = MockDfuFlasher::new();
        let output = listing(0x04E3, 0x0501, None);
        dfu.expect_list_interfaces()
            .returning(move |_| Ok(output.clone()));
        dfu.expect_add_suffix().times(1).returning(|_, _| Ok(()));
        dfu.expect_download().times(1).returning(|_, _| Ok(()));
        let mut samba = MockSambaFlasher::new();
        samba.expect_info().returning(|_| Ok(SAMBA_INFO.to_string()));
        samba.expect_run().times(1).returning(|_, _| Ok(()));
        let observer = FakeObserver::default()
            .script(vec![DeviceEvent::bind(
                DeviceHandleBuilder::samba(PATH, "/dev/ttyACM2").build(),
            )])
            .script(vec![DeviceEvent::bind(DeviceHandleBuilder::dfu(PATH).build())]);
        let config = Config::default();

        let ctx = crate::test_helpers::temp::TestContext::new();
        let file = ctx.create_file_bytes("bootloader.bin", &[0xA5; 32]);

        let device = Updater::new(&dfu, &samba, &observer, &config)
            .reflash_bootloader(PATH, &file, |_| {})
            .unwrap();
        assert_eq!(device.physical_path, PATH);
        assert!(device.expect_dfu().is_ok());
    }

    #[test]
    fn test_plan_from_metadata() {
        let ctx = crate::test_helpers::temp::TestContext::new();
        let bootloader = ctx.create_build("bootloader", "bootloader.bin", "BCD_VERSION", "1400");
        let mcu = ctx.create_build("mcu", "kiibohd.dfu.bin", "CLI_RevisionNumber", "1301");

        let plan = UpdatePlan::locate(&bootloader, &mcu, None).unwrap();
        assert_eq!(
            plan.targets(),
            TargetRevisions {
                bootloader: 1400,
                mcu: 1301,
                ble: None
            }
        );
    }
}
