//! Update command implementation

use std::path::Path;

use mcu_updater::error::UpdaterResult;
use mcu_updater::orchestrator::UpdatePlan;
use mcu_updater::resolver::DfuFilter;

use super::{print_progress, Session};

/// Update every matching DFU device. Returns how many devices failed.
pub fn run_update(
    session: &Session,
    bootloader: &Path,
    mcu: &Path,
    ble: Option<&Path>,
    filter: &DfuFilter,
) -> UpdaterResult<usize> {
    let plan = UpdatePlan::locate(bootloader, mcu, ble)?;
    let targets = plan.targets();
    log::info!(
        "Targets: bootloader {}, MCU {}, BLE {}",
        targets.bootloader,
        targets.mcu,
        targets
            .ble
            .map_or_else(|| "-".to_string(), |revision| revision.to_string())
    );

    let mut failures = 0;
    for path in session.resolver().discover_dfu(filter)? {
        println!("{}:", path);
        match session.updater().run(&path, &plan, print_progress) {
            Ok(report) => println!("{}", report),
            Err(e) => {
                log::error!("[{}] {}", e.error_code(), e);
                failures += 1;
            }
        }
    }

    if failures == 0 {
        log::info!("DONE!");
    }
    Ok(failures)
}
