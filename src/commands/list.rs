//! List command implementation

use mcu_updater::error::UpdaterResult;
use mcu_updater::resolver::DfuFilter;

use super::Session;

/// Resolve one DFU device and print its alt-settings
pub fn run_list(session: &Session, filter: &DfuFilter, json: bool) -> UpdaterResult<()> {
    let device = session.resolver().resolve_dfu(filter)?;
    let interfaces = device.expect_dfu()?;

    if json {
        println!("{}", serde_json::to_string_pretty(interfaces)?);
        return Ok(());
    }

    println!("DFU device {} [{}]", device.physical_path, device.usb_id);
    for interface in interfaces {
        println!();
        println!("{}", interface);
    }
    Ok(())
}
