//! Reset command implementation

use mcu_updater::error::UpdaterResult;
use mcu_updater::flasher::DfuFlasher;
use mcu_updater::resolver::DfuFilter;

use super::Session;

/// Detach an alt-setting of one DFU device
pub fn run_reset(session: &Session, filter: &DfuFilter, alt: u8) -> UpdaterResult<()> {
    let device = session.resolver().resolve_dfu(filter)?;
    device.interface(alt)?;

    session.dfu().detach(&device.dfu_target(alt))?;
    println!("Detached {} alt {}", device.physical_path, alt);
    Ok(())
}
