//! SAM-BA info command implementation

use mcu_updater::error::UpdaterResult;
use mcu_updater::flasher::SambaFlasher;
use mcu_updater::records::parse_programmer_info;

use super::Session;

/// Resolve a SAM-BA port and print what bossac reports about the chip
pub fn run_samba_info(session: &Session, physical_path: Option<&str>, json: bool) -> UpdaterResult<()> {
    let device = session.resolver().resolve_samba(physical_path)?;
    let port = device.samba_port()?;
    let info = parse_programmer_info(&session.samba().info(port)?);

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("SAM-BA device {} on {}", device.physical_path, port.display());
        println!("{}", info);
    }
    Ok(())
}
