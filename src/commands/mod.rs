//! CLI command implementations
//!
//! Each command builds its collaborators from a [`Session`] and drives the
//! library. Commands return the library error so `main` can print its support
//! code.

mod bootloader;
mod info;
mod list;
mod reset;
mod update;
mod upload;

pub use bootloader::run_reflash_bootloader;
pub use info::run_samba_info;
pub use list::run_list;
pub use reset::run_reset;
pub use update::run_update;
pub use upload::run_upload;

use mcu_updater::config::Config;
use mcu_updater::error::UpdaterResult;
use mcu_updater::flasher::{Bossac, DfuUtil};
use mcu_updater::observer::{system_observer, DeviceObserver};
use mcu_updater::orchestrator::{UpdateStage, Updater};
use mcu_updater::resolver::Resolver;
use mcu_updater::traits::RealCommandExecutor;

/// Tool clients and observer for one invocation.
pub struct Session {
    config: Config,
    dfu: DfuUtil,
    samba: Bossac,
    observer: Box<dyn DeviceObserver>,
}

impl Session {
    pub fn open(config: Config) -> UpdaterResult<Self> {
        Ok(Self {
            dfu: DfuUtil::new(Box::new(RealCommandExecutor), &config.tools),
            samba: Bossac::new(Box::new(RealCommandExecutor), &config.tools.bossac),
            observer: system_observer()?,
            config,
        })
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.dfu, self.observer.as_ref(), &self.config)
    }

    pub fn updater(&self) -> Updater<'_> {
        Updater::new(&self.dfu, &self.samba, self.observer.as_ref(), &self.config)
    }

    pub fn dfu(&self) -> &DfuUtil {
        &self.dfu
    }

    pub fn samba(&self) -> &Bossac {
        &self.samba
    }
}

/// Progress printer for long-running commands.
pub fn print_progress(stage: UpdateStage) {
    println!("  {}", stage.message());
}
