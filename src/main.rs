//! mcu-updater - firmware reconciliation for Input Club keyboards
//!
//! Reads target revisions from the `buildvars.h` beside each image, finds the
//! keyboards in DFU mode and flashes only what differs. Bootloader updates go
//! through the SAM-BA ROM bootloader and back.

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Commands};
use commands::Session;
use mcu_updater::UpdaterResult;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG, when set, refines the level picked by -v
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            ExitCode::FAILURE
        }
    }
}

/// Run the selected command. `Ok(false)` means some devices failed.
fn run(cli: &Cli) -> UpdaterResult<bool> {
    let config = cli.load_config()?;
    let session = Session::open(config)?;

    match &cli.command {
        Commands::Update {
            bootloader,
            mcu,
            ble_firmware,
            select,
        } => {
            let failures = commands::run_update(
                &session,
                bootloader,
                mcu,
                ble_firmware.as_deref(),
                &select.filter(),
            )?;
            Ok(failures == 0)
        }
        Commands::List { select, json } => {
            commands::run_list(&session, &select.filter(), *json)?;
            Ok(true)
        }
        Commands::SambaInfo { path, json } => {
            commands::run_samba_info(&session, path.as_deref(), *json)?;
            Ok(true)
        }
        Commands::ReflashBootloader { file, path } => {
            commands::run_reflash_bootloader(&session, file, path.as_deref())?;
            Ok(true)
        }
        Commands::Reset { select, alt } => {
            commands::run_reset(&session, &select.filter(), *alt)?;
            Ok(true)
        }
        Commands::Upload {
            file,
            select,
            alt,
            size,
        } => {
            commands::run_upload(&session, file, &select.filter(), *alt, *size)?;
            Ok(true)
        }
    }
}
