use std::path::{Path, PathBuf};

use super::{run_checked, SambaFlasher, SambaOptions};
use crate::error::UpdaterResult;
use crate::traits::CommandExecutor;

/// `bossac` wrapper for the SAM-BA personality.
pub struct Bossac {
    executor: Box<dyn CommandExecutor>,
    bossac: PathBuf,
}

impl Bossac {
    pub fn new(executor: Box<dyn CommandExecutor>, bossac: &Path) -> Self {
        Self {
            executor,
            bossac: bossac.to_path_buf(),
        }
    }

    fn port_args(port: &Path) -> Vec<String> {
        vec!["--port".to_string(), port.to_string_lossy().into_owned()]
    }

    fn region_list(regions: &[u32]) -> String {
        regions
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Arguments for the main (post-unlock) invocation.
    fn run_args(port: &Path, options: &SambaOptions) -> Vec<String> {
        let mut args = Self::port_args(port);

        if let Some(file) = &options.file {
            args.push(file.to_string_lossy().into_owned());
        }
        let erase = options
            .erase
            .unwrap_or(options.file.is_some() && options.write);
        if erase {
            args.push("--erase".to_string());
        }
        if options.write {
            args.push("--write".to_string());
        }
        // 1 boots from flash, 0 from ROM
        args.push(format!("--boot={}", u8::from(options.boot_flash)));
        if !options.lock_regions.is_empty() {
            args.push(format!("--lock={}", Self::region_list(&options.lock_regions)));
        }
        if options.verify && options.file.is_some() {
            args.push("--verify".to_string());
        }
        if options.reset {
            args.push("--reset".to_string());
        }
        args
    }
}

impl SambaFlasher for Bossac {
    fn info(&self, port: &Path) -> UpdaterResult<String> {
        let mut args = Self::port_args(port);
        args.push("--info".to_string());

        log::info!("Retrieving bossac info from {}", port.display());
        let output = run_checked(self.executor.as_ref(), &self.bossac, args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run(&self, port: &Path, options: &SambaOptions) -> UpdaterResult<()> {
        if !options.unlock_regions.is_empty() {
            let mut args = Self::port_args(port);
            args.push(format!(
                "--unlock={}",
                Self::region_list(&options.unlock_regions)
            ));
            log::info!("Unlocking chip regions {:?}", options.unlock_regions);
            run_checked(self.executor.as_ref(), &self.bossac, args)?;
        }

        run_checked(
            self.executor.as_ref(),
            &self.bossac,
            Self::run_args(port, options),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;
    use crate::test_helpers::fixtures::tool_output;
    use crate::traits::MockCommandExecutor;

    const PORT: &str = "/dev/ttyACM0";

    #[test]
    fn test_bootloader_flash_runs_unlock_first() {
        let mut executor = MockCommandExecutor::new();
        let mut seq = Sequence::new();
        executor
            .expect_execute()
            .withf(|program, args| {
                program == "bossac" && args == &["--port", PORT, "--unlock=0,1,2"]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(tool_output(0, "")));
        executor
            .expect_execute()
            .withf(|program, args| {
                program == "bossac"
                    && args
                        == &[
                            "--port",
                            PORT,
                            "bootloader.bin",
                            "--erase",
                            "--write",
                            "--boot=1",
                            "--lock=0,1,2",
                            "--verify",
                            "--reset",
                        ]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(tool_output(0, "")));

        let bossac = Bossac::new(Box::new(executor), Path::new("bossac"));
        let options = SambaOptions::bootloader(Path::new("bootloader.bin"), &[0, 1, 2]);
        bossac.run(Path::new(PORT), &options).unwrap();
    }

    #[test]
    fn test_unlock_failure_stops_flash() {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|_, _| Ok(tool_output(1, "")));

        let bossac = Bossac::new(Box::new(executor), Path::new("bossac"));
        let options = SambaOptions::bootloader(Path::new("bootloader.bin"), &[0, 1, 2]);
        assert!(bossac.run(Path::new(PORT), &options).is_err());
    }

    #[test]
    fn test_run_args_conditional_flags() {
        let options = SambaOptions {
            reset: true,
            ..SambaOptions::default()
        };
        assert_eq!(
            Bossac::run_args(Path::new(PORT), &options),
            vec!["--port", PORT, "--boot=0", "--reset"]
        );

        // Verify needs a file; explicit erase=false wins over auto erase
        let options = SambaOptions {
            file: Some(PathBuf::from("fw.bin")),
            erase: Some(false),
            write: true,
            verify: true,
            ..SambaOptions::default()
        };
        assert_eq!(
            Bossac::run_args(Path::new(PORT), &options),
            vec!["--port", PORT, "fw.bin", "--write", "--boot=0", "--verify"]
        );

        let options = SambaOptions {
            erase: Some(true),
            verify: true,
            ..SambaOptions::default()
        };
        assert_eq!(
            Bossac::run_args(Path::new(PORT), &options),
            vec!["--port", PORT, "--erase", "--boot=0"]
        );
    }

    #[test]
    fn test_info_returns_stdout() {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_execute()
            .withf(|program, args| {
                program == "/opt/bossa/bossac" && args == &["--port", PORT, "--info"]
            })
            .returning(|_, _| Ok(tool_output(0, "Device       : ATSAM4S4B\n")));

        let bossac = Bossac::new(Box::new(executor), Path::new("/opt/bossa/bossac"));
        assert_eq!(
            bossac.info(Path::new(PORT)).unwrap(),
            "Device       : ATSAM4S4B\n"
        );
    }
}
