use std::path::{Path, PathBuf};

use super::{run_checked, DfuFlasher, DfuTarget, ListFilter};
use crate::config::{ToolPaths, UsbId};
use crate::error::UpdaterResult;
use crate::traits::CommandExecutor;

/// `dfu-util` / `dfu-suffix` wrapper.
pub struct DfuUtil {
    executor: Box<dyn CommandExecutor>,
    dfu_util: PathBuf,
    dfu_suffix: PathBuf,
}

impl DfuUtil {
    pub fn new(executor: Box<dyn CommandExecutor>, tools: &ToolPaths) -> Self {
        Self {
            executor,
            dfu_util: tools.dfu_util.clone(),
            dfu_suffix: tools.dfu_suffix.clone(),
        }
    }

    /// `--alt N --device vid:pid --path P`, shared by every targeted command.
    fn target_args(target: &DfuTarget) -> Vec<String> {
        vec![
            "--alt".to_string(),
            target.alt_setting.to_string(),
            "--device".to_string(),
            target.usb_id.to_string(),
            "--path".to_string(),
            target.physical_path.clone(),
        ]
    }
}

impl DfuFlasher for DfuUtil {
    fn list_interfaces(&self, filter: &ListFilter) -> UpdaterResult<String> {
        let mut args = vec!["--list".to_string()];
        if let Some(path) = &filter.physical_path {
            args.extend(["--path".to_string(), path.clone()]);
        }
        if let Some(usb_id) = filter.usb_id {
            args.extend(["--device".to_string(), usb_id.to_string()]);
        }

        log::info!("Gathering DFU interfaces");
        let output = run_checked(self.executor.as_ref(), &self.dfu_util, args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn download(&self, target: &DfuTarget, file: &Path) -> UpdaterResult<()> {
        let mut args = Self::target_args(target);
        args.extend(["--download".to_string(), file.to_string_lossy().into_owned()]);

        log::info!(
            "Downloading {} to {} alt {}",
            file.display(),
            target.physical_path,
            target.alt_setting
        );
        run_checked(self.executor.as_ref(), &self.dfu_util, args)?;
        Ok(())
    }

    fn upload(&self, target: &DfuTarget, file: &Path, size: Option<u32>) -> UpdaterResult<()> {
        let mut args = Self::target_args(target);
        args.extend(["--upload".to_string(), file.to_string_lossy().into_owned()]);
        if let Some(size) = size {
            args.extend(["--upload-size".to_string(), size.to_string()]);
        }

        log::info!(
            "Uploading {} alt {} to {}",
            target.physical_path,
            target.alt_setting,
            file.display()
        );
        run_checked(self.executor.as_ref(), &self.dfu_util, args)?;
        Ok(())
    }

    fn detach(&self, target: &DfuTarget) -> UpdaterResult<()> {
        // Not `--reset`, which only applies after a download or upload.
        let mut args = Self::target_args(target);
        args.push("--detach".to_string());

        log::info!(
            "Detaching {} alt {}",
            target.physical_path,
            target.alt_setting
        );
        run_checked(self.executor.as_ref(), &self.dfu_util, args)?;
        Ok(())
    }

    fn add_suffix(&self, usb_id: UsbId, file: &Path) -> UpdaterResult<()> {
        let args = vec![
            "--vid".to_string(),
            format!("{:04x}", usb_id.vendor_id),
            "--pid".to_string(),
            format!("{:04x}", usb_id.product_id),
            "--add".to_string(),
            file.to_string_lossy().into_owned(),
        ];
        run_checked(self.executor.as_ref(), &self.dfu_suffix, args)?;
        Ok(())
    }
}
