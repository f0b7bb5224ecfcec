//! Error types for device resolution, mode switching and update orchestration.

use std::path::PathBuf;

use thiserror::Error;

use crate::orchestrator::Stage;

/// Result type alias for updater operations.
pub type UpdaterResult<T> = Result<T, UpdaterError>;

/// Errors that can occur while identifying or updating a device.
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading or writing the configuration file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial-number string did not follow the bootloader serial grammar.
    #[error("Malformed serial '{raw}': {reason}")]
    MalformedSerial { raw: String, reason: String },

    /// A `Found DFU:` line could not be decoded.
    #[error("Malformed DFU interface line '{line}': {reason}")]
    MalformedInterfaceLine { line: String, reason: String },

    /// No device matched the resolution criteria.
    #[error("No matching device found ({criteria})")]
    NoDeviceFound { criteria: String },

    /// More than one physical device matched the resolution criteria.
    #[error("More than one device matched the criteria: {}", paths.join(", "))]
    AmbiguousDevice { paths: Vec<String> },

    /// Device cannot be switched to SAM-BA remotely.
    #[error("{vendor_id:04x}:{product_id:04x} - {name} - {serial}: {reason}")]
    UnsupportedDevice {
        vendor_id: u16,
        product_id: u16,
        name: String,
        serial: String,
        reason: String,
    },

    /// Device did not rebind within the timeout.
    #[error("Device {physical_path} did not re-enumerate within {timeout_ms}ms")]
    ReenumerationTimeout { physical_path: String, timeout_ms: u64 },

    /// External flashing tool could not be started.
    #[error("Failed to execute {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// External flashing tool exited with a failure status.
    #[error("{tool} {} failed ({}){}", args.join(" "), exit_label(*code), stderr_suffix(stderr))]
    ToolInvocationFailed {
        tool: String,
        args: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    /// Device re-enumerated with a different bootloader personality than expected.
    #[error("Device {physical_path} re-enumerated as {found}, expected {expected}")]
    UnexpectedPersonality {
        physical_path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// DFU device lacks the alt-setting a stage operates on.
    #[error("Device {physical_path} has no DFU alt-setting {alt}")]
    MissingAltSetting { physical_path: String, alt: u8 },

    /// No build metadata file next to a firmware image.
    #[error("No build metadata found next to {}", image.display())]
    MissingBuildMetadata { image: PathBuf },

    /// Build metadata file carries no recognized revision field.
    #[error("No revision field in {}", metadata.display())]
    MissingRevision { metadata: PathBuf },

    /// Hotplug event feed stopped delivering events.
    #[error("Device event feed closed")]
    EventFeedClosed,

    /// No system device observer for this platform.
    #[error("USB device observation is not supported on this platform")]
    UnsupportedPlatform,

    /// Failure inside an update stage, tagged with device identity.
    #[error("{physical_path} [{stage}]: {source}")]
    Stage {
        physical_path: String,
        stage: Stage,
        #[source]
        source: Box<UpdaterError>,
    },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl UpdaterError {
    /// Wrap this error with the device and stage it occurred in.
    pub fn in_stage(self, physical_path: &str, stage: Stage) -> Self {
        UpdaterError::Stage {
            physical_path: physical_path.to_string(),
            stage,
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping stage wrappers.
    pub fn root(&self) -> &UpdaterError {
        match self {
            UpdaterError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get a stable error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            UpdaterError::Io(_) => "UPD-001",
            UpdaterError::Json(_) => "UPD-002",
            UpdaterError::MalformedSerial { .. } => "UPD-010",
            UpdaterError::MalformedInterfaceLine { .. } => "UPD-011",
            UpdaterError::NoDeviceFound { .. } => "UPD-020",
            UpdaterError::AmbiguousDevice { .. } => "UPD-021",
            UpdaterError::UnsupportedDevice { .. } => "UPD-030",
            UpdaterError::ReenumerationTimeout { .. } => "UPD-031",
            UpdaterError::UnexpectedPersonality { .. } => "UPD-032",
            UpdaterError::MissingAltSetting { .. } => "UPD-033",
            UpdaterError::ToolSpawn { .. } => "UPD-040",
            UpdaterError::ToolInvocationFailed { .. } => "UPD-041",
            UpdaterError::MissingBuildMetadata { .. } => "UPD-050",
            UpdaterError::MissingRevision { .. } => "UPD-051",
            UpdaterError::EventFeedClosed => "UPD-060",
            UpdaterError::UnsupportedPlatform => "UPD-061",
            UpdaterError::Stage { source, .. } => source.error_code(),
        }
    }
}
