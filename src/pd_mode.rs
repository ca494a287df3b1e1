//! PD protocol-mode control (`pd_verifed`: 1 = PPS, 0 = MIPPS)

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::DeviceError;

/// Default vendor class node
pub const DEFAULT_PD_VERIFED_PATH: &str = "/sys/class/qcom-battery/pd_verifed";

/// Writer/reader of the charger's protocol mode
pub trait ProtocolModeControl: Send + Sync {
    fn write(&self, verified: bool) -> Result<(), DeviceError>;

    /// Current mode as the charger reports it.
    ///
    /// `Ok(None)` when this control cannot read the mode back.
    fn read(&self) -> Result<Option<bool>, DeviceError>;
}

/// `pd_verifed` sysfs node
#[derive(Debug, Clone)]
pub struct SysfsProtocolMode {
    path: PathBuf,
}

impl SysfsProtocolMode {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open the node only if it exists
    pub fn probe(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        path.exists().then(|| Self::new(path))
    }
}

fn parse_mode(text: &str) -> Result<bool, DeviceError> {
    match text.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(DeviceError::InvalidValue(format!("pd_verifed {other:?}"))),
    }
}

impl ProtocolModeControl for SysfsProtocolMode {
    fn write(&self, verified: bool) -> Result<(), DeviceError> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        writeln!(file, "{}", u8::from(verified))?;
        debug!("{} <- {}", self.path.display(), u8::from(verified));
        Ok(())
    }

    fn read(&self) -> Result<Option<bool>, DeviceError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => parse_mode(&text).map(Some),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory protocol mode, for tests
#[derive(Debug, Default)]
pub struct MemoryProtocolMode {
    state: Mutex<MemoryModeState>,
}

#[derive(Debug, Default)]
struct MemoryModeState {
    current: Option<bool>,
    readable: bool,
    fail_writes: bool,
    writes: Vec<bool>,
}

impl MemoryProtocolMode {
    /// Readable control starting in `current`
    pub fn new(current: bool) -> Self {
        Self {
            state: Mutex::new(MemoryModeState {
                current: Some(current),
                readable: true,
                ..Default::default()
            }),
        }
    }

    /// Simulate the charger resetting its mode behind our back
    pub fn reset_to(&self, current: bool) {
        self.state.lock().current = Some(current);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn writes(&self) -> Vec<bool> {
        self.state.lock().writes.clone()
    }
}

impl ProtocolModeControl for MemoryProtocolMode {
    fn write(&self, verified: bool) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::from_raw_os_error(libc::EACCES).into());
        }
        state.writes.push(verified);
        state.current = Some(verified);
        Ok(())
    }

    fn read(&self) -> Result<Option<bool>, DeviceError> {
        let state = self.state.lock();
        Ok(if state.readable { state.current } else { None })
    }
}
