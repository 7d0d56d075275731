//! Starting the peer of a process link.
//!
//! The creator allocates the region first, then asks a [`PeerLauncher`] to
//! start whatever will open it. How the peer is started is up to the caller;
//! [`CommandLauncher`] covers the common "spawn a program with the region
//! name as its last argument" case.

use std::ffi::OsString;
use std::process::{Child, Command, Stdio};

use super::AttachInfo;
use crate::error::{GroupwireError, Result};

/// Starts the peer that will open a freshly created region.
pub trait PeerLauncher {
    /// Start the peer. The region is fully initialized when this is called.
    fn launch(&mut self, info: &AttachInfo) -> Result<()>;
}

impl<F> PeerLauncher for F
where
    F: FnMut(&AttachInfo) -> Result<()>,
{
    fn launch(&mut self, info: &AttachInfo) -> Result<()> {
        self(info)
    }
}

/// Spawns a program, appending the region name to its arguments.
#[derive(Debug)]
pub struct CommandLauncher {
    program: OsString,
    args: Vec<OsString>,
    piped_stdout: bool,
    child: Option<Child>,
}

impl CommandLauncher {
    /// Launch `program` with no extra arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            piped_stdout: false,
            child: None,
        }
    }

    /// Add an argument placed before the region name.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Capture the child's stdout (e.g. to read its attach line).
    pub fn piped_stdout(mut self) -> Self {
        self.piped_stdout = true;
        self
    }

    /// The spawned child, once launched.
    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Take ownership of the spawned child.
    pub fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }
}

impl PeerLauncher for CommandLauncher {
    fn launch(&mut self, info: &AttachInfo) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(&info.region).stdin(Stdio::null());
        if self.piped_stdout {
            command.stdout(Stdio::piped());
        }

        let child = command.spawn().map_err(|e| {
            GroupwireError::Launch(format!(
                "failed to spawn {}: {}",
                self.program.to_string_lossy(),
                e
            ))
        })?;

        tracing::debug!(
            program = %self.program.to_string_lossy(),
            pid = child.id(),
            region = %info.region,
            "Launched peer"
        );
        self.child = Some(child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_launcher_sees_attach_info() {
        let mut seen = None;
        let mut launcher = |info: &AttachInfo| -> Result<()> {
            seen = Some(info.region.clone());
            Ok(())
        };
        launcher.launch(&AttachInfo::new("/peer", 1, 1)).unwrap();
        assert_eq!(seen.as_deref(), Some("/peer"));
    }

    #[test]
    fn test_missing_program_is_launch_error() {
        let mut launcher = CommandLauncher::new("/nonexistent/groupwire-peer");
        let err = launcher.launch(&AttachInfo::new("/peer", 1, 1)).unwrap_err();
        assert!(matches!(err, GroupwireError::Launch(_)));
        assert!(launcher.child_mut().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_region_name_is_last_argument() {
        let mut launcher = CommandLauncher::new("sh")
            .arg("-c")
            .arg("echo \"$0\"")
            .piped_stdout();
        launcher.launch(&AttachInfo::new("/named", 1, 1)).unwrap();

        let output = launcher.take_child().unwrap().wait_with_output().unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "/named");
    }
}
