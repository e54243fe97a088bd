//! Instance control channel.
//!
//! A running instance reads line-oriented commands from a named pipe; the
//! management script wires the server's stdin to it on start. Writes are
//! fire-and-forget: success means the command reached the channel, not that
//! the server acted on it. Callers observe effects through `is_active` and
//! the logs.

use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use crate::error::{AppError, Result};
use crate::paths::InstanceLayout;

pub struct ControlChannel {
    instance: String,
    pipe_path: PathBuf,
}

impl ControlChannel {
    pub fn new(instance: &str, layout: &InstanceLayout) -> Self {
        Self {
            instance: instance.to_string(),
            pipe_path: layout.console_pipe(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.pipe_path
    }

    fn is_pipe(&self) -> bool {
        use std::os::unix::fs::FileTypeExt as _;

        std::fs::metadata(&self.pipe_path)
            .map(|meta| meta.file_type().is_fifo())
            .unwrap_or(false)
    }

    /// Write one line to the channel. Fails immediately with a not-running
    /// error when the pipe is absent or nothing is reading from it; never
    /// blocks waiting for a reader.
    pub fn send_line(&self, text: &str) -> Result<()> {
        if !self.is_pipe() {
            return Err(AppError::instance_not_running(&self.instance));
        }

        let fd = match nix::fcntl::open(
            &self.pipe_path,
            OFlag::O_WRONLY | OFlag::O_NONBLOCK,
            Mode::empty(),
        ) {
            Ok(fd) => fd,
            // ENXIO: FIFO exists but has no reader, i.e. the server is gone.
            Err(nix::errno::Errno::ENXIO) => {
                return Err(AppError::instance_not_running(&self.instance));
            }
            Err(e) => {
                return Err(AppError::io(format!(
                    "failed to open {}: {}",
                    self.pipe_path.display(),
                    e
                )));
            }
        };

        let line = format!("{}\n", text.trim_end_matches('\n'));
        let mut remaining = line.as_bytes();
        while !remaining.is_empty() {
            let written = nix::unistd::write(&fd, remaining).map_err(|e| {
                AppError::io(format!(
                    "failed to write to {}: {}",
                    self.pipe_path.display(),
                    e
                ))
            })?;
            remaining = &remaining[written..];
        }

        log::debug!("Sent to {}: {}", self.instance, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use nix::fcntl::OFlag;
    use nix::sys::stat::Mode;

    use super::ControlChannel;
    use crate::paths::InstanceLayout;

    #[test]
    fn send_without_pipe_is_not_running() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = InstanceLayout::new(dir.path());
        let channel = ControlChannel::new("factorio-0001", &layout);

        let err = channel.send_line("/save").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InstanceNotRunning);
    }

    #[test]
    fn send_without_reader_is_not_running() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = InstanceLayout::new(dir.path());
        nix::unistd::mkfifo(&layout.console_pipe(), Mode::from_bits_truncate(0o600)).unwrap();

        let channel = ControlChannel::new("factorio-0001", &layout);
        let err = channel.send_line("/save").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InstanceNotRunning);
    }

    #[test]
    fn line_reaches_an_attached_reader() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = InstanceLayout::new(dir.path());
        let pipe = layout.console_pipe();
        nix::unistd::mkfifo(&pipe, Mode::from_bits_truncate(0o600)).unwrap();

        let reader = nix::fcntl::open(&pipe, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty())
            .unwrap();

        let channel = ControlChannel::new("factorio-0001", &layout);
        channel.send_line("/save").unwrap();

        let mut buf = [0u8; 64];
        let read = nix::unistd::read(&reader, &mut buf).unwrap();
        assert_eq!(&buf[..read], b"/save\n");
    }
}
