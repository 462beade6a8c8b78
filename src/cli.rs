//! CLI argument parsing and the `--cli` interactive stdin key handler.
//!
//! `Args` is grounded on the teacher's `src/bin/*.rs` `#[derive(Parser)] struct
//! Args`. Raw-mode terminal handling is grounded on
//! `examples/original_source/main.c`'s `set_stdin_nonblock` (termios +
//! O_NONBLOCK), reimplemented with `libc::termios`/`tcsetattr` directly behind
//! a `Drop` guard that restores the original terminal mode.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Named-sequence video splash streamer")]
pub struct Args {
    /// Enable interactive keyboard control on stdin (1-9 enqueue, c clear, s
    /// start, x stop, q quit).
    #[arg(long)]
    pub cli: bool,

    /// Override the control surface's HTTP port.
    #[arg(long, value_name = "N")]
    pub http_port: Option<u16>,

    /// Path to the INI configuration file.
    pub config: PathBuf,
}

/// Puts stdin into non-canonical, non-blocking mode for the duration of its
/// lifetime, restoring the previous `termios` state on drop.
pub struct RawStdin {
    original: libc::termios,
}

impl RawStdin {
    pub fn enable() -> anyhow::Result<Self> {
        unsafe {
            let fd = libc::STDIN_FILENO;
            let mut original: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut original) != 0 {
                anyhow::bail!("tcgetattr failed: {}", std::io::Error::last_os_error());
            }
            let mut raw = original;
            raw.c_lflag &= !(libc::ICANON | libc::ECHO);
            raw.c_cc[libc::VMIN] = 0;
            raw.c_cc[libc::VTIME] = 0;
            if libc::tcsetattr(fd, libc::TCSANOW, &raw) != 0 {
                anyhow::bail!("tcsetattr failed: {}", std::io::Error::last_os_error());
            }
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            Ok(Self { original })
        }
    }

    /// Reads at most one pending key, non-blocking. `None` if nothing is
    /// available this tick.
    pub fn read_key(&self) -> Option<u8> {
        let mut buf = [0u8; 1];
        let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr() as *mut libc::c_void, 1) };
        if n == 1 {
            Some(buf[0])
        } else {
            None
        }
    }
}

impl Drop for RawStdin {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.original);
        }
    }
}

/// What an interactive key press should do, decoded from the raw byte. The
/// caller maps this onto the app/queue/pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    EnqueueNth(u8),
    Clear,
    Start,
    Stop,
    Quit,
}

pub fn decode_key(byte: u8) -> Option<Key> {
    match byte {
        b'1'..=b'9' => Some(Key::EnqueueNth(byte - b'1')),
        b'c' => Some(Key::Clear),
        b's' => Some(Key::Start),
        b'x' => Some(Key::Stop),
        b'q' => Some(Key::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_digit_and_letter_keys() {
        assert_eq!(decode_key(b'1'), Some(Key::EnqueueNth(0)));
        assert_eq!(decode_key(b'9'), Some(Key::EnqueueNth(8)));
        assert_eq!(decode_key(b'q'), Some(Key::Quit));
        assert_eq!(decode_key(b'?'), None);
    }
}
