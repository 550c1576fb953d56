//! Terminal capability detection, raw mode and host IO tasks

use std::io;

use crossterm::tty::IsTty;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LoopError;
use crate::event::SignalKind;
use crate::runtime::LoopHandle;

/// Width used when the terminal size cannot be read.
pub const FALLBACK_WIDTH: u16 = 80;
/// Height used when the terminal size cannot be read.
pub const FALLBACK_HEIGHT: u16 = 24;

/// What the hosting terminal supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TerminalCapabilities {
    /// stdin and stdout are both terminals
    pub is_tty: bool,
    pub color: bool,
    pub unicode: bool,
    pub width: u16,
    pub height: u16,
}

impl Default for TerminalCapabilities {
    fn default() -> Self {
        Self::fallback()
    }
}

impl TerminalCapabilities {
    /// Safe defaults: no TTY, no color, no unicode, 80x24.
    pub fn fallback() -> Self {
        Self {
            is_tty: false,
            color: false,
            unicode: false,
            width: FALLBACK_WIDTH,
            height: FALLBACK_HEIGHT,
        }
    }

    /// Probe the real terminal and environment.
    pub fn detect() -> Result<Self, LoopError> {
        let is_tty = io::stdin().is_tty() && io::stdout().is_tty();
        detect_with(is_tty, |name| std::env::var(name).ok(), crossterm::terminal::size)
    }

    /// Like [`detect`](Self::detect), degrading to [`fallback`](Self::fallback)
    /// on failure. The failure is handed back so it can still be reported.
    pub fn detect_or_fallback() -> (Self, Option<LoopError>) {
        match Self::detect() {
            Ok(caps) => (caps, None),
            Err(error) => {
                warn!(%error, "Terminal capability detection failed, using fallback");
                (Self::fallback(), Some(error))
            }
        }
    }

    /// Re-read the terminal size. Keeps the previous size on failure.
    pub fn refresh_size(&mut self) -> Result<(u16, u16), LoopError> {
        let (width, height) = crossterm::terminal::size()
            .map_err(|e| LoopError::Capability(format!("cannot read terminal size: {}", e)))?;
        self.width = width;
        self.height = height;
        Ok((width, height))
    }
}

/// Capability detection with injectable environment and size probes.
pub fn detect_with<E, S>(is_tty: bool, env: E, size: S) -> Result<TerminalCapabilities, LoopError>
where
    E: Fn(&str) -> Option<String>,
    S: FnOnce() -> io::Result<(u16, u16)>,
{
    if !is_tty {
        debug!("Not attached to a terminal, using fallback capabilities");
        return Ok(TerminalCapabilities::fallback());
    }

    let (width, height) =
        size().map_err(|e| LoopError::Capability(format!("cannot read terminal size: {}", e)))?;

    let term = env("TERM").unwrap_or_default();
    let color = env("NO_COLOR").is_none() && !term.is_empty() && term != "dumb";

    let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .find_map(|&name| env(name).filter(|v| !v.is_empty()))
        .unwrap_or_default()
        .to_uppercase();
    let unicode = locale.contains("UTF-8") || locale.contains("UTF8");

    Ok(TerminalCapabilities {
        is_tty,
        color,
        unicode,
        width,
        height,
    })
}

/// Keeps the terminal in raw mode until dropped.
#[derive(Debug)]
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        debug!("Raw mode enabled");
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(error) = crossterm::terminal::disable_raw_mode() {
            warn!(%error, "Failed to restore terminal mode");
        } else {
            debug!("Raw mode disabled");
        }
    }
}

/// Forward stdin bytes to the loop until cancelled or stdin closes.
pub fn spawn_input_reader(handle: LoopHandle, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = stdin.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("stdin closed");
                        break;
                    }
                    Ok(n) => {
                        if !handle.send_input(&buf[..n]) {
                            break;
                        }
                    }
                    Err(error) => {
                        handle.report_error(format!("stdin read failed: {}", error));
                        break;
                    }
                },
            }
        }
    })
}

/// Translate process signals into loop signals until cancelled.
#[cfg(unix)]
pub fn spawn_signal_listener(handle: LoopHandle, cancel: CancellationToken) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind as UnixSignal};

    tokio::spawn(async move {
        let streams = (
            signal(UnixSignal::interrupt()),
            signal(UnixSignal::terminate()),
            signal(UnixSignal::window_change()),
        );
        let (mut interrupt, mut terminate, mut resize) = match streams {
            (Ok(i), Ok(t), Ok(r)) => (i, t, r),
            _ => {
                handle.report_error("cannot install signal handlers".to_string());
                return;
            }
        };

        loop {
            let kind = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interrupt.recv() => SignalKind::Interrupt,
                _ = terminate.recv() => SignalKind::Terminate,
                _ = resize.recv() => SignalKind::Resize,
            };
            info!(signal = kind.name(), "Received process signal");
            if !handle.signal(kind) {
                break;
            }
        }
    })
}

/// Translate ctrl+c into a loop interrupt until cancelled.
#[cfg(not(unix))]
pub fn spawn_signal_listener(handle: LoopHandle, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::signal::ctrl_c() => {
                    if let Err(error) = result {
                        handle.report_error(format!("cannot listen for ctrl+c: {}", error));
                        break;
                    }
                    if !handle.signal(SignalKind::Interrupt) {
                        break;
                    }
                }
            }
        }
    })
}
