//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! Signals and cross-thread wake-ups delivered through a self-pipe.
//!
//! Signal handlers only write the signal number to the pipe; the poll loop watches the read
//! end and acts between ticks. A [`ServerHandle`] writes to the same pipe so other threads
//! can stop or reboot the server.

use crate::error::Result;
use nix::fcntl::OFlag;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, trace};

static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

const STOP: u8 = b'q';
const REBOOT: u8 = b'r';
const WAKE: u8 = b'w';

extern "C" fn on_signal(signal: libc::c_int) {
    let fd = WAKE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = signal as u8;
        // SAFETY: write(2) is async-signal-safe and the buffer outlives the call
        unsafe {
            libc::write(fd, (&raw const byte).cast(), 1);
        }
    }
}

/// Something the poll loop must react to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wake {
    /// Orderly shutdown
    Shutdown,
    /// Hot reboot
    Reboot,
    /// A child exited
    Child,
    /// Nothing in particular; re-run the loop
    Poke,
}

impl Wake {
    fn from_byte(byte: u8) -> Option<Wake> {
        match libc::c_int::from(byte) {
            libc::SIGTERM | libc::SIGINT => Some(Wake::Shutdown),
            libc::SIGUSR1 => Some(Wake::Reboot),
            libc::SIGCHLD => Some(Wake::Child),
            _ => match byte {
                STOP => Some(Wake::Shutdown),
                REBOOT => Some(Wake::Reboot),
                WAKE => Some(Wake::Poke),
                _ => None,
            },
        }
    }
}

/// The self-pipe
#[derive(Debug)]
pub struct SignalPipe {
    read: File,
    write: Arc<File>,
}

impl SignalPipe {
    /// A non-blocking, close-on-exec pipe
    pub fn new() -> Result<Self> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        Ok(Self {
            read: File::from(read),
            write: Arc::new(File::from(write)),
        })
    }

    /// Route SIGTERM, SIGINT, SIGUSR1 and SIGCHLD into this pipe. Only one pipe receives
    /// signals at a time; the last one installed wins.
    pub fn install(&self) -> Result<()> {
        WAKE_FD.store(self.write.as_raw_fd(), Ordering::Relaxed);
        let action = SigAction::new(SigHandler::Handler(on_signal), SaFlags::SA_RESTART, SigSet::empty());
        for signal in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGUSR1, Signal::SIGCHLD] {
            // SAFETY: the handler only performs an async-signal-safe write
            unsafe { sigaction(signal, &action) }?;
        }
        debug!("Signal handlers installed");
        Ok(())
    }

    /// A handle for other threads
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            write: self.write.clone(),
        }
    }

    /// Read every pending wake-up, in arrival order, without duplicates
    pub fn drain(&mut self) -> Vec<Wake> {
        let mut wakes = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match self.read.read(&mut buf) {
                Ok(0) => break,
                Ok(count) => {
                    for wake in buf[..count].iter().filter_map(|&byte| Wake::from_byte(byte)) {
                        if !wakes.contains(&wake) {
                            wakes.push(wake);
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        trace!(?wakes, "Drained signal pipe");
        wakes
    }
}

impl AsFd for SignalPipe {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        let _ = WAKE_FD.compare_exchange(self.write.as_raw_fd(), -1, Ordering::Relaxed, Ordering::Relaxed);
    }
}

/// Stops, reboots or wakes a running server from any thread
#[derive(Debug, Clone)]
pub struct ServerHandle {
    write: Arc<File>,
}

impl ServerHandle {
    fn send(&self, byte: u8) -> io::Result<()> {
        match (&*self.write).write(&[byte]) {
            Ok(_) => Ok(()),
            // a full pipe already holds a pending wake-up
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Ask for an orderly shutdown
    pub fn shutdown(&self) -> io::Result<()> {
        self.send(STOP)
    }

    /// Ask for a hot reboot
    pub fn reboot(&self) -> io::Result<()> {
        self.send(REBOOT)
    }

    /// Interrupt the current poll wait
    pub fn wake(&self) -> io::Result<()> {
        self.send(WAKE)
    }
}
