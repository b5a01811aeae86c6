// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The backend access dispatcher: the two operations the generic
//! rshim front end consumes, with per-revision quirks applied on top
//! of the widget and boot FIFO paths.
//!
//! Callers must serialize all calls into one backend through their
//! own mutex; the gateway lock and widget interlock are cooperative
//! hardware flags with no owner identity, so two unsynchronized
//! callers could each believe they hold them.

use crate::AccessError;
use crate::DEFAULT_RETRY_LIMIT;
use crate::SocRevision;
use crate::cap::ConfigSpacePort;
use crate::gateway::CrSpace;
use crate::widget;
use parking_lot::Mutex;
use rshim_defs::channel_base;
use rshim_defs::rsh::RSH_BOOT_FIFO_DATA;
use rshim_defs::rsh::RSH_SCRATCHPAD;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::atomic::fence;

/// Number of 8-byte writes BlueField-1 can post before a drain read
/// must flush them. Exceeding the burst silently corrupts later
/// writes, and each boot-FIFO push costs two 4-byte writes, so the
/// limit is half the hardware's 15-word burst.
const WRITE_BURST_LIMIT: u8 = 7;

/// The read/write surface consumed by the rshim front end.
pub trait RshimBackend: Send {
    /// Reads the 64-bit rshim register at (`chan`, `addr`).
    fn read_rshim(&mut self, chan: u8, addr: u32) -> Result<u64, AccessError>;
    /// Writes the 64-bit rshim register at (`chan`, `addr`).
    fn write_rshim(&mut self, chan: u8, addr: u32, value: u64) -> Result<(), AccessError>;
}

/// Registry of attached backends, owned by the external front end.
///
/// The registry's mutex around each backend is the caller-level
/// serialization the protocol stack relies on.
pub trait BackendRegistry {
    /// Looks up an already-registered backend by name.
    fn find_by_name(&self, name: &str) -> Option<Arc<Mutex<PcieLfBackend>>>;
    /// Registers a newly attached backend.
    fn register(&mut self, name: &str, backend: Arc<Mutex<PcieLfBackend>>) -> anyhow::Result<()>;
}

/// An rshim backend reached through the hidden capability pair of a
/// PCI device in live-fish mode.
pub struct PcieLfBackend {
    port: Box<dyn ConfigSpacePort>,
    revision: SocRevision,
    /// Set once at attach by the lifecycle; the dispatcher only
    /// observes it.
    has_rshim: bool,
    /// 8-byte writes since the last read, legacy revision only.
    write_count: u8,
    retry_limit: u32,
}

impl PcieLfBackend {
    /// Creates a backend over `port`. The rshim interface is unusable
    /// until [`attach`](Self::attach) is called.
    pub fn new(port: Box<dyn ConfigSpacePort>, revision: SocRevision) -> Self {
        Self {
            port,
            revision,
            has_rshim: false,
            write_count: 0,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }

    /// The wire protocol this backend speaks.
    pub fn revision(&self) -> SocRevision {
        self.revision
    }

    /// Marks the rshim interface usable.
    pub fn attach(&mut self) {
        self.has_rshim = true;
        self.write_count = 0;
    }

    /// Marks the rshim interface unusable; subsequent accesses fail
    /// with [`AccessError::NotReady`].
    pub fn detach(&mut self) {
        self.has_rshim = false;
    }

    /// Replaces the config-space port with a freshly opened one and
    /// re-attaches, for a device that reappeared under a known name.
    pub fn reattach(&mut self, port: Box<dyn ConfigSpacePort>) {
        self.port = port;
        self.attach();
    }

    /// Overrides the shared bound applied to every polling loop.
    pub fn set_retry_limit(&mut self, retry_limit: u32) {
        self.retry_limit = retry_limit;
    }

    fn cr(&self) -> CrSpace<'_> {
        CrSpace::new(&*self.port, self.revision, self.retry_limit)
    }
}

impl RshimBackend for PcieLfBackend {
    fn read_rshim(&mut self, chan: u8, addr: u32) -> Result<u64, AccessError> {
        if !self.has_rshim {
            return Err(AccessError::NotReady);
        }

        // A read forces previously posted writes to drain.
        self.write_count = 0;

        widget::read_u64(&self.cr(), channel_base(chan) + addr)
    }

    fn write_rshim(&mut self, chan: u8, addr: u32, value: u64) -> Result<(), AccessError> {
        if !self.has_rshim {
            return Err(AccessError::NotReady);
        }

        // BlueField-1 cannot sustain an unbounded burst of posted
        // writes; after WRITE_BURST_LIMIT of them, read a harmless
        // scratch register to flush the pipe. The drain's own failure
        // does not block the write that triggered it.
        if self.revision == SocRevision::BlueField1 {
            if self.write_count == WRITE_BURST_LIMIT {
                fence(Ordering::SeqCst);
                if let Err(error) = self.read_rshim(chan, RSH_SCRATCHPAD) {
                    tracing::debug!(
                        error = &error as &dyn std::error::Error,
                        "throttle drain read failed"
                    );
                }
            }
            self.write_count += 1;
        }

        let cr = self.cr();
        if addr == RSH_BOOT_FIFO_DATA {
            widget::boot_fifo_write(&cr, channel_base(chan) + addr, value)
        } else {
            widget::write_u64(&cr, channel_base(chan) + addr, value)
        }
    }
}
