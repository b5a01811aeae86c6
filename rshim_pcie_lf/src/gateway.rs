// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! 32-bit CR-space access.
//!
//! On BlueField-1 every access goes through the TRIO CR gateway: a
//! cooperative hardware lock is claimed by polling, the transaction
//! is staged in the gateway's address/data/control registers and
//! fired with a trigger write, and the lock is released on every exit
//! path. On BlueField-2 the low 16 bits of the address index a direct
//! register window, so no gateway traffic is needed at all.

use crate::AccessError;
use crate::PollTarget;
use crate::SocRevision;
use crate::cap::ConfigSpacePort;
use crate::cap::cap_read;
use crate::cap::cap_write;
use rshim_defs::CHANNEL_OFFSET_MASK;
use rshim_defs::CRSPACE_RSH_CHANNEL1_BASE;
use rshim_defs::RSHIM_CHANNEL;
use rshim_defs::channel_base;
use rshim_defs::gw::GwLock;
use rshim_defs::gw::TRIO_CR_GW_ADDR_LOWER;
use rshim_defs::gw::TRIO_CR_GW_CTL;
use rshim_defs::gw::TRIO_CR_GW_DATA_LOWER;
use rshim_defs::gw::TRIO_CR_GW_LOCK;
use rshim_defs::gw::TRIO_CR_GW_READ_4BYTE;
use rshim_defs::gw::TRIO_CR_GW_WRITE_4BYTE;
use rshim_defs::rsh::RSH_BOOT_FIFO_DATA;

/// A per-call view of the SoC's CR address space.
///
/// Borrows the config-space port for the duration of one dispatcher
/// operation and carries the revision strategy plus the shared retry
/// bound, so the layers below never re-check device state.
pub(crate) struct CrSpace<'a> {
    port: &'a dyn ConfigSpacePort,
    revision: SocRevision,
    retry_limit: u32,
}

impl<'a> CrSpace<'a> {
    pub fn new(port: &'a dyn ConfigSpacePort, revision: SocRevision, retry_limit: u32) -> Self {
        Self {
            port,
            revision,
            retry_limit,
        }
    }

    pub fn revision(&self) -> SocRevision {
        self.revision
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Polls the gateway lock until it is free, then claims it.
    ///
    /// There is no true mutual exclusion with other processes; the
    /// lock is a cooperative hardware flag policed purely by polling.
    fn lock_acquire(&self) -> Result<(), AccessError> {
        let mut retry = 0;
        loop {
            let value = cap_read(self.port, TRIO_CR_GW_LOCK)?;
            if !GwLock::from_bits(value).locked() {
                break;
            }
            retry += 1;
            if retry > self.retry_limit {
                return Err(AccessError::Timeout(PollTarget::GatewayLock));
            }
        }
        cap_write(self.port, TRIO_CR_GW_LOCK, GwLock::ACQUIRED.into_bits())
    }

    /// Unconditionally writes the release pattern. A failure here is
    /// surfaced, but the lock is considered abandoned either way.
    fn lock_release(&self) -> Result<(), AccessError> {
        cap_write(self.port, TRIO_CR_GW_LOCK, GwLock::RELEASE.into_bits())
    }

    /// Reads a 32-bit value at `addr` in CR space.
    pub fn read(&self, addr: u32) -> Result<u32, AccessError> {
        if self.revision == SocRevision::BlueField2 {
            let addr = (addr & CHANNEL_OFFSET_MASK) + CRSPACE_RSH_CHANNEL1_BASE;
            return cap_read(self.port, addr);
        }

        let addr = addr + channel_base(RSHIM_CHANNEL);
        self.lock_acquire()?;
        let result = self.gw_read_locked(addr);
        merge_release(result, self.lock_release())
    }

    fn gw_read_locked(&self, addr: u32) -> Result<u32, AccessError> {
        cap_write(self.port, TRIO_CR_GW_ADDR_LOWER, addr)?;
        cap_write(self.port, TRIO_CR_GW_CTL, TRIO_CR_GW_READ_4BYTE)?;
        cap_write(self.port, TRIO_CR_GW_LOCK, GwLock::TRIGGER.into_bits())?;
        // The payload crosses the gateway in network byte order.
        let raw = cap_read(self.port, TRIO_CR_GW_DATA_LOWER)?;
        Ok(u32::from_be(raw))
    }

    /// Writes a 32-bit value at `addr` in CR space.
    ///
    /// Widget register traffic arrives here with bare offsets and is
    /// folded into the reserved gateway channel; the boot FIFO data
    /// register is the one offset that is never channel-offset.
    pub fn write(&self, addr: u32, value: u32) -> Result<(), AccessError> {
        if self.revision == SocRevision::BlueField2 {
            let addr = (addr & CHANNEL_OFFSET_MASK) + CRSPACE_RSH_CHANNEL1_BASE;
            return cap_write(self.port, addr, value);
        }

        let addr = if addr & CHANNEL_OFFSET_MASK != RSH_BOOT_FIFO_DATA {
            addr + channel_base(RSHIM_CHANNEL)
        } else {
            addr
        };

        self.lock_acquire()?;
        let result = self.gw_write_locked(addr, value);
        merge_release(result, self.lock_release())
    }

    fn gw_write_locked(&self, addr: u32, value: u32) -> Result<(), AccessError> {
        cap_write(self.port, TRIO_CR_GW_DATA_LOWER, value.to_be())?;
        cap_write(self.port, TRIO_CR_GW_ADDR_LOWER, addr)?;
        cap_write(self.port, TRIO_CR_GW_CTL, TRIO_CR_GW_WRITE_4BYTE)?;
        cap_write(self.port, TRIO_CR_GW_LOCK, GwLock::TRIGGER.into_bits())
    }
}

/// Combines a transaction body result with the result of the
/// unconditional lock/interlock release that followed it.
///
/// The body error wins; a release failure on an already-failed body
/// is logged rather than conflated with the triggering error.
pub(crate) fn merge_release<T>(
    result: Result<T, AccessError>,
    released: Result<(), AccessError>,
) -> Result<T, AccessError> {
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            tracing::warn!(
                error = &release_err as &dyn std::error::Error,
                "lock release failed on error path, device may be wedged"
            );
            Err(err)
        }
    }
}
