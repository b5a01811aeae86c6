// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Byte Access Widget: one 8-byte logical register transaction
//! composed from two 4-byte CR-space accesses, plus the boot FIFO
//! fast path that bypasses the widget entirely.
//!
//! The widget auto-advances an internal word pointer, so the low word
//! must always move before the high word; violating the order yields
//! wrong data, not an error. On BlueField-2 an interlock register
//! serializes whole 8-byte transactions; it is granted by reading a
//! ready bit (opposite polarity to the gateway lock) and released by
//! writing zero, on every exit path.

use crate::AccessError;
use crate::PollTarget;
use crate::SocRevision;
use crate::gateway::CrSpace;
use crate::gateway::merge_release;
use rshim_defs::rsh::ByteAccCtl;
use rshim_defs::rsh::RSH_BYTE_ACC_ADDR;
use rshim_defs::rsh::RSH_BYTE_ACC_CTL;
use rshim_defs::rsh::RSH_BYTE_ACC_INTERLOCK;
use rshim_defs::rsh::RSH_BYTE_ACC_INTERLOCK_READY;
use rshim_defs::rsh::RSH_BYTE_ACC_RDAT;
use rshim_defs::rsh::RSH_BYTE_ACC_WDAT;

/// Polls the widget control register until the pending bit clears.
fn pending_wait(cr: &CrSpace<'_>) -> Result<(), AccessError> {
    let mut retry = 0;
    loop {
        let ctl = ByteAccCtl::from_bits(cr.read(RSH_BYTE_ACC_CTL)?);
        if !ctl.pending() {
            return Ok(());
        }
        retry += 1;
        if retry > cr.retry_limit() {
            return Err(AccessError::Timeout(PollTarget::WidgetPending));
        }
    }
}

/// Polls the interlock register until the ready bit reports the
/// interlock as granted to this reader.
fn interlock_acquire(cr: &CrSpace<'_>) -> Result<(), AccessError> {
    let mut retry = 0;
    loop {
        let value = cr.read(RSH_BYTE_ACC_INTERLOCK)?;
        if value & RSH_BYTE_ACC_INTERLOCK_READY != 0 {
            return Ok(());
        }
        retry += 1;
        if retry > cr.retry_limit() {
            return Err(AccessError::Timeout(PollTarget::WidgetInterlock));
        }
    }
}

fn interlock_release(cr: &CrSpace<'_>) -> Result<(), AccessError> {
    cr.write(RSH_BYTE_ACC_INTERLOCK, 0)
}

/// Runs `body` under the interlock on revisions that have one.
fn with_interlock<T>(
    cr: &CrSpace<'_>,
    body: impl FnOnce() -> Result<T, AccessError>,
) -> Result<T, AccessError> {
    if cr.revision() != SocRevision::BlueField2 {
        return body();
    }
    interlock_acquire(cr)?;
    merge_release(body(), interlock_release(cr))
}

/// Reads the 8-byte logical register at `addr`.
pub(crate) fn read_u64(cr: &CrSpace<'_>, addr: u32) -> Result<u64, AccessError> {
    pending_wait(cr)?;
    with_interlock(cr, || {
        cr.write(RSH_BYTE_ACC_ADDR, addr)?;
        cr.write(
            RSH_BYTE_ACC_CTL,
            ByteAccCtl::new()
                .with_read_trigger(true)
                .with_size_4byte(true)
                .into_bits(),
        )?;
        pending_wait(cr)?;
        let low = cr.read(RSH_BYTE_ACC_RDAT)?;
        pending_wait(cr)?;
        // The widget has advanced to the next word.
        let high = cr.read(RSH_BYTE_ACC_RDAT)?;
        Ok(low as u64 | ((high as u64) << 32))
    })
}

/// Writes the 8-byte logical register at `addr`.
pub(crate) fn write_u64(cr: &CrSpace<'_>, addr: u32, value: u64) -> Result<(), AccessError> {
    with_interlock(cr, || {
        cr.write(RSH_BYTE_ACC_ADDR, addr)?;
        // Size bits only; a write needs no trigger.
        cr.write(
            RSH_BYTE_ACC_CTL,
            ByteAccCtl::new().with_size_4byte(true).into_bits(),
        )?;
        pending_wait(cr)?;
        cr.write(RSH_BYTE_ACC_WDAT, value as u32)?;
        pending_wait(cr)?;
        cr.write(RSH_BYTE_ACC_WDAT, (value >> 32) as u32)
    })
}

/// Pushes an 8-byte value into the boot FIFO.
///
/// The FIFO's holding register couples two consecutive 4-byte writes
/// into a single 8-byte push, so the widget's read-modify cycle is
/// both unnecessary and wrong for this register.
pub(crate) fn boot_fifo_write(cr: &CrSpace<'_>, addr: u32, value: u64) -> Result<(), AccessError> {
    cr.write(addr, value as u32)?;
    cr.write(addr, (value >> 32) as u32)
}
