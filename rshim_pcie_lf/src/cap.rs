// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The capability register accessor: 32-bit reads and writes through
//! the hidden Mellanox address/data register pair.
//!
//! This is the physical primitive the rest of the stack is built on.
//! No retries happen here; every retry and locking decision lives in
//! the layers above.

use crate::AccessError;
use rshim_defs::cap::MLNX_ADDR;
use rshim_defs::cap::MLNX_CAP_READ;
use rshim_defs::cap::MLNX_DATA;

/// Raw 32-bit access to one device's PCI configuration space.
///
/// The production implementation is backed by the sysfs `config`
/// file; tests substitute a simulated SoC. Implementations are
/// borrowed by the protocol stack for the duration of a single access
/// and must tolerate concurrent calls only through the caller-level
/// backend mutex.
pub trait ConfigSpacePort: Send + Sync {
    /// Reads a 32-bit value at `offset` in config space.
    fn cfg_read(&self, offset: u32) -> std::io::Result<u32>;
    /// Writes a 32-bit value at `offset` in config space.
    fn cfg_write(&self, offset: u32, value: u32) -> std::io::Result<()>;
}

/// Reads a 32-bit value from `offset` of the hidden capability.
pub(crate) fn cap_read(port: &dyn ConfigSpacePort, offset: u32) -> Result<u32, AccessError> {
    // Select the target offset with the LSB set to indicate a read,
    // then fetch the result from the data register.
    port.cfg_write(MLNX_ADDR, offset | MLNX_CAP_READ)
        .map_err(AccessError::Bus)?;
    port.cfg_read(MLNX_DATA).map_err(AccessError::Bus)
}

/// Writes a 32-bit value to `offset` of the hidden capability.
pub(crate) fn cap_write(
    port: &dyn ConfigSpacePort,
    offset: u32,
    value: u32,
) -> Result<(), AccessError> {
    // The payload must be staged in the data register before the
    // selector write (LSB clear) issues the transaction.
    port.cfg_write(MLNX_DATA, value).map_err(AccessError::Bus)?;
    port.cfg_write(MLNX_ADDR, offset).map_err(AccessError::Bus)
}
