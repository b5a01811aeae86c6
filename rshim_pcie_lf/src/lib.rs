// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Host-side register access to the rshim management subsystem of a
//! PCI-attached BlueField SoC in "live-fish" mode, where the SoC's
//! register space is not memory-mapped and must be reached through a
//! hidden config-space capability.
//!
//! The stack is layered leaf-first: a capability register accessor
//! over raw config space, a hardware gateway lock serializing
//! indirect 32-bit CR-space accesses, a Byte Access Widget composing
//! two 32-bit accesses into one 64-bit register transaction, and a
//! dispatcher applying per-revision quirks. BlueField-1 uses the
//! gateway wire protocol; BlueField-2 exposes a direct register
//! window and a widget interlock instead.

#![forbid(unsafe_code)]

pub mod backend;
mod cap;
mod gateway;
#[cfg(target_os = "linux")]
pub mod probe;
#[cfg(test)]
mod test_soc;
mod widget;

pub use backend::BackendRegistry;
pub use backend::PcieLfBackend;
pub use backend::RshimBackend;
pub use cap::ConfigSpacePort;

use rshim_defs::BLUEFIELD1_DEVICE_ID;
use rshim_defs::BLUEFIELD2_DEVICE_ID;
use std::fmt;
use thiserror::Error;

/// Default iteration bound shared by every polling loop in the stack.
///
/// The hardware exposes no interrupt or wait mechanism, so a wedged
/// device is converted into a reported [`AccessError::Timeout`]
/// instead of an infinite hang.
pub const DEFAULT_RETRY_LIMIT: u32 = 1000;

/// The two supported device generations, selecting the wire protocol
/// used at every layer of the stack.
///
/// Chosen once at attach time so no call site re-reads device state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocRevision {
    /// Legacy revision: CR space is reached through the gateway's
    /// address/data/control/trigger protocol under the gateway lock,
    /// and posted writes must be throttled.
    BlueField1,
    /// Newer revision: CR space is a direct capability window, and
    /// 8-byte widget transactions are serialized by an interlock.
    BlueField2,
}

impl SocRevision {
    /// Maps a PCI device ID to its revision, if supported.
    pub fn from_device_id(device_id: u16) -> Option<Self> {
        match device_id {
            BLUEFIELD1_DEVICE_ID => Some(Self::BlueField1),
            BLUEFIELD2_DEVICE_ID => Some(Self::BlueField2),
            _ => None,
        }
    }
}

/// The hardware condition a bounded polling loop was waiting on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PollTarget {
    /// The gateway lock never became free.
    GatewayLock,
    /// The widget's pending bit never cleared.
    WidgetPending,
    /// The widget interlock never became ready.
    WidgetInterlock,
}

impl fmt::Display for PollTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollTarget::GatewayLock => "gateway lock",
            PollTarget::WidgetPending => "widget pending bit",
            PollTarget::WidgetInterlock => "widget interlock",
        })
    }
}

/// Failure of one indirect register access.
#[derive(Debug, Error)]
pub enum AccessError {
    /// An underlying config-space transaction failed.
    #[error("pci config space transaction failed")]
    Bus(#[source] std::io::Error),
    /// A bounded polling loop was exhausted.
    #[error("timed out waiting for {0}")]
    Timeout(PollTarget),
    /// The backend's rshim interface is not currently usable.
    #[error("rshim register interface is not attached")]
    NotReady,
}
