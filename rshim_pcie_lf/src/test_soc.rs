// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A simulated BlueField SoC behind the hidden capability pair.
//!
//! Models both revisions' wire protocols end to end: the
//! address/data selector machine, the gateway lock and staged
//! transaction registers, the Byte Access Widget's phase-advancing
//! data registers, the interlock grant protocol, the boot FIFO
//! holding register, and a 64-bit logical register file. Tests drive
//! the real protocol stack against it and assert on the recorded
//! capability-level traffic.

use crate::ConfigSpacePort;
use crate::SocRevision;
use parking_lot::Mutex;
use rshim_defs::cap::MLNX_ADDR;
use rshim_defs::cap::MLNX_CAP_READ;
use rshim_defs::cap::MLNX_DATA;
use rshim_defs::gw::GwLock;
use rshim_defs::gw::TRIO_CR_GW_ADDR_LOWER;
use rshim_defs::gw::TRIO_CR_GW_CTL;
use rshim_defs::gw::TRIO_CR_GW_DATA_LOWER;
use rshim_defs::gw::TRIO_CR_GW_LOCK;
use rshim_defs::gw::TRIO_CR_GW_READ_4BYTE;
use rshim_defs::gw::TRIO_CR_GW_WRITE_4BYTE;
use rshim_defs::rsh::ByteAccCtl;
use rshim_defs::rsh::RSH_BOOT_FIFO_DATA;
use rshim_defs::rsh::RSH_BYTE_ACC_ADDR;
use rshim_defs::rsh::RSH_BYTE_ACC_CTL;
use rshim_defs::rsh::RSH_BYTE_ACC_INTERLOCK;
use rshim_defs::rsh::RSH_BYTE_ACC_INTERLOCK_READY;
use rshim_defs::rsh::RSH_BYTE_ACC_RDAT;
use rshim_defs::rsh::RSH_BYTE_ACC_WDAT;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// One capability-level transaction observed by the simulator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CapOp {
    /// A capability read of selector `sel`.
    Read { sel: u32 },
    /// A capability write of `value` to selector `sel`.
    Write { sel: u32, value: u32 },
}

/// Ways the simulated hardware can wedge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wedge {
    /// The gateway lock reads as held forever.
    GatewayLockStuck,
    /// The widget's pending bit never clears.
    PendingStuck,
    /// The widget interlock is never granted.
    InterlockStuck,
}

/// Protocol bookkeeping counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct SimCounters {
    /// Successful gateway lock claims.
    pub lock_claims: usize,
    /// Gateway lock release writes that reached the device.
    pub lock_releases: usize,
    /// Interlock grants handed out.
    pub interlock_grants: usize,
    /// Interlock release writes that reached the device.
    pub interlock_releases: usize,
    /// Reads of the widget control register (pending polls).
    pub pending_polls: usize,
    /// Lock claims observed while the lock was already held.
    pub violations: usize,
}

struct SimState {
    revision: SocRevision,
    wedge: Option<Wedge>,
    /// Fail the n-th capability transaction, once.
    fail_at: Option<usize>,
    cap_ops: usize,

    // Capability selector machine.
    staged_data: u32,
    data_latch: u32,

    // Gateway (BlueField-1).
    gw_lock: bool,
    gw_addr: u32,
    gw_ctl: u32,
    gw_data: u32,

    // Byte Access Widget.
    acc_addr: u32,
    rdat: u64,
    rdat_phase: u32,
    wdat_low: u32,
    wdat_phase: u32,
    interlock: bool,

    // Boot FIFO holding register.
    fifo_low: Option<u32>,

    // Backing stores.
    regs64: HashMap<u32, u64>,
    cr32: HashMap<u32, u32>,

    // Histories.
    log: Vec<CapOp>,
    acc_reads: Vec<u32>,
    acc_writes: Vec<(u32, u64)>,
    fifo_pushes: Vec<u64>,
    counters: SimCounters,
}

/// A simulated SoC; wrap in an [`Arc`] and hand clones to the stack.
pub struct SimSoc {
    state: Mutex<SimState>,
}

impl SimSoc {
    pub fn new(revision: SocRevision) -> Self {
        Self {
            state: Mutex::new(SimState {
                revision,
                wedge: None,
                fail_at: None,
                cap_ops: 0,
                staged_data: 0,
                data_latch: 0,
                gw_lock: false,
                gw_addr: 0,
                gw_ctl: 0,
                gw_data: 0,
                acc_addr: 0,
                rdat: 0,
                rdat_phase: 0,
                wdat_low: 0,
                wdat_phase: 0,
                interlock: false,
                fifo_low: None,
                regs64: HashMap::new(),
                cr32: HashMap::new(),
                log: Vec::new(),
                acc_reads: Vec::new(),
                acc_writes: Vec::new(),
                fifo_pushes: Vec::new(),
                counters: SimCounters::default(),
            }),
        }
    }

    pub fn set_wedge(&self, wedge: Option<Wedge>) {
        self.state.lock().wedge = wedge;
    }

    pub fn set_fail_at(&self, fail_at: Option<usize>) {
        self.state.lock().fail_at = fail_at;
    }

    pub fn reg64(&self, addr: u32) -> u64 {
        self.state.lock().regs64.get(&addr).copied().unwrap_or(0)
    }

    pub fn set_reg64(&self, addr: u32, value: u64) {
        self.state.lock().regs64.insert(addr, value);
    }

    pub fn log(&self) -> Vec<CapOp> {
        self.state.lock().log.clone()
    }

    pub fn acc_reads(&self) -> Vec<u32> {
        self.state.lock().acc_reads.clone()
    }

    pub fn acc_writes(&self) -> Vec<(u32, u64)> {
        self.state.lock().acc_writes.clone()
    }

    pub fn fifo_pushes(&self) -> Vec<u64> {
        self.state.lock().fifo_pushes.clone()
    }

    pub fn counters(&self) -> SimCounters {
        self.state.lock().counters
    }

    pub fn gw_lock_held(&self) -> bool {
        self.state.lock().gw_lock
    }

    pub fn interlock_held(&self) -> bool {
        self.state.lock().interlock
    }
}

impl SimState {
    /// Records a capability transaction and injects a fault if this
    /// is the one a test asked to fail. Faults fire before any side
    /// effect, like a bus error would.
    fn begin_op(&mut self, op: CapOp) -> io::Result<()> {
        self.log.push(op);
        let index = self.cap_ops;
        self.cap_ops += 1;
        if self.fail_at == Some(index) {
            return Err(io::Error::other("injected bus fault"));
        }
        Ok(())
    }

    fn cap_space_read(&mut self, sel: u32) -> u32 {
        if self.revision == SocRevision::BlueField2 {
            return self.cr_read32(sel);
        }
        match sel {
            TRIO_CR_GW_LOCK => {
                if self.wedge == Some(Wedge::GatewayLockStuck) || self.gw_lock {
                    GwLock::ACQUIRED.into_bits()
                } else {
                    0
                }
            }
            TRIO_CR_GW_DATA_LOWER => self.gw_data,
            TRIO_CR_GW_ADDR_LOWER => self.gw_addr,
            TRIO_CR_GW_CTL => self.gw_ctl,
            _ => 0,
        }
    }

    fn cap_space_write(&mut self, sel: u32, value: u32) {
        if self.revision == SocRevision::BlueField2 {
            self.cr_write32(sel, value);
            return;
        }
        match sel {
            TRIO_CR_GW_DATA_LOWER => self.gw_data = value,
            TRIO_CR_GW_ADDR_LOWER => self.gw_addr = value,
            TRIO_CR_GW_CTL => self.gw_ctl = value,
            TRIO_CR_GW_LOCK => {
                if value == GwLock::ACQUIRED.into_bits() {
                    if self.gw_lock {
                        self.counters.violations += 1;
                    }
                    self.gw_lock = true;
                    self.counters.lock_claims += 1;
                } else if value == GwLock::RELEASE.into_bits() {
                    self.counters.lock_releases += 1;
                    self.gw_lock = false;
                } else if value == GwLock::TRIGGER.into_bits() {
                    // Fire the staged transaction. Payloads cross the
                    // gateway in network byte order.
                    if self.gw_ctl == TRIO_CR_GW_READ_4BYTE {
                        self.gw_data = self.cr_read32(self.gw_addr).to_be();
                    } else if self.gw_ctl == TRIO_CR_GW_WRITE_4BYTE {
                        let value = u32::from_be(self.gw_data);
                        self.cr_write32(self.gw_addr, value);
                    }
                }
            }
            _ => {}
        }
    }

    /// 32-bit CR-space semantics shared by the gateway path and the
    /// BlueField-2 direct window.
    fn cr_read32(&mut self, addr: u32) -> u32 {
        match addr & 0xffff {
            RSH_BYTE_ACC_CTL => {
                self.counters.pending_polls += 1;
                if self.wedge == Some(Wedge::PendingStuck) {
                    ByteAccCtl::new().with_pending(true).into_bits()
                } else {
                    0
                }
            }
            RSH_BYTE_ACC_ADDR => self.acc_addr,
            RSH_BYTE_ACC_RDAT => {
                let value = if self.rdat_phase == 0 {
                    self.rdat as u32
                } else {
                    (self.rdat >> 32) as u32
                };
                // The widget advances its word pointer on every read.
                self.rdat_phase += 1;
                value
            }
            RSH_BYTE_ACC_INTERLOCK => {
                if self.wedge == Some(Wedge::InterlockStuck) || self.interlock {
                    0
                } else {
                    // Reading the free interlock grants it.
                    self.interlock = true;
                    self.counters.interlock_grants += 1;
                    RSH_BYTE_ACC_INTERLOCK_READY
                }
            }
            _ => self.cr32.get(&addr).copied().unwrap_or(0),
        }
    }

    fn cr_write32(&mut self, addr: u32, value: u32) {
        match addr & 0xffff {
            RSH_BOOT_FIFO_DATA => match self.fifo_low.take() {
                None => self.fifo_low = Some(value),
                Some(low) => {
                    self.fifo_pushes.push(((value as u64) << 32) | low as u64);
                }
            },
            RSH_BYTE_ACC_ADDR => self.acc_addr = value,
            RSH_BYTE_ACC_CTL => {
                let ctl = ByteAccCtl::from_bits(value);
                if ctl.read_trigger() {
                    self.rdat = self.regs64.get(&self.acc_addr).copied().unwrap_or(0);
                    self.rdat_phase = 0;
                    self.acc_reads.push(self.acc_addr);
                } else {
                    self.wdat_phase = 0;
                }
            }
            RSH_BYTE_ACC_WDAT => {
                if self.wdat_phase == 0 {
                    self.wdat_low = value;
                    self.wdat_phase = 1;
                } else {
                    let combined = ((value as u64) << 32) | self.wdat_low as u64;
                    self.regs64.insert(self.acc_addr, combined);
                    self.acc_writes.push((self.acc_addr, combined));
                    self.wdat_phase = 0;
                }
            }
            RSH_BYTE_ACC_INTERLOCK => {
                if value == 0 {
                    self.counters.interlock_releases += 1;
                    self.interlock = false;
                }
            }
            _ => {
                self.cr32.insert(addr, value);
            }
        }
    }
}

impl ConfigSpacePort for Arc<SimSoc> {
    fn cfg_read(&self, offset: u32) -> io::Result<u32> {
        let state = self.state.lock();
        match offset {
            MLNX_DATA => Ok(state.data_latch),
            _ => Ok(0),
        }
    }

    fn cfg_write(&self, offset: u32, value: u32) -> io::Result<()> {
        let mut state = self.state.lock();
        match offset {
            MLNX_DATA => {
                state.staged_data = value;
                Ok(())
            }
            MLNX_ADDR => {
                if value & MLNX_CAP_READ != 0 {
                    let sel = value & !MLNX_CAP_READ;
                    state.begin_op(CapOp::Read { sel })?;
                    state.data_latch = state.cap_space_read(sel);
                } else {
                    let data = state.staged_data;
                    state.begin_op(CapOp::Write { sel: value, value: data })?;
                    state.cap_space_write(value, data);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
