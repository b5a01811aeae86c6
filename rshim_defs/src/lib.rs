// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register offsets, bit patterns, and hardware IDs for the rshim
//! "live-fish" indirect access path on BlueField SoCs.
//!
//! Everything in this crate is a wire-protocol constant fixed by the
//! hardware. Software policy (retry bounds, throttling) lives in the
//! driver crate.

#![forbid(unsafe_code)]

/// Mellanox PCI vendor ID.
pub const MLNX_VENDOR_ID: u16 = 0x15b3;
/// BlueField-1 device ID (legacy gateway wire protocol).
pub const BLUEFIELD1_DEVICE_ID: u16 = 0x0211;
/// BlueField-2 device ID (direct-window wire protocol).
pub const BLUEFIELD2_DEVICE_ID: u16 = 0x0214;

pub mod cap {
    //! The hidden Mellanox address/data capability in PCI config space.
    //!
    //! All indirect accesses funnel through this register pair: the
    //! target offset is selected via [`MLNX_ADDR`] and the payload
    //! moves through [`MLNX_DATA`].

    /// Address/selector register offset in config space.
    pub const MLNX_ADDR: u32 = 0x58;
    /// Data register offset in config space.
    pub const MLNX_DATA: u32 = 0x5c;
    /// LSB of the selector, set for a read and clear for a write.
    pub const MLNX_CAP_READ: u32 = 0x1;
}

pub mod gw {
    //! The TRIO CR gateway register block, reachable through the
    //! capability pair on BlueField-1 only.

    #![expect(missing_docs)] // register names are self-explanatory

    use bitfield_struct::bitfield;

    pub const TRIO_CR_GW_LOCK: u32 = 0xe38a0;
    pub const TRIO_CR_GW_LOCK_CPY: u32 = 0xe38a4;
    pub const TRIO_CR_GW_DATA_UPPER: u32 = 0xe38ac;
    pub const TRIO_CR_GW_DATA_LOWER: u32 = 0xe38b0;
    pub const TRIO_CR_GW_CTL: u32 = 0xe38b4;
    pub const TRIO_CR_GW_ADDR_UPPER: u32 = 0xe38b8;
    pub const TRIO_CR_GW_ADDR_LOWER: u32 = 0xe38bc;

    /// Gateway control opcode for a 4-byte read.
    pub const TRIO_CR_GW_READ_4BYTE: u32 = 0x6;
    /// Gateway control opcode for a 4-byte write.
    pub const TRIO_CR_GW_WRITE_4BYTE: u32 = 0x2;

    /// The gateway lock register word.
    ///
    /// Written with [`ACQUIRED`](GwLock::ACQUIRED) to claim the
    /// gateway, zero to release it, and [`TRIGGER`](GwLock::TRIGGER)
    /// to fire the staged transaction.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct GwLock {
        #[bits(29)]
        _reserved: u32,
        /// Transaction-in-flight bits.
        #[bits(2)]
        pub busy: u8,
        /// Set while some accessor holds the gateway.
        pub locked: bool,
    }

    impl GwLock {
        /// Pattern claiming the gateway lock (`0x8000_0000`).
        pub const ACQUIRED: Self = Self::new().with_locked(true);
        /// Pattern releasing the gateway lock.
        pub const RELEASE: Self = Self::new();
        /// Pattern firing the staged transaction (`0xe000_0000`).
        pub const TRIGGER: Self = Self::new().with_locked(true).with_busy(0b11);
    }
}

pub mod rsh {
    //! Registers within the rshim channel of the SoC CR space.

    use bitfield_struct::bitfield;

    /// Boot FIFO data register. Two back-to-back 4-byte writes latch
    /// into one 8-byte FIFO push, so this offset bypasses the Byte
    /// Access Widget entirely.
    pub const RSH_BOOT_FIFO_DATA: u32 = 0x408;

    /// Byte Access Widget control/status register.
    pub const RSH_BYTE_ACC_CTL: u32 = 0x490;
    /// Byte Access Widget write-data register.
    pub const RSH_BYTE_ACC_WDAT: u32 = 0x498;
    /// Byte Access Widget read-data register.
    pub const RSH_BYTE_ACC_RDAT: u32 = 0x4a0;
    /// Byte Access Widget target-address register.
    pub const RSH_BYTE_ACC_ADDR: u32 = 0x4a8;
    /// Byte Access Widget interlock register (BlueField-2 only).
    pub const RSH_BYTE_ACC_INTERLOCK: u32 = 0x4b0;
    /// Interlock ready bit, set in the read value once the interlock
    /// has been granted to the reader.
    pub const RSH_BYTE_ACC_INTERLOCK_READY: u32 = 0x1;

    /// Harmless scratch register, used as the drain-read target for
    /// the BlueField-1 posted-write throttle.
    pub const RSH_SCRATCHPAD: u32 = 0xc20;

    /// The Byte Access Widget control word.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct ByteAccCtl {
        #[bits(28)]
        _reserved: u32,
        /// Access size select: 4-byte sub-accesses.
        pub size_4byte: bool,
        /// Set while the widget is busy with a sub-access.
        pub pending: bool,
        /// Fires a read transaction at the staged address.
        pub read_trigger: bool,
        _unused: bool,
    }
}

/// CR channel number reserved for gateway/widget register traffic.
pub const RSHIM_CHANNEL: u8 = 1;

/// Base of the BlueField-2 direct register window in capability
/// selector space. The low 16 bits of the target address index into
/// the window.
pub const CRSPACE_RSH_CHANNEL1_BASE: u32 = 0x31_0000;

/// Mask folding a CR-space address into its channel-relative offset.
pub const CHANNEL_OFFSET_MASK: u32 = 0xffff;

/// Maps a logical channel number to its base in the SoC's flat CR
/// address space.
pub const fn channel_base(chan: u8) -> u32 {
    (chan as u32) << 16
}
