//! Translation requests sent from a forked child back to the engine.
//!
//! A request names one code region by its `(pc, cs_base, flags)` triple and
//! asks the engine to have it translated before the next fork. Requests are
//! fire-and-forget and travel as fixed-size records:
//!
//! ```text
//! ┌────────┬──────────┬──────────┬──────────┐
//! │ global │    pc    │ cs_base  │  flags   │
//! │ 1 byte │ 8 bytes  │ 8 bytes  │ 8 bytes  │
//! └────────┴──────────┴──────────┴──────────┘
//!   bincode fixed-int, little endian: 25 bytes
//! ```
//!
//! Records are smaller than `PIPE_BUF`, so a single `write` either delivers
//! a whole record or nothing the reader can mistake for one.

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Encoded size of a [`TranslationRequest`].
pub const REQUEST_WIRE_LEN: usize = 25;

/// Identity of a translated code region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TranslationKey {
    /// Guest program counter of the region start
    pub pc: u64,
    /// Code segment base (zero on flat address spaces)
    pub cs_base: u64,
    /// Translation attribute flags (mode, privilege, ...)
    pub flags: u64,
}

impl TranslationKey {
    pub fn new(pc: u64, cs_base: u64, flags: u64) -> Self {
        Self { pc, cs_base, flags }
    }
}

/// Message sent to the engine to request a translation ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Bookkeeping-only request keyed by `pc`; no code is generated
    pub global: bool,
    pub pc: u64,
    pub cs_base: u64,
    pub flags: u64,
}

impl TranslationRequest {
    /// Request translation of a code region.
    pub fn block(key: TranslationKey) -> Self {
        Self {
            global: false,
            pc: key.pc,
            cs_base: key.cs_base,
            flags: key.flags,
        }
    }

    /// Request a global node update for `pc`.
    pub fn global(pc: u64) -> Self {
        Self {
            global: true,
            pc,
            cs_base: 0,
            flags: 0,
        }
    }

    pub fn key(&self) -> TranslationKey {
        TranslationKey::new(self.pc, self.cs_base, self.flags)
    }

    /// Encode into a fixed-size wire record.
    pub fn encode(&self) -> [u8; REQUEST_WIRE_LEN] {
        let mut buf = [0u8; REQUEST_WIRE_LEN];
        // Fixed-int encoding of a bool and three u64s always fits the buffer.
        if let Err(e) = bincode::serialize_into(&mut buf[..], self) {
            log::error!("[TslChannel] request encoding overflowed: {}", e);
        }
        buf
    }

    /// Decode a wire record.
    pub fn decode(buf: &[u8; REQUEST_WIRE_LEN]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(buf)?)
    }
}
