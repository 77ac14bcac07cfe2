//! Stand-in translation engine.
//!
//! Produces a small deterministic unit per key so that cache behavior can be
//! observed from the outside. Anything at or above the mapped limit is
//! reported as unmapped.

use std::sync::atomic::{AtomicU64, Ordering};

use forksrv::{TranslateError, TranslationKey, Translator};

/// Bytes emitted per unit: pc, then `cs_base ^ flags`.
const UNIT_LEN: usize = 16;

pub struct FlatTranslator {
    mapped_limit: u64,
    calls: AtomicU64,
}

impl FlatTranslator {
    pub fn new(mapped_limit: u64) -> Self {
        Self {
            mapped_limit,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of units produced by this process.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Translator for FlatTranslator {
    fn translate(&self, key: &TranslationKey) -> Result<Vec<u8>, TranslateError> {
        if key.pc >= self.mapped_limit {
            return Err(TranslateError::Unmapped(key.pc));
        }

        let mut code = Vec::with_capacity(UNIT_LEN);
        code.extend_from_slice(&key.pc.to_le_bytes());
        code.extend_from_slice(&(key.cs_base ^ key.flags).to_le_bytes());
        self.calls.fetch_add(1, Ordering::Relaxed);

        log::debug!(
            "[Translator] {:#x} -> {} (pid {})",
            key.pc,
            hex::encode(&code),
            std::process::id()
        );
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_are_deterministic() {
        let translator = FlatTranslator::new(0x1_0000);
        let key = TranslationKey::new(0x1234, 0x10, 0x01);

        let a = translator.translate(&key).expect("mapped");
        let b = translator.translate(&key).expect("mapped");
        assert_eq!(a, b);
        assert_eq!(a.len(), UNIT_LEN);
        assert_eq!(&a[..8], &0x1234u64.to_le_bytes());
        assert_eq!(&a[8..], &0x11u64.to_le_bytes());
        assert_eq!(translator.calls(), 2);
    }

    #[test]
    fn test_unmapped_pc() {
        let translator = FlatTranslator::new(0x1000);
        let err = translator
            .translate(&TranslationKey::new(0x1000, 0, 0))
            .unwrap_err();
        assert!(matches!(err, TranslateError::Unmapped(0x1000)));
        assert_eq!(translator.calls(), 0);
    }
}
