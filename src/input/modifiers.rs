//! Virtual modifier table
//!
//! Assistive key grabs can use any key as a modifier (e.g. "Insert + T").
//! Hardware only exposes a handful of modifier bits, so the bridge hands
//! out synthetic bits from a reserved high range and remembers which key
//! each one stands for. The compositor never sees those bits: grab
//! requests carry the real modifiers plus the list of keys that act as
//! modifiers.

use log::{debug, warn};

use crate::constants::{
    MODIFIER_NUMLOCK, VIRTUAL_MODIFIER_END, VIRTUAL_MODIFIER_FIRST, XKB_KEYCODE_OFFSET,
};

/// One key acting as a modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualModifierEntry {
    /// XKB key code of the key
    pub key_code: u32,
    /// Single bit allocated from the virtual range
    pub modifier_bit: u32,
}

/// Modifier mask split into its protocol-level parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitModifiers {
    /// Hardware modifier bits (virtual range masked out)
    pub real_mods: u32,
    /// Wire key codes of the keys whose virtual bit was set
    pub virtual_keys: Vec<u32>,
}

/// Key code ↔ virtual modifier bit association
#[derive(Debug, Clone)]
pub struct VirtualModifierTable {
    /// Live entries in allocation order
    entries: Vec<VirtualModifierEntry>,
    /// Lowest bit of the range
    first: u32,
    /// Exclusive upper bound of the range
    end: u32,
    /// Every bit of the range
    range_mask: u32,
}

impl Default for VirtualModifierTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualModifierTable {
    /// Table over the standard AT-SPI virtual range (`0x1000..0x10000`)
    pub fn new() -> Self {
        Self::with_range(VIRTUAL_MODIFIER_FIRST, VIRTUAL_MODIFIER_END)
    }

    /// Table over a custom range of single-bit values `first..end`
    ///
    /// `first` must be a power of two.
    pub fn with_range(first: u32, end: u32) -> Self {
        debug_assert!(first.is_power_of_two());
        let mut range_mask = 0;
        let mut bit = first;
        while bit != 0 && bit < end {
            range_mask |= bit;
            bit = bit.checked_shl(1).unwrap_or(0);
        }
        Self {
            entries: Vec::new(),
            first,
            end,
            range_mask,
        }
    }

    /// Bits covered by the virtual range
    pub fn range_mask(&self) -> u32 {
        self.range_mask
    }

    /// Return the bit for `key_code`, allocating one if needed
    ///
    /// Returns 0 when every bit of the range is taken; 0 means
    /// "no modifier assigned" and is never recorded.
    pub fn map(&mut self, key_code: u32) -> u32 {
        if let Some(bit) = self.lookup(key_code) {
            return bit;
        }

        match self.next_free_bit() {
            Some(bit) => {
                debug!("Virtual modifier 0x{:x} -> key code {}", bit, key_code);
                self.entries.push(VirtualModifierEntry {
                    key_code,
                    modifier_bit: bit,
                });
                bit
            }
            None => {
                warn!("No virtual modifier bits left for key code {}", key_code);
                0
            }
        }
    }

    /// Release the bit held by `key_code` (no-op when unmapped)
    pub fn unmap(&mut self, key_code: u32) {
        if let Some(pos) = self.entries.iter().position(|e| e.key_code == key_code) {
            let entry = self.entries.remove(pos);
            debug!(
                "Virtual modifier 0x{:x} released (key code {})",
                entry.modifier_bit, key_code
            );
        }
    }

    /// Bit currently assigned to `key_code`
    pub fn lookup(&self, key_code: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.key_code == key_code)
            .map(|e| e.modifier_bit)
    }

    /// Split an AT-SPI modifier mask into real mods and virtual keys
    pub fn split_mask(&self, mask: u32) -> SplitModifiers {
        let virtual_keys = self
            .entries
            .iter()
            .filter(|e| e.modifier_bit & mask != 0)
            .map(|e| e.key_code.saturating_sub(XKB_KEYCODE_OFFSET))
            .collect();

        SplitModifiers {
            real_mods: mask & !self.range_mask,
            virtual_keys,
        }
    }

    pub fn entries(&self) -> &[VirtualModifierEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Num Lock is a fixed reservation even though nobody allocated it
    fn is_in_use(&self, bit: u32) -> bool {
        bit == MODIFIER_NUMLOCK || self.entries.iter().any(|e| e.modifier_bit == bit)
    }

    fn next_free_bit(&self) -> Option<u32> {
        let mut bit = self.first;
        while bit != 0 && bit < self.end {
            if !self.is_in_use(bit) {
                return Some(bit);
            }
            bit = bit.checked_shl(1).unwrap_or(0);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MODIFIER_SHIFT, VIRTUAL_MODIFIER_MASK};

    #[test]
    fn test_distinct_keys_get_distinct_bits() {
        let mut table = VirtualModifierTable::new();
        let bits: Vec<u32> = [118, 66, 77].iter().map(|&k| table.map(k)).collect();

        assert_eq!(bits, vec![0x1000, 0x2000, 0x8000]);
        for bit in &bits {
            assert_ne!(*bit, 0);
            assert_ne!(*bit, MODIFIER_NUMLOCK);
            assert_eq!(bit.count_ones(), 1);
        }
    }

    #[test]
    fn test_map_is_idempotent() {
        let mut table = VirtualModifierTable::new();
        let first = table.map(118);
        assert_eq!(table.map(118), first);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unmapped_bit_is_reused() {
        let mut table = VirtualModifierTable::new();
        let a = table.map(118);
        let _b = table.map(66);
        table.unmap(118);
        assert_eq!(table.lookup(118), None);
        assert_eq!(table.map(77), a);
    }

    #[test]
    fn test_unmap_unknown_key_is_noop() {
        let mut table = VirtualModifierTable::new();
        table.map(118);
        table.unmap(9);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_numlock_bit_never_allocated() {
        let mut table = VirtualModifierTable::new();
        // 0x1000, 0x2000, 0x8000 (0x4000 is Num Lock)
        assert_ne!(table.map(10), 0);
        assert_ne!(table.map(11), 0);
        assert_ne!(table.map(12), 0);
        assert_eq!(table.map(13), 0);
        assert!(table.entries().iter().all(|e| e.modifier_bit != MODIFIER_NUMLOCK));
    }

    #[test]
    fn test_exhausted_toy_range_returns_sentinel() {
        let mut table = VirtualModifierTable::with_range(0x1, 0x10);
        assert_eq!(table.range_mask(), 0xf);
        for key in 20..24 {
            assert_ne!(table.map(key), 0);
        }
        assert_eq!(table.map(24), 0);
        assert_eq!(table.lookup(24), None);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_split_mask() {
        let mut table = VirtualModifierTable::new();
        let insert = table.map(118);
        let _other = table.map(66);

        let split = table.split_mask(MODIFIER_SHIFT | insert);
        assert_eq!(split.real_mods, MODIFIER_SHIFT);
        assert_eq!(split.virtual_keys, vec![110]);
    }

    #[test]
    fn test_split_mask_drops_whole_virtual_range() {
        let table = VirtualModifierTable::new();
        let split = table.split_mask(VIRTUAL_MODIFIER_MASK | MODIFIER_SHIFT);
        assert_eq!(split.real_mods, MODIFIER_SHIFT);
        assert!(split.virtual_keys.is_empty());
    }
}
