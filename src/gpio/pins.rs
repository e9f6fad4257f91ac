use std::collections::HashMap;

use super::registers::{Registers, CLR_OFFSET, FSEL_INPUT, FSEL_OFFSET, FSEL_OUTPUT, SET_OFFSET};

/// Largest GPIO pin number addressable within the 160-byte register window
/// this driver maps.
pub const MAX_PIN: u8 = 31;

/// Owns a register window and tracks which of its pins are currently
/// configured as outputs, with the last logical level written to each.
///
/// Generic over [`Registers`] so tests can drive it against
/// [`super::registers::FakeRegisters`] instead of a real mmap'd window.
pub struct PinDriver<R: Registers> {
    regs: R,
    /// pin -> last commanded logical level, present iff the pin is
    /// currently acquired.
    levels: HashMap<u8, bool>,
}

impl<R: Registers> PinDriver<R> {
    pub fn new(regs: R) -> Self {
        Self {
            regs,
            levels: HashMap::new(),
        }
    }

    /// Acquires `pin` as an output, driving it low. `pin` must be `<=
    /// MAX_PIN`; out of range is a programmer error.
    /// Acquiring an already-acquired pin is not guaranteed idempotent,
    /// so callers must not acquire twice.
    pub fn acquire(&mut self, pin: u8) {
        assert!(pin <= MAX_PIN, "pin {pin} is out of range (0..={MAX_PIN})");
        self.write_level(pin, false);
        self.levels.insert(pin, false);
        self.set_function(pin, FSEL_OUTPUT);
    }

    /// Releases `pin`, returning its function to input. No-op if `pin` is
    /// not currently acquired.
    pub fn release(&mut self, pin: u8) {
        if self.levels.remove(&pin).is_none() {
            return;
        }
        self.set_function(pin, FSEL_INPUT);
    }

    /// Sets a single acquired pin to `level`. If the cached last level
    /// already equals `level`, no register write occurs, since the GPIO
    /// level is already where the caller wants it. Panics if `pin` was
    /// not acquired (programmer error).
    pub fn set(&mut self, pin: u8, level: bool) {
        let last = *self
            .levels
            .get(&pin)
            .unwrap_or_else(|| panic!("pin {pin} was not acquired"));
        if last == level {
            return;
        }
        self.write_level(pin, level);
        self.levels.insert(pin, level);
    }

    /// Batched set: pins in `mask` take the level given by the
    /// corresponding bit of `states`; pins not in `mask` are untouched.
    /// Writes at most two registers (SET, CLR), each elided when its
    /// operand is zero. Does not consult or update the per-pin cache;
    /// callers using `set_mask` take over tracking those pins' levels for
    /// the duration of the batch.
    pub fn set_mask(&mut self, states: u32, mask: u32) {
        let set_bits = states & mask;
        let clr_bits = !states & mask;
        if set_bits != 0 {
            self.regs.write_u32(SET_OFFSET, set_bits);
        }
        if clr_bits != 0 {
            self.regs.write_u32(CLR_OFFSET, clr_bits);
        }
    }

    /// Sets `pin` high then immediately low. Equivalent in observable
    /// register writes to `set(pin, true); set(pin, false)`.
    pub fn strobe(&mut self, pin: u8) {
        self.set(pin, true);
        self.set(pin, false);
    }

    /// Releases every acquired pin (returning FSEL to input) and unmaps
    /// the register window. Idempotent.
    pub fn close(&mut self) {
        let pins: Vec<u8> = self.levels.keys().copied().collect();
        for pin in pins {
            self.release(pin);
        }
    }

    /// Number of pins currently acquired. Used by the façade/tests to
    /// confirm a clean shutdown leaves no pin configured as an output.
    pub fn acquired_count(&self) -> usize {
        self.levels.len()
    }

    /// Access to the underlying register window, e.g. so the painter can
    /// explicitly unmap it after `close()`.
    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    fn write_level(&mut self, pin: u8, level: bool) {
        let bit = 1u32 << pin;
        if level {
            self.regs.write_u32(SET_OFFSET, bit);
        } else {
            self.regs.write_u32(CLR_OFFSET, bit);
        }
    }

    fn set_function(&mut self, pin: u8, mode: u32) {
        let word = FSEL_OFFSET + 4 * (pin as usize / 10);
        let shift = 3 * (pin as u32 % 10);
        let current = self.regs.read_u32(word);
        let updated = (current & !(0b111 << shift)) | (mode << shift);
        self.regs.write_u32(word, updated);
    }
}

impl<R: Registers> Drop for PinDriver<R> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::registers::FakeRegisters;

    fn driver() -> PinDriver<FakeRegisters> {
        PinDriver::new(FakeRegisters::new())
    }

    #[test]
    fn acquire_drives_low_and_sets_output_function() {
        let mut d = driver();
        d.acquire(9);
        // FSEL word 0, bits 27..30 for pin 9.
        let fsel = d.registers_mut().read_u32(FSEL_OFFSET);
        assert_eq!((fsel >> 27) & 0b111, FSEL_OUTPUT);
        assert_eq!(d.registers_mut().writes_to(CLR_OFFSET), 1);
    }

    #[test]
    fn fsel_pin_9_and_10_touch_only_their_own_field() {
        let mut d = driver();
        d.acquire(9);
        d.acquire(10);
        let word0 = d.registers_mut().read_u32(FSEL_OFFSET);
        let word1 = d.registers_mut().read_u32(FSEL_OFFSET + 4);
        assert_eq!((word0 >> 27) & 0b111, FSEL_OUTPUT, "pin 9 in word 0 bits 27..30");
        assert_eq!(word0 & !(0b111 << 27), 0, "no other bits in word 0 touched");
        assert_eq!((word1 >> 0) & 0b111, FSEL_OUTPUT, "pin 10 in word 1 bits 0..3");
        assert_eq!(word1 & !0b111, 0, "no other bits in word 1 touched");
    }

    #[test]
    fn acquire_31_succeeds() {
        let mut d = driver();
        d.acquire(31);
        assert_eq!(d.acquired_count(), 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn acquire_32_panics() {
        let mut d = driver();
        d.acquire(32);
    }

    #[test]
    #[should_panic(expected = "not acquired")]
    fn set_on_unacquired_pin_panics() {
        let mut d = driver();
        d.set(3, true);
    }

    #[test]
    fn redundant_set_is_elided() {
        let mut d = driver();
        d.acquire(5);
        d.registers_mut().write_counts.clear();
        d.set(5, false);
        d.set(5, false);
        assert_eq!(d.registers_mut().writes_to(CLR_OFFSET), 0);

        d.set(5, true);
        assert_eq!(d.registers_mut().writes_to(SET_OFFSET), 1);
        d.set(5, true);
        assert_eq!(d.registers_mut().writes_to(SET_OFFSET), 1, "second identical set is elided");
    }

    #[test]
    fn strobe_matches_set_true_then_false() {
        let mut a = driver();
        a.acquire(2);
        a.registers_mut().write_counts.clear();
        a.strobe(2);
        let strobe_set = a.registers_mut().writes_to(SET_OFFSET);
        let strobe_clr = a.registers_mut().writes_to(CLR_OFFSET);

        let mut b = driver();
        b.acquire(2);
        b.registers_mut().write_counts.clear();
        b.set(2, true);
        b.set(2, false);
        assert_eq!(strobe_set, b.registers_mut().writes_to(SET_OFFSET));
        assert_eq!(strobe_clr, b.registers_mut().writes_to(CLR_OFFSET));
    }

    #[test]
    fn set_mask_elides_zero_operand_writes() {
        let mut d = driver();
        d.acquire(0);
        d.acquire(1);
        d.registers_mut().write_counts.clear();

        // All pins in mask should be driven low: SET elided, CLR written once.
        d.set_mask(0, 0b11);
        assert_eq!(d.registers_mut().writes_to(SET_OFFSET), 0);
        assert_eq!(d.registers_mut().writes_to(CLR_OFFSET), 1);
    }

    #[test]
    fn close_releases_all_pins_and_is_idempotent() {
        let mut d = driver();
        d.acquire(0);
        d.acquire(1);
        d.close();
        assert_eq!(d.acquired_count(), 0);
        let fsel_after_first_close = d.registers_mut().read_u32(FSEL_OFFSET);

        d.close();
        assert_eq!(d.acquired_count(), 0);
        assert_eq!(d.registers_mut().read_u32(FSEL_OFFSET), fsel_after_first_close);
    }
}
