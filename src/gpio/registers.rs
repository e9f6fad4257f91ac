use std::collections::HashMap;
use std::io;

use crate::error::SetupError;

/// Physical base address of the BCM2835/2836 GPIO peripheral block.
/// Overridable via `HUB75_GPIO_BASE` for bring-up on a different base
/// offset; porting to a different SoC entirely needs new register
/// layout constants, not just a different base address.
pub const GPIO_BASE_DEFAULT: u64 = 0x3f20_0000;

/// Size in bytes of the mapped register window: enough to cover FSEL0-5,
/// SET0/1, and CLR0/1 for all 54 GPIO pins on the chip.
pub const WINDOW_LEN: usize = 160;

/// Function-select register group: 3 bits per pin, 10 pins per 32-bit word.
pub const FSEL_OFFSET: usize = 0x00;
/// Pin-set register: writing a 1 bit drives the corresponding pin high.
pub const SET_OFFSET: usize = 0x1c;
/// Pin-clear register: writing a 1 bit drives the corresponding pin low.
pub const CLR_OFFSET: usize = 0x28;

/// FSEL field value for an input pin.
pub const FSEL_INPUT: u32 = 0b000;
/// FSEL field value for an output pin.
pub const FSEL_OUTPUT: u32 = 0b001;

/// Typed 32-bit read/modify/write over a fixed-size register window.
///
/// Implementors need not be `Sync`; the pin driver is the sole owner and
/// serializes all access. No locking is provided here since the hardware
/// has no notion of contention to arbitrate.
pub trait Registers {
    /// Reads the 32-bit word at `offset`. `offset` must be 4-byte aligned
    /// and within the mapped window.
    fn read_u32(&self, offset: usize) -> u32;

    /// Writes `value` to the 32-bit word at `offset`. `offset` must be
    /// 4-byte aligned and within the mapped window.
    fn write_u32(&mut self, offset: usize, value: u32);
}

fn check_offset(offset: usize) {
    assert!(offset % 4 == 0, "register offset {offset} is not 4-byte aligned");
    assert!(
        offset + 4 <= WINDOW_LEN,
        "register offset {offset} is out of bounds of the {WINDOW_LEN}-byte window"
    );
}

/// A memory-mapped window onto the GPIO peripheral register block.
///
/// Opens `/dev/mem` and maps `WINDOW_LEN` bytes at [`GPIO_BASE_DEFAULT`] (or
/// the `HUB75_GPIO_BASE` override), `PROT_READ | PROT_WRITE`, `MAP_SHARED`.
/// Construction is the only fallible operation; reads and writes after
/// that are raw memory accesses and cannot fail.
pub struct RegisterWindow {
    ptr: *mut u8,
    fd: libc::c_int,
}

// SAFETY: the mapped region is a hardware register window; nothing here is
// thread-local, and the pin driver is responsible for serializing access as
// documented on `Registers`.
unsafe impl Send for RegisterWindow {}

impl RegisterWindow {
    /// Opens `/dev/mem` and maps the GPIO register window.
    pub fn open() -> Result<Self, SetupError> {
        let base = gpio_base();

        // SAFETY: `/dev/mem` is opened O_SYNC so that the mapping bypasses
        // the page cache, as is required for a device register window.
        let fd = unsafe {
            libc::open(
                c"/dev/mem".as_ptr(),
                libc::O_RDWR | libc::O_SYNC | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(SetupError::MmapFailed {
                errno: io::Error::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }

        // SAFETY: fd is a valid, just-opened descriptor; WINDOW_LEN and base
        // are fixed, known-good constants for this hardware target.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                WINDOW_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                base as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            let errno = io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            // SAFETY: fd was just opened by us.
            unsafe { libc::close(fd) };
            return Err(SetupError::MmapFailed { errno });
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            fd,
        })
    }

    /// Unmaps the register window. Idempotent: calling this more than once
    /// (or dropping after calling it) is a no-op.
    pub fn unmap(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr/len came from a matching successful mmap call.
            unsafe { libc::munmap(self.ptr as *mut libc::c_void, WINDOW_LEN) };
            self.ptr = std::ptr::null_mut();
        }
        if self.fd >= 0 {
            // SAFETY: fd was opened by this struct and is closed at most once.
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }

    fn word_ptr(&self, offset: usize) -> *mut u32 {
        // SAFETY: caller has already validated `offset` via check_offset.
        unsafe { self.ptr.add(offset) as *mut u32 }
    }
}

fn gpio_base() -> u64 {
    match std::env::var("HUB75_GPIO_BASE") {
        Ok(v) => {
            let trimmed = v.trim();
            let parsed = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .map(|hex| u64::from_str_radix(hex, 16))
                .unwrap_or_else(|| trimmed.parse());
            parsed.unwrap_or(GPIO_BASE_DEFAULT)
        }
        Err(_) => GPIO_BASE_DEFAULT,
    }
}

impl Registers for RegisterWindow {
    fn read_u32(&self, offset: usize) -> u32 {
        check_offset(offset);
        // SAFETY: offset bounds were checked above; the region is mapped
        // for the lifetime of `self`.
        unsafe { std::ptr::read_volatile(self.word_ptr(offset)) }
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        check_offset(offset);
        // SAFETY: offset bounds were checked above; the region is mapped
        // for the lifetime of `self`.
        unsafe { std::ptr::write_volatile(self.word_ptr(offset), value) };
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        self.unmap();
    }
}

/// In-memory register window used by unit tests. Tracks a write count per
/// offset so tests can assert on write-elision behavior without real
/// hardware.
#[derive(Debug, Default)]
pub struct FakeRegisters {
    words: [u32; WINDOW_LEN / 4],
    pub write_counts: HashMap<usize, u32>,
}

impl FakeRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes_to(&self, offset: usize) -> u32 {
        self.write_counts.get(&offset).copied().unwrap_or(0)
    }

    pub fn total_writes(&self) -> u32 {
        self.write_counts.values().sum()
    }
}

impl Registers for FakeRegisters {
    fn read_u32(&self, offset: usize) -> u32 {
        check_offset(offset);
        self.words[offset / 4]
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        check_offset(offset);
        self.words[offset / 4] = value;
        *self.write_counts.entry(offset).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_registers_round_trip() {
        let mut regs = FakeRegisters::new();
        regs.write_u32(SET_OFFSET, 0x1234);
        assert_eq!(regs.read_u32(SET_OFFSET), 0x1234);
        assert_eq!(regs.writes_to(SET_OFFSET), 1);
        assert_eq!(regs.writes_to(CLR_OFFSET), 0);
    }

    #[test]
    #[should_panic(expected = "aligned")]
    fn unaligned_offset_panics() {
        let regs = FakeRegisters::new();
        regs.read_u32(1);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_offset_panics() {
        let regs = FakeRegisters::new();
        regs.read_u32(WINDOW_LEN);
    }
}
