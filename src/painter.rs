use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, info};

use crate::error::SetupError;
use crate::frame::{Frame, HEIGHT, WIDTH};
use crate::gpio::{PinDriver, Registers};
use crate::timer::IntervalTimer;

// Pin assignment, fixed at compile time: this core drives one specific
// panel wiring, adopted verbatim from the original implementation's
// constants (examples/original_source/main.go).
const PIN_R1: u8 = 5;
const PIN_G1: u8 = 13;
const PIN_B1: u8 = 6;
const PIN_R2: u8 = 12;
const PIN_G2: u8 = 16;
const PIN_B2: u8 = 23;
const PIN_OE: u8 = 4;
const PIN_CLK: u8 = 17;
const PIN_LAT: u8 = 21;
const PIN_A0: u8 = 22;
const PIN_A1: u8 = 26;
const PIN_A2: u8 = 27;
const PIN_A3: u8 = 20;

const NON_OE_PINS: [u8; 12] = [
    PIN_A0, PIN_A1, PIN_A2, PIN_A3, PIN_R1, PIN_G1, PIN_B1, PIN_R2, PIN_G2, PIN_B2, PIN_CLK,
    PIN_LAT,
];

const DATA_MASK: u32 = (1 << PIN_R1)
    | (1 << PIN_G1)
    | (1 << PIN_B1)
    | (1 << PIN_R2)
    | (1 << PIN_G2)
    | (1 << PIN_B2);

/// Number of rows per half-panel: the panel's top and bottom halves are
/// addressed together, so a full scan only needs half of HEIGHT.
const ROWS_PER_HALF: usize = HEIGHT / 2;
/// Number of BCM bit-planes, planes 1..=3.
const PLANES: std::ops::RangeInclusive<u8> = 1..=3;

/// Shared handle to the latest submitted frame and the termination flag:
/// a mutex-guarded latest-frame slot plus a condition variable for the
/// initial blocking receive.
pub(crate) struct Shared {
    slot: Mutex<Option<Frame>>,
    slot_cv: Condvar,
    terminate: AtomicBool,
    term_cv: Condvar,
    term_mutex: Mutex<()>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            slot_cv: Condvar::new(),
            terminate: AtomicBool::new(false),
            term_cv: Condvar::new(),
            term_mutex: Mutex::new(()),
        }
    }

    /// Producer side of the single-slot frame channel: overwrites whatever
    /// is currently waiting, so the painter only ever sees the latest
    /// submitted frame, never a backlog of stale ones.
    pub(crate) fn submit(&self, frame: Frame) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(frame);
        self.slot_cv.notify_one();
    }

    /// Non-blocking peek used by the painter's steady-state loop.
    fn try_take(&self) -> Option<Frame> {
        self.slot.lock().unwrap().take()
    }

    /// Blocking receive used once at startup: the painter has nothing to
    /// draw until the first frame arrives, so it parks here rather than
    /// spinning.
    fn take_blocking(&self) -> Frame {
        let mut slot = self.slot.lock().unwrap();
        while slot.is_none() {
            slot = self.slot_cv.wait(slot).unwrap();
        }
        slot.take().unwrap()
    }

    pub(crate) fn signal_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.term_cv.notify_all();
    }

    fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }
}

/// Outcome of the painter thread, reported once on the startup channel.
pub(crate) enum StartupReport {
    Primed,
    Failed(SetupError),
}

/// Runs the row-scan and binary-code-modulation bit-plane refresh loop
/// that drives the panel. Generic over [`Registers`] and [`IntervalTimer`]
/// so the full loop, including the startup sequence, the BCM math, and
/// the shutdown ordering, can be exercised in tests against fakes.
pub struct Painter<R: Registers, T: IntervalTimer> {
    pins: PinDriver<R>,
    timer: T,
    frame: Frame,
}

impl<R: Registers, T: IntervalTimer> Painter<R, T> {
    /// Builds a painter and brings the panel to a known state: acquire
    /// the 12 non-OE pins low, flush the shift registers with `width`
    /// CLK pulses so stale data already latched in the panel is pushed
    /// out, latch once, then acquire OE and enable it.
    pub fn start(regs: R, timer: T) -> Self {
        let mut pins = PinDriver::new(regs);

        for pin in NON_OE_PINS {
            pins.acquire(pin);
        }
        for _ in 0..WIDTH {
            pins.strobe(PIN_CLK);
        }
        pins.strobe(PIN_LAT);

        pins.acquire(PIN_OE);
        pins.set(PIN_OE, false); // active-low: enable

        debug!("painter primed: {WIDTH}x{HEIGHT} panel, {ROWS_PER_HALF} scan rows");

        Self {
            pins,
            timer,
            frame: Frame::blank(),
        }
    }

    /// Runs one full refresh pass (all rows, all bit-planes) over the
    /// current frame, waiting for the interval timer between cells.
    fn paint_frame(&mut self) {
        for y in 0..ROWS_PER_HALF {
            for plane in PLANES {
                let threshold = plane as u32 * (256 / 4);

                for x in 0..WIDTH {
                    let top = self.frame.get(x, y);
                    let bottom = self.frame.get(x, y + ROWS_PER_HALF);

                    let mut states = 0u32;
                    if top.r as u32 >= threshold {
                        states |= 1 << PIN_R1;
                    }
                    if top.g as u32 >= threshold {
                        states |= 1 << PIN_G1;
                    }
                    if top.b as u32 >= threshold {
                        states |= 1 << PIN_B1;
                    }
                    if bottom.r as u32 >= threshold {
                        states |= 1 << PIN_R2;
                    }
                    if bottom.g as u32 >= threshold {
                        states |= 1 << PIN_G2;
                    }
                    if bottom.b as u32 >= threshold {
                        states |= 1 << PIN_B2;
                    }

                    self.pins.set_mask(states, DATA_MASK);
                    self.pins.strobe(PIN_CLK);
                }

                self.timer.wait();

                if plane == 1 {
                    self.pins.set(PIN_OE, true); // blank before address/latch change
                    self.set_row_address(y);
                }

                self.pins.strobe(PIN_LAT);

                if plane == 1 {
                    self.pins.set(PIN_OE, false);
                }
            }
        }
    }

    fn set_row_address(&mut self, y: usize) {
        self.pins.set(PIN_A0, y & 0b0001 != 0);
        self.pins.set(PIN_A1, y & 0b0010 != 0);
        self.pins.set(PIN_A2, y & 0b0100 != 0);
        self.pins.set(PIN_A3, y & 0b1000 != 0);
    }

    /// Ordered shutdown: release OE first so the panel goes dark before
    /// any other pin's function changes, then release the remaining
    /// pins, then unmap the register window.
    fn shutdown(mut self) {
        self.pins.release(PIN_OE);
        self.pins.close();
        // `self` drops here; PinDriver's own Drop is a no-op since close()
        // already released everything, and RegisterWindow's Drop unmaps
        // the window.
    }

    /// Entry point for the dedicated painter thread: INIT -> PRIMED ->
    /// RUNNING -> SHUTDOWN -> TERMINATED.
    pub(crate) fn run(regs: R, timer: T, shared: Arc<Shared>, report: std::sync::mpsc::Sender<StartupReport>) {
        let mut painter = Self::start(regs, timer);
        if report.send(StartupReport::Primed).is_err() {
            return;
        }

        painter.frame = shared.take_blocking();
        info!("painter running");

        loop {
            if shared.should_terminate() {
                break;
            }
            if let Some(next) = shared.try_take() {
                painter.frame = next;
            }
            painter.paint_frame();
        }

        info!("painter shutting down");
        painter.shutdown();
        let _lock = shared.term_mutex.lock().unwrap();
        shared.term_cv.notify_all();
    }
}
