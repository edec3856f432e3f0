//! Memory-mapped HEVC decoder device.
//!
//! The hardware exposes two character devices: a register file mapped as
//! 0x10000 bytes of 32-bit registers, and a single 32-bit interrupt status
//! word. Decoding runs in two phases; each phase signals completion by
//! raising its interrupt bit in the status word, and the driver acknowledges
//! it by writing the bit back (write-one-to-clear).

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::Duration;

use crate::error::{DecoderError, Result};
use crate::scaling_list::DecoderScalingList;

pub const REGISTERS_MAPPED_SIZE: usize = 0x10000;
pub const INTERRUPTS_MAPPED_SIZE: usize = 4;

/// Paths and polling parameters of the decoder device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub registers_path: PathBuf,
    pub interrupts_path: PathBuf,
    /// Sleep between two reads of the status word.
    pub poll_step: Duration,
    /// Total time a phase may take before the hardware is considered hung.
    pub poll_budget: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            registers_path: PathBuf::from("/dev/argon-hevcmem"),
            interrupts_path: PathBuf::from("/dev/argon-intcmem"),
            poll_step: Duration::from_micros(125),
            poll_budget: Duration::from_millis(500),
        }
    }
}

impl DeviceConfig {
    pub fn poll_steps(&self) -> u32 {
        if self.poll_step.is_zero() {
            return 1;
        }
        (self.poll_budget.as_nanos() / self.poll_step.as_nanos()).max(1) as u32
    }
}

/// Index of a 32-bit register; the byte offset is `index * 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register(pub u16);

impl Register {
    /// First word of the scaling factor window.
    pub const SCALING_LIST0: Register = Register(0x3C00);

    pub fn offset(self) -> usize {
        self.0 as usize * 4
    }
}

/// Bits of one phase nibble in the status word.
pub mod status {
    pub const INTERRUPT: u32 = 1;
    pub const EDGE: u32 = 2;
    pub const ENABLE: u32 = 4;
    pub const STATUS: u32 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    One,
    Two,
}

impl Phase {
    fn shift(self) -> u32 {
        match self {
            Phase::One => 0,
            Phase::Two => 4,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Phase::One => 1,
            Phase::Two => 2,
        }
    }

    pub fn interrupt_bit(self) -> u32 {
        status::INTERRUPT << self.shift()
    }

    fn other(self) -> Phase {
        match self {
            Phase::One => Phase::Two,
            Phase::Two => Phase::One,
        }
    }
}

/// Snapshot of the interrupt status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStatus(pub u32);

impl DecoderStatus {
    /// The 4-bit nibble of `phase`.
    pub fn nibble(self, phase: Phase) -> u32 {
        (self.0 >> phase.shift()) & 0xF
    }

    pub fn is_complete(self, phase: Phase) -> bool {
        self.0 & phase.interrupt_bit() != 0
    }

    pub fn is_enabled(self, phase: Phase) -> bool {
        self.nibble(phase) & status::ENABLE != 0
    }
}

/// Access to the interrupt status word.
pub trait InterruptStatus {
    fn read_status(&self) -> u32;
    fn write_status(&mut self, value: u32);
}

/// Access to the 32-bit register file.
pub trait RegisterFile {
    fn word_count(&self) -> usize;
    fn read_word(&self, index: usize) -> u32;
    fn write_word(&mut self, index: usize, value: u32);
}

pub trait PollTimer {
    fn sleep(&mut self, step: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl PollTimer for ThreadSleep {
    fn sleep(&mut self, step: Duration) {
        std::thread::sleep(step);
    }
}

/// A shared, read-write memory mapping of a device file.
///
/// Dropping it unmaps the memory first; the file is closed afterwards when
/// the `file` field drops.
pub struct Mapping {
    ptr: NonNull<u32>,
    len: usize,
    path: PathBuf,
    file: File,
}

// The mapping is exclusively owned; nothing else holds the pointer.
unsafe impl Send for Mapping {}

impl Mapping {
    pub fn open(path: &Path, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| DecoderError::DeviceOpen {
                path: path.to_path_buf(),
                source,
            })?;

        let mapped = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if mapped == libc::MAP_FAILED {
            return Err(DecoderError::DeviceMap {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(mapped.cast::<u32>()).ok_or_else(|| DecoderError::DeviceMap {
            path: path.to_path_buf(),
            source: std::io::Error::other("mmap returned a null pointer"),
        })?;

        log::debug!("mapped {} bytes of {}", len, path.display());
        Ok(Self {
            ptr,
            len,
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl RegisterFile for Mapping {
    fn word_count(&self) -> usize {
        self.len / 4
    }

    fn read_word(&self, index: usize) -> u32 {
        if index >= self.word_count() {
            log::warn!("register read 0x{:X} outside of {}", index * 4, self.path.display());
            return 0;
        }
        unsafe { self.ptr.as_ptr().add(index).read_volatile() }
    }

    fn write_word(&mut self, index: usize, value: u32) {
        if index >= self.word_count() {
            log::warn!("register write 0x{:X} outside of {}", index * 4, self.path.display());
            return;
        }
        unsafe { self.ptr.as_ptr().add(index).write_volatile(value) }
    }
}

impl InterruptStatus for Mapping {
    fn read_status(&self) -> u32 {
        self.read_word(0)
    }

    fn write_status(&mut self, value: u32) {
        self.write_word(0, value)
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        let r = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if r != 0 {
            log::warn!(
                "munmap failed for device \"{}\": {}",
                self.path.display(),
                std::io::Error::last_os_error()
            );
        }
    }
}

/// Poll `status` until the interrupt bit of `phase` is raised, then
/// acknowledge it.
///
/// The value written back is the observed status with the *other* phase's
/// interrupt bit masked out, so only the completed bit is cleared.
pub fn wait_for_phase<S: InterruptStatus, T: PollTimer>(
    status: &mut S,
    timer: &mut T,
    phase: Phase,
    config: &DeviceConfig,
) -> Result<DecoderStatus> {
    let bit = phase.interrupt_bit();
    for _ in 0..config.poll_steps() {
        let s = status.read_status();
        if s & bit == 0 {
            timer.sleep(config.poll_step);
            continue;
        }
        status.write_status(s & !phase.other().interrupt_bit());
        return Ok(DecoderStatus(s));
    }
    Err(DecoderError::Timeout {
        phase: phase.number(),
        waited: config.poll_budget,
    })
}

/// The HEVC decoder: a register file plus an interrupt status word.
///
/// Fields drop in declaration order, so teardown unmaps and closes the
/// interrupt endpoint before the register endpoint.
pub struct DecoderDevice<I = Mapping, R = Mapping, T = ThreadSleep> {
    interrupts: I,
    registers: R,
    timer: T,
    config: DeviceConfig,
}

impl DecoderDevice {
    /// Open both endpoints. When the second one fails the first is torn
    /// down before the error is returned.
    pub fn open(config: DeviceConfig) -> Result<Self> {
        let registers = Mapping::open(&config.registers_path, REGISTERS_MAPPED_SIZE)?;
        let interrupts = Mapping::open(&config.interrupts_path, INTERRUPTS_MAPPED_SIZE)?;
        Ok(Self::from_parts(interrupts, registers, ThreadSleep, config))
    }
}

impl<I: InterruptStatus, R: RegisterFile, T: PollTimer> DecoderDevice<I, R, T> {
    pub fn from_parts(interrupts: I, registers: R, timer: T, config: DeviceConfig) -> Self {
        Self {
            interrupts,
            registers,
            timer,
            config,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn write_register(&mut self, register: Register, value: u32) {
        self.registers.write_word(register.0 as usize, value);
    }

    pub fn read_register(&self, register: Register) -> u32 {
        self.registers.read_word(register.0 as usize)
    }

    pub fn read_status(&self) -> DecoderStatus {
        DecoderStatus(self.interrupts.read_status())
    }

    pub fn wait_phase1(&mut self) -> Result<DecoderStatus> {
        wait_for_phase(&mut self.interrupts, &mut self.timer, Phase::One, &self.config)
    }

    pub fn wait_phase2(&mut self) -> Result<DecoderStatus> {
        wait_for_phase(&mut self.interrupts, &mut self.timer, Phase::Two, &self.config)
    }

    /// Upload `list` into the scaling factor window. Returns false, leaving
    /// the window untouched, when the list is disabled.
    pub fn write_scaling_list(&mut self, list: &DecoderScalingList) -> bool {
        let mut window = [0u32; DecoderScalingList::WORDS];
        if !list.write(&mut window) {
            return false;
        }
        let base = Register::SCALING_LIST0.0 as usize;
        for (i, word) in window.iter().enumerate() {
            self.registers.write_word(base + i, *word);
        }
        true
    }
}
