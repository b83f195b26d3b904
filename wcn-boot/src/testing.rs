//! Simulated WCN hardware for unit tests.
//!
//! [`MockRegs`] is a register file with just enough behaviour to run the
//! real sequences: the alias blocks decode their set/clear windows, the
//! status registers are computed from the control bits, and releasing a CPU
//! from reset runs a scripted firmware that answers the boot handshake.
//! Every write, rail switch, delay and collaborator call lands in one shared
//! [`Trace`] so tests can assert on ordering.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal_1::delay::DelayNs;

use crate::aon::IP_STOP_ALL;
use crate::firmware::{ImageId, ImageSource, SecureVerifier, SourceError, VerifyError, IMAGE_HEADER_LEN, SEC_IMAGE_MAGIC};
use crate::handshake::{
    magic, MemoryError, PhysAddr, SharedMemory, CALI_BLOB_LEN, INIT_STATUS_OFFSET, WIFI_CALIBRATION_OFFSET,
    WIFI_CALI_FLAG_OFFSET,
};
use crate::orchestrator::{BootOrchestrator, Config};
use crate::platform::{AtCommand, AtError, CalibrationStore, Diagnostics, Platform};
use crate::power::{PowerRails, Rail, RailError};
use crate::regs::map::{aon_apb, pmu_apb, wcn_aon_ahb, wcn_aon_apb};
use crate::regs::{BlockKind, RegisterIoError, RegisterSpace, CLEAR_ALIAS_OFFSET, SET_ALIAS_OFFSET};
use crate::subsys::{Role, SubsystemConfig};

/// Fill byte the simulated BTWF firmware writes as its calibration result.
pub const FIRMWARE_CALI_BYTE: u8 = 0xc5;

//=============================================================================
// Trace
//=============================================================================

/// Something observable the code under test did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Raw register write, alias offset included.
    Write(BlockKind, u32, u32),
    Rail(Rail, bool),
    /// Sleep, in microseconds.
    Delay(u64),
    AtSleep(Role),
    Assert(Role, &'static str),
    CaliLoad,
    CaliSave,
    Verify(Role, PhysAddr, u32),
}

/// Shared, ordered action log plus the simulated clock.
#[derive(Clone, Default)]
pub struct Trace {
    actions: Rc<RefCell<Vec<Action>>>,
    now_us: Rc<Cell<u64>>,
}

impl Trace {
    pub fn push(&self, action: Action) {
        self.actions.borrow_mut().push(action);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.borrow().clone()
    }

    pub fn writes(&self) -> Vec<Action> {
        self.actions
            .borrow()
            .iter()
            .filter(|a| matches!(a, Action::Write(..)))
            .cloned()
            .collect()
    }

    /// Actions other than delays.
    pub fn events(&self) -> Vec<Action> {
        self.actions
            .borrow()
            .iter()
            .filter(|a| !matches!(a, Action::Delay(_)))
            .cloned()
            .collect()
    }

    pub fn rails(&self) -> Vec<(Rail, bool)> {
        self.actions
            .borrow()
            .iter()
            .filter_map(|a| match a {
                Action::Rail(rail, on) => Some((*rail, *on)),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, action: &Action) -> Option<usize> {
        self.actions.borrow().iter().position(|a| a == action)
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.position(action).is_some()
    }

    pub fn clear(&self) {
        self.actions.borrow_mut().clear();
    }

    pub fn elapsed_us(&self) -> u64 {
        self.now_us.get()
    }

    fn advance(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
        self.push(Action::Delay(us));
    }
}

/// Delay that only advances the trace clock.
#[derive(Clone)]
pub struct MockDelay {
    trace: Trace,
}

impl MockDelay {
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.trace.elapsed_us()
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.trace.advance(u64::from(ns).div_ceil(1000));
    }

    fn delay_us(&mut self, us: u32) {
        self.trace.advance(u64::from(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.trace.advance(u64::from(ms) * 1000);
    }
}

//=============================================================================
// Shared memory
//=============================================================================

/// Sparse byte-addressed DDR. Unwritten bytes read as zero.
#[derive(Clone, Default)]
pub struct MockMemory {
    bytes: Rc<RefCell<HashMap<PhysAddr, u8>>>,
    unavailable: Rc<Cell<bool>>,
    writes: Rc<Cell<usize>>,
}

impl MockMemory {
    pub fn bytes(&self, addr: PhysAddr, len: usize) -> Vec<u8> {
        let bytes = self.bytes.borrow();
        (0..len as PhysAddr)
            .map(|i| bytes.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }

    pub fn word(&self, addr: PhysAddr) -> u32 {
        let b = self.bytes(addr, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn poke(&self, addr: PhysAddr, data: &[u8]) {
        let mut bytes = self.bytes.borrow_mut();
        for (i, &b) in data.iter().enumerate() {
            let a = addr + i as PhysAddr;
            if b == 0 {
                bytes.remove(&a);
            } else {
                bytes.insert(a, b);
            }
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    /// Number of `write`/`fill` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    fn check(&self, addr: PhysAddr) -> Result<(), MemoryError> {
        if self.unavailable.get() {
            Err(MemoryError { addr })
        } else {
            Ok(())
        }
    }
}

impl SharedMemory for MockMemory {
    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.check(addr)?;
        let bytes = self.bytes.borrow();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = bytes.get(&(addr + i as PhysAddr)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write(&self, addr: PhysAddr, data: &[u8]) -> Result<(), MemoryError> {
        self.check(addr)?;
        self.writes.set(self.writes.get() + 1);
        self.poke(addr, data);
        Ok(())
    }

    fn fill(&self, addr: PhysAddr, len: usize, value: u8) -> Result<(), MemoryError> {
        self.check(addr)?;
        self.writes.set(self.writes.get() + 1);
        let mut bytes = self.bytes.borrow_mut();
        for i in 0..len as PhysAddr {
            if value == 0 {
                bytes.remove(&(addr + i));
            } else {
                bytes.insert(addr + i, value);
            }
        }
        Ok(())
    }
}

//=============================================================================
// Register file
//=============================================================================

fn slot(role: Role) -> usize {
    match role {
        Role::Btwf => 0,
        Role::Gnss => 1,
    }
}

/// Fault injection and firmware bookkeeping.
#[derive(Default)]
struct Sim {
    domain_stuck_off: bool,
    stuck_awake: [bool; 2],
    ignores_force: [bool; 2],
    silent: [bool; 2],
    boots: [u32; 2],
    gnss_calibrated: bool,
    handshake: [PhysAddr; 2],
}

/// Register file with a behavioural model of the WCN state machines.
pub struct MockRegs {
    trace: Trace,
    mem: MockMemory,
    values: RefCell<HashMap<(BlockKind, u32), u32>>,
    unmapped: RefCell<Vec<BlockKind>>,
    sim: RefCell<Sim>,
}

impl MockRegs {
    /// Cold chip: domain shut down, both CPUs in reset.
    pub fn new(trace: Trace, mem: MockMemory, btwf: &SubsystemConfig, gnss: &SubsystemConfig) -> Self {
        let regs = Self {
            trace,
            mem,
            values: RefCell::new(HashMap::new()),
            unmapped: RefCell::new(Vec::new()),
            sim: RefCell::new(Sim {
                handshake: [btwf.handshake_addr(), gnss.handshake_addr()],
                ..Sim::default()
            }),
        };

        use wcn_aon_ahb::reset_ctrl as rst;
        regs.poke(
            BlockKind::PmuApb,
            pmu_apb::wcn_sys_cfg::OFFSET,
            pmu_apb::wcn_sys_cfg::AUTO_SHUTDOWN.mask() | pmu_apb::wcn_sys_cfg::FORCE_SHUTDOWN.mask(),
        );
        regs.poke(
            BlockKind::PmuApb,
            pmu_apb::wcn_sys_sleep_ctrl::OFFSET,
            pmu_apb::wcn_sys_sleep_ctrl::FORCE_DEEP_SLEEP.mask(),
        );
        regs.poke(
            BlockKind::AonApb,
            aon_apb::btwf_sleep_override::OFFSET,
            aon_apb::btwf_sleep_override::FORCE_EXIT_DEEP_SLEEP_N.mask(),
        );
        regs.poke(BlockKind::AonApb, aon_apb::chip_id0::OFFSET, 0x2355_000a);
        regs.poke(BlockKind::AonApb, aon_apb::chip_id1::OFFSET, 0x0000_0001);
        regs.poke(
            BlockKind::WcnAonApb,
            wcn_aon_apb::btwf_ctrl::OFFSET,
            wcn_aon_apb::btwf_ctrl::AUTO_SHUTDOWN.mask(),
        );
        regs.poke(
            BlockKind::WcnAonApb,
            wcn_aon_apb::gnss_ctrl::OFFSET,
            wcn_aon_apb::gnss_ctrl::AUTO_SHUTDOWN.mask(),
        );
        regs.poke(
            BlockKind::WcnAonAhb,
            rst::OFFSET,
            rst::BTWF_CPU.mask()
                | rst::BTWF_SYS.mask()
                | rst::BTWF_CACHE.mask()
                | rst::BTWF_BUSMON.mask()
                | rst::GNSS_CPU.mask()
                | rst::GNSS_CACHE.mask(),
        );
        regs
    }

    /// Set a raw register value without tracing or side effects.
    pub fn poke(&self, block: BlockKind, offset: u32, value: u32) {
        self.values.borrow_mut().insert((block, offset), value);
    }

    /// Raw stored value; status registers are not computed.
    pub fn peek(&self, block: BlockKind, offset: u32) -> u32 {
        self.values.borrow().get(&(block, offset)).copied().unwrap_or(0)
    }

    pub fn unmap(&self, block: BlockKind) {
        self.unmapped.borrow_mut().push(block);
    }

    /// The domain never reports power-on.
    pub fn set_domain_stuck_off(&self, stuck: bool) {
        self.sim.borrow_mut().domain_stuck_off = stuck;
    }

    /// The subsystem ignores auto-shutdown and stays awake.
    pub fn set_stuck_awake(&self, role: Role, stuck: bool) {
        self.sim.borrow_mut().stuck_awake[slot(role)] = stuck;
    }

    /// The subsystem also ignores its forced deep-sleep/shutdown overrides.
    pub fn set_ignores_force(&self, role: Role, ignores: bool) {
        self.sim.borrow_mut().ignores_force[slot(role)] = ignores;
    }

    /// The firmware never writes its ready magic.
    pub fn set_silent(&self, role: Role, silent: bool) {
        self.sim.borrow_mut().silent[slot(role)] = silent;
    }

    /// How many times the firmware of `role` has been started.
    pub fn boots(&self, role: Role) -> u32 {
        self.sim.borrow().boots[slot(role)]
    }

    pub fn domain_on(&self) -> bool {
        use pmu_apb::wcn_sys_cfg as cfg;

        if self.sim.borrow().domain_stuck_off {
            return false;
        }
        let raw = self.peek(BlockKind::PmuApb, cfg::OFFSET);
        let ip_stopped = self.peek(BlockKind::WcnAonAhb, wcn_aon_ahb::ip_stop::OFFSET) == IP_STOP_ALL;
        !(raw & cfg::FORCE_SHUTDOWN.mask() != 0 || (raw & cfg::AUTO_SHUTDOWN.mask() != 0 && ip_stopped))
    }

    fn domain_awake(&self) -> bool {
        use pmu_apb::wcn_sys_sleep_ctrl as ctrl;

        self.domain_on() && self.peek(BlockKind::PmuApb, ctrl::OFFSET) & ctrl::FORCE_DEEP_SLEEP.mask() == 0
    }

    fn ctrl(&self, role: Role) -> u32 {
        match role {
            Role::Btwf => self.peek(BlockKind::WcnAonApb, wcn_aon_apb::btwf_ctrl::OFFSET),
            Role::Gnss => self.peek(BlockKind::WcnAonApb, wcn_aon_apb::gnss_ctrl::OFFSET),
        }
    }

    fn aon_top(&self, mask: u32) -> bool {
        self.peek(BlockKind::AonApb, aon_apb::aon_top_force::OFFSET) & mask != 0
    }

    /// Kept on by force-unshutdown, or by BTWF's force-exit override.
    fn held_up(&self, role: Role) -> bool {
        use aon_apb::{btwf_sleep_override as ovr, subsys_pwr_status as pwr};

        let unshutdown = self.peek(BlockKind::AonApb, pwr::OFFSET) & pwr::FORCE_UNSHUTDOWN.mask() != 0;
        let override_asserted = self.peek(BlockKind::AonApb, ovr::OFFSET) & ovr::FORCE_EXIT_DEEP_SLEEP_N.mask() == 0;
        unshutdown || (role == Role::Btwf && override_asserted)
    }

    fn forced_deep(&self, role: Role) -> bool {
        use wcn_aon_apb::btwf_ctrl as ctrl;

        if self.sim.borrow().ignores_force[slot(role)] {
            return false;
        }
        self.ctrl(role) & ctrl::FORCE_DEEP_SLEEP.mask() != 0
            || (role == Role::Btwf && self.aon_top(aon_apb::aon_top_force::BTWF_FORCE_DEEP_SLEEP.mask()))
    }

    fn wants_deep(&self, role: Role) -> bool {
        use wcn_aon_apb::btwf_ctrl as ctrl;

        let idle = self.ctrl(role) & ctrl::AUTO_SHUTDOWN.mask() != 0 && !self.sim.borrow().stuck_awake[slot(role)];
        self.forced_deep(role) || idle
    }

    pub fn sub_on(&self, role: Role) -> bool {
        use wcn_aon_apb::btwf_ctrl as ctrl;

        if !self.domain_on() {
            return false;
        }
        if role == Role::Btwf
            && !self.sim.borrow().ignores_force[slot(role)]
            && self.aon_top(aon_apb::aon_top_force::BTWF_FORCE_SHUTDOWN.mask())
        {
            return false;
        }
        if self.held_up(role) {
            return true;
        }
        !(self.ctrl(role) & ctrl::AUTO_SHUTDOWN.mask() != 0 && self.wants_deep(role))
    }

    pub fn sub_awake(&self, role: Role) -> bool {
        self.sub_on(role) && (self.held_up(role) || !self.wants_deep(role))
    }

    fn computed(&self, block: BlockKind, offset: u32, raw: u32) -> u32 {
        use crate::aon::state;

        let pwr = |on: bool| if on { state::PWR_ON } else { state::PWR_SHUTDOWN };
        let sleep = |awake: bool| if awake { state::SLEEP_AWAKE } else { state::SLEEP_DEEP };

        match (block, offset) {
            (BlockKind::PmuApb, pmu_apb::wcn_sys_pwr_status::OFFSET) => {
                pmu_apb::wcn_sys_pwr_status::STATE.replace(raw, pwr(self.domain_on()))
            }
            (BlockKind::PmuApb, pmu_apb::wcn_sys_sleep_status::OFFSET) => {
                pmu_apb::wcn_sys_sleep_status::STATE.replace(raw, sleep(self.domain_awake()))
            }
            (BlockKind::AonApb, aon_apb::subsys_pwr_status::OFFSET) => {
                use aon_apb::subsys_pwr_status as reg;
                let v = reg::BTWF_STATE.replace(raw, pwr(self.sub_on(Role::Btwf)));
                reg::GNSS_STATE.replace(v, pwr(self.sub_on(Role::Gnss)))
            }
            (BlockKind::AonApb, aon_apb::subsys_sleep_status::OFFSET) => {
                use aon_apb::subsys_sleep_status as reg;
                let v = reg::BTWF_STATE.replace(raw, sleep(self.sub_awake(Role::Btwf)));
                reg::GNSS_STATE.replace(v, sleep(self.sub_awake(Role::Gnss)))
            }
            _ => raw,
        }
    }

    fn check(&self, block: BlockKind, offset: u32) -> Result<(), RegisterIoError> {
        if self.unmapped.borrow().contains(&block) {
            Err(RegisterIoError { block, offset })
        } else {
            Ok(())
        }
    }

    /// A CPU reset bit went 1→0: run the firmware if the subsystem is powered.
    fn on_reset_write(&self, old: u32, new: u32) {
        use wcn_aon_ahb::reset_ctrl as rst;

        for (role, cpu) in [(Role::Btwf, rst::BTWF_CPU.mask()), (Role::Gnss, rst::GNSS_CPU.mask())] {
            if old & cpu != 0 && new & cpu == 0 && self.sub_on(role) {
                self.run_firmware(role);
            }
        }
    }

    fn run_firmware(&self, role: Role) {
        let (silent, hs) = {
            let mut sim = self.sim.borrow_mut();
            let i = slot(role);
            sim.boots[i] += 1;
            (sim.silent[i], sim.handshake[i])
        };
        if silent {
            return;
        }

        match role {
            Role::Btwf => {
                if self.mem.word(hs + WIFI_CALI_FLAG_OFFSET) == magic::WIFI_CALI_REQUEST {
                    self.mem.poke(hs + WIFI_CALIBRATION_OFFSET, &[FIRMWARE_CALI_BYTE; CALI_BLOB_LEN]);
                }
                self.mem.poke(hs + INIT_STATUS_OFFSET, &magic::INIT_READY.to_le_bytes());
            }
            Role::Gnss => {
                // GNSS firmware calibrates on its first successful run only.
                let first = !core::mem::replace(&mut self.sim.borrow_mut().gnss_calibrated, true);
                let done = if first {
                    magic::GNSS_CALI_DONE
                } else {
                    magic::GNSS_BOOT_DONE
                };
                self.mem.poke(hs + INIT_STATUS_OFFSET, &done.to_le_bytes());
            }
        }
    }
}

impl RegisterSpace for MockRegs {
    fn read(&self, block: BlockKind, offset: u32) -> Result<u32, RegisterIoError> {
        self.check(block, offset)?;
        Ok(self.computed(block, offset, self.peek(block, offset)))
    }

    fn write(&self, block: BlockKind, offset: u32, value: u32) -> Result<(), RegisterIoError> {
        self.check(block, offset)?;
        self.trace.push(Action::Write(block, offset, value));

        let alias = block.has_set_clear_alias();
        let (base, new) = if alias && offset >= CLEAR_ALIAS_OFFSET {
            let base = offset - CLEAR_ALIAS_OFFSET;
            (base, self.peek(block, base) & !value)
        } else if alias && offset >= SET_ALIAS_OFFSET {
            let base = offset - SET_ALIAS_OFFSET;
            (base, self.peek(block, base) | value)
        } else {
            (offset, value)
        };

        let old = self.peek(block, base);
        self.poke(block, base, new);
        if block == BlockKind::WcnAonAhb && base == wcn_aon_ahb::reset_ctrl::OFFSET {
            self.on_reset_write(old, new);
        }
        Ok(())
    }
}

//=============================================================================
// Collaborators
//=============================================================================

/// Regulators that remember their state.
pub struct MockRails {
    trace: Trace,
    enabled: RefCell<Vec<Rail>>,
    failing: Cell<Option<Rail>>,
}

impl MockRails {
    pub fn new(trace: Trace) -> Self {
        Self {
            trace,
            enabled: RefCell::new(Vec::new()),
            failing: Cell::new(None),
        }
    }

    pub fn is_enabled(&self, rail: Rail) -> bool {
        self.enabled.borrow().contains(&rail)
    }

    /// Make enabling `rail` fail.
    pub fn fail_enable(&self, rail: Option<Rail>) {
        self.failing.set(rail);
    }
}

impl PowerRails for MockRails {
    fn set_enabled(&self, rail: Rail, enabled: bool) -> Result<(), RailError> {
        if enabled && self.failing.get() == Some(rail) {
            return Err(RailError { rail });
        }
        self.trace.push(Action::Rail(rail, enabled));
        let mut on = self.enabled.borrow_mut();
        on.retain(|&r| r != rail);
        if enabled {
            on.push(rail);
        }
        Ok(())
    }
}

pub struct MockDiagnostics {
    trace: Trace,
    pub dump: Cell<bool>,
    pub loopcheck: Cell<bool>,
}

impl Diagnostics for MockDiagnostics {
    fn dump_in_progress(&self) -> bool {
        self.dump.get()
    }

    fn loopcheck_unrecoverable(&self) -> bool {
        self.loopcheck.get()
    }

    fn request_assert(&self, role: Role, reason: &'static str) {
        self.trace.push(Action::Assert(role, reason));
    }
}

pub struct MockAt {
    trace: Trace,
    pub refuse: Cell<bool>,
}

impl AtCommand for MockAt {
    fn request_sleep(&self, role: Role) -> Result<(), AtError> {
        self.trace.push(Action::AtSleep(role));
        if self.refuse.get() {
            Err(AtError)
        } else {
            Ok(())
        }
    }
}

pub struct MockCalibration {
    trace: Trace,
    pub saved: RefCell<Option<[u8; CALI_BLOB_LEN]>>,
}

impl CalibrationStore for MockCalibration {
    fn load(&self, blob: &mut [u8; CALI_BLOB_LEN]) -> bool {
        self.trace.push(Action::CaliLoad);
        match *self.saved.borrow() {
            Some(saved) => {
                *blob = saved;
                true
            }
            None => false,
        }
    }

    fn save(&self, blob: &[u8; CALI_BLOB_LEN]) {
        self.trace.push(Action::CaliSave);
        *self.saved.borrow_mut() = Some(*blob);
    }
}

pub struct MockVerifier {
    trace: Trace,
    pub reject: Cell<bool>,
}

impl SecureVerifier for MockVerifier {
    fn verify(&self, role: Role, addr: PhysAddr, signed_size: u32) -> Result<(), VerifyError> {
        self.trace.push(Action::Verify(role, addr, signed_size));
        if self.reject.get() {
            Err(VerifyError)
        } else {
            Ok(())
        }
    }
}

/// In-memory image store.
pub struct MockImages {
    name: &'static str,
    images: RefCell<Vec<(ImageId, Vec<u8>)>>,
    io_failures: Cell<u32>,
    calls: Cell<u32>,
}

impl MockImages {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            images: RefCell::new(Vec::new()),
            io_failures: Cell::new(0),
            calls: Cell::new(0),
        }
    }

    pub fn insert(&self, image: ImageId, data: Vec<u8>) {
        let mut images = self.images.borrow_mut();
        images.retain(|(id, _)| *id != image);
        images.push((image, data));
    }

    pub fn remove(&self, image: ImageId) {
        self.images.borrow_mut().retain(|(id, _)| *id != image);
    }

    /// The next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.io_failures.set(n);
    }

    /// Calls made, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    fn enter(&self) -> Result<(), SourceError> {
        self.calls.set(self.calls.get() + 1);
        let failures = self.io_failures.get();
        if failures > 0 {
            self.io_failures.set(failures - 1);
            return Err(SourceError::Io);
        }
        Ok(())
    }
}

impl ImageSource for MockImages {
    fn name(&self) -> &'static str {
        self.name
    }

    fn image_len(&self, image: ImageId) -> Result<usize, SourceError> {
        self.enter()?;
        self.images
            .borrow()
            .iter()
            .find(|(id, _)| *id == image)
            .map(|(_, data)| data.len())
            .ok_or(SourceError::NotFound)
    }

    fn read_at(&self, image: ImageId, offset: usize, buf: &mut [u8]) -> Result<usize, SourceError> {
        self.enter()?;
        let images = self.images.borrow();
        let (_, data) = images.iter().find(|(id, _)| *id == image).ok_or(SourceError::NotFound)?;
        let rest = data.get(offset..).unwrap_or(&[]);
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }
}

/// Unsigned image bytes; never starts with the signed magic.
pub fn unsigned_image(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed) | 1).collect()
}

/// Signed image: header, `payload`, then signature filler up to `signed_size`.
pub fn signed_image(payload: &[u8], signed_size: u32) -> Vec<u8> {
    let mut image = vec![0u8; IMAGE_HEADER_LEN];
    image[0..4].copy_from_slice(&SEC_IMAGE_MAGIC.to_le_bytes());
    image[4..8].copy_from_slice(&1u32.to_le_bytes());
    image[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    image[12..16].copy_from_slice(&signed_size.to_le_bytes());
    image.extend_from_slice(payload);
    if image.len() < signed_size as usize {
        image.resize(signed_size as usize, 0xee);
    }
    image
}

//=============================================================================
// Bench
//=============================================================================

/// A cold chip plus every collaborator, sharing one trace.
pub struct Bench {
    pub trace: Trace,
    pub regs: MockRegs,
    pub memory: MockMemory,
    pub rails: MockRails,
    pub images: MockImages,
    pub verifier: MockVerifier,
    pub at: MockAt,
    pub diagnostics: MockDiagnostics,
    pub calibration: MockCalibration,
}

impl Bench {
    pub fn new() -> Self {
        let trace = Trace::default();
        let memory = MockMemory::default();
        let images = MockImages::new("mock");
        images.insert(ImageId::Btwf, unsigned_image(4096, 0x10));
        images.insert(ImageId::Gnss, unsigned_image(2048, 0x20));
        images.insert(ImageId::GnssBd, unsigned_image(3072, 0x30));

        Self {
            regs: MockRegs::new(
                trace.clone(),
                memory.clone(),
                &SubsystemConfig::btwf(),
                &SubsystemConfig::gnss(),
            ),
            rails: MockRails::new(trace.clone()),
            verifier: MockVerifier {
                trace: trace.clone(),
                reject: Cell::new(false),
            },
            at: MockAt {
                trace: trace.clone(),
                refuse: Cell::new(false),
            },
            diagnostics: MockDiagnostics {
                trace: trace.clone(),
                dump: Cell::new(false),
                loopcheck: Cell::new(false),
            },
            calibration: MockCalibration {
                trace: trace.clone(),
                saved: RefCell::new(None),
            },
            images,
            memory,
            trace,
        }
    }

    pub fn delay(&self) -> MockDelay {
        MockDelay::new(self.trace.clone())
    }

    /// The bench's own image store as the only source.
    pub fn sources(&self) -> [&dyn ImageSource; 1] {
        [&self.images]
    }

    pub fn platform<'a>(&'a self, images: &'a [&'a dyn ImageSource]) -> Platform<'a> {
        Platform {
            regs: &self.regs,
            memory: &self.memory,
            rails: &self.rails,
            images,
            verifier: Some(&self.verifier),
            at: &self.at,
            diagnostics: &self.diagnostics,
            calibration: &self.calibration,
        }
    }

    pub fn orchestrator<'a>(&'a self, images: &'a [&'a dyn ImageSource], config: Config) -> BootOrchestrator<'a, MockDelay> {
        BootOrchestrator::new(self.platform(images), self.delay(), config)
    }
}
