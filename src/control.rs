//! Run/pause control.
//!
//! `ControlSwitch` is a two-state toggle (STOPPED initially, RUNNING) flipped
//! by debounced button presses. Every toggle is mirrored to an indicator
//! (LED on = RUNNING).
//!
//! Presses arrive on the button listener thread; the capture loop observes
//! the state at cycle boundaries through `wait_until_running`. State lives
//! behind a mutex with a condvar, so a toggle is visible to the loop as soon
//! as it wakes.
//!
//! Hardware access uses the Linux sysfs GPIO interface:
//! `<root>/export`, `<root>/gpio<N>/direction`, `<root>/gpio<N>/value`.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::GpioSettings;

const BUTTON_POLL: Duration = Duration::from_millis(10);
const LISTENER_TIMEOUT: Duration = Duration::from_millis(100);
const EXPORT_SETTLE: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlState {
    Stopped,
    Running,
}

impl ControlState {
    pub fn toggled(self) -> Self {
        match self {
            ControlState::Stopped => ControlState::Running,
            ControlState::Running => ControlState::Stopped,
        }
    }

    pub fn is_running(self) -> bool {
        self == ControlState::Running
    }
}

// ----------------------------------------------------------------------------
// Indicator outputs
// ----------------------------------------------------------------------------

/// Binary output mirroring the control state.
pub trait Indicator: Send {
    fn name(&self) -> &'static str;

    fn set(&mut self, on: bool) -> Result<()>;
}

/// Indicator for runs without an LED: logs each change.
#[derive(Default)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn name(&self) -> &'static str {
        "log"
    }

    fn set(&mut self, on: bool) -> Result<()> {
        log::info!("indicator {}", if on { "on" } else { "off" });
        Ok(())
    }
}

/// LED on a sysfs GPIO output pin.
pub struct SysfsLed {
    value_path: PathBuf,
}

impl SysfsLed {
    pub fn open(root: &Path, pin: u32) -> Result<Self> {
        let pin_dir = export_pin(root, pin)?;
        std::fs::write(pin_dir.join("direction"), "out")
            .with_context(|| format!("configure gpio{} as output", pin))?;
        Ok(Self {
            value_path: pin_dir.join("value"),
        })
    }
}

impl Indicator for SysfsLed {
    fn name(&self) -> &'static str {
        "sysfs-led"
    }

    fn set(&mut self, on: bool) -> Result<()> {
        std::fs::write(&self.value_path, if on { "1" } else { "0" })
            .with_context(|| format!("write {}", self.value_path.display()))
    }
}

// ----------------------------------------------------------------------------
// Button inputs
// ----------------------------------------------------------------------------

/// Source of debounced press events.
pub trait ButtonInput: Send {
    /// Wait up to `timeout` for one press. `Ok(false)` on timeout.
    fn wait_for_press(&mut self, timeout: Duration) -> Result<bool>;
}

/// Push button on a sysfs GPIO input pin.
///
/// The pin is polled; a press is a transition to the active level that is
/// still held after the debounce interval. The button must be released
/// before another press registers.
pub struct SysfsButton {
    value_path: PathBuf,
    active_low: bool,
    debounce: Duration,
    armed: bool,
}

impl SysfsButton {
    pub fn open(root: &Path, pin: u32, active_low: bool, debounce: Duration) -> Result<Self> {
        let pin_dir = export_pin(root, pin)?;
        std::fs::write(pin_dir.join("direction"), "in")
            .with_context(|| format!("configure gpio{} as input", pin))?;
        let mut button = Self {
            value_path: pin_dir.join("value"),
            active_low,
            debounce,
            armed: true,
        };
        // A button held during start-up must be released first.
        button.armed = !button.is_pressed()?;
        Ok(button)
    }

    fn is_pressed(&self) -> Result<bool> {
        let raw = std::fs::read_to_string(&self.value_path)
            .with_context(|| format!("read {}", self.value_path.display()))?;
        let high = raw.trim() == "1";
        Ok(high != self.active_low)
    }
}

impl ButtonInput for SysfsButton {
    fn wait_for_press(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let pressed = self.is_pressed()?;
            if !pressed {
                self.armed = true;
            } else if self.armed {
                std::thread::sleep(self.debounce);
                if self.is_pressed()? {
                    self.armed = false;
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(BUTTON_POLL);
        }
    }
}

/// Button fed by a channel, for tests and software control.
pub struct ChannelButton {
    rx: Receiver<()>,
}

impl ChannelButton {
    /// Returns the sending half (one `send` = one press) and the button.
    pub fn pair() -> (Sender<()>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl ButtonInput for ChannelButton {
    fn wait_for_press(&mut self, timeout: Duration) -> Result<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                // No more presses can arrive; behave like an idle button.
                std::thread::sleep(timeout);
                Ok(false)
            }
        }
    }
}

fn export_pin(root: &Path, pin: u32) -> Result<PathBuf> {
    let pin_dir = root.join(format!("gpio{}", pin));
    if !pin_dir.exists() {
        std::fs::write(root.join("export"), pin.to_string())
            .with_context(|| format!("export gpio{} via {}", pin, root.display()))?;
        // udev needs a moment to fix permissions on the new pin directory
        std::thread::sleep(EXPORT_SETTLE);
    }
    if !pin_dir.join("value").exists() {
        return Err(anyhow!("gpio{} unavailable under {}", pin, root.display()));
    }
    Ok(pin_dir)
}

/// Hardware button for the configured pin, or `None` when disabled.
pub fn button_from_settings(settings: &GpioSettings) -> Result<Option<Box<dyn ButtonInput>>> {
    match settings.button_pin {
        Some(pin) => {
            let button = SysfsButton::open(
                &settings.sysfs_root,
                pin,
                settings.button_active_low,
                settings.debounce,
            )?;
            log::info!("control: button on gpio{}", pin);
            Ok(Some(Box::new(button)))
        }
        None => Ok(None),
    }
}

/// LED for the configured pin, or a logging indicator when disabled.
pub fn indicator_from_settings(settings: &GpioSettings) -> Result<Box<dyn Indicator>> {
    match settings.led_pin {
        Some(pin) => {
            let led = SysfsLed::open(&settings.sysfs_root, pin)?;
            log::info!("control: indicator on gpio{}", pin);
            Ok(Box::new(led))
        }
        None => Ok(Box::new(LogIndicator)),
    }
}

// ----------------------------------------------------------------------------
// ControlSwitch
// ----------------------------------------------------------------------------

/// Two-state run/pause toggle shared between the button listener and the capture loop.
pub struct ControlSwitch {
    state: Mutex<ControlState>,
    changed: Condvar,
    indicator: Mutex<Box<dyn Indicator>>,
}

impl ControlSwitch {
    /// Starts STOPPED with the indicator off.
    pub fn new(mut indicator: Box<dyn Indicator>) -> Result<Self> {
        indicator
            .set(false)
            .with_context(|| format!("initialise indicator {}", indicator.name()))?;
        Ok(Self {
            state: Mutex::new(ControlState::Stopped),
            changed: Condvar::new(),
            indicator: Mutex::new(indicator),
        })
    }

    pub fn state(&self) -> Result<ControlState> {
        Ok(*self.lock_state()?)
    }

    /// Handle one press: flip the state, mirror it to the indicator, wake waiters.
    pub fn press(&self) -> Result<ControlState> {
        let mut state = self.lock_state()?;
        *state = state.toggled();
        let new_state = *state;
        {
            let mut indicator = self
                .indicator
                .lock()
                .map_err(|_| anyhow!("indicator lock poisoned"))?;
            if let Err(err) = indicator.set(new_state.is_running()) {
                log::warn!("indicator {} not updated: {:#}", indicator.name(), err);
            }
        }
        drop(state);
        self.changed.notify_all();
        log::info!("control: {:?}", new_state);
        Ok(new_state)
    }

    /// Block until RUNNING or until `timeout` elapses. Returns whether running.
    pub fn wait_until_running(&self, timeout: Duration) -> Result<bool> {
        let state = self.lock_state()?;
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.is_running())
            .map_err(|_| anyhow!("control state lock poisoned"))?;
        Ok(state.is_running())
    }

    /// Turn the indicator off for shutdown without changing state.
    pub fn release_indicator(&self) -> Result<()> {
        let mut indicator = self
            .indicator
            .lock()
            .map_err(|_| anyhow!("indicator lock poisoned"))?;
        indicator.set(false)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ControlState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("control state lock poisoned"))
    }
}

/// Forwards button presses to the switch until `stop` is set.
pub fn spawn_button_listener(
    mut input: Box<dyn ButtonInput>,
    switch: Arc<ControlSwitch>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let join = std::thread::Builder::new()
        .name("button".to_string())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                match input.wait_for_press(LISTENER_TIMEOUT) {
                    Ok(true) => {
                        if let Err(err) = switch.press() {
                            log::error!("control toggle failed: {:#}", err);
                        }
                    }
                    Ok(false) => {}
                    Err(err) => {
                        log::warn!("button read failed: {:#}", err);
                        std::thread::sleep(LISTENER_TIMEOUT);
                    }
                }
            }
        })?;
    Ok(join)
}
