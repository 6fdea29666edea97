//! System-wide keyboard capture
//!
//! The OS invokes the low-level hook callback on its own thread for every key
//! transition. The callback has to answer "pass or swallow" quickly, so it
//! only classifies the transition (press, release, auto-repeat), decides on
//! suppression and queues a [`KeyEvent`] for the application's event loop.
//!
//! The platform callback cannot carry a context pointer. Instead, a
//! [`KeyboardHook`] registers its shared state in a process-wide slot on
//! [`KeyboardHook::install`]; the callback trampoline looks up whatever is
//! registered there. Only one hook may be registered at a time.

pub mod keys;
#[cfg(windows)]
mod win32;

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

pub use keys::key_name;

/// Default queue depth at which the hook warns that the event loop lags
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Errors raised while installing the hook
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to install keyboard hook: {0}")]
    Install(String),
    #[error("another keyboard hook is already registered in this process")]
    AlreadyRegistered,
    #[error("system-wide keyboard hooks are not supported on this platform")]
    Unsupported,
}

/// One classified keyboard transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub vk_code: u8,
    pub is_key_down: bool,
    pub is_auto_repeat: bool,
    pub timestamp: Instant,
}

/// Answer returned to the OS for one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    /// Let the event continue to other applications
    Pass,
    /// Stop the event from propagating
    Swallow,
}

/// Keys currently held down plus keys whose repeats are swallowed
#[derive(Debug, Default)]
struct KeyState {
    pressed: HashSet<u8>,
    suppressed: HashSet<u8>,
}

impl KeyState {
    /// Update the pressed set; returns (is_auto_repeat, suppress)
    fn classify(&mut self, vk_code: u8, is_key_down: bool) -> (bool, bool) {
        if !is_key_down {
            self.pressed.remove(&vk_code);
            return (false, false);
        }

        let is_auto_repeat = !self.pressed.insert(vk_code);
        let suppress = is_auto_repeat && self.suppressed.contains(&vk_code);
        (is_auto_repeat, suppress)
    }
}

/// State shared between the hook owner and the callback thread
struct HookShared {
    state: Mutex<KeyState>,
    sink: mpsc::UnboundedSender<KeyEvent>,
    /// Events sent but not yet received
    pending: Arc<AtomicUsize>,
    warn_depth: usize,
    saturation_reported: AtomicBool,
}

impl HookShared {
    fn handle_transition(&self, vk_code: u8, is_key_down: bool) -> HookVerdict {
        let (is_auto_repeat, suppress) = self.state.lock().classify(vk_code, is_key_down);

        self.deliver(KeyEvent {
            vk_code,
            is_key_down,
            is_auto_repeat,
            timestamp: Instant::now(),
        });

        if suppress {
            HookVerdict::Swallow
        } else {
            HookVerdict::Pass
        }
    }

    /// Queue an event; never waits and never drops while the receiver lives
    fn deliver(&self, event: KeyEvent) {
        let depth = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sink.send(event).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            trace!("Keyboard event receiver closed");
            return;
        }

        if depth > self.warn_depth && !self.saturation_reported.swap(true, Ordering::Relaxed) {
            warn!("Keyboard event queue holds {} events, the event loop is falling behind", depth);
        }
    }
}

/// Receiving end of the hook → event loop queue
pub struct KeyEventReceiver {
    rx: mpsc::UnboundedReceiver<KeyEvent>,
    pending: Arc<AtomicUsize>,
}

impl KeyEventReceiver {
    pub async fn recv(&mut self) -> Option<KeyEvent> {
        let event = self.rx.recv().await;
        self.received(event)
    }

    /// Next queued event, if any, without waiting
    pub fn try_recv(&mut self) -> Option<KeyEvent> {
        let event = self.rx.try_recv().ok();
        self.received(event)
    }

    /// Blocking receive for use outside the runtime
    pub fn blocking_recv(&mut self) -> Option<KeyEvent> {
        let event = self.rx.blocking_recv();
        self.received(event)
    }

    /// Events queued and not yet received
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn received(&self, event: Option<KeyEvent>) -> Option<KeyEvent> {
        if event.is_some() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
        event
    }
}

/// Process-wide registration slot read by the platform callback
static ACTIVE_HOOK: RwLock<Option<Arc<HookShared>>> = parking_lot::const_rwlock(None);

/// Entry point for platform callbacks: route a transition to the registered hook
///
/// Transitions arriving while nothing is registered pass through untouched.
pub(crate) fn dispatch_to_active(vk_code: u8, is_key_down: bool) -> HookVerdict {
    let active = ACTIVE_HOOK.read().clone();
    match active {
        Some(shared) => shared.handle_transition(vk_code, is_key_down),
        None => HookVerdict::Pass,
    }
}

/// Platform half of the hook: install/remove the OS interception point
pub trait HookBackend: Send + Sync {
    fn install(&mut self) -> Result<(), HookError>;

    /// Remove the interception point; called only after a successful install
    fn uninstall(&mut self);
}

/// Backend used where no system-wide hook exists
#[derive(Debug, Default)]
pub struct UnsupportedBackend;

impl HookBackend for UnsupportedBackend {
    fn install(&mut self) -> Result<(), HookError> {
        Err(HookError::Unsupported)
    }

    fn uninstall(&mut self) {}
}

/// Default backend for the current platform
pub fn platform_backend() -> Box<dyn HookBackend> {
    #[cfg(windows)]
    {
        Box::new(win32::LowLevelHook::default())
    }
    #[cfg(not(windows))]
    {
        Box::new(UnsupportedBackend)
    }
}

/// System-wide keyboard hook capability
pub struct KeyboardHook {
    shared: Arc<HookShared>,
    backend: Box<dyn HookBackend>,
    installed: bool,
}

impl KeyboardHook {
    /// Create a hook on the platform backend together with its event queue
    ///
    /// The queue is unbounded so the callback never waits; `warn_depth` is the
    /// backlog at which a one-time warning is logged.
    pub fn channel(warn_depth: usize) -> (Self, KeyEventReceiver) {
        Self::with_backend(platform_backend(), warn_depth)
    }

    pub fn with_backend(backend: Box<dyn HookBackend>, warn_depth: usize) -> (Self, KeyEventReceiver) {
        let (sink, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let hook = Self {
            shared: Arc::new(HookShared {
                state: Mutex::new(KeyState::default()),
                sink,
                pending: Arc::clone(&pending),
                warn_depth: warn_depth.max(1),
                saturation_reported: AtomicBool::new(false),
            }),
            backend,
            installed: false,
        };
        (hook, KeyEventReceiver { rx, pending })
    }

    /// Register this hook and install the OS interception point
    ///
    /// Installing twice is a no-op. Fails with [`HookError::AlreadyRegistered`]
    /// while another hook in this process is installed.
    pub fn install(&mut self) -> Result<(), HookError> {
        if self.installed {
            return Ok(());
        }

        {
            let mut slot = ACTIVE_HOOK.write();
            if let Some(other) = slot.as_ref() {
                if !Arc::ptr_eq(other, &self.shared) {
                    return Err(HookError::AlreadyRegistered);
                }
            }
            *slot = Some(Arc::clone(&self.shared));
        }

        if let Err(e) = self.backend.install() {
            self.release_slot();
            return Err(e);
        }

        self.installed = true;
        info!("Keyboard hook installed");
        Ok(())
    }

    /// Remove the interception point and forget pressed keys
    ///
    /// Safe to call when not installed.
    pub fn uninstall(&mut self) {
        if self.installed {
            self.backend.uninstall();
            self.release_slot();
            self.installed = false;
            info!("Keyboard hook removed");
        }

        self.shared.state.lock().pressed.clear();
    }

    fn release_slot(&self) {
        let mut slot = ACTIVE_HOOK.write();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &self.shared)) {
            *slot = None;
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Replace the set of keys whose auto-repeats are swallowed
    pub fn set_suppressed_keys(&self, keys: impl IntoIterator<Item = u8>) {
        let keys: HashSet<u8> = keys.into_iter().collect();
        debug!("Suppressing auto-repeat for {} keys", keys.len());
        self.shared.state.lock().suppressed = keys;
    }

    pub fn suppressed_keys(&self) -> HashSet<u8> {
        self.shared.state.lock().suppressed.clone()
    }

    /// Whether a transition would be swallowed; never true for a non-repeat
    pub fn should_suppress(&self, vk_code: u8, is_auto_repeat: bool) -> bool {
        is_auto_repeat && self.shared.state.lock().suppressed.contains(&vk_code)
    }

    pub fn is_key_down(&self, vk_code: u8) -> bool {
        self.shared.state.lock().pressed.contains(&vk_code)
    }

    /// Process one raw transition exactly as the OS callback would
    pub fn handle_transition(&self, vk_code: u8, is_key_down: bool) -> HookVerdict {
        self.shared.handle_transition(vk_code, is_key_down)
    }
}

impl Drop for KeyboardHook {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serial_test::serial;

    /// Backend that installs nothing; transitions are injected by the test
    struct ManualBackend {
        fail: bool,
    }

    impl HookBackend for ManualBackend {
        fn install(&mut self) -> Result<(), HookError> {
            if self.fail {
                Err(HookError::Install("access denied".into()))
            } else {
                Ok(())
            }
        }

        fn uninstall(&mut self) {}
    }

    fn hook(warn_depth: usize) -> (KeyboardHook, KeyEventReceiver) {
        KeyboardHook::with_backend(Box::new(ManualBackend { fail: false }), warn_depth)
    }

    fn drain(rx: &mut KeyEventReceiver) -> Vec<KeyEvent> {
        std::iter::from_fn(|| rx.try_recv()).collect()
    }

    #[test]
    fn test_repeat_classification() {
        let (hook, mut rx) = hook(16);

        hook.handle_transition(65, true);
        hook.handle_transition(65, true);
        hook.handle_transition(65, false);
        hook.handle_transition(65, true);

        let repeats: Vec<(bool, bool)> = drain(&mut rx)
            .iter()
            .map(|e| (e.is_key_down, e.is_auto_repeat))
            .collect();
        assert_eq!(repeats, vec![(true, false), (true, true), (false, false), (true, false)]);
    }

    #[test]
    fn test_only_suppressed_repeats_are_swallowed() {
        let (hook, mut rx) = hook(16);
        hook.set_suppressed_keys([65]);

        assert_eq!(hook.handle_transition(65, true), HookVerdict::Pass);
        assert_eq!(hook.handle_transition(65, true), HookVerdict::Swallow);
        assert_eq!(hook.handle_transition(65, false), HookVerdict::Pass);
        assert_eq!(hook.handle_transition(66, true), HookVerdict::Pass);
        assert_eq!(hook.handle_transition(66, true), HookVerdict::Pass);

        // Swallowed events are still delivered
        assert_eq!(drain(&mut rx).len(), 5);
    }

    #[test]
    fn test_delivery_preserves_order_when_queue_saturates() {
        let (hook, mut rx) = hook(2);
        let hook = Arc::new(hook);

        let producer = {
            let hook = Arc::clone(&hook);
            std::thread::spawn(move || {
                for vk in 1..=50u8 {
                    hook.handle_transition(vk, true);
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 50 {
            if let Some(event) = rx.blocking_recv() {
                seen.push(event.vk_code);
            }
        }
        producer.join().unwrap();

        assert_eq!(seen, (1..=50).collect::<Vec<u8>>());
        assert!(rx.is_empty());
    }

    #[test]
    fn test_callback_never_waits_on_stalled_event_loop() {
        let (hook, rx) = hook(1);
        let hook = Arc::new(hook);
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let producer = {
            let hook = Arc::clone(&hook);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    hook.handle_transition(65, true);
                }
                let _ = done_tx.send(());
            })
        };

        assert!(done_rx.recv_timeout(std::time::Duration::from_millis(500)).is_ok());
        producer.join().unwrap();

        assert_eq!(rx.len(), 100);
        assert!(hook.shared.saturation_reported.load(Ordering::Relaxed));
    }

    #[test]
    fn test_closed_receiver_does_not_count_events() {
        let (hook, rx) = hook(4);
        let pending = Arc::clone(&rx.pending);
        drop(rx);

        assert_eq!(hook.handle_transition(65, true), HookVerdict::Pass);
        assert_eq!(pending.load(Ordering::Relaxed), 0);
    }

    #[test]
    #[serial]
    fn test_install_registers_and_dispatches() {
        let (mut hook, mut rx) = hook(16);
        hook.set_suppressed_keys([65]);
        hook.install().unwrap();
        assert!(hook.is_installed());

        assert_eq!(dispatch_to_active(65, true), HookVerdict::Pass);
        assert_eq!(dispatch_to_active(65, true), HookVerdict::Swallow);
        assert_eq!(drain(&mut rx).len(), 2);

        hook.uninstall();
        assert!(!hook.is_key_down(65));
        assert_eq!(dispatch_to_active(65, true), HookVerdict::Pass);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    #[serial]
    fn test_second_hook_cannot_register() {
        let (mut first, _rx1) = hook(4);
        let (mut second, _rx2) = hook(4);

        first.install().unwrap();
        assert!(matches!(second.install(), Err(HookError::AlreadyRegistered)));

        drop(first);
        second.install().unwrap();
        second.uninstall();
    }

    #[test]
    #[serial]
    fn test_failed_install_releases_slot() {
        let (mut failing, _rx) = KeyboardHook::with_backend(Box::new(ManualBackend { fail: true }), 4);
        assert!(matches!(failing.install(), Err(HookError::Install(_))));
        assert!(!failing.is_installed());

        let (mut ok, _rx) = hook(4);
        ok.install().unwrap();
        ok.uninstall();
    }

    #[test]
    fn test_uninstall_is_idempotent_and_clears_pressed_keys() {
        let (mut hook, _rx) = hook(16);
        hook.handle_transition(65, true);
        assert!(hook.is_key_down(65));

        hook.uninstall();
        hook.uninstall();
        assert!(!hook.is_key_down(65));
    }

    proptest! {
        #[test]
        fn prop_suppression_never_applies_to_first_press(vk in 1u8..=255, suppressed in proptest::collection::hash_set(1u8..=255, 0..16)) {
            let (hook, _rx) = hook(4);
            hook.set_suppressed_keys(suppressed);
            prop_assert!(!hook.should_suppress(vk, false));
            prop_assert_eq!(hook.handle_transition(vk, true), HookVerdict::Pass);
        }

        #[test]
        fn prop_key_up_always_clears_pressed(vk in 1u8..=255, presses in 1usize..4) {
            let (hook, _rx) = hook(8);
            for _ in 0..presses {
                hook.handle_transition(vk, true);
            }
            hook.handle_transition(vk, false);
            prop_assert!(!hook.is_key_down(vk));
        }
    }
}
