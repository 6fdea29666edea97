//! WH_KEYBOARD_LL backend
//!
//! The hook is installed from a dedicated thread that then pumps messages;
//! Windows calls the hook procedure on that thread. Uninstalling posts
//! WM_QUIT to the thread and joins it.

use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};
use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HC_ACTION, KBDLLHOOKSTRUCT, MSG,
    PM_NOREMOVE, WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP, WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP,
    WM_USER,
};

use super::{dispatch_to_active, HookBackend, HookError, HookVerdict};

#[derive(Default)]
pub(super) struct LowLevelHook {
    thread: Option<JoinHandle<()>>,
    thread_id: u32,
}

impl HookBackend for LowLevelHook {
    fn install(&mut self) -> Result<(), HookError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, String>>();

        let handle = thread::Builder::new()
            .name("keymidi-hook".to_string())
            .spawn(move || run_hook_thread(ready_tx))
            .map_err(|e| HookError::Install(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                debug!("Hook thread running (id {})", thread_id);
                self.thread = Some(handle);
                self.thread_id = thread_id;
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(HookError::Install(reason))
            }
            Err(_) => {
                let _ = handle.join();
                Err(HookError::Install("hook thread exited before reporting".to_string()))
            }
        }
    }

    fn uninstall(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        // SAFETY: posting to a thread id we created; the thread owns a message queue
        if let Err(e) = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) } {
            warn!("Failed to stop hook thread: {}", e);
            return;
        }

        if handle.join().is_err() {
            warn!("Hook thread panicked");
        }
    }
}

fn run_hook_thread(ready: std_mpsc::Sender<Result<u32, String>>) {
    let mut msg = MSG::default();

    // SAFETY: plain Win32 calls on the current thread; the hook handle is only
    // used on this thread and released before it exits
    unsafe {
        // Creates the thread message queue so WM_QUIT can be posted to it
        let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);

        let module = match GetModuleHandleW(None) {
            Ok(module) => module,
            Err(e) => {
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };

        let hook = match SetWindowsHookExW(WH_KEYBOARD_LL, Some(hook_proc), HINSTANCE(module.0), 0) {
            Ok(hook) => hook,
            Err(e) => {
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };

        let _ = ready.send(Ok(GetCurrentThreadId()));

        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }

        if let Err(e) = UnhookWindowsHookEx(hook) {
            warn!("UnhookWindowsHookEx failed: {}", e);
        }
    }
}

/// Low-level keyboard hook procedure
///
/// # Safety
///
/// Called by Windows on the hook thread with a valid KBDLLHOOKSTRUCT when
/// `n_code == HC_ACTION`.
unsafe extern "system" fn hook_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if n_code == HC_ACTION as i32 {
        let kbs = &*(l_param.0 as *const KBDLLHOOKSTRUCT);

        let is_key_down = match w_param.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => Some(true),
            WM_KEYUP | WM_SYSKEYUP => Some(false),
            _ => None,
        };

        if let (Some(is_key_down), Ok(vk_code)) = (is_key_down, u8::try_from(kbs.vkCode)) {
            if vk_code != 0 && dispatch_to_active(vk_code, is_key_down) == HookVerdict::Swallow {
                return LRESULT(1);
            }
        }
    }

    CallNextHookEx(None, n_code, w_param, l_param)
}
