//! Fatal-signal diagnostics.
//!
//! Handlers are installed once, before any listener exists, as a fixed table
//! keyed by signal. On delivery the handler writes a backtrace to descriptor
//! 2 and re-raises with the default disposition (the handler is registered
//! with `SA_RESETHAND`). The report is best effort only: capturing and
//! formatting a backtrace allocates and is not async-signal-safe.
//!
//! Handlers run on the faulting thread's own stack. Rust's alternate signal
//! stack is too small to capture a backtrace on. A fault raised while a
//! report is being written skips the report and dies with the default
//! disposition.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::backtrace::Backtrace;
use std::fs::File;
use std::io::Write;
use std::mem::ManuallyDrop;
use std::os::fd::FromRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Signals that get a diagnostic before the process dies.
pub const FATAL_SIGNALS: [Signal; 5] = [
    Signal::SIGSEGV,
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
];

static HANDLERS: OnceLock<CrashHandlers> = OnceLock::new();

/// Set by the first handler invocation.
static REPORTING: AtomicBool = AtomicBool::new(false);

/// The installed handler table.
#[derive(Debug)]
pub struct CrashHandlers {
    installed: Vec<Signal>,
}

impl CrashHandlers {
    pub fn handles(&self, signal: Signal) -> bool {
        self.installed.contains(&signal)
    }

    pub fn signals(&self) -> &[Signal] {
        &self.installed
    }
}

/// Install crash handlers and the panic hook. Later calls return the table
/// installed by the first one.
pub fn install() -> &'static CrashHandlers {
    HANDLERS.get_or_init(|| {
        install_panic_hook();
        let installed = FATAL_SIGNALS
            .iter()
            .copied()
            .filter(|&sig| match install_one(sig) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("cannot install {} handler: {}", sig.as_str(), e);
                    false
                }
            })
            .collect();
        tracing::debug!("crash handlers installed");
        CrashHandlers { installed }
    })
}

#[allow(unsafe_code)]
fn install_one(sig: Signal) -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_fatal_signal),
        handler_flags(),
        SigSet::empty(),
    );
    // SAFETY: the handler only formats and writes a report, then re-raises.
    unsafe { signal::sigaction(sig, &action) }?;
    Ok(())
}

fn handler_flags() -> SaFlags {
    SaFlags::SA_RESETHAND
}

#[allow(unsafe_code)]
extern "C" fn on_fatal_signal(signum: nix::libc::c_int) {
    let sig = Signal::try_from(signum).ok();
    if REPORTING.swap(true, Ordering::SeqCst) {
        die(sig);
        return;
    }
    let report = format!(
        "fatal signal {} ({}) in pid {}\n{}\n",
        sig.map(Signal::as_str).unwrap_or("unknown"),
        signum,
        std::process::id(),
        Backtrace::force_capture()
    );
    // SAFETY: descriptor 2 outlives this call; ManuallyDrop keeps it open.
    let mut stderr = ManuallyDrop::new(unsafe { File::from_raw_fd(2) });
    let _ = stderr.write_all(report.as_bytes());

    die(sig);
}

/// Restore the default disposition and re-raise.
#[allow(unsafe_code)]
fn die(sig: Option<Signal>) {
    if let Some(sig) = sig {
        // SAFETY: SIG_DFL installs no Rust code.
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
        let _ = signal::raise(sig);
    }
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("panic: {}\n{}", info, Backtrace::force_capture());
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_one_time() {
        let first = install();
        let second = install();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_handlers_run_on_the_thread_stack() {
        let flags = handler_flags();
        assert!(flags.contains(SaFlags::SA_RESETHAND));
        assert!(!flags.contains(SaFlags::SA_ONSTACK));
    }

    #[test]
    fn test_table_covers_segv_and_abort() {
        let handlers = install();
        assert!(handlers.handles(Signal::SIGSEGV));
        assert!(handlers.handles(Signal::SIGABRT));
        assert!(!handlers.handles(Signal::SIGTERM));
        assert_eq!(handlers.signals().len(), FATAL_SIGNALS.len());
    }
}
