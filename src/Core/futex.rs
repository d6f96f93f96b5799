use std::sync::atomic::AtomicU32;
use std::time::Duration;

// Event words live in MAP_SHARED memory that other processes may map, so the
// futex calls below deliberately omit FUTEX_PRIVATE_FLAG.

/// Sleep while `*atomic == expected`, for at most `timeout` when given.
/// Spurious returns are allowed; callers re-check their condition.
#[cfg(target_os = "linux")]
pub fn futex_wait(atomic: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    use std::ptr;
    use std::sync::atomic::Ordering;

    // Check condition first to avoid syscall if possible
    if atomic.load(Ordering::Acquire) != expected {
        return;
    }

    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null::<libc::timespec>(), |t| t as *const libc::timespec);

    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
            ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(target_os = "linux")]
fn wake(atomic: &AtomicU32, waiters: i32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAKE,
            waiters,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

/// Wake the single waiter of an SPSC event word.
#[cfg(target_os = "linux")]
pub fn futex_wake(atomic: &AtomicU32) {
    wake(atomic, 1);
}

/// Wake every waiter; used on close/shutdown.
#[cfg(target_os = "linux")]
pub fn futex_wake_all(atomic: &AtomicU32) {
    wake(atomic, i32::MAX);
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(_atomic: &AtomicU32, _expected: u32, timeout: Option<Duration>) {
    // Fallback for non-Linux: short sleep bounded by the timeout
    let nap = Duration::from_micros(200);
    std::thread::sleep(timeout.map_or(nap, |t| t.min(nap)));
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_atomic: &AtomicU32) {
    // No-op on non-Linux
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake_all(_atomic: &AtomicU32) {
    // No-op on non-Linux
}
