//! Real-time scheduling for the control tasks (Linux SCHED_FIFO and mlockall).
//!
//! Applied once, before the machine spawns its threads, so every task thread
//! inherits the policy. Failures are logged and the grinder keeps running
//! with normal scheduling.

use crate::cli::RtArgs;
#[cfg(target_os = "linux")]
use crate::cli::RtLock;

#[cfg(target_os = "linux")]
pub fn apply(args: RtArgs) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !args.rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        match lock_memory(args.rt_lock) {
            Ok(()) => tracing::info!(mode = ?args.rt_lock, "memory locked"),
            Err(e) => tracing::warn!(error = %e, "mlockall failed"),
        }
        match set_fifo(args.rt_prio) {
            Ok(prio) => tracing::info!(prio, "SCHED_FIFO enabled"),
            Err(e) => tracing::warn!(
                error = %e,
                requested = ?args.rt_prio,
                "SCHED_FIFO not applied; needs CAP_SYS_NICE or root"
            ),
        }
    });
}

#[cfg(target_os = "linux")]
fn memlock_limit() -> Option<String> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit only writes into the provided struct.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 means the struct was initialized.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    Some(if cur == libc::RLIM_INFINITY {
        "unlimited".to_string()
    } else {
        format!("{} KiB", cur / 1024)
    })
}

#[cfg(target_os = "linux")]
fn mlockall(flags: libc::c_int) -> std::io::Result<()> {
    // SAFETY: plain syscall wrapper, no pointers involved.
    if unsafe { libc::mlockall(flags) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn lock_memory(mode: RtLock) -> eyre::Result<()> {
    let result = match mode {
        RtLock::None => return Ok(()),
        RtLock::Current => mlockall(libc::MCL_CURRENT),
        RtLock::All => mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE)
            .or_else(|_| mlockall(libc::MCL_CURRENT)),
    };
    result.map_err(|e| {
        let limit = memlock_limit().unwrap_or_else(|| "unknown".into());
        eyre::eyre!("{e} (memlock limit {limit}; needs CAP_IPC_LOCK and 'ulimit -l')")
    })
}

#[cfg(target_os = "linux")]
fn set_fifo(prio: Option<i32>) -> eyre::Result<i32> {
    // SAFETY: priority range queries have no side effects.
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_FIFO),
            libc::sched_get_priority_max(libc::SCHED_FIFO),
        )
    };
    let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
    let prio = prio.unwrap_or(max).clamp(min, max);
    let param = libc::sched_param {
        sched_priority: prio,
    };
    // SAFETY: pid 0 is the calling process; param outlives the call.
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } == 0 {
        Ok(prio)
    } else {
        Err(eyre::eyre!(std::io::Error::last_os_error()))
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply(args: RtArgs) {
    if args.rt {
        tracing::warn!("--rt is only supported on Linux; ignoring");
    }
}
