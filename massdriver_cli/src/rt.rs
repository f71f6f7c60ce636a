//! Real-time scheduling helpers (Linux SCHED_FIFO / affinity / mlockall; mlockall elsewhere on unix).
//!
//! Applied at most once per process, before the busy-wait clock is calibrated,
//! so the calibration reflects the scheduling the shot will run under.

use std::sync::OnceLock;

use crate::cli::{RtLock, RtOpts};

static RT_ONCE: OnceLock<()> = OnceLock::new();

pub fn setup_rt_once(opts: &RtOpts) {
    if !opts.rt {
        return;
    }
    let lock = opts.rt_lock.unwrap_or_else(RtLock::os_default);
    RT_ONCE.get_or_init(|| {
        match apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "rt: memory lock applied"),
            Err(err) => tracing::warn!(error = %err, "rt: mlockall failed"),
        }
        #[cfg(target_os = "linux")]
        {
            if let Err(err) = linux::apply_fifo_priority(opts.rt_prio) {
                tracing::warn!(prio = ?opts.rt_prio, error = %err, "rt: sched_setscheduler(SCHED_FIFO) failed");
            }
            if let Err(err) = linux::apply_affinity(opts.rt_cpu.unwrap_or(0)) {
                tracing::warn!(error = %err, "rt: affinity not applied");
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (opts.rt_prio, opts.rt_cpu);
            tracing::warn!("rt: SCHED_FIFO and affinity are Linux only; only mlockall applied");
        }
    });
}

#[cfg(unix)]
fn apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};

    fn is_retryable(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    fn lock_with(flags: libc::c_int) -> std::io::Result<()> {
        // SAFETY: mlockall only changes paging policy for this process.
        let rc = unsafe { mlockall(flags) };
        if rc != 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn memlock_limit_hint() -> Option<String> {
        let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        // SAFETY: getrlimit writes a full rlimit on success; it is only read then.
        unsafe {
            if libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) != 0 {
                return None;
            }
            let cur = rlim.assume_init().rlim_cur;
            if cur == libc::RLIM_INFINITY {
                Some("memlock limit: unlimited".to_string())
            } else {
                Some(format!("memlock limit: {} KiB", cur / 1024))
            }
        }
    }

    let result = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => lock_with(MCL_CURRENT),
        RtLock::All => lock_with(MCL_CURRENT | MCL_FUTURE),
    };
    let Err(err) = result else {
        return Ok(());
    };

    // All failed for lack of permission or memory: settle for Current.
    let mut fallback_err = None;
    if lock == RtLock::All && is_retryable(&err) {
        match lock_with(MCL_CURRENT) {
            Ok(()) => return Ok(()),
            Err(e2) => fallback_err = Some(e2),
        }
    }

    let mut msg = format!("mlockall({lock:?}) failed: {err}");
    if is_retryable(&err) {
        if let Some(h) = memlock_limit_hint() {
            msg.push_str(&format!("; {h}"));
        }
        msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
        if let Some(e2) = fallback_err {
            msg.push_str(&format!("; fallback mlockall(current) also failed: {e2}"));
        }
    }
    Err(eyre::eyre!(msg))
}

#[cfg(not(unix))]
fn apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    match lock {
        RtLock::None => Ok(()),
        _ => eyre::bail!("memory locking is not supported on this platform"),
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use libc::{CPU_ISSET, CPU_SET, CPU_ZERO, SCHED_FIFO, sched_param};

    /// Capacity of cpu_set_t in CPU indices (bits).
    const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

    fn has_sys_nice() -> bool {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return true;
        };
        status.lines().any(|line| {
            (line.starts_with("CapEff:") || line.starts_with("CapPrm:"))
                && line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|hex| u64::from_str_radix(hex, 16).ok())
                    .is_some_and(|caps| caps & 0x0080_0000 != 0)
        })
    }

    /// SCHED_FIFO at `prio`, clamped to the system range (max when unset).
    pub fn apply_fifo_priority(prio: Option<i32>) -> eyre::Result<()> {
        // SAFETY: geteuid has no preconditions.
        let euid = unsafe { libc::geteuid() };
        if !has_sys_nice() && euid != 0 {
            eyre::bail!(
                "insufficient privileges for SCHED_FIFO: needs CAP_SYS_NICE or root (euid {euid}); \
                 hint: 'sudo setcap cap_sys_nice=ep /path/to/massdriver'"
            );
        }
        // SAFETY: plain queries of the scheduler's priority range.
        let (min, max) = unsafe {
            let min = libc::sched_get_priority_min(SCHED_FIFO);
            let max = libc::sched_get_priority_max(SCHED_FIFO);
            if min < 0 || max < 0 { (1, 99) } else { (min, max) }
        };
        let param = sched_param {
            sched_priority: prio.unwrap_or(max).clamp(min, max),
        };
        // SAFETY: param outlives the call; pid 0 is the calling process.
        let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Pin the process to `cpu` if the current affinity mask allows it.
    pub fn apply_affinity(cpu: usize) -> eyre::Result<()> {
        // SAFETY: sysconf has no preconditions.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online < 1 {
            eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
        }
        if cpu >= MAX_CPUSET_BITS || cpu as libc::c_long >= online {
            eyre::bail!("requested CPU {cpu} >= online {online}");
        }
        // SAFETY: cpu_set_t is plain data; every access stays below MAX_CPUSET_BITS.
        unsafe {
            let mut allowed: libc::cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut allowed);
            if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut allowed) != 0 {
                return Err(eyre::eyre!(std::io::Error::last_os_error()));
            }
            if !CPU_ISSET(cpu, &allowed) {
                eyre::bail!("CPU {cpu} not permitted by current affinity mask");
            }
            let mut desired: libc::cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut desired);
            CPU_SET(cpu, &mut desired);
            if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &desired) != 0 {
                return Err(eyre::eyre!(std::io::Error::last_os_error()));
            }
        }
        tracing::info!(cpu, "rt: affinity applied");
        Ok(())
    }
}
