//! 向后台服务的进程组发送信号
//!
//! 服务以独立进程组启动（process_group(0)），pgid 即子进程 pid；
//! 对 -pgid 发信号可以一并终止 `sh -c` 派生出的 npm / node 等孙进程。

use std::io;

use tokio::process::Child;

/// 请求温和退出（unix 上为 SIGTERM）
#[cfg(unix)]
pub(crate) fn terminate(pid: u32, _child: &mut Child) -> io::Result<()> {
    send_to_group(pid, libc::SIGTERM)
}

#[cfg(not(unix))]
pub(crate) fn terminate(_pid: u32, child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// 强制终止（unix 上为 SIGKILL），同时让 tokio 标记子进程
#[cfg(unix)]
pub(crate) fn kill(pid: u32, child: &mut Child) -> io::Result<()> {
    let result = send_to_group(pid, libc::SIGKILL);
    let _ = child.start_kill();
    result
}

#[cfg(not(unix))]
pub(crate) fn kill(_pid: u32, child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// 组长已退出后清理残留的组内进程；组不存在时静默
#[cfg(unix)]
pub(crate) fn kill_stragglers(pid: u32) {
    if let Err(e) = send_to_group(pid, libc::SIGKILL) {
        tracing::debug!(pid, error = %e, "failed to signal leftover process group");
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_stragglers(_pid: u32) {}

#[cfg(unix)]
fn send_to_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // pid 0 会变成 kill(0, ..)，即向自身所在进程组发信号
    let pgid = i32::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid process id"))?;
    // SAFETY: kill(2) 只读取两个整数参数，不涉及内存访问
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_zero_pid_is_rejected() {
        let err = send_to_group(0, libc::SIGTERM).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
