//! `--daemon` detachment: double-fork, `setsid`, and PID file ownership.
//!
//! Must run before the Tokio runtime starts — forking a multi-threaded
//! process is unsafe, so this is the first thing `main` does, ahead of
//! `#[tokio::main]`'s runtime construction.

use std::fs;
use std::io;
use std::path::Path;

use nix::sys::stat::Mode;
use nix::unistd::{ForkResult, Pid, fork, setsid};

const DEVNULL: &str = "/dev/null";

/// Daemonize the current process: fork twice so the daemon is reparented to
/// init and can never reacquire a controlling terminal, detach from the
/// session, `chdir("/")`, and redirect stdio to `/dev/null`.
///
/// The first parent exits immediately (the shell that launched `--daemon`
/// sees a normal, fast exit). The intermediate child calls `setsid` to
/// become a session leader, then forks again and exits itself, so the
/// final grandchild is not a session leader and can't accidentally
/// acquire a controlling terminal.
pub fn daemonize(pid_file: &str) -> io::Result<()> {
    check_not_running(pid_file)?;

    match unsafe { fork() }.map_err(nix_to_io)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(nix_to_io)?;

    match unsafe { fork() }.map_err(nix_to_io)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    std::env::set_current_dir("/")?;
    redirect_stdio()?;
    write_pid_file(pid_file)?;

    Ok(())
}

/// Refuse to start if the PID file names a process that is still alive.
/// A stale file (process gone) is silently reclaimed.
fn check_not_running(pid_file: &str) -> io::Result<()> {
    let Ok(contents) = fs::read_to_string(pid_file) else {
        return Ok(());
    };

    let Ok(pid) = contents.trim().parse::<i32>() else {
        return Ok(());
    };

    if process_alive(pid) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("agent already running with pid {pid} ({pid_file})"),
        ));
    }

    Ok(())
}

fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(Pid::from_raw(pid), None).is_ok()
}

fn write_pid_file(pid_file: &str) -> io::Result<()> {
    if let Some(parent) = Path::new(pid_file).parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(pid_file, format!("{}\n", std::process::id()))
}

fn redirect_stdio() -> io::Result<()> {
    use nix::fcntl::{OFlag, open};
    use std::os::fd::AsRawFd;
    use std::os::unix::io::FromRawFd;

    let devnull = open(DEVNULL, OFlag::O_RDWR, Mode::empty()).map_err(nix_to_io)?;
    let devnull_file = unsafe { std::fs::File::from_raw_fd(devnull) };

    for fd in [0, 1, 2] {
        nix::unistd::dup2(devnull_file.as_raw_fd(), fd).map_err(nix_to_io)?;
    }

    std::mem::forget(devnull_file);
    Ok(())
}

fn nix_to_io(err: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

/// Remove the PID file. Called from the shutdown path; best-effort since a
/// failure here shouldn't block graceful exit.
pub fn remove_pid_file(pid_file: &str) {
    let _ = fs::remove_file(pid_file);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_pid_file_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("agent.pid");
        // PID 999999 is extremely unlikely to be a live process.
        fs::write(&pid_path, "999999\n").unwrap();
        assert!(check_not_running(pid_path.to_str().unwrap()).is_ok());
    }

    #[test]
    fn missing_pid_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("agent.pid");
        assert!(check_not_running(pid_path.to_str().unwrap()).is_ok());
    }

    #[test]
    fn running_process_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("agent.pid");
        fs::write(&pid_path, format!("{}\n", std::process::id())).unwrap();
        assert!(check_not_running(pid_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn write_and_remove_pid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("nested/agent.pid");
        write_pid_file(pid_path.to_str().unwrap()).unwrap();
        assert!(pid_path.exists());
        remove_pid_file(pid_path.to_str().unwrap());
        assert!(!pid_path.exists());
    }
}
