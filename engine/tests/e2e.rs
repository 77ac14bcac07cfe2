//! Drives the real engine binary over real pipes, the way an external
//! fuzzer would.

#![cfg(target_os = "linux")]

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

const CONTROL_FD: RawFd = 198;
const STATUS_FD: RawFd = 199;

struct Driver {
    control: File,
    status: File,
    engine: Child,
}

impl Driver {
    fn spawn(args: &[&str]) -> Self {
        let (control_rx, control_tx) = pipe();
        let (status_rx, status_tx) = pipe();
        let (control_fd, status_fd) = (control_rx.as_raw_fd(), status_tx.as_raw_fd());

        let mut cmd = engine_command(args);
        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                install(control_fd, CONTROL_FD)?;
                install(status_fd, STATUS_FD)
            });
        }
        let engine = cmd.spawn().expect("spawn engine");

        Self {
            control: control_tx,
            status: status_rx,
            engine,
        }
    }

    fn read_word(&mut self) -> i32 {
        let mut buf = [0u8; 4];
        self.status.read_exact(&mut buf).expect("read status pipe");
        i32::from_ne_bytes(buf)
    }

    /// One fork round: go, then (child pid, wait status).
    fn round(&mut self) -> (i32, i32) {
        self.control.write_all(&[0u8; 4]).expect("send go");
        let pid = self.read_word();
        let status = self.read_word();
        (pid, status)
    }

    /// Close the control pipe and collect the engine's exit code.
    fn finish(self) -> Option<i32> {
        let Driver {
            control,
            status,
            mut engine,
        } = self;
        drop(control);
        drop(status);
        engine.wait().expect("wait engine").code()
    }
}

fn engine_command(args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_forksrv-engine"));
    cmd.args(args)
        .env_remove("FORKSRV_FD")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::null());
    cmd
}

fn pipe() -> (File, File) {
    let mut fds = [0 as libc::c_int; 2];
    assert_eq!(
        unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) },
        0,
        "pipe2"
    );
    let (read_end, write_end) =
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    (File::from(read_end), File::from(write_end))
}

/// Place `fd` on `target` without close-on-exec.
fn install(fd: RawFd, target: RawFd) -> std::io::Result<()> {
    let rc = if fd == target {
        unsafe { libc::fcntl(fd, libc::F_SETFD, 0) }
    } else {
        unsafe { libc::dup2(fd, target) }
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn exited_with(status: i32) -> Option<i32> {
    if status & 0x7f == 0 {
        Some((status >> 8) & 0xff)
    } else {
        None
    }
}

#[test]
fn test_second_round_inherits_translations() {
    let mut driver = Driver::spawn(&["--pc", "0x1000", "--pc", "0x2000", "--report-misses"]);
    let engine_pid = driver.engine.id() as i32;
    driver.read_word();

    let (first_pid, first) = driver.round();
    assert!(first_pid > 0);
    assert_ne!(first_pid, engine_pid);
    assert_eq!(exited_with(first), Some(2), "first child translates both");

    let (second_pid, second) = driver.round();
    assert_ne!(second_pid, first_pid);
    assert_eq!(exited_with(second), Some(0), "second child finds both cached");

    assert_eq!(driver.finish(), Some(2));
}

#[test]
fn test_status_is_reported_each_round() {
    let mut driver = Driver::spawn(&["--pc", "0x3000", "--node", "0x3000"]);
    driver.read_word();

    for _ in 0..3 {
        let (_, status) = driver.round();
        assert_eq!(exited_with(status), Some(0));
    }
    assert_eq!(driver.finish(), Some(2));
}

/// Scheduler state and user+system CPU ticks from `/proc/<pid>/stat`.
fn cpu_ticks(pid: u32) -> (char, u64) {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).expect("read stat");
    // Fields after the parenthesized command name: state is first, utime
    // and stime are the 12th and 13th.
    let rest = &stat[stat.rfind(')').expect("comm") + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let state = fields[0].chars().next().expect("state");
    let utime: u64 = fields[11].parse().expect("utime");
    let stime: u64 = fields[12].parse().expect("stime");
    (state, utime + stime)
}

#[test]
fn test_engine_parks_while_waiting_for_go() {
    let mut driver = Driver::spawn(&["--pc", "0x1000"]);
    driver.read_word();
    let pid = driver.engine.id();

    thread::sleep(Duration::from_millis(50));
    let (_, before) = cpu_ticks(pid);
    thread::sleep(Duration::from_millis(500));
    let (state, after) = cpu_ticks(pid);

    assert_eq!(state, 'S', "engine sleeps in the go read");
    assert!(after - before <= 1, "engine burned {} ticks", after - before);

    let (_, status) = driver.round();
    assert_eq!(exited_with(status), Some(0));
    assert_eq!(driver.finish(), Some(2));
}

#[test]
fn test_driver_gone_before_first_round() {
    let mut driver = Driver::spawn(&["--pc", "0x1000"]);
    driver.read_word();
    assert_eq!(driver.finish(), Some(2));
}

#[test]
fn test_standalone_without_driver() {
    let output = engine_command(&["--pc", "0x1000", "--pc", "0x1000", "--report-misses", "--stats"])
        .output()
        .expect("run engine");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("\"generated\":1"), "stats: {}", stderr);
    assert!(stderr.contains("\"hintHits\":1"), "stats: {}", stderr);
}
