use std::process::{Command, Stdio};

/// Runs `kill <signal> -- <target>` and reports whether it succeeded. A
/// negative target addresses a whole process group. Always false off unix.
pub fn send_signal(target: i64, signal: &str) -> bool {
    if !cfg!(unix) {
        return false;
    }
    Command::new("kill")
        .arg(signal)
        .arg("--")
        .arg(target.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Signal 0 probes for existence without touching the process.
pub fn is_process_alive(pid: u32) -> bool {
    pid != 0 && send_signal(i64::from(pid), "-0")
}

/// Kills every process in the group led by `leader`.
pub fn kill_process_group(leader: u32) -> bool {
    leader != 0 && send_signal(-i64::from(leader), "-KILL")
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::time::{Duration, Instant};

    #[test]
    fn group_kill_reaches_background_children() {
        let mut leader = Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & echo $! ; wait")
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .expect("spawn");
        let mut line = String::new();
        let stdout = leader.stdout.take().expect("stdout");
        std::io::BufRead::read_line(&mut std::io::BufReader::new(stdout), &mut line)
            .expect("read pid");
        let background: u32 = line.trim().parse().expect("pid");
        assert!(still_running(background));

        assert!(kill_process_group(leader.id()));
        leader.wait().expect("reap leader");
        let deadline = Instant::now() + Duration::from_secs(5);
        while still_running(background) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!still_running(background));
    }

    /// Zombies waiting for a reaper count as gone.
    fn still_running(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
            stat.rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z'))
        })
    }

    #[test]
    fn liveness_probe_sees_this_process_only() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
    }
}
