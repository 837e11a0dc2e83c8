/// Sentinel pid for brief-log lines without a parenthesized process id; never
/// matches a real pid.
pub const UNKNOWN_PID: &str = "-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: String,
}

/// Parses `adb devices` output. The header line and any daemon banner are
/// skipped, so an empty result covers both an empty response and the
/// header-only "no device" response.
pub fn parse_devices(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            Some(DeviceEntry {
                serial: tokens[0].to_string(),
                state: tokens[1].to_string(),
            })
        })
        .collect()
}

pub fn has_attached_device(output: &str) -> bool {
    parse_devices(output)
        .iter()
        .any(|entry| entry.state == "device")
}

/// Extracts the process id from a brief-format log line: the text between the
/// first `(` and the following `)`, trimmed. Lines without one belong to no
/// process and get the sentinel id.
pub fn brief_log_pid(line: &str) -> &str {
    let Some(open) = line.find('(') else {
        return UNKNOWN_PID;
    };
    let rest = &line[open + 1..];
    let Some(close) = rest.find(')') else {
        return UNKNOWN_PID;
    };
    rest[..close].trim()
}

/// Scans ActivityManager log entries for the one announcing the launch of
/// `launch_target` and returns its pid. A candidate entry must carry the
/// activity marker, a `pid=` marker and a ` uid=` marker after it; the pid is
/// the text in between.
pub fn resolve_activity_pid(activity_log: &str, launch_target: &str) -> Option<String> {
    let marker = format!("for activity {launch_target}");
    for entry in activity_log.lines() {
        if !entry.contains(&marker) {
            continue;
        }
        let Some(pid_idx) = entry.find("pid=") else {
            continue;
        };
        let Some(uid_idx) = entry.find(" uid=") else {
            continue;
        };
        let pid_start = pid_idx + "pid=".len();
        if uid_idx < pid_start {
            continue;
        }
        return Some(entry[pid_start..uid_idx].to_string());
    }
    None
}

/// Parses the device's `date +%s` response: decimal epoch seconds.
pub fn parse_epoch_seconds(output: &str) -> Option<i64> {
    output.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attached_devices() {
        let output = "List of devices attached\nemulator-5554\tdevice\n0123456789ABCDEF\tunauthorized\n";
        let parsed = parse_devices(output);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].serial, "emulator-5554");
        assert_eq!(parsed[0].state, "device");
        assert!(has_attached_device(output));
    }

    #[test]
    fn header_only_response_means_no_device() {
        assert!(!has_attached_device(""));
        assert!(!has_attached_device("List of devices attached \n\n"));
        assert!(!has_attached_device(
            "* daemon started successfully *\nList of devices attached\n"
        ));
    }

    #[test]
    fn unauthorized_device_does_not_count_as_attached() {
        assert!(!has_attached_device(
            "List of devices attached\nemulator-5554\tunauthorized\n"
        ));
    }

    #[test]
    fn extracts_brief_log_pid() {
        assert_eq!(brief_log_pid("W/Resources(  172): some warning"), "172");
        assert_eq!(brief_log_pid("E/Sample(555): crash"), "555");
    }

    #[test]
    fn missing_parenthesized_pid_yields_sentinel() {
        assert_eq!(brief_log_pid("--------- beginning of main"), UNKNOWN_PID);
        assert_eq!(brief_log_pid("E/NoParens: oops"), UNKNOWN_PID);
        assert_eq!(brief_log_pid("E/Unclosed(123: oops"), UNKNOWN_PID);
    }

    #[test]
    fn resolves_activity_pid_from_manager_log() {
        let log = "\
I/ActivityManager(   59): Starting: Intent { cmp=com.sample/.Main }\n\
I/ActivityManager(   59): Start proc com.sample for activity com.sample/.Main: pid=555 uid=2000 gids={}\n";
        assert_eq!(
            resolve_activity_pid(log, "com.sample/.Main").as_deref(),
            Some("555")
        );
    }

    #[test]
    fn ignores_entries_missing_markers_or_out_of_order() {
        let missing_uid = "proc for activity com.sample/.Main: pid=555 gids={}";
        assert_eq!(resolve_activity_pid(missing_uid, "com.sample/.Main"), None);

        let uid_before_pid = "proc uid=2000 for activity com.sample/.Main: pid=555";
        assert_eq!(
            resolve_activity_pid(uid_before_pid, "com.sample/.Main"),
            None
        );

        let other_activity =
            "Start proc com.other for activity com.other/.Main: pid=7 uid=2000";
        assert_eq!(resolve_activity_pid(other_activity, "com.sample/.Main"), None);
    }

    #[test]
    fn parses_device_clock() {
        assert_eq!(parse_epoch_seconds("1700000000\n"), Some(1_700_000_000));
        assert_eq!(parse_epoch_seconds("  42  "), Some(42));
        assert_eq!(parse_epoch_seconds("not-a-clock"), None);
    }
}
