use crate::process::ProcessHandle;
use tracing::debug;

const EXECUTABLE_SUFFIX: &str = ".exe";

/// Picks the target workload out of a process snapshot.
///
/// A process matches when its name contains one of `target_names`, or,
/// failing that, when its command line contains a target name stripped of
/// its `.exe` suffix. Comparison is case-insensitive substring containment.
pub fn select_targets(handles: Vec<ProcessHandle>, target_names: &[String]) -> Vec<ProcessHandle> {
    let names: Vec<String> = target_names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return Vec::new();
    }

    let mut tokens: Vec<&str> = Vec::with_capacity(names.len());
    for token in names.iter().map(|n| base_token(n)) {
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    }

    handles
        .into_iter()
        .filter(|handle| {
            let name = handle.name.to_lowercase();
            if let Some(target) = names.iter().find(|n| name.contains(n.as_str())) {
                debug!(pid = handle.pid, name = %handle.name, pattern = %target, "matched by name");
                return true;
            }
            let command_line = handle.command_line.to_lowercase();
            if let Some(token) = tokens.iter().find(|t| command_line.contains(**t)) {
                debug!(pid = handle.pid, name = %handle.name, pattern = %token, "matched by command line");
                return true;
            }
            false
        })
        .collect()
}

fn base_token(name: &str) -> &str {
    name.strip_suffix(EXECUTABLE_SUFFIX).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(pid: u32, name: &str, command_line: &str) -> ProcessHandle {
        ProcessHandle {
            pid,
            name: name.to_string(),
            command_line: command_line.to_string(),
            start_time: 1,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn name_match_is_case_insensitive() {
        let found = select_targets(vec![handle(10, "T-Rex.EXE", "")], &names(&["t-rex"]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pid, 10);
    }

    #[test]
    fn command_line_matches_base_token() {
        let handles = vec![
            handle(1, "bash", "bash"),
            handle(2, "wine64", "wine64 C:\\miners\\T-Rex.exe -a ethash"),
            handle(3, "python3", "python3 monitor.py"),
        ];
        let found = select_targets(handles, &names(&["t-rex.exe"]));
        assert_eq!(found.iter().map(|h| h.pid).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn output_keeps_snapshot_order() {
        let handles = vec![
            handle(30, "trex", ""),
            handle(5, "bash", ""),
            handle(7, "t-rex", ""),
        ];
        let found = select_targets(handles, &names(&["t-rex", "trex"]));
        assert_eq!(found.iter().map(|h| h.pid).collect::<Vec<_>>(), vec![30, 7]);
    }

    #[test]
    fn empty_name_list_matches_nothing() {
        let handles = vec![handle(1, "t-rex", "t-rex")];
        assert!(select_targets(handles.clone(), &[]).is_empty());
        assert!(select_targets(handles, &names(&["  "])).is_empty());
    }

    #[test]
    fn unrelated_processes_are_ignored() {
        let handles = vec![handle(1, "Xorg", "/usr/lib/Xorg :0"), handle(2, "sshd", "")];
        assert!(select_targets(handles, &names(&["t-rex.exe", "trex"])).is_empty());
    }
}
