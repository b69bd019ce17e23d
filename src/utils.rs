//! Small free-function helpers used by the supervisor and master.

use std::collections::HashMap;

/// Overlay `overlay` onto `base`, with overlay keys winning. Used to derive
/// a spawned child's environment from the master's own, plus any overlay
/// keys the cluster config supplied.
pub fn merge_env(
    base: impl IntoIterator<Item = (String, String)>,
    overlay: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = base.into_iter().collect();
    for (k, v) in overlay {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Whether `arg` looks like a debugger/inspector flag.
pub fn is_inspect_flag(arg: &str) -> bool {
    arg == "--inspect"
        || arg.starts_with("--inspect-brk")
        || arg.starts_with("--inspect-port")
        || arg.starts_with("--debug-port")
}

/// Pull the port number out of the master's own inspect/debug argument, if
/// it carried one. A real master process does not always know its own
/// `--inspect-brk` argument ahead of parsing `argv`, so this is parsed once
/// at startup rather than assumed. Only the `--flag=port` form carries a
/// port; a bare `--inspect`/`--inspect-brk` with no `=port` has nothing to
/// offset from.
pub fn parse_master_debug_port<'a>(args: impl IntoIterator<Item = &'a String>) -> Option<u16> {
    args.into_iter().find_map(|arg| {
        if !is_inspect_flag(arg) {
            return None;
        }
        arg.split_once('=').and_then(|(_, port)| port.parse().ok())
    })
}

/// Compute the next debug port for a spawned child, clamping at 65535
/// rather than overflowing past it.
pub fn next_debug_port(master_debug_port: u16, offset: u32) -> u16 {
    let candidate = master_debug_port as u32 + offset;
    candidate.min(65535) as u16
}

/// Rewrite a child's argument list: strip any existing `--inspect-brk*`
/// argument and append a fresh one naming `new_port`.
pub fn rewrite_inspect_args(args: &[String], new_port: u16) -> Vec<String> {
    let mut rewritten: Vec<String> = args
        .iter()
        .filter(|a| !a.starts_with("--inspect-brk"))
        .cloned()
        .collect();
    rewritten.push(format!("--inspect-brk={new_port}"));
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_wins_over_base() {
        let base = [("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())];
        let mut overlay = HashMap::new();
        overlay.insert("B".to_string(), "overridden".to_string());
        let merged = merge_env(base, &overlay);
        assert_eq!(merged.get("A"), Some(&"1".to_string()));
        assert_eq!(merged.get("B"), Some(&"overridden".to_string()));
    }

    #[test]
    fn recognizes_inspect_flags() {
        assert!(is_inspect_flag("--inspect"));
        assert!(is_inspect_flag("--inspect-brk"));
        assert!(is_inspect_flag("--inspect-brk=9229"));
        assert!(is_inspect_flag("--inspect-port=9229"));
        assert!(is_inspect_flag("--debug-port=9229"));
        assert!(!is_inspect_flag("--verbose"));
    }

    #[test]
    fn debug_port_offsets_increment() {
        assert_eq!(next_debug_port(9229, 1), 9230);
        assert_eq!(next_debug_port(9229, 2), 9231);
    }

    #[test]
    fn debug_port_overflow_clamps_instead_of_wrapping() {
        assert_eq!(next_debug_port(65535, 1), 65535);
        assert_eq!(next_debug_port(65534, 2), 65535);
        // A larger offset used to wrap a u16 cast back down to near 0;
        // it must still clamp at the top of the port range.
        assert_eq!(next_debug_port(65535, 2), 65535);
    }

    #[test]
    fn parses_port_from_own_inspect_brk_argument() {
        let args = vec!["--quiet".to_string(), "--inspect-brk=9229".to_string()];
        assert_eq!(parse_master_debug_port(&args), Some(9229));
    }

    #[test]
    fn no_port_when_no_inspect_flag_present() {
        let args = vec!["--workers".to_string(), "4".to_string()];
        assert_eq!(parse_master_debug_port(&args), None);
    }

    #[test]
    fn rewrite_strips_old_inspect_brk_and_appends_new() {
        let args = vec!["--inspect-brk=9229".to_string(), "--foo".to_string()];
        let rewritten = rewrite_inspect_args(&args, 9230);
        assert_eq!(rewritten, vec!["--foo".to_string(), "--inspect-brk=9230".to_string()]);
    }
}
