//! Shell-wrapper unwrapping for exec argv validation.
//!
//! `sudo nice bash -c "curl ..."` must be judged by what it ultimately
//! runs, not by its first token. The unwrapper strips known wrapper
//! binaries from the head of an argv until it reaches the real command,
//! with a depth cap that fails closed.

use std::path::Path;

/// Wrapper binaries stripped from the head of an argv.
const SHELL_WRAPPERS: &[&str] = &[
    "sh", "bash", "zsh", "dash", "env", "nice", "nohup", "sudo", "doas", "timeout",
];

/// Maximum wrapper nesting before the unwrapper gives up.
pub const MAX_UNWRAP_DEPTH: usize = 10;

fn basename(token: &str) -> &str {
    Path::new(token)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(token)
}

/// Whether `binary` (basename) is a recognized shell wrapper.
pub fn is_shell_wrapper(binary: &str) -> bool {
    SHELL_WRAPPERS.contains(&binary)
}

/// Returns the index of the first argv token that is the actual command,
/// skipping wrapper binaries and their flags. A `-c` flag means the next
/// token is an inline command, which is returned directly.
///
/// Returns `None` only when the wrapper depth cap is exceeded (fail
/// closed). The returned index may equal `argv.len()` when the argv is
/// nothing but wrappers.
pub fn unwrap_shell_wrapper_argv(argv: &[String]) -> Option<usize> {
    let mut idx = 0;
    let mut depth = 0;

    while idx < argv.len() && depth < MAX_UNWRAP_DEPTH {
        if !is_shell_wrapper(basename(&argv[idx])) {
            return Some(idx);
        }
        idx += 1;
        depth += 1;

        // Skip the wrapper's flags.
        while idx < argv.len() && argv[idx].starts_with('-') {
            if argv[idx] == "-c" {
                // The inline command follows -c.
                return Some(idx + 1);
            }
            idx += 1;
        }
    }

    if depth >= MAX_UNWRAP_DEPTH {
        return None;
    }

    Some(idx)
}

/// Index of the token following a `-c` flag, if any.
pub fn resolve_inline_command_token_index(argv: &[String]) -> Option<usize> {
    argv.iter()
        .position(|a| a == "-c")
        .filter(|i| i + 1 < argv.len())
        .map(|i| i + 1)
}

/// Whether any non-flag argument follows `command_index`.
pub fn has_trailing_positional_argv(argv: &[String], command_index: usize) -> bool {
    argv.iter()
        .skip(command_index + 1)
        .any(|a| !a.starts_with('-'))
}

/// Verify that what an argv actually runs matches the command the caller
/// declared it runs. Fails closed on wrapper-depth overflow.
pub fn validate_system_run_consistency(argv: &[String], declared_command: &str) -> bool {
    if argv.is_empty() {
        return false;
    }

    let Some(resolved_idx) = unwrap_shell_wrapper_argv(argv) else {
        return false;
    };
    if resolved_idx >= argv.len() {
        return false;
    }

    basename(&argv[resolved_idx]) == basename(declared_command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_command_is_index_zero() {
        assert_eq!(unwrap_shell_wrapper_argv(&argv(&["ls", "-la"])), Some(0));
    }

    #[test]
    fn wrappers_are_stripped() {
        assert_eq!(
            unwrap_shell_wrapper_argv(&argv(&["sudo", "nice", "ls"])),
            Some(2)
        );
        assert_eq!(
            unwrap_shell_wrapper_argv(&argv(&["/usr/bin/env", "python3", "script.py"])),
            Some(1)
        );
    }

    #[test]
    fn dash_c_points_at_inline_command() {
        assert_eq!(
            unwrap_shell_wrapper_argv(&argv(&["bash", "-c", "curl http://x"])),
            Some(2)
        );
        assert_eq!(
            unwrap_shell_wrapper_argv(&argv(&["sudo", "bash", "-x", "-c", "id"])),
            Some(4)
        );
    }

    #[test]
    fn depth_cap_fails_closed() {
        let tokens: Vec<String> = std::iter::repeat_n("sh".to_string(), MAX_UNWRAP_DEPTH + 2).collect();
        assert_eq!(unwrap_shell_wrapper_argv(&tokens), None);
    }

    #[test]
    fn all_wrappers_below_cap_returns_len() {
        let tokens = argv(&["sudo", "env"]);
        assert_eq!(unwrap_shell_wrapper_argv(&tokens), Some(2));
    }

    #[test]
    fn unwrap_index_never_exceeds_len() {
        for tokens in [
            argv(&["sh"]),
            argv(&["env", "-i"]),
            argv(&["bash", "-c", "x"]),
            argv(&["nohup", "nice", "-n", "10"]),
        ] {
            if let Some(i) = unwrap_shell_wrapper_argv(&tokens) {
                assert!(i <= tokens.len());
            }
        }
    }

    #[test]
    fn consistency_check_matches_basenames() {
        assert!(validate_system_run_consistency(
            &argv(&["sudo", "/usr/bin/git", "status"]),
            "git"
        ));
        assert!(!validate_system_run_consistency(
            &argv(&["sudo", "rm", "-rf", "/"]),
            "git"
        ));
        assert!(!validate_system_run_consistency(&argv(&[]), "git"));
    }

    #[test]
    fn inline_command_index() {
        assert_eq!(
            resolve_inline_command_token_index(&argv(&["bash", "-c", "ls"])),
            Some(2)
        );
        assert_eq!(resolve_inline_command_token_index(&argv(&["bash", "-c"])), None);
    }

    #[test]
    fn trailing_positionals() {
        assert!(has_trailing_positional_argv(&argv(&["git", "status", "-s"]), 0));
        assert!(!has_trailing_positional_argv(&argv(&["git", "-s"]), 0));
    }
}
