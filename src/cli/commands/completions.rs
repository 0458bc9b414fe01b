//! Shell completions generation.

use std::io::Write;

use clap::CommandFactory;
use clap_complete::Shell;

use crate::cli::args::Cli;
use crate::error::StudySyncError;

/// Generate the completion script for `shell`.
///
/// # Errors
///
/// Returns `InvalidInput` for unsupported shells.
pub fn completions(shell: &str) -> Result<String, StudySyncError> {
    let shell = shell_from_str(shell)
        .ok_or_else(|| StudySyncError::InvalidInput(format!("Unsupported shell: {shell}")))?;

    let mut buf = Vec::new();
    generate_to(&mut buf, shell);
    String::from_utf8(buf)
        .map_err(|e| StudySyncError::InvalidInput(format!("UTF-8 error: {e}")))
}

fn generate_to<W: Write>(buf: &mut W, shell: Shell) {
    clap_complete::generate(shell, &mut Cli::command(), "studysync", buf);
}

fn shell_from_str(s: &str) -> Option<Shell> {
    match s.to_lowercase().as_str() {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "powershell" | "ps" | "pwsh" => Some(Shell::PowerShell),
        "elvish" => Some(Shell::Elvish),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_from_str() {
        assert_eq!(shell_from_str("BASH"), Some(Shell::Bash));
        assert_eq!(shell_from_str("pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_str("tcsh"), None);
    }

    #[test]
    fn test_generate_bash() {
        let script = completions("bash").unwrap();
        assert!(script.contains("studysync"));
        assert!(completions("tcsh").is_err());
    }
}
