//! Environment file loading
//!
//! Format: one `name=value` per line. Blank lines and lines starting with
//! `#` are skipped, leading whitespace before a name is ignored.

use std::fs;
use std::path::Path;

use isolate_core::{Error, Result};

/// Variables read from an environment file, in file order
pub type Environment = Vec<(String, String)>;

/// Read and parse an environment file
pub fn load(path: &Path) -> Result<Environment> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
    parse(&text).map_err(|e| Error::config(format!("{}: {e}", path.display())))
}

/// Parse environment file contents
pub fn parse(text: &str) -> Result<Environment> {
    let mut environment = Environment::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (name, value) = line
            .split_once('=')
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| Error::config(format!("line {}: expected name=value", number + 1)))?;

        environment.push((name.to_string(), value.to_string()));
    }

    Ok(environment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_and_blank_lines() {
        let env = parse("# comment\n\nFOO=bar\n").unwrap();
        assert_eq!(env, vec![("FOO".to_string(), "bar".to_string())]);
    }

    #[test]
    fn test_leading_whitespace_trimmed() {
        let env = parse("   PATH=/bin:/usr/bin\n\t# indented comment\n  EMPTY=\n").unwrap();
        assert_eq!(
            env,
            vec![
                ("PATH".to_string(), "/bin:/usr/bin".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_value_keeps_later_equals() {
        let env = parse("OPTS=a=b=c").unwrap();
        assert_eq!(env[0].1, "a=b=c");
    }

    #[test]
    fn test_malformed_line() {
        let err = parse("FOO=bar\nnonsense\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse("=value").is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load(Path::new("/nonexistent/isolate.env")).unwrap_err();
        assert_eq!(err.exit_code(), isolate_core::ExitCode::Config);
    }
}
