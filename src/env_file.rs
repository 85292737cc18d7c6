//! `.env` loading: `KEY=VALUE` lines with `#` comments, an optional `export`
//! prefix and single- or double-quoted values. Variables already present in
//! the process environment win.

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    /// Given with `--env-file` rather than found as `./.env`.
    pub explicit: bool,
}

/// Load `explicit` (which must exist) or else `./.env` when present.
pub fn load(explicit: Option<&Path>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        apply(path)?;
        return Ok(Some(LoadedEnvFile {
            path: path.to_path_buf(),
            explicit: true,
        }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let path = cwd.join(".env");
    if !path.is_file() {
        return Ok(None);
    }
    apply(&path)?;
    Ok(Some(LoadedEnvFile { path, explicit: false }))
}

fn apply(path: &Path) -> Result<(), String> {
    for (key, value) in read_assignments(path)? {
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// Every assignment in the file, in order. Errors carry `path:line`.
fn read_assignments(path: &Path) -> Result<Vec<(String, String)>, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut assignments = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let parsed = parse_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?;
        assignments.extend(parsed);
    }
    Ok(assignments)
}

/// `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let raw = raw.trim();
    let value = if let Some(rest) = raw.strip_prefix('"') {
        unquote(rest, '"')?
    } else if let Some(rest) = raw.strip_prefix('\'') {
        unquote(rest, '\'')?
    } else {
        raw.split('#').next().unwrap_or_default().trim_end().to_string()
    };
    Ok(Some((key.to_string(), value)))
}

/// Read up to the closing `quote`. Escapes are only interpreted inside double quotes.
fn unquote(input: &str, quote: char) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => return Err("unterminated escape sequence in double-quoted value".to_string()),
            },
            c if c == quote => {
                let rest = chars.as_str().trim();
                return if rest.is_empty() || rest.starts_with('#') {
                    Ok(out)
                } else {
                    Err(format!("unexpected characters after closing {} quote", quote))
                };
            }
            c => out.push(c),
        }
    }
    Err(format!("unterminated {} quoted value", quote))
}
