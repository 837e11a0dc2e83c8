use std::path::Path;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn resolve_adb_program(config_command_path: &str) -> String {
    resolve_program(config_command_path, "adb")
}

pub fn resolve_aapt_program(config_command_path: &str) -> String {
    resolve_program(config_command_path, "aapt")
}

fn resolve_program(config_command_path: &str, default_name: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if normalized.is_empty() {
        default_name.to_string()
    } else {
        normalized
    }
}

pub fn validate_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("command is empty".to_string());
    }
    if !program.contains(std::path::MAIN_SEPARATOR) {
        // Bare names resolve through PATH at spawn time.
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(format!("{program} must point to an executable file"));
    }
    if !path.exists() {
        return Err(format!("{program} not found"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/android/build-tools/aapt'  "),
            "/opt/android/build-tools/aapt"
        );
    }

    #[test]
    fn resolves_empty_to_default_names() {
        assert_eq!(resolve_adb_program(""), "adb");
        assert_eq!(resolve_adb_program("   "), "adb");
        assert_eq!(resolve_aapt_program(""), "aapt");
    }

    #[test]
    fn validates_nonexistent_path() {
        let err = validate_program("/this/path/should/not/exist/adb").unwrap_err();
        assert!(err.to_lowercase().contains("not found"));
    }

    #[test]
    fn accepts_bare_program_names() {
        assert!(validate_program("adb").is_ok());
        assert!(validate_program("aapt").is_ok());
    }
}
