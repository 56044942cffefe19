//! Device queries and settings: installed packages, the username each client
//! stores in its shared preferences, and the Android ID.

use fs_err as fs;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::info;

use crate::error::CliError;

pub const DEFAULT_DATA_ROOT: &str = "/data/data";

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?is)<string\s+name\s*=\s*["']username["']\s*>(.*?)</string>"#)
            .expect("username pattern is valid")
    })
}

pub fn prefs_path(data_root: &Path, package: &str) -> PathBuf {
    data_root
        .join(package)
        .join("shared_prefs")
        .join("prefs.xml")
}

/// Extracts the `username` string entry from a prefs.xml document.
pub fn parse_username(xml: &str) -> Option<String> {
    let captures = username_pattern().captures(xml)?;
    let value = unescape_xml(captures.get(1)?.as_str().trim());
    (!value.is_empty()).then_some(value)
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn read_username(data_root: &Path, package: &str) -> Result<String, CliError> {
    let path = prefs_path(data_root, package);
    let xml = match fs::read_to_string(&path) {
        Ok(xml) => xml,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(CliError::UsernameNotFound(path));
        }
        Err(err) => return Err(err.into()),
    };
    parse_username(&xml).ok_or(CliError::UsernameNotFound(path))
}

/// Parses `pm list packages` output, keeping names that start with `prefix`.
pub fn parse_package_list(output: &str, prefix: &str) -> Vec<String> {
    let mut packages: Vec<String> = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(str::trim)
        .filter(|name| !name.is_empty() && name.starts_with(prefix))
        .map(str::to_string)
        .collect();
    packages.sort();
    packages.dedup();
    packages
}

pub fn list_packages(prefix: &str) -> Result<Vec<String>, CliError> {
    let output = Command::new("pm")
        .args(["list", "packages"])
        .output()
        .map_err(|err| CliError::PackageListing(format!("pm: {}", err)))?;
    if !output.status.success() {
        return Err(CliError::PackageListing(format!(
            "pm exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(parse_package_list(
        &String::from_utf8_lossy(&output.stdout),
        prefix,
    ))
}

/// `su -c 'settings put secure android_id <id>'`. The id ends up inside a
/// shell string, so only ASCII alphanumerics are accepted.
pub fn android_id_argv(id: &str) -> Result<Vec<String>, CliError> {
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CliError::InvalidAndroidId(id.to_string()));
    }
    Ok(vec![
        "su".to_string(),
        "-c".to_string(),
        format!("settings put secure android_id {}", id),
    ])
}

pub fn set_android_id(id: &str) -> Result<(), CliError> {
    let argv = android_id_argv(id)?;
    let command = argv.join(" ");
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|err| CliError::CommandFailed {
            command: command.clone(),
            detail: err.to_string(),
        })?;
    if !output.status.success() {
        return Err(CliError::CommandFailed {
            command,
            detail: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    info!(android_id = id.trim(), "Android ID updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PREFS: &str = r#"<?xml version='1.0' encoding='utf-8' standalone='yes' ?>
<map>
    <string name="UserId">123456</string>
    <string name="Username">Tom&amp;Jerry</string>
    <boolean name="firstLaunch" value="false" />
</map>"#;

    #[test]
    fn parse_username_is_case_insensitive_and_unescapes() {
        assert_eq!(parse_username(PREFS).as_deref(), Some("Tom&Jerry"));
    }

    #[test]
    fn parse_username_rejects_missing_or_empty() {
        assert_eq!(parse_username("<map></map>"), None);
        assert_eq!(
            parse_username(r#"<map><string name="username">  </string></map>"#),
            None
        );
    }

    #[test]
    fn read_username_from_data_root() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = prefs_path(temp_dir.path(), "com.roblox.client");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create prefs dir");
        std::fs::write(&path, PREFS).expect("write prefs");

        let username = read_username(temp_dir.path(), "com.roblox.client").expect("username");
        assert_eq!(username, "Tom&Jerry");

        let missing = read_username(temp_dir.path(), "com.roblox.other");
        assert!(matches!(missing, Err(CliError::UsernameNotFound(_))));
    }

    #[test]
    fn android_id_argv_wraps_settings_put() {
        assert_eq!(
            android_id_argv(" 9774d56d682e549c ").expect("argv"),
            vec!["su", "-c", "settings put secure android_id 9774d56d682e549c"]
        );
    }

    #[test]
    fn android_id_rejects_empty_and_shell_characters() {
        assert!(matches!(android_id_argv("  "), Err(CliError::InvalidAndroidId(_))));
        assert!(matches!(
            android_id_argv("abc; reboot"),
            Err(CliError::InvalidAndroidId(_))
        ));
        assert!(matches!(set_android_id(""), Err(CliError::InvalidAndroidId(_))));
    }

    #[test]
    fn parse_package_list_filters_by_prefix() {
        let output = "package:com.roblox.clienu\npackage:com.android.chrome\n\
                      package:com.roblox.client\r\nnoise\npackage:com.roblox.client\n";
        assert_eq!(
            parse_package_list(output, "com.roblox"),
            vec!["com.roblox.client", "com.roblox.clienu"]
        );
        assert_eq!(parse_package_list(output, "").len(), 3);
    }
}
