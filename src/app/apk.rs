use std::path::{Path, PathBuf};

use crate::app::device::commands::DeviceCommands;
use crate::app::error::AppError;

const PACKAGE_NAME_HEADER: &str = "package: name='";
const MAIN_ACTIVITY_HEADER: &str = "launchable-activity: name='";

/// Stable identity of an installable APK: package name and launchable
/// activity, extracted once from the badging dump. Immutable after
/// construction; `with_path` carries the identity over to the rebuilt file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apk {
    path: PathBuf,
    package: String,
    main_activity: String,
}

impl Apk {
    pub fn from_path(
        path: PathBuf,
        device: &dyn DeviceCommands,
        trace_id: &str,
    ) -> Result<Self, AppError> {
        let dump = device.package_dump(&path)?;
        Self::from_badging(path, &dump, trace_id)
    }

    pub fn from_badging(path: PathBuf, dump: &str, trace_id: &str) -> Result<Self, AppError> {
        let package = extract_package(dump).ok_or_else(|| {
            AppError::validation(
                format!(
                    "no package name in badging output for {}",
                    path.display()
                ),
                trace_id,
            )
        })?;
        let main_activity = extract_main_activity(dump);
        Ok(Self {
            path,
            package,
            main_activity,
        })
    }

    /// Same identity, different file. Used when the rebuilt APK supersedes
    /// the original at test time.
    pub fn with_path(&self, path: PathBuf) -> Self {
        Self {
            path,
            package: self.package.clone(),
            main_activity: self.main_activity.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Empty when the APK has no launchable entry point, which is a valid
    /// state: such packages are installed but never started.
    pub fn main_activity(&self) -> &str {
        &self.main_activity
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Combines package and activity into the `<package>/<activity>` launch
    /// target. Some APKs report the activity fully qualified; the duplicated
    /// package prefix is stripped so the component separator lands right.
    pub fn launch_target(&self) -> String {
        if self.main_activity.starts_with(&self.package) {
            let dot_activity = &self.main_activity[self.package.len()..];
            format!("{}/{}", self.package, dot_activity)
        } else {
            format!("{}/{}", self.package, self.main_activity)
        }
    }
}

fn extract_quoted<'a>(dump: &'a str, header: &str) -> Option<&'a str> {
    let start = dump.find(header)? + header.len();
    let end = dump[start..].find('\'')?;
    Some(&dump[start..start + end])
}

fn extract_package(dump: &str) -> Option<String> {
    extract_quoted(dump, PACKAGE_NAME_HEADER)
        .filter(|package| !package.is_empty())
        .map(|package| package.to_string())
}

fn extract_main_activity(dump: &str) -> String {
    match extract_quoted(dump, MAIN_ACTIVITY_HEADER) {
        // `$` in nested-class names must survive the device-side shell.
        Some(activity) => activity.replace('$', "\\$"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apk_from(dump: &str) -> Apk {
        Apk::from_badging(PathBuf::from("/apks/Sample.apk"), dump, "trace-apk").expect("apk")
    }

    #[test]
    fn extracts_package_without_launchable_activity() {
        let apk = apk_from("package: name='com.example.app' versionCode='7'\n");
        assert_eq!(apk.package(), "com.example.app");
        assert_eq!(apk.main_activity(), "");
        assert_eq!(apk.display_name(), "Sample.apk");
    }

    #[test]
    fn escapes_nested_class_activity_and_strips_duplicate_prefix() {
        let apk = apk_from(
            "package: name='a.b.C' versionCode='1'\nlaunchable-activity: name='a.b.C$Inner' label=''\n",
        );
        assert_eq!(apk.main_activity(), "a.b.C\\$Inner");
        assert_eq!(apk.launch_target(), "a.b.C/\\$Inner");
    }

    #[test]
    fn combines_unqualified_activity_with_slash() {
        let apk = apk_from(
            "package: name='com.sample'\nlaunchable-activity: name='.Main' label='Sample'\n",
        );
        assert_eq!(apk.launch_target(), "com.sample/.Main");
    }

    #[test]
    fn strips_fully_qualified_activity_prefix() {
        let apk = apk_from(
            "package: name='com.sample'\nlaunchable-activity: name='com.sample.Main'\n",
        );
        assert_eq!(apk.launch_target(), "com.sample/.Main");
    }

    #[test]
    fn missing_package_marker_fails_extraction() {
        let err = Apk::from_badging(
            PathBuf::from("/apks/Broken.apk"),
            "application: label='Broken'\n",
            "trace-apk",
        )
        .expect_err("expected extraction failure");
        assert_eq!(err.code, "ERR_VALIDATION");
        assert!(err.error.contains("Broken.apk"));
    }

    #[test]
    fn empty_package_name_fails_extraction() {
        let err = Apk::from_badging(
            PathBuf::from("/apks/Empty.apk"),
            "package: name='' versionCode='1'\n",
            "trace-apk",
        )
        .expect_err("expected extraction failure");
        assert_eq!(err.code, "ERR_VALIDATION");
    }

    #[test]
    fn rebuilt_file_keeps_identity() {
        let apk = apk_from(
            "package: name='com.sample'\nlaunchable-activity: name='.Main'\n",
        );
        let rebuilt = apk.with_path(PathBuf::from("/out/Sample.apk"));
        assert_eq!(rebuilt.package(), "com.sample");
        assert_eq!(rebuilt.launch_target(), "com.sample/.Main");
        assert_eq!(rebuilt.path(), Path::new("/out/Sample.apk"));
    }
}
