use std::collections::HashSet;
use std::path::Path;

use crate::app::error::AppError;

/// Curated set of APK file names excluded from testing for reasons unrelated
/// to the repackaging under test. Built once at startup and injected into the
/// driver; membership is by exact file name.
#[derive(Debug, Clone, Default)]
pub struct KnownFailures {
    names: HashSet<String>,
}

impl KnownFailures {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in catalogue. Every entry carries the observed trigger; an
    /// entry without one does not belong here.
    pub fn builtin() -> Self {
        let mut names = HashSet::new();
        names.extend(environment_failures().iter().map(|name| name.to_string()));
        names.extend(rebuild_tool_failures().iter().map(|name| name.to_string()));
        names.extend(harmless_error_spam().iter().map(|name| name.to_string()));
        Self { names }
    }

    /// Extends the set from a JSON array of file names.
    pub fn with_extra_file(mut self, path: &Path, trace_id: &str) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::system(
                format!("Failed to read known-failures file {}: {err}", path.display()),
                trace_id,
            )
        })?;
        let extra: Vec<String> = serde_json::from_str(&raw).map_err(|err| {
            AppError::validation(
                format!(
                    "Known-failures file {} is not a JSON array of names: {err}",
                    path.display()
                ),
                trace_id,
            )
        })?;
        self.names.extend(extra);
        Ok(self)
    }

    pub fn contains(&self, apk_name: &str) -> bool {
        self.names.contains(apk_name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Failures caused by the test environment (emulator image, missing shared
/// libraries, absent sdcard content), not by the app or the rebuild.
fn environment_failures() -> &'static [&'static str] {
    &[
        // "Failure [INSTALL_FAILED_MISSING_SHARED_LIBRARY]": the emulator
        // image ships without com.google.android.maps.
        "net.codechunk.speedofsound_8.apk",
        "to.networld.android.divedroid_1.apk",
        "OpenGPSTracker_1.3.2-osmupdate.apk",
        "org.mixare_20.apk",
        "com.showmehills_4.apk",
        // "java.lang.UnsatisfiedLinkError: Couldn't load X: findLibrary
        // returned null": native library missing for the emulator ABI.
        "com.jecelyin.editor_32.apk",
        "eu.domob.anacam_10100.apk",
        "net.tedstein.AndroSS_17.apk",
        "com.dozingcatsoftware.bouncy_11.apk",
        "org.coolreader_509.apk",
        "org.eehouse.android.xw4_31.apk",
        // FileNotFoundException for sdcard config the app expects to exist.
        "com.zoffcc.applications.aagtl_31.apk",
        // FileNotFoundException: /proc/net/xt_qtaguid/stats missing on the image.
        "aarddict.android_13.apk",
        // "E/RingtoneManager( 8080): Failed to open ringtone
        // content://settings/system/alarm_alert": no ringtone provider content.
        "com.angrydoughnuts.android.alarmclock_8.apk",
        // SocketTimeoutException on startup; needs a reachable peer.
        "net.rocrail.androc_362.apk",
        // "E/Error(11369): result false": app-side File.mkdir() fails on the image.
        "org.liberty.android.fantastischmemo_135.apk",
        // SQLiteCantOpenDatabaseException: database path unusable on the image.
        "org.droidseries_13.apk",
    ]
}

/// Failures of the external rebuild toolchain itself; the originals run fine
/// and the rebuilt output never materializes.
fn rebuild_tool_failures() -> &'static [&'static str] {
    &[
        // Use API level 16 symbols with no matching platform jar available
        // to the rebuild toolchain yet.
        "org.andstatus.app_61.apk",
        "CSipSimple-0.04-01.apk",
        // Type inference in the rebuild toolchain dies on this input.
        "com.drismo_17.apk",
        // Class-level annotations (ActionBarSherlock) unsupported by the
        // rebuild toolchain.
        "org.adaway_38.apk",
        "eu.prismsw.lampshade_117.apk",
        // Rebuild exhausts the toolchain's heap.
        "net.bible.android.activity_79.apk",
        "APG-1.0.8-release.apk",
        "es.cesar.quitesleep_13.apk",
        // Toolchain miscasts a reference type into an array type on these.
        "com.beem.project.beem_11.apk",
        "arity.calculator_27.apk",
    ]
}

/// Apps that log error-severity lines during a perfectly healthy start,
/// carefully looked at and judged harmless. Excluded rather than allowlisted:
/// their noise is app-specific, not device-wide.
fn harmless_error_spam() -> &'static [&'static str] {
    &[
        // "E/A2DP_Volume( 1551): errornull", logged without a crash.
        "a2dp.Vol_93.apk",
        // "E/VoiceP  (20711): minsize 1520 bufsize 16384", buffer sizing info
        // logged as an error from a constructor.
        "com.ihunda.android.binauralbeat_24.apk",
        // Floods the error log with decorative entries.
        "Audalyzer-1.15.apk",
        // "W/webcore (21312): EventHub.removeMessages... is not supported
        // before the WebViewCore is set up": app-side ordering bug, no crash.
        "BarcodeScanner4.2.apk",
        // NullPointerException in its own adapter code before any repackaging.
        "com.eddyspace.networkmonitor_2.apk",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtin_catalogue_matches_by_exact_file_name() {
        let failures = KnownFailures::builtin();
        assert!(failures.contains("org.mixare_20.apk"));
        assert!(failures.contains("arity.calculator_27.apk"));
        assert!(failures.contains("Audalyzer-1.15.apk"));
        assert!(!failures.contains("org.mixare_20"));
        assert!(!failures.contains("com.example.unknown_1.apk"));
    }

    #[test]
    fn empty_set_skips_nothing() {
        let failures = KnownFailures::empty();
        assert!(failures.is_empty());
        assert!(!failures.contains("org.mixare_20.apk"));
    }

    #[test]
    fn extra_file_extends_the_set() {
        let dir = TempDir::new().expect("tmp");
        let path = dir.path().join("extra.json");
        std::fs::write(&path, r#"["custom.app_1.apk", "custom.app_2.apk"]"#).expect("write");

        let failures = KnownFailures::empty()
            .with_extra_file(&path, "trace-kf")
            .expect("extend");
        assert_eq!(failures.len(), 2);
        assert!(failures.contains("custom.app_1.apk"));
    }

    #[test]
    fn malformed_extra_file_is_a_validation_error() {
        let dir = TempDir::new().expect("tmp");
        let path = dir.path().join("extra.json");
        std::fs::write(&path, r#"{"not": "an array"}"#).expect("write");

        let err = KnownFailures::empty()
            .with_extra_file(&path, "trace-kf")
            .expect_err("expected parse failure");
        assert_eq!(err.code, "ERR_VALIDATION");
    }
}
