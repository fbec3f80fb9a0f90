// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared-library bundle resolution.
//!
//! On Android the bundle is `libSNPE.so` plus `libsnpe-android.so`, with
//! `libSnpeHtpPrepare.so` and the HTP skeleton/stub pairs optional. Linux
//! and Windows need only the core library. Configured directories are
//! searched first, then the app's native library directory, then the
//! system search path (`LD_LIBRARY_PATH` / `PATH`).

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, RuntimeError};

/// Vendor directories the DSP loader searches for skeleton libraries.
pub const DSP_VENDOR_DIRS: &[&str] = &[
    "/data/local/tmp/mv_dlc",
    "/vendor/lib/rfsa/adsp",
    "/vendor/dsp/cdsp",
    "/system/lib/rfsa/adsp",
    "/system/vendor/lib/rfsa/adsp",
    "/dsp",
];

const HTP_PREFIX: &str = "libSnpeHtpV";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetOs {
    Android,
    Linux,
    Windows,
    Other,
}

impl TargetOs {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Other
        }
    }

    fn core_library(self) -> Option<&'static str> {
        match self {
            Self::Android | Self::Linux => Some("libSNPE.so"),
            Self::Windows => Some("SNPE.dll"),
            Self::Other => None,
        }
    }

    fn required_companions(self) -> &'static [&'static str] {
        match self {
            Self::Android => &["libsnpe-android.so"],
            _ => &[],
        }
    }

    fn optional_companions(self) -> &'static [&'static str] {
        match self {
            Self::Android | Self::Linux => &["libSnpeHtpPrepare.so"],
            Self::Windows => &["SnpeHtpPrepare.dll"],
            Self::Other => &[],
        }
    }

    fn system_path_var(self) -> &'static str {
        match self {
            Self::Windows => "PATH",
            _ => "LD_LIBRARY_PATH",
        }
    }
}

/// Where to look for the bundle.
#[derive(Debug, Clone, Default)]
pub struct LibrarySearch {
    pub dirs: Vec<PathBuf>,
    /// The app's native library directory; also prepended to the DSP path.
    pub native_lib_dir: Option<PathBuf>,
    pub use_system_path: bool,
}

/// Resolved bundle paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryBundle {
    pub core: PathBuf,
    /// Must load for the platform to be usable.
    pub companions: Vec<PathBuf>,
    pub optional_companions: Vec<PathBuf>,
    /// HTP skeleton/stub libraries found alongside the bundle.
    pub htp_support: Vec<PathBuf>,
}

/// A library opened after the core library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionLoad {
    pub path: PathBuf,
    /// A failed load fails the platform; otherwise it is logged and skipped.
    pub required: bool,
}

impl LibraryBundle {
    /// Host-side libraries to open after the core, in order: required
    /// companions, optional companions, then HTP stubs. Skeletons run on the
    /// DSP, which finds them through `ADSP_LIBRARY_PATH`; they are never
    /// opened in this process.
    pub fn companion_loads(&self) -> Vec<CompanionLoad> {
        let required = self.companions.iter().map(|p| (p, true));
        let optional = self.optional_companions.iter().map(|p| (p, false));
        let stubs = self
            .htp_support
            .iter()
            .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with("Stub.so")))
            .map(|p| (p, false));
        required
            .chain(optional)
            .chain(stubs)
            .map(|(path, required)| CompanionLoad { path: path.clone(), required })
            .collect()
    }
}

impl LibrarySearch {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs, native_lib_dir: None, use_system_path: true }
    }

    pub fn with_native_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.native_lib_dir = Some(dir.into());
        self
    }

    pub fn with_system_path(mut self, enabled: bool) -> Self {
        self.use_system_path = enabled;
        self
    }

    /// Resolve the bundle for the current OS.
    pub fn resolve(&self) -> Result<LibraryBundle> {
        self.resolve_for(TargetOs::current())
    }

    pub fn resolve_for(&self, os: TargetOs) -> Result<LibraryBundle> {
        let core_name = os.core_library().ok_or_else(|| {
            RuntimeError::platform_unavailable("SNPE is not supported on this operating system")
        })?;
        let dirs = self.candidate_dirs(os);
        let core = find_in(&dirs, core_name).ok_or_else(|| {
            RuntimeError::platform_unavailable(format!(
                "{} not found in {} search directories",
                core_name,
                dirs.len()
            ))
        })?;

        let mut companions = Vec::new();
        for name in os.required_companions() {
            let path = find_in(&dirs, name).ok_or_else(|| {
                RuntimeError::platform_unavailable(format!("{} not found", name))
            })?;
            companions.push(path);
        }
        let optional_companions: Vec<PathBuf> =
            os.optional_companions().iter().filter_map(|name| find_in(&dirs, name)).collect();

        let htp_support = find_htp_support(&dirs);
        tracing::debug!(
            core = %core.display(),
            companions = companions.len(),
            optional = optional_companions.len(),
            htp = htp_support.len(),
            "resolved SNPE bundle"
        );
        Ok(LibraryBundle { core, companions, optional_companions, htp_support })
    }

    fn candidate_dirs(&self, os: TargetOs) -> Vec<PathBuf> {
        let mut dirs = self.dirs.clone();
        if let Some(native) = &self.native_lib_dir {
            dirs.push(native.clone());
        }
        if self.use_system_path {
            if let Some(value) = std::env::var_os(os.system_path_var()) {
                dirs.extend(std::env::split_paths(&value));
            }
        }
        dirs
    }
}

fn find_in(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(name)).find(|p| p.is_file())
}

/// Skeleton/stub pairs are matched by version suffix; a skeleton without
/// its stub (or vice versa) is ignored.
fn find_htp_support(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else { continue };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(HTP_PREFIX) else { continue };
            let Some(version) = rest.strip_suffix("Skel.so") else { continue };
            let stub = dir.join(format!("{}{}Stub.so", HTP_PREFIX, version));
            if stub.is_file() {
                found.push(entry.path());
                found.push(stub);
            }
        }
    }
    found
}

/// Point the DSP loader at the app's native library directory followed by
/// the vendor directories. Returns the value written to `ADSP_LIBRARY_PATH`.
pub fn configure_dsp_search_path(native_lib_dir: &Path) -> String {
    let value = dsp_search_path(native_lib_dir);
    std::env::set_var("ADSP_LIBRARY_PATH", &value);
    tracing::info!(adsp_library_path = %value, "configured DSP library path");
    value
}

fn dsp_search_path(native_lib_dir: &Path) -> String {
    let mut parts = vec![native_lib_dir.display().to_string()];
    parts.extend(DSP_VENDOR_DIRS.iter().map(|s| s.to_string()));
    parts.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_android_bundle_resolves() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libSNPE.so");
        touch(dir.path(), "libsnpe-android.so");
        touch(dir.path(), "libSnpeHtpPrepare.so");
        touch(dir.path(), "libSnpeHtpV73Skel.so");
        touch(dir.path(), "libSnpeHtpV73Stub.so");
        touch(dir.path(), "libSnpeHtpV75Skel.so");

        let search = LibrarySearch::new(vec![dir.path().to_path_buf()]).with_system_path(false);
        let bundle = search.resolve_for(TargetOs::Android).unwrap();
        assert_eq!(bundle.core, dir.path().join("libSNPE.so"));
        assert_eq!(bundle.companions, vec![dir.path().join("libsnpe-android.so")]);
        assert_eq!(bundle.optional_companions, vec![dir.path().join("libSnpeHtpPrepare.so")]);
        assert_eq!(bundle.htp_support.len(), 2, "unpaired skeleton is ignored");
    }

    #[test]
    fn test_companion_loads_skip_skeletons() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["libSNPE.so", "libsnpe-android.so", "libSnpeHtpPrepare.so", "libSnpeHtpV73Skel.so", "libSnpeHtpV73Stub.so"]
        {
            touch(dir.path(), name);
        }
        let search = LibrarySearch::new(vec![dir.path().to_path_buf()]).with_system_path(false);
        let loads = search.resolve_for(TargetOs::Android).unwrap().companion_loads();
        let plan: Vec<(String, bool)> = loads
            .iter()
            .map(|l| (l.path.file_name().unwrap().to_string_lossy().into_owned(), l.required))
            .collect();
        assert_eq!(
            plan,
            vec![
                ("libsnpe-android.so".to_string(), true),
                ("libSnpeHtpPrepare.so".to_string(), false),
                ("libSnpeHtpV73Stub.so".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_missing_core_is_platform_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let search = LibrarySearch::new(vec![dir.path().to_path_buf()]).with_system_path(false);
        let err = search.resolve_for(TargetOs::Linux).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PlatformUnavailable);
    }

    #[test]
    fn test_android_requires_jni_companion() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libSNPE.so");
        let search = LibrarySearch::new(vec![dir.path().to_path_buf()]).with_system_path(false);
        assert!(search.resolve_for(TargetOs::Android).is_err());
        assert!(search.resolve_for(TargetOs::Linux).is_ok());
    }

    #[test]
    fn test_native_lib_dir_is_searched() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libSNPE.so");
        let search = LibrarySearch::new(Vec::new())
            .with_system_path(false)
            .with_native_lib_dir(dir.path());
        assert!(search.resolve_for(TargetOs::Linux).is_ok());
    }

    #[test]
    fn test_unsupported_os() {
        let err = LibrarySearch::default().resolve_for(TargetOs::Other).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PlatformUnavailable);
    }

    #[test]
    fn test_dsp_search_path_order() {
        let value = dsp_search_path(Path::new("/data/app/lib/arm64"));
        assert!(value.starts_with("/data/app/lib/arm64;/data/local/tmp/mv_dlc;"));
        assert!(value.ends_with(";/dsp"));
    }
}
