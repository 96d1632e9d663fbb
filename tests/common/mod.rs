#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A throwaway install root with shell-script "tools" in `bin/` and a work
/// directory next to it.
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("install/bin")).unwrap();
        fs::create_dir_all(dir.path().join("work")).unwrap();
        Self { dir }
    }

    pub fn install_root(&self) -> PathBuf {
        self.dir.path().join("install")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// File every fake `count` invocation appends its unit to.
    pub fn calls_log(&self) -> PathBuf {
        self.dir.path().join("count-calls.log")
    }

    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.calls_log())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Install an executable tool script under `bin/`.
    pub fn tool(&self, name: &str, body: &str) -> &Self {
        let path = self.install_root().join("bin").join(name);
        fs::write(&path, format!("#!/bin/sh\nset -eu\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        self
    }

    /// The standard counting toolkit:
    /// - `probe <input> <scratch>`: prints `batches: <lines in input>`
    /// - `count <unit> <input> <output>`: one `shared` and one per-unit key
    /// - `merge <output> <parts...>`: sums counts per key
    pub fn counting_tools(&self) -> &Self {
        self.tool(
            "probe",
            "touch \"$2/probe-scratch\"\necho \"scanning $1\"\necho \"batches: $(wc -l < \"$1\" | tr -d ' ')\"",
        )
        .tool(
            "count",
            &format!(
                "printf 'shared 1\\nunit%s 1\\n' \"$1\" > \"$3\"\necho \"$1\" >> '{}'",
                self.calls_log().display()
            ),
        )
        .tool(
            "merge",
            "out=\"$1\"\nshift\nawk '{ c[$1] += $2 } END { for (k in c) print k, c[k] }' \"$@\" > \"$out\"",
        )
    }

    /// Write a work-dir input with `units` lines.
    pub fn input(&self, name: &str, units: usize) -> PathBuf {
        let path = self.work_dir().join(name);
        let body: String = (1..=units).map(|i| format!("read{i}\n")).collect();
        fs::write(&path, body).unwrap();
        path
    }

    pub fn read(&self, rel: impl AsRef<Path>) -> String {
        fs::read_to_string(self.work_dir().join(rel)).unwrap()
    }
}
