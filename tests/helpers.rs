//! Shared test utilities for modlayer tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use modlayer::config::Config;
use modlayer::engine::Engine;
use modlayer::mount::RecordingMounter;

/// Test environment: a fake live root, a module root and engine state dirs.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Stand-in for `/`, holding partition directories
    pub root: PathBuf,
    pub moduledir: PathBuf,
    pub statedir: PathBuf,
    pub tempdir: PathBuf,
    /// Stand-in for the kernel's boot id file
    pub boot_id_file: PathBuf,
}

impl TestEnv {
    /// Create a test environment with `system` and `vendor` partitions.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let env = Self {
            root: base.join("root"),
            moduledir: base.join("modules"),
            statedir: base.join("state"),
            tempdir: base.join("tmp"),
            boot_id_file: base.join("boot_id"),
            _temp_dir: temp_dir,
        };
        for dir in [&env.moduledir, &env.statedir, &env.tempdir] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }
        fs::write(&env.boot_id_file, "boot-1\n").expect("Failed to write boot id");
        env.add_partition("system");
        env.add_partition("vendor");
        env
    }

    pub fn config(&self) -> Config {
        Config {
            moduledir: self.moduledir.clone(),
            tempdir: Some(self.tempdir.clone()),
            statedir: self.statedir.clone(),
            root: self.root.clone(),
            boot_id_file: self.boot_id_file.clone(),
            ..Config::default()
        }
    }

    pub fn boot_id(&self) -> String {
        fs::read_to_string(&self.boot_id_file)
            .expect("Failed to read boot id")
            .trim()
            .to_string()
    }

    /// Simulate a reboot: a new boot id, and nothing of ours mounted.
    pub fn reboot(&self) {
        let next = format!("{}+1", self.boot_id());
        fs::write(&self.boot_id_file, next).expect("Failed to write boot id");
    }

    /// `<tempdir>/.modlayer`.
    pub fn work_root(&self) -> PathBuf {
        self.tempdir.join(".modlayer")
    }

    pub fn engine(&self) -> Engine<RecordingMounter> {
        self.engine_with(self.config(), RecordingMounter::new())
    }

    pub fn engine_with(&self, config: Config, mounter: RecordingMounter) -> Engine<RecordingMounter> {
        Engine::new(config, mounter).expect("Failed to create engine")
    }

    pub fn add_partition(&self, name: &str) -> PathBuf {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).expect("Failed to create partition dir");
        dir
    }

    /// Create a file on the live root, e.g. `system/etc/hosts`.
    pub fn add_live_file(&self, rel: &str) -> PathBuf {
        write_file(&self.root.join(rel), "live")
    }

    /// Create a module whose files are given relative to the module dir,
    /// e.g. `system/etc/hosts`.
    pub fn add_module(&self, id: &str, files: &[&str]) -> PathBuf {
        let dir = self.moduledir.join(id);
        fs::create_dir_all(&dir).expect("Failed to create module dir");
        for rel in files {
            write_file(&dir.join(rel), id);
        }
        dir
    }

    pub fn set_prop(&self, id: &str, content: &str) {
        fs::write(self.moduledir.join(id).join("module.prop"), content)
            .expect("Failed to write module.prop");
    }

    pub fn disable_module(&self, id: &str) {
        fs::write(self.moduledir.join(id).join("disable"), "").expect("Failed to write flag");
    }

    pub fn remove_module(&self, id: &str) {
        fs::remove_dir_all(self.moduledir.join(id)).expect("Failed to remove module");
    }

    pub fn target(&self, partition: &str) -> PathBuf {
        self.root.join(partition)
    }
}

pub fn write_file(path: &Path, content: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
    path.to_path_buf()
}
