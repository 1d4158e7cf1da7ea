//! Scripted stand-in for the ImageMagick binaries.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use webdiff::config::Config;
use webdiff::magick::{CommandRunner, ToolCommand, ToolOutput};
use webdiff::{DiffService, ToolFailure};

pub const PROBE: &str = "probe";

pub struct FakeMagick {
    pub available: AtomicBool,
    pub compare_code: AtomicI32,
    pub convert_code: AtomicI32,
    pub geometry: Mutex<String>,
    pub delay: Mutex<Duration>,
    launches: Mutex<HashMap<String, usize>>,
}

impl FakeMagick {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            compare_code: AtomicI32::new(1),
            convert_code: AtomicI32::new(0),
            geometry: Mutex::new("26x94+0+830".to_string()),
            delay: Mutex::new(Duration::ZERO),
            launches: Mutex::new(HashMap::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        let fake = Self::new();
        fake.available.store(false, Ordering::SeqCst);
        fake
    }

    pub fn launches(&self, program: &str) -> usize {
        self.launches
            .lock()
            .unwrap()
            .get(program)
            .copied()
            .unwrap_or(0)
    }

    /// Launches of anything other than the availability probe.
    pub fn work_launches(&self) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.as_str() != PROBE)
            .map(|(_, v)| v)
            .sum()
    }

    fn record(&self, key: &str) {
        *self
            .launches
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default() += 1;
    }
}

fn output(code: i32, stdout: &str) -> Result<ToolOutput, ToolFailure> {
    Ok(ToolOutput {
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: "warning: noisy tool output".to_string(),
    })
}

fn last_arg(command: &ToolCommand) -> PathBuf {
    PathBuf::from(command.args.last().cloned().unwrap_or_default())
}

impl CommandRunner for FakeMagick {
    fn run(&self, command: &ToolCommand, timeout: Duration) -> Result<ToolOutput, ToolFailure> {
        let is_probe = command.args.first().is_some_and(|a| a == "--version");
        self.record(if is_probe { PROBE } else { command.program.as_str() });

        if !self.available.load(Ordering::SeqCst) {
            return Err(ToolFailure::Spawn {
                program: command.program.clone(),
                message: "No such file or directory".to_string(),
            });
        }
        if is_probe {
            return output(0, "Version: ImageMagick 6.9.12");
        }

        let delay = *self.delay.lock().unwrap();
        if delay > timeout {
            thread::sleep(timeout);
            return Err(ToolFailure::Timeout {
                program: command.program.clone(),
                timeout,
            });
        }
        thread::sleep(delay);

        match command.program.as_str() {
            "compare" => {
                fs::write(last_arg(command), b"diff image").unwrap();
                output(self.compare_code.load(Ordering::SeqCst), "")
            }
            "convert" => {
                fs::write(last_arg(command), b"dilated image").unwrap();
                output(self.convert_code.load(Ordering::SeqCst), "")
            }
            "identify" => output(0, &self.geometry.lock().unwrap()),
            other => panic!("unexpected program {other}"),
        }
    }
}

pub fn test_config(dir: &Path) -> Config {
    Config {
        temp_dir: Some(dir.to_path_buf()),
        tool_timeout_secs: 5,
        io_threads: 4,
        ..Config::default()
    }
}

pub fn service_with(dir: &TempDir, fake: &Arc<FakeMagick>) -> DiffService {
    DiffService::with_runner(test_config(dir.path()), fake.clone())
}

pub fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}
