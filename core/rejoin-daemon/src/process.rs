//! Process inspection helpers for status reports.

use std::collections::HashMap;
use sysinfo::System;

// Linux truncates `comm` to 15 bytes, so long package names only match by suffix.
const COMM_MAX_LEN: usize = 15;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessInfo {
    pub running: bool,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

pub trait ProcessProbe: Send {
    /// Liveness per package name. Packages with no process map to a
    /// not-running entry.
    fn probe(&mut self, packages: &[&str]) -> HashMap<String, ProcessInfo>;
}

pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn probe(&mut self, packages: &[&str]) -> HashMap<String, ProcessInfo> {
        self.system.refresh_processes();

        let mut result: HashMap<String, ProcessInfo> = packages
            .iter()
            .map(|pkg| (pkg.to_string(), ProcessInfo::default()))
            .collect();

        for process in self.system.processes().values() {
            let name = process.name();
            let cmd0 = process.cmd().first().map(String::as_str).unwrap_or("");
            for pkg in packages {
                if matches_package(pkg, name, cmd0) {
                    if let Some(info) = result.get_mut(*pkg) {
                        info.running = true;
                        info.memory_bytes = info.memory_bytes.saturating_add(process.memory());
                        info.cpu_percent += process.cpu_usage();
                    }
                }
            }
        }
        result
    }
}

fn matches_package(pkg: &str, name: &str, cmd0: &str) -> bool {
    if pkg.is_empty() {
        return false;
    }
    if cmd0 == pkg || name == pkg {
        return true;
    }
    name.len() == COMM_MAX_LEN && pkg.ends_with(name)
}
