//! In-memory `ContainerRuntime` for tests: no daemon, no GPU, scripted log
//! lines and exit codes per container.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::runtime::{ContainerRuntime, ExecHandle, LogLines};
use super::types::{ContainerError, LaunchSpec, RawLine};

/// A scripted container: the lines its log stream/exec will yield and the
/// exit code to report afterward.
#[derive(Clone)]
pub struct Script {
    pub lines: Vec<String>,
    pub exit_code: i64,
    /// If true, `exec` never sends an exit code (simulates a hang / crash
    /// before completion).
    pub hang: bool,
}

pub struct FakeContainerRuntime {
    next_id: AtomicU64,
    scripts: Mutex<HashMap<String, Script>>,
    stopped: Mutex<Vec<String>>,
    default_script: Script,
}

impl FakeContainerRuntime {
    pub fn new(default_script: Script) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            scripts: Mutex::new(HashMap::new()),
            stopped: Mutex::new(Vec::new()),
            default_script,
        }
    }

    pub fn script_for(&self, container_id: &str, script: Script) {
        self.scripts.lock().insert(container_id.to_string(), script);
    }

    pub fn was_stopped(&self, container_id: &str) -> bool {
        self.stopped.lock().iter().any(|id| id == container_id)
    }

    fn alloc_id(&self) -> String {
        format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn script_lines(&self, container_id: &str) -> Script {
        self.scripts.lock().get(container_id).cloned().unwrap_or_else(|| self.default_script.clone())
    }
}

/// Yields its scripted lines, then blocks forever instead of ending —
/// simulates a container that never exits and never emits `finish`, to
/// exercise deadline enforcement.
struct ScriptedThenHang {
    remaining: std::vec::IntoIter<std::io::Result<RawLine>>,
}

impl Iterator for ScriptedThenHang {
    type Item = std::io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.remaining.next() {
            Some(item) => Some(item),
            None => {
                std::thread::sleep(Duration::from_secs(5));
                None
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn create_oneoff(&self, _spec: LaunchSpec) -> Result<String, ContainerError> {
        Ok(self.alloc_id())
    }

    async fn create_long_lived(&self, _spec: LaunchSpec) -> Result<String, ContainerError> {
        Ok(self.alloc_id())
    }

    async fn exec(&self, container_id: &str, _argv: Vec<String>) -> Result<ExecHandle, ContainerError> {
        let script = self.script_lines(container_id);
        let lines: Vec<std::io::Result<RawLine>> =
            script.lines.iter().map(|l| Ok(RawLine { line: l.clone(), stderr: false })).collect();

        let (exit_tx, exit_rx) = tokio::sync::oneshot::channel();
        if !script.hang {
            let _ = exit_tx.send(script.exit_code);
        } else {
            std::mem::forget(exit_tx);
        }

        Ok(ExecHandle { stdout: Box::new(lines.into_iter()), exit_code: exit_rx })
    }

    fn stream_logs(&self, container_id: &str, _follow: bool) -> Result<LogLines, ContainerError> {
        let script = self.script_lines(container_id);
        let lines: Vec<std::io::Result<RawLine>> =
            script.lines.iter().map(|l| Ok(RawLine { line: l.clone(), stderr: false })).collect();
        if script.hang {
            Ok(Box::new(ScriptedThenHang { remaining: lines.into_iter() }))
        } else {
            Ok(Box::new(lines.into_iter()))
        }
    }

    async fn stop(&self, container_id: &str, _timeout: Duration) -> Result<(), ContainerError> {
        self.stopped.lock().push(container_id.to_string());
        Ok(())
    }

    async fn remove(&self, _container_id: &str) -> Result<(), ContainerError> {
        Ok(())
    }
}
