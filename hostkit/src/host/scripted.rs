//! In-memory [`Host`] for unit tests.
//!
//! Understands the handful of commands the library issues itself
//! (`pgrep -P`, `ps -p`, `kill`) and answers everything else from canned
//! responses keyed by command prefix. Files exist only in memory.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ExecMode, ExecOutput, Host, Stat};

#[derive(Debug)]
struct State {
    next_pid: u32,
    spawn_children: bool,
    commands: Vec<String>,
    alive: HashSet<u32>,
    children: HashMap<u32, u32>,
    files: HashMap<PathBuf, Vec<u8>>,
    sizes: HashMap<PathBuf, u64>,
    dirs: HashSet<PathBuf>,
    removed: Vec<PathBuf>,
    responses: Vec<(String, String)>,
}

#[derive(Debug)]
pub(crate) struct ScriptedHost {
    state: Mutex<State>,
    cwd: PathBuf,
    temp: PathBuf,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_pid: 1000,
                spawn_children: true,
                commands: Vec::new(),
                alive: HashSet::new(),
                children: HashMap::new(),
                files: HashMap::new(),
                sizes: HashMap::new(),
                dirs: HashSet::new(),
                removed: Vec::new(),
                responses: Vec::new(),
            }),
            cwd: PathBuf::from("/work"),
            temp: PathBuf::from("/tmp"),
        }
    }

    /// Background launches no longer get a child process.
    pub fn without_children(self) -> Self {
        self.state.lock().spawn_children = false;
        self
    }

    /// Answer foreground commands starting with `prefix`.
    pub fn respond(&self, prefix: &str, stdout: &str) {
        self.state
            .lock()
            .responses
            .push((prefix.to_string(), stdout.to_string()));
    }

    pub fn write(&self, path: impl Into<PathBuf>, content: &[u8]) {
        self.state.lock().files.insert(path.into(), content.to_vec());
    }

    pub fn set_size(&self, path: impl Into<PathBuf>, size: u64) {
        self.state.lock().sizes.insert(path.into(), size);
    }

    pub fn make_dir(&self, path: impl Into<PathBuf>) {
        self.state.lock().dirs.insert(path.into());
    }

    /// Terminate a process as if it exited on its own.
    pub fn exit(&self, pid: u32) {
        self.state.lock().alive.remove(&pid);
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.state.lock().alive.contains(&pid)
    }

    pub fn child_of(&self, launcher: u32) -> Option<u32> {
        self.state.lock().children.get(&launcher).copied()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.starts_with(prefix))
            .collect()
    }

    /// Background commands launched so far.
    pub fn launched(&self) -> Vec<String> {
        self.commands_starting_with("[bg] ")
            .into_iter()
            .map(|command| command["[bg] ".len()..].to_string())
            .collect()
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.state.lock().removed.clone()
    }

    pub fn file_exists(&self, path: &Path) -> bool {
        self.state.lock().files.contains_key(path)
    }
}

fn parse_pid(token: Option<&str>) -> Option<u32> {
    token.and_then(|token| token.parse().ok())
}

#[async_trait]
impl Host for ScriptedHost {
    async fn execute(&self, command: &str, mode: ExecMode) -> io::Result<ExecOutput> {
        let mut state = self.state.lock();
        let pid = state.next_pid;
        state.next_pid += 2;

        if mode == ExecMode::Background {
            state.commands.push(format!("[bg] {command}"));
            state.alive.insert(pid);
            if state.spawn_children {
                state.alive.insert(pid + 1);
                state.children.insert(pid, pid + 1);
            }
            return Ok(ExecOutput {
                pid,
                ..ExecOutput::default()
            });
        }

        state.commands.push(command.to_string());
        let mut tokens = command.split_whitespace();

        let stdout = match tokens.next() {
            Some("pgrep") => {
                let launcher = parse_pid(tokens.nth(1));
                launcher
                    .and_then(|launcher| state.children.get(&launcher))
                    .filter(|child| state.alive.contains(child))
                    .map(|child| format!("{child}\n"))
                    .unwrap_or_default()
            }
            Some("ps") => match parse_pid(tokens.nth(1)) {
                Some(target) if state.alive.contains(&target) => format!("{target} S\n"),
                _ => String::new(),
            },
            Some("kill") => {
                if let Some(target) = parse_pid(tokens.nth(1)) {
                    state.alive.remove(&target);
                }
                String::new()
            }
            _ => state
                .responses
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, stdout)| stdout.clone())
                .unwrap_or_default(),
        };

        Ok(ExecOutput {
            pid,
            stdout,
            stderr: String::new(),
        })
    }

    async fn stat(&self, path: &Path) -> io::Result<Option<Stat>> {
        let state = self.state.lock();
        if let Some(size) = state.sizes.get(path) {
            return Ok(Some(Stat {
                is_file: true,
                size: *size,
            }));
        }
        if let Some(content) = state.files.get(path) {
            return Ok(Some(Stat {
                is_file: true,
                size: content.len() as u64,
            }));
        }
        if state.dirs.contains(path) {
            return Ok(Some(Stat {
                is_file: false,
                size: 0,
            }));
        }
        Ok(None)
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.state
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        state.removed.push(path.to_path_buf());
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn current_dir(&self) -> io::Result<PathBuf> {
        Ok(self.cwd.clone())
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp.clone()
    }
}
