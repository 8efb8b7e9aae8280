use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::DEFAULT_SYSFS_ROOT;
use crate::gpio::{Direction, SysfsBackend};

pub struct MockSysfs {
    root: PathBuf,
    state: Mutex<MockState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsWrite {
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Default)]
struct MockState {
    pins: FxHashMap<u32, MockPin>,
    input_levels: FxHashMap<u32, u8>,
    raw_values: FxHashMap<u32, String>,
    denied: FxHashSet<PathBuf>,
    writes: Vec<SysfsWrite>,
}

struct MockPin {
    direction: Direction,
    value: u8,
}

enum Node {
    Export,
    Unexport,
    PinDir(u32),
    Direction(u32),
    Value(u32),
}

impl Default for MockSysfs {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl MockSysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn set_input_level(&self, pin: u32, level: u8) {
        let mut state = self.state.lock();
        state.input_levels.insert(pin, level);
        if let Some(p) = state.pins.get_mut(&pin) {
            if p.direction == Direction::In {
                p.value = level;
            }
        }
    }

    pub fn set_raw_value(&self, pin: u32, raw: impl Into<String>) {
        self.state.lock().raw_values.insert(pin, raw.into());
    }

    pub fn deny(&self, path: impl Into<PathBuf>) {
        self.state.lock().denied.insert(path.into());
    }

    pub fn is_exported(&self, pin: u32) -> bool {
        self.state.lock().pins.contains_key(&pin)
    }

    pub fn direction(&self, pin: u32) -> Option<Direction> {
        self.state.lock().pins.get(&pin).map(|p| p.direction)
    }

    pub fn writes(&self) -> Vec<SysfsWrite> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    fn node(&self, path: &Path) -> Option<Node> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts = rel.iter().map(|c| c.to_str());
        let first = parts.next()??;
        let second = parts.next().map(|c| c.ok_or(())).transpose().ok()?;
        if parts.next().is_some() {
            return None;
        }

        match (first, second) {
            ("export", None) => Some(Node::Export),
            ("unexport", None) => Some(Node::Unexport),
            (dir, rest) => {
                let pin = dir.strip_prefix("gpio")?.parse().ok()?;
                match rest {
                    None => Some(Node::PinDir(pin)),
                    Some("direction") => Some(Node::Direction(pin)),
                    Some("value") => Some(Node::Value(pin)),
                    Some(_) => None,
                }
            }
        }
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_string())
}

fn parse_pin(contents: &str) -> io::Result<u32> {
    contents
        .trim()
        .parse()
        .map_err(|_| invalid("invalid pin number"))
}

impl SysfsBackend for MockSysfs {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        let state = self.state.lock();
        Ok(match self.node(path) {
            Some(Node::Export | Node::Unexport) => true,
            Some(Node::PinDir(pin) | Node::Direction(pin) | Node::Value(pin)) => {
                state.pins.contains_key(&pin)
            }
            None => false,
        })
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        state.writes.push(SysfsWrite {
            path: path.to_path_buf(),
            contents: contents.to_string(),
        });

        if state.denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{}: permission denied", path.display()),
            ));
        }

        match self.node(path).ok_or_else(|| not_found(path))? {
            Node::Export => {
                let pin = parse_pin(contents)?;
                if state.pins.contains_key(&pin) {
                    return Err(io::Error::new(
                        io::ErrorKind::ResourceBusy,
                        "device or resource busy",
                    ));
                }
                let value = state.input_levels.get(&pin).copied().unwrap_or(0);
                state.pins.insert(
                    pin,
                    MockPin {
                        direction: Direction::In,
                        value,
                    },
                );
            }
            Node::Unexport => {
                let pin = parse_pin(contents)?;
                if state.pins.remove(&pin).is_none() {
                    return Err(invalid("pin is not exported"));
                }
            }
            Node::PinDir(_) => return Err(invalid("is a directory")),
            Node::Direction(pin) => {
                let level = state.input_levels.get(&pin).copied().unwrap_or(0);
                let p = state.pins.get_mut(&pin).ok_or_else(|| not_found(path))?;
                match contents.trim() {
                    "in" => {
                        p.direction = Direction::In;
                        p.value = level;
                    }
                    "out" => {
                        p.direction = Direction::Out;
                        p.value = 0;
                    }
                    _ => return Err(invalid("invalid direction")),
                }
            }
            Node::Value(pin) => {
                let p = state.pins.get_mut(&pin).ok_or_else(|| not_found(path))?;
                if p.direction == Direction::In {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "operation not permitted on input pin",
                    ));
                }
                let value: i64 = contents
                    .trim()
                    .parse()
                    .map_err(|_| invalid("invalid value"))?;
                p.value = u8::from(value != 0);
            }
        }

        Ok(())
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let state = self.state.lock();
        match self.node(path).ok_or_else(|| not_found(path))? {
            Node::Direction(pin) => state
                .pins
                .get(&pin)
                .map(|p| format!("{}\n", p.direction.as_str()))
                .ok_or_else(|| not_found(path)),
            Node::Value(pin) => {
                let p = state.pins.get(&pin).ok_or_else(|| not_found(path))?;
                Ok(match state.raw_values.get(&pin) {
                    Some(raw) => raw.clone(),
                    None => format!("{}\n", p.value),
                })
            }
            Node::Export | Node::Unexport => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "write-only attribute",
            )),
            Node::PinDir(_) => Err(invalid("is a directory")),
        }
    }
}
