//! Trace configuration
//!
//! Configuration is loaded from an INI file with a `System` section (queues,
//! servers, service limits) and a `Trace` section (population, timing, logs,
//! think-time). Section and key names are case-insensitive and several keys
//! accept the older spellings used by existing trace files.

use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::behavior::{Role, max_counter_line_len};
use crate::messaging::ServerEndpoint;
use crate::wait::WaitSpec;

/// Most servers a trace can spread its clients over
pub const MAX_SERVERS: usize = 5;
/// Smallest accepted message size bound
pub const MIN_MESSAGE_SIZE: usize = 64;

const SERVER_LETTERS: [char; MAX_SERVERS] = ['a', 'b', 'c', 'd', 'e'];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("Missing [{section}] {key}")]
    Missing { section: &'static str, key: String },

    #[error("Invalid [{section}] {key} = {value:?}: {reason}")]
    Invalid {
        section: &'static str,
        key: String,
        value: String,
        reason: String,
    },
}

/// Complete trace configuration
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceConfig {
    pub system: SystemConfig,
    pub trace: TraceSettings,
}

/// Messaging system layout
#[derive(Debug, Clone, Serialize)]
pub struct SystemConfig {
    /// Queue names are `<queue_base_name><i>`
    pub queue_base_name: String,
    /// Number of queues
    pub queue_count: usize,
    /// Servers clients are spread over, in round-robin order
    pub servers: Vec<ServerEndpoint>,
    /// Largest message the service accepts
    pub max_message_size: usize,
    /// Round trip added to every call by the in-process service
    pub simulated_latency: Duration,
    /// Messages a queue of the in-process service holds before rejecting
    /// sends; unbounded when `None`
    pub queue_capacity: Option<usize>,
}

/// Clients per role for one iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleCounts {
    pub alice: usize,
    pub bob: usize,
    pub larry: usize,
    /// Number of Tola/Maruja pairs
    pub tola_maruja: usize,
    pub rick: usize,
    pub carl: usize,
}

/// Trace timing, population and client tuning
#[derive(Debug, Clone, Serialize)]
pub struct TraceSettings {
    /// How long each iteration runs
    pub running_time: Duration,
    /// Population of each iteration
    pub populations: Vec<RoleCounts>,
    /// Size of the payloads senders build
    pub message_size: usize,
    /// Directory for per-client event logs; kept in memory when unset
    pub log_path: Option<PathBuf>,
    /// Think-time of senders and readers; none means no pause
    pub wait: Option<WaitSpec>,
    /// Queues each broadcast reaches
    pub broadcast_fanout: usize,
    /// Delay between polls of blocking clients
    pub poll_interval: Duration,
    /// Pause between iterations
    pub cooldown: Duration,
    /// Shell command run between iterations
    pub reset_command: Option<String>,
    /// File of filler lines for payloads
    pub filler_text: Option<PathBuf>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            queue_base_name: "Queue".to_string(),
            queue_count: 10,
            servers: vec![ServerEndpoint::new("127.0.0.1", 34582)],
            max_message_size: 2000,
            simulated_latency: Duration::ZERO,
            queue_capacity: Some(1000),
        }
    }
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            running_time: Duration::from_secs(60),
            populations: vec![RoleCounts::default()],
            message_size: 2000,
            log_path: None,
            wait: None,
            broadcast_fanout: 1,
            poll_interval: Duration::from_millis(1),
            cooldown: Duration::ZERO,
            reset_command: None,
            filler_text: None,
        }
    }
}

impl RoleCounts {
    /// Number of clients of one role
    pub fn count(&self, role: Role) -> usize {
        match role {
            Role::Alice => self.alice,
            Role::Bob => self.bob,
            Role::Larry => self.larry,
            Role::Tola | Role::Maruja => self.tola_maruja,
            Role::Rick => self.rick,
            Role::Carl => self.carl,
        }
    }

    /// Number of clients in total
    pub fn total(&self) -> usize {
        Role::ALL.iter().map(|role| self.count(*role)).sum()
    }

    pub fn has_pairs(&self) -> bool {
        self.tola_maruja > 0
    }

    pub fn has_shared_queue(&self) -> bool {
        self.rick > 0 || self.carl > 0
    }

    pub fn has_general(&self) -> bool {
        self.alice > 0 || self.bob > 0 || self.larry > 0
    }

    /// Queues needed to give every present role family its own queues
    pub fn required_queues(&self) -> usize {
        usize::from(self.has_pairs())
            + usize::from(self.has_shared_queue())
            + usize::from(self.has_general())
    }

    fn with_step(self, iteration: usize, step: usize) -> Self {
        let grow = |base: usize| {
            if base > 0 {
                base + iteration * step
            } else {
                0
            }
        };
        Self {
            alice: grow(self.alice),
            bob: grow(self.bob),
            larry: grow(self.larry),
            tola_maruja: grow(self.tola_maruja),
            rick: grow(self.rick),
            carl: grow(self.carl),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Section {
    System,
    Trace,
}

impl Section {
    fn name(self) -> &'static str {
        match self {
            Section::System => "System",
            Section::Trace => "Trace",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Section::System => "system",
            Section::Trace => "trace",
        }
    }
}

/// Parsed INI document with lower-cased section and key names
#[derive(Debug, Default)]
struct IniDocument {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniDocument {
    fn from_text(text: &str) -> Result<Self, ConfigError> {
        let mut document = Self::default();
        let mut current: Option<String> = None;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| ConfigError::Syntax {
                    line: number + 1,
                    reason: format!("unterminated section header {line:?}"),
                })?;
                let name = name.trim().to_ascii_lowercase();
                document.sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let Some(split) = line.find(['=', ':']) else {
                return Err(ConfigError::Syntax {
                    line: number + 1,
                    reason: format!("expected `key = value`, got {line:?}"),
                });
            };
            let Some(section) = &current else {
                return Err(ConfigError::Syntax {
                    line: number + 1,
                    reason: "key outside of any section".to_string(),
                });
            };

            let key = line[..split].trim().to_ascii_lowercase();
            let value = line[split + 1..].trim().to_string();
            document
                .sections
                .entry(section.clone())
                .or_default()
                .insert(key, value);
        }

        Ok(document)
    }

    /// First present key among `aliases`, with its value
    fn get<'a>(&'a self, section: Section, aliases: &[&str]) -> Option<(String, &'a str)> {
        let entries = self.sections.get(section.key())?;
        aliases.iter().find_map(|alias| {
            entries
                .get(&alias.to_ascii_lowercase())
                .map(|value| (alias.to_string(), value.as_str()))
        })
    }

    fn parse<T>(&self, section: Section, aliases: &[&str]) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some((key, value)) = self.get(section, aliases) else {
            return Ok(None);
        };
        value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(section, &key, value, e))
    }

    fn seconds(&self, section: Section, aliases: &[&str]) -> Result<Option<Duration>, ConfigError> {
        let Some((key, value)) = self.get(section, aliases) else {
            return Ok(None);
        };
        parse_duration(value, 1.0)
            .map(Some)
            .map_err(|reason| invalid(section, &key, value, reason))
    }

    fn millis(&self, section: Section, aliases: &[&str]) -> Result<Option<Duration>, ConfigError> {
        let Some((key, value)) = self.get(section, aliases) else {
            return Ok(None);
        };
        parse_duration(value, 1e-3)
            .map(Some)
            .map_err(|reason| invalid(section, &key, value, reason))
    }

    fn counts(&self, aliases: &[&str]) -> Result<Option<Vec<usize>>, ConfigError> {
        let Some((key, value)) = self.get(Section::Trace, aliases) else {
            return Ok(None);
        };
        value
            .split(',')
            .map(|entry| entry.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
            .map_err(|e| invalid(Section::Trace, &key, value, e))
    }

    fn text(&self, section: Section, aliases: &[&str]) -> Option<String> {
        self.get(section, aliases)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }
}

fn invalid(section: Section, key: &str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        section: section.name(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_duration(value: &str, unit_secs: f64) -> Result<Duration, String> {
    let amount: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err("must be a non-negative number".to_string());
    }
    Duration::try_from_secs_f64(amount * unit_secs).map_err(|e| e.to_string())
}

/// Population keys in `RoleCounts` field order
const ROLE_KEYS: [&[&str]; 6] = [
    &["SenderNumber", "Senders"],
    &["ReaderNumber", "Readers"],
    &["LarryNumber"],
    &["TolaMarujaNumber"],
    &["RickNumber"],
    &["CarlNumber"],
];

impl TraceConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini_str(&text)
    }

    /// Parse and validate INI text
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let document = IniDocument::from_text(text)?;
        let config = Self {
            system: SystemConfig::from_document(&document)?,
            trace: TraceSettings::from_document(&document)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let system = &self.system;
        let trace = &self.trace;

        if system.servers.is_empty() || system.servers.len() > MAX_SERVERS {
            return Err(ConfigError::Invalid {
                section: "System",
                key: "NumberOfServers".to_string(),
                value: system.servers.len().to_string(),
                reason: format!("between 1 and {MAX_SERVERS} servers are supported"),
            });
        }
        if system.max_message_size < MIN_MESSAGE_SIZE {
            return Err(ConfigError::Invalid {
                section: "System",
                key: "MaxMessageSize".to_string(),
                value: system.max_message_size.to_string(),
                reason: format!("must be at least {MIN_MESSAGE_SIZE}"),
            });
        }
        if trace.message_size == 0 || trace.message_size > system.max_message_size {
            return Err(ConfigError::Invalid {
                section: "Trace",
                key: "MessageSize".to_string(),
                value: trace.message_size.to_string(),
                reason: format!("must be between 1 and {}", system.max_message_size),
            });
        }
        if trace.broadcast_fanout == 0 {
            return Err(ConfigError::Invalid {
                section: "Trace",
                key: "BroadcastFanout".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        match trace.wait {
            Some(WaitSpec::Uniform { min, max }) if min > max => {
                return Err(ConfigError::Invalid {
                    section: "Trace",
                    key: "WaitMin".to_string(),
                    value: format!("{}", min.as_secs_f64()),
                    reason: format!("exceeds WaitMax {}", max.as_secs_f64()),
                });
            }
            Some(WaitSpec::Exponential { lambda }) if !(lambda.is_finite() && lambda > 0.0) => {
                return Err(ConfigError::Invalid {
                    section: "Trace",
                    key: "Lambda".to_string(),
                    value: lambda.to_string(),
                    reason: "must be a positive rate".to_string(),
                });
            }
            _ => {}
        }

        if trace.populations.is_empty() {
            return Err(ConfigError::Invalid {
                section: "Trace",
                key: "Iterations".to_string(),
                value: "0".to_string(),
                reason: "at least one iteration is required".to_string(),
            });
        }
        for (iteration, counts) in trace.populations.iter().enumerate() {
            if counts.total() == 0 {
                return Err(ConfigError::Invalid {
                    section: "Trace",
                    key: "SenderNumber".to_string(),
                    value: "0".to_string(),
                    reason: format!("iteration {iteration} has no clients"),
                });
            }
            if counts.larry > 0 && trace.message_size < max_counter_line_len(counts.larry) {
                return Err(ConfigError::Invalid {
                    section: "Trace",
                    key: "MessageSize".to_string(),
                    value: trace.message_size.to_string(),
                    reason: format!(
                        "iteration {iteration} has a ring of {} that needs at least {} bytes",
                        counts.larry,
                        max_counter_line_len(counts.larry)
                    ),
                });
            }
            if counts.required_queues() > system.queue_count {
                return Err(ConfigError::Invalid {
                    section: "System",
                    key: "ValidQueues".to_string(),
                    value: system.queue_count.to_string(),
                    reason: format!(
                        "iteration {iteration} needs at least {} queues",
                        counts.required_queues()
                    ),
                });
            }
        }

        Ok(())
    }

    /// Number of iterations in the trace
    pub fn iterations(&self) -> usize {
        self.trace.populations.len()
    }

    /// All queue names, in index order
    pub fn queue_names(&self) -> Vec<String> {
        (0..self.system.queue_count)
            .map(|i| format!("{}{}", self.system.queue_base_name, i))
            .collect()
    }
}

impl SystemConfig {
    fn from_document(document: &IniDocument) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let section = Section::System;

        let queue_base_name = document
            .text(section, &["QueueBaseName", "QueueName"])
            .ok_or_else(|| ConfigError::Missing {
                section: section.name(),
                key: "QueueBaseName".to_string(),
            })?;
        let queue_count = document
            .parse(section, &["ValidQueues", "QueueNumber", "QueueCount"])?
            .ok_or_else(|| ConfigError::Missing {
                section: section.name(),
                key: "ValidQueues".to_string(),
            })?;

        let shared_port: Option<u16> = document.parse(section, &["Port"])?;
        let mut servers = Vec::new();
        for (i, letter) in SERVER_LETTERS.iter().enumerate() {
            let server_keys = [format!("Server{}", i + 1), format!("Server{letter}")];
            let port_keys = [format!("Port{}", i + 1), format!("Port{letter}")];
            let server_aliases: Vec<&str> = server_keys.iter().map(String::as_str).collect();
            let port_aliases: Vec<&str> = port_keys.iter().map(String::as_str).collect();

            let Some(address) = document.text(section, &server_aliases) else {
                break;
            };
            let port = match document.parse::<u16>(section, &port_aliases)? {
                Some(port) => port,
                None => shared_port.ok_or_else(|| ConfigError::Missing {
                    section: section.name(),
                    key: format!("Port{}", i + 1),
                })?,
            };
            servers.push(ServerEndpoint::new(address, port));
        }
        if servers.is_empty() {
            return Err(ConfigError::Missing {
                section: section.name(),
                key: "Server1".to_string(),
            });
        }

        if let Some((key, value)) = document.get(section, &["NumberOfServers"]) {
            let wanted: usize = value
                .parse()
                .map_err(|e| invalid(section, &key, value, e))?;
            if wanted == 0 || wanted > servers.len() {
                return Err(invalid(
                    section,
                    &key,
                    value,
                    format!("{} servers are configured", servers.len()),
                ));
            }
            servers.truncate(wanted);
        }

        Ok(Self {
            queue_base_name,
            queue_count,
            servers,
            max_message_size: document
                .parse(section, &["MaxMessageSize"])?
                .unwrap_or(defaults.max_message_size),
            simulated_latency: document
                .millis(section, &["SimulatedLatency"])?
                .unwrap_or(defaults.simulated_latency),
            queue_capacity: match document.parse::<usize>(section, &["QueueCapacity"])? {
                Some(0) => None,
                Some(capacity) => Some(capacity),
                None => defaults.queue_capacity,
            },
        })
    }
}

impl TraceSettings {
    fn from_document(document: &IniDocument) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let section = Section::Trace;

        let running_time = document
            .seconds(section, &["StepTime", "RunningTime"])?
            .ok_or_else(|| ConfigError::Missing {
                section: section.name(),
                key: "RunningTime".to_string(),
            })?;

        Ok(Self {
            running_time,
            populations: population_schedule(document)?,
            message_size: document
                .parse(section, &["MessageSize"])?
                .unwrap_or(defaults.message_size),
            log_path: document.text(section, &["LogPath"]).map(PathBuf::from),
            wait: wait_spec(document)?,
            broadcast_fanout: document
                .parse(section, &["BroadcastFanout"])?
                .unwrap_or(defaults.broadcast_fanout),
            poll_interval: document
                .millis(section, &["PollInterval"])?
                .unwrap_or(defaults.poll_interval),
            cooldown: document
                .seconds(section, &["Cooldown"])?
                .unwrap_or(defaults.cooldown),
            reset_command: document.text(section, &["ResetCommand"]),
            filler_text: document.text(section, &["FillerText"]).map(PathBuf::from),
        })
    }
}

/// Resolve role counts per iteration. Each count is a scalar applied to every
/// iteration or a list with one entry per iteration; `StepSize` then grows
/// every present role by `z * StepSize` at iteration `z`.
fn population_schedule(document: &IniDocument) -> Result<Vec<RoleCounts>, ConfigError> {
    let section = Section::Trace;

    let mut lists = Vec::with_capacity(ROLE_KEYS.len());
    for aliases in ROLE_KEYS {
        lists.push((aliases[0], document.counts(aliases)?.unwrap_or_else(|| vec![0])));
    }

    let longest = lists.iter().map(|(_, list)| list.len()).max().unwrap_or(1);
    let iterations: usize = document
        .parse(section, &["Iterations"])?
        .unwrap_or(longest);
    let step: usize = document.parse(section, &["StepSize"])?.unwrap_or(0);

    for (key, list) in &lists {
        if list.len() > 1 && list.len() < iterations {
            return Err(ConfigError::Invalid {
                section: section.name(),
                key: key.to_string(),
                value: list.len().to_string(),
                reason: format!("one entry per iteration is required ({iterations})"),
            });
        }
    }

    let at = |index: usize, z: usize| {
        let list = &lists[index].1;
        if list.len() == 1 { list[0] } else { list[z] }
    };

    Ok((0..iterations)
        .map(|z| {
            RoleCounts {
                alice: at(0, z),
                bob: at(1, z),
                larry: at(2, z),
                tola_maruja: at(3, z),
                rick: at(4, z),
                carl: at(5, z),
            }
            .with_step(z, step)
        })
        .collect())
}

fn wait_spec(document: &IniDocument) -> Result<Option<WaitSpec>, ConfigError> {
    let section = Section::Trace;
    let Some((key, name)) = document.get(section, &["Distribution"]) else {
        return Ok(None);
    };

    let spec = match name.to_ascii_lowercase().as_str() {
        "uniform" | "uniformdistribution" => WaitSpec::Uniform {
            min: document
                .seconds(section, &["WaitMin"])?
                .unwrap_or(Duration::from_millis(10)),
            max: document
                .seconds(section, &["WaitMax"])?
                .unwrap_or(Duration::from_millis(100)),
        },
        "exponential" | "exponentialdistribution" => WaitSpec::Exponential {
            lambda: document.parse(section, &["Lambda"])?.unwrap_or(20.0),
        },
        "fixed" | "none" | "nodistribution" => WaitSpec::Fixed(
            document
                .seconds(section, &["WaitTime"])?
                .unwrap_or(Duration::from_millis(50)),
        ),
        _ => {
            return Err(invalid(
                section,
                &key,
                name,
                "expected uniform, exponential or fixed",
            ));
        }
    };
    Ok(Some(spec))
}
