//! Fixed-size message payloads

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use rand::seq::IndexedRandom;

const BUILTIN_FILLER: &[&str] = &[
    "Queues hold messages until a reader asks for them.",
    "Every client keeps its own log of timed operations.",
    "Higher priority messages are handed out before lower ones.",
    "A reader that finds nothing records a miss and moves on.",
    "Messages may be addressed to one receiver or left open to all.",
    "The ring keeps one message per member in circulation.",
    "Acknowledgements travel back on the queue the request came from.",
    "Servers share the population in round-robin order.",
    "A trace runs for a fixed time and then every client stops.",
    "Think-time between operations follows the configured distribution.",
];

/// Filler text used to pad payloads to an exact size
#[derive(Debug, Clone)]
pub struct PayloadSource {
    lines: Arc<[String]>,
}

impl Default for PayloadSource {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PayloadSource {
    pub fn builtin() -> Self {
        Self::from_lines(BUILTIN_FILLER.iter().map(|line| line.to_string()))
    }

    /// Non-empty lines of the given iterator
    pub fn from_lines<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let lines: Vec<String> = lines
            .into_iter()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Self {
            lines: lines.into(),
        }
    }

    /// Load filler lines from a text file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let source = Self::from_lines(text.lines().map(str::to_string));
        if source.lines.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} contains no filler text", path.display()),
            ));
        }
        Ok(source)
    }

    /// Build a payload of exactly `size` bytes (or the nearest char boundary
    /// below it): the sender's name on the first line, then random filler lines.
    pub fn build<R: Rng + ?Sized>(&self, name: &str, size: usize, rng: &mut R) -> String {
        let mut payload = String::with_capacity(size + 128);
        payload.push_str(name);
        payload.push('\n');

        while payload.len() < size {
            match self.lines.choose(rng) {
                Some(line) => payload.push_str(line),
                None => payload.push('.'),
            }
            payload.push('\n');
        }

        let mut cut = size.min(payload.len());
        while !payload.is_char_boundary(cut) {
            cut -= 1;
        }
        payload.truncate(cut);
        payload
    }
}
