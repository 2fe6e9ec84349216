//! Command reply throttle
//!
//! One policy, counted in chat lines: a command may be answered again only
//! after `min_lines` other chat lines have gone by since its last answer. A
//! command never answered before is always allowed. Time plays no part, so a
//! quiet room is never flooded by a repeated command.

use std::collections::HashMap;

/// Default number of chat lines between two answers to the same command
pub const DEFAULT_MIN_LINES: u64 = 10;

#[derive(Debug, Clone)]
pub struct CommandThrottle {
    min_lines: u64,
    /// Chat lines observed so far
    lines: u64,
    /// Command name -> line count at its last permitted answer
    last_answer: HashMap<String, u64>,
}

impl CommandThrottle {
    pub fn new(min_lines: u64) -> Self {
        Self {
            min_lines,
            lines: 0,
            last_answer: HashMap::new(),
        }
    }

    /// Count one ordinary chat line
    pub fn observe_line(&mut self) {
        self.lines += 1;
    }

    /// Whether `command` may be answered now; a `true` answer restarts its count
    pub fn permit(&mut self, command: &str) -> bool {
        if let Some(&at) = self.last_answer.get(command) {
            if self.lines.saturating_sub(at) < self.min_lines {
                return false;
            }
        }
        self.last_answer.insert(command.to_string(), self.lines);
        true
    }
}

impl Default for CommandThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LINES)
    }
}
