//! Protocol line parser
//!
//! Turns one newline-terminated line into a [`Command`]:
//!
//! ```text
//! JOIN username="joe"
//! SAY username="joe" message="what's up"
//! username="joe" message="no verb means SAY"
//! ```
//!
//! The parser is a finite-state machine driven one byte at a time. `State`
//! names the transition to apply to the next byte and an explicit frame stack
//! records which construct is still open (verb, key, value, escape). A line
//! parses only when the stack is fully unwound.

use std::collections::HashMap;

use crate::command::{Command, Verb};
use crate::error::ParseError;

/// Transition applied to the next byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    CommandStart,
    CommandEnd,
    KeyStart,
    KeyEnd,
    ValueStart,
    ValueEnd,
    EscapeSkip,
}

/// Open construct on the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Command,
    Key,
    Value,
    Escape,
}

/// Result of feeding one byte to a transition
enum Step {
    /// The byte was consumed
    Consumed,
    /// The state changed and the same byte must be fed again
    Again,
}

/// Parse one line of input.
///
/// Bytes are consumed up to and including the first `\n`; anything after it
/// is ignored. Input that runs out before the terminator is an
/// [`ParseError::IncompleteMessage`].
pub fn parse(input: &[u8]) -> Result<Command, ParseError> {
    let mut scanner = Scanner::new();
    for (pos, &byte) in input.iter().enumerate() {
        if byte == b'\n' {
            return scanner.finish(&input[..pos]);
        }
        scanner.feed(byte, &input[..=pos])?;
    }
    Err(ParseError::IncompleteMessage)
}

/// Parse a line that does not carry its own terminator
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let mut input = Vec::with_capacity(line.len() + 1);
    input.extend_from_slice(line.as_bytes());
    input.push(b'\n');
    parse(&input)
}

struct Scanner {
    state: State,
    stack: Vec<Frame>,
    verb: Option<Verb>,
    /// Verb being matched and the letters still expected
    pending_verb: Option<(Verb, &'static [u8])>,
    key: String,
    value: Vec<u8>,
    last: u8,
    args: HashMap<String, String>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            state: State::CommandStart,
            stack: Vec::new(),
            verb: None,
            pending_verb: None,
            key: String::new(),
            value: Vec::new(),
            last: 0,
            args: HashMap::new(),
        }
    }

    fn feed(&mut self, byte: u8, seen: &[u8]) -> Result<(), ParseError> {
        loop {
            match self.transition(byte, seen)? {
                Step::Consumed => break,
                Step::Again => continue,
            }
        }
        self.last = byte;
        Ok(())
    }

    fn transition(&mut self, byte: u8, seen: &[u8]) -> Result<Step, ParseError> {
        match self.state {
            State::CommandStart => self.command_start(byte, seen),
            State::CommandEnd => self.command_end(byte, seen),
            State::KeyStart => self.key_start(byte, seen),
            State::KeyEnd => self.key_end(byte, seen),
            State::ValueStart => self.value_start(byte, seen),
            State::ValueEnd => Ok(self.value_end(byte)),
            State::EscapeSkip => Ok(self.escape_skip(byte)),
        }
    }

    fn command_start(&mut self, byte: u8, seen: &[u8]) -> Result<Step, ParseError> {
        if byte.is_ascii_whitespace() {
            return Ok(Step::Consumed);
        }
        if byte.is_ascii_lowercase() {
            // No verb: default to SAY and hand the byte to the key section
            self.verb = Some(Verb::Say);
            self.state = State::KeyStart;
            return Ok(Step::Again);
        }

        let pending: (Verb, &'static [u8]) = match byte {
            b'J' => (Verb::Join, b"OIN"),
            b'L' => (Verb::Leave, b"EAVE"),
            b'S' => (Verb::Say, b"AY"),
            b'E' => (Verb::Error, b"RROR"),
            b'P' => (Verb::Pass, b"ASS"),
            _ => return Err(ParseError::BadVerb(lossy(seen))),
        };
        self.pending_verb = Some(pending);
        self.stack.push(Frame::Command);
        self.state = State::CommandEnd;
        Ok(Step::Consumed)
    }

    fn command_end(&mut self, byte: u8, seen: &[u8]) -> Result<Step, ParseError> {
        let Some((verb, rest)) = self.pending_verb else {
            return Err(ParseError::BadVerb(lossy(seen)));
        };
        match rest.split_first() {
            Some((&expected, tail)) if expected == byte => {
                self.pending_verb = Some((verb, tail));
                Ok(Step::Consumed)
            }
            None if byte.is_ascii_whitespace() => {
                self.complete_verb(verb);
                Ok(Step::Consumed)
            }
            _ => Err(ParseError::BadVerb(lossy(seen))),
        }
    }

    fn complete_verb(&mut self, verb: Verb) {
        self.pop(Frame::Command);
        self.pending_verb = None;
        self.verb = Some(verb);
        self.state = State::KeyStart;
    }

    fn key_start(&mut self, byte: u8, seen: &[u8]) -> Result<Step, ParseError> {
        if byte.is_ascii_whitespace() {
            return Ok(Step::Consumed);
        }
        if !byte.is_ascii_alphanumeric() {
            return Err(ParseError::BadKeyChar {
                ch: char::from(byte),
                line: lossy(seen),
            });
        }
        self.stack.push(Frame::Key);
        self.key.clear();
        self.key.push(char::from(byte));
        self.state = State::KeyEnd;
        Ok(Step::Consumed)
    }

    fn key_end(&mut self, byte: u8, seen: &[u8]) -> Result<Step, ParseError> {
        if byte.is_ascii_alphanumeric() {
            // a key cannot resume after whitespace
            if self.last.is_ascii_whitespace() {
                return Err(ParseError::BadKeyChar {
                    ch: char::from(byte),
                    line: lossy(seen),
                });
            }
            self.key.push(char::from(byte));
            return Ok(Step::Consumed);
        }
        if byte.is_ascii_whitespace() {
            return Ok(Step::Consumed);
        }
        if byte == b'=' {
            self.state = State::ValueStart;
            return Ok(Step::Consumed);
        }
        Err(ParseError::MissingEquals {
            ch: char::from(byte),
            line: lossy(seen),
        })
    }

    fn value_start(&mut self, byte: u8, seen: &[u8]) -> Result<Step, ParseError> {
        if byte == b'"' {
            self.pop(Frame::Key);
            self.stack.push(Frame::Value);
            self.value.clear();
            self.state = State::ValueEnd;
            return Ok(Step::Consumed);
        }
        if byte.is_ascii_whitespace() {
            return Ok(Step::Consumed);
        }
        Err(ParseError::BadValueStart {
            ch: char::from(byte),
            line: lossy(seen),
        })
    }

    fn value_end(&mut self, byte: u8) -> Step {
        match byte {
            b'\\' => {
                self.stack.push(Frame::Escape);
                self.state = State::EscapeSkip;
            }
            b'"' => {
                self.pop(Frame::Value);
                self.add_arg();
                self.state = State::KeyStart;
            }
            _ => self.value.push(byte),
        }
        Step::Consumed
    }

    fn escape_skip(&mut self, byte: u8) -> Step {
        self.value.push(byte);
        self.pop(Frame::Escape);
        self.state = State::ValueEnd;
        Step::Consumed
    }

    /// Store the current pair; a repeated key keeps its first value
    fn add_arg(&mut self) {
        let key = std::mem::take(&mut self.key);
        let value = String::from_utf8_lossy(&self.value).into_owned();
        self.value.clear();
        self.args.entry(key).or_insert(value);
    }

    fn pop(&mut self, expected: Frame) {
        let top = self.stack.pop();
        debug_assert_eq!(top, Some(expected));
    }

    fn finish(mut self, line: &[u8]) -> Result<Command, ParseError> {
        // a verb may end the line on its own
        if self.state == State::CommandEnd {
            if let Some((verb, [])) = self.pending_verb {
                self.complete_verb(verb);
            }
        }

        match self.stack.last() {
            None => {}
            Some(Frame::Command) => return Err(ParseError::BadVerb(lossy(line))),
            Some(Frame::Value | Frame::Escape) => {
                return Err(ParseError::UnterminatedValue(lossy(line)))
            }
            Some(Frame::Key) if self.state == State::ValueStart => {
                return Err(ParseError::UnterminatedValue(lossy(line)))
            }
            Some(Frame::Key) => return Err(ParseError::IncompleteCommand),
        }

        let name = self.verb.ok_or(ParseError::IncompleteCommand)?;
        Ok(Command {
            name,
            args: self.args,
        })
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
