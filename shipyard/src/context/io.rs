//! Input and output handles carried by a context

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use colored::Colorize;

/// Run-level input: options given on the command line
#[derive(Debug, Clone, Default)]
pub struct Input {
    options: BTreeMap<String, String>,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option(mut self, name: &str, value: &str) -> Self {
        self.options.insert(name.to_string(), value.to_string());
        self
    }

    /// Option value; empty strings count as unset
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn has_flag(&self, name: &str) -> bool {
        matches!(self.option(name), Some("true") | Some("1") | Some("yes"))
    }
}

enum Sink {
    Stdout { decorated: bool },
    Capture(Mutex<Vec<String>>),
}

/// Where task output goes
#[derive(Clone)]
pub struct Output {
    sink: Arc<Sink>,
}

impl Output {
    /// Print to stdout, with colors when `decorated`
    pub fn stdout(decorated: bool) -> Self {
        Self {
            sink: Arc::new(Sink::Stdout { decorated }),
        }
    }

    /// Keep lines in memory
    pub fn capture() -> Self {
        Self {
            sink: Arc::new(Sink::Capture(Mutex::new(Vec::new()))),
        }
    }

    /// Write one line, prefixed with the host alias when there is one
    pub fn writeln(&self, host: Option<&str>, line: &str) {
        match self.sink.as_ref() {
            Sink::Stdout { decorated } => match host {
                Some(alias) if *decorated => println!("[{}] {}", alias.cyan(), line),
                Some(alias) => println!("[{}] {}", alias, line),
                None => println!("{}", line),
            },
            Sink::Capture(lines) => {
                let line = match host {
                    Some(alias) => format!("[{}] {}", alias, line),
                    None => line.to_string(),
                };
                lines.lock().unwrap_or_else(|e| e.into_inner()).push(line);
            }
        }
    }

    /// Write a warning line
    pub fn warning(&self, host: Option<&str>, line: &str) {
        match self.sink.as_ref() {
            Sink::Stdout { decorated: true } => self.writeln(host, &line.yellow().to_string()),
            _ => self.writeln(host, &format!("warning: {}", line)),
        }
    }

    /// Captured lines (empty unless created with [`Output::capture`])
    pub fn captured(&self) -> Vec<String> {
        match self.sink.as_ref() {
            Sink::Capture(lines) => lines.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            Sink::Stdout { .. } => Vec::new(),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::stdout(false)
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sink.as_ref() {
            Sink::Stdout { decorated } => f
                .debug_struct("Output")
                .field("decorated", decorated)
                .finish(),
            Sink::Capture(_) => f.write_str("Output(capture)"),
        }
    }
}
