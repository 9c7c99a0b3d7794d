//! Interactive console for a running worker
//!
//! Each complete input is parsed as JSON and posted to the worker; input
//! that is not valid JSON is posted as a string. Replies and errors are
//! printed as they arrive.

use crate::environment::{ErrorEvent, MessageEvent, WorkerHandle};
use crate::runtime::{BoaWorker, RuntimeError, RuntimeResult};
use colored::Colorize;
use serde_json::Value;
use std::io::{self, BufRead, Write};

/// REPL configuration
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string
    pub prompt: String,
    /// Continuation prompt for multiline input
    pub continuation_prompt: String,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "worker> ".to_string(),
            continuation_prompt: "   ... ".to_string(),
        }
    }
}

/// Interactive console attached to one worker
pub struct WorkerRepl {
    worker: BoaWorker,
    config: ReplConfig,
    sent: usize,
}

impl WorkerRepl {
    pub fn new(worker: BoaWorker) -> Self {
        Self::with_config(worker, ReplConfig::default())
    }

    pub fn with_config(worker: BoaWorker, config: ReplConfig) -> Self {
        Self {
            worker,
            config,
            sent: 0,
        }
    }

    fn print_banner(&self) {
        println!("{}", "inline-worker console".cyan().bold());
        println!("Version: {}", env!("CARGO_PKG_VERSION").green());
        println!("Type {} for help, {} to exit", ".help".yellow(), ".exit".yellow());
        println!();
    }

    fn print_help(&self) {
        println!("{}", "Available commands:".bold());
        println!("  {}    - Show this help message", ".help".yellow());
        println!("  {}   - Clear the screen", ".clear".yellow());
        println!("  {}    - Exit and terminate the worker", ".exit".yellow());
        println!("  {}    - Show worker info", ".info".yellow());
        println!();
        println!("{}", "Tips:".bold());
        println!("  - Enter a JSON value to post it to the worker");
        println!("  - Anything else is posted as a string");
        println!("  - Multi-line input: leave braces open or end the line with \\");
        println!();
    }

    fn print_info(&self) {
        println!("{}", "Worker Information:".bold());
        println!("  Id: {}", self.worker.id());
        println!("  Delivered via: {}", scheme(self.worker.url()));
        println!("  Messages sent: {}", self.sent);
        println!();
    }

    /// Check if input is complete (not waiting for more lines)
    fn is_complete(input: &str) -> bool {
        let open_braces = input.matches('{').count();
        let close_braces = input.matches('}').count();
        let open_brackets = input.matches('[').count();
        let close_brackets = input.matches(']').count();

        open_braces <= close_braces
            && open_brackets <= close_brackets
            && !input.trim().ends_with('\\')
    }

    /// Process a REPL command (starts with .)
    fn process_command(&mut self, command: &str) -> bool {
        match command.trim() {
            ".exit" | ".quit" | ".q" => return false,
            ".help" | ".h" => self.print_help(),
            ".clear" | ".cls" => {
                print!("\x1B[2J\x1B[1;1H");
                let _ = io::stdout().flush();
            }
            ".info" => self.print_info(),
            cmd => {
                println!(
                    "{}: Unknown command '{}'. Type .help for available commands.",
                    "Error".red(),
                    cmd
                );
            }
        }
        true
    }

    fn post(&mut self, input: &str) -> RuntimeResult<()> {
        let input = input.trim().trim_end_matches('\\');
        self.worker.post_message(parse_input(input))?;
        self.sent += 1;
        Ok(())
    }

    /// Run the console until EOF or `.exit`
    pub fn run(&mut self) -> RuntimeResult<()> {
        self.print_banner();

        self.worker
            .set_on_message(Some(Box::new(|event: MessageEvent| {
                println!("{} {}", "<=".green(), event.data);
            })));
        self.worker.set_on_error(Some(Box::new(|event: ErrorEvent| {
            println!("{}: {}", "Worker error".red(), event.message);
        })));

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut input_buffer = String::new();
        let mut in_multiline = false;

        loop {
            let prompt = if in_multiline {
                &self.config.continuation_prompt
            } else {
                &self.config.prompt
            };
            print!("{}", prompt.cyan());
            stdout.flush().map_err(RuntimeError::IoError)?;

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    println!();
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    println!("{}: Failed to read input: {}", "Error".red(), e);
                    continue;
                }
            }

            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() && !in_multiline {
                continue;
            }

            if line.starts_with('.') && !in_multiline {
                if !self.process_command(line) {
                    break;
                }
                continue;
            }

            if in_multiline {
                input_buffer.push('\n');
            }
            input_buffer.push_str(line);

            if Self::is_complete(&input_buffer) {
                if !input_buffer.trim().is_empty() {
                    if let Err(e) = self.post(&input_buffer) {
                        println!("{}: {}", "Error".red(), e);
                        input_buffer.clear();
                        break;
                    }
                }
                input_buffer.clear();
                in_multiline = false;
            } else {
                in_multiline = true;
            }
        }

        self.worker.terminate();
        println!("{}", "Goodbye!".cyan());
        Ok(())
    }
}

/// JSON when it parses, otherwise the raw text as a string
pub fn parse_input(input: &str) -> Value {
    serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()))
}

fn scheme(url: &str) -> &str {
    url.split_once(':').map(|(scheme, _)| scheme).unwrap_or("path")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("10"), json!(10));
        assert_eq!(parse_input("{\"a\": [1, 2]}"), json!({ "a": [1, 2] }));
        assert_eq!(parse_input("hello there"), json!("hello there"));
    }

    #[test]
    fn test_is_complete() {
        assert!(WorkerRepl::is_complete("{\"a\": 1}"));
        assert!(!WorkerRepl::is_complete("{\"a\": [1,"));
        assert!(!WorkerRepl::is_complete("\"line\" \\"));
    }

    #[test]
    fn test_scheme() {
        assert_eq!(scheme("blob:null/abc"), "blob");
        assert_eq!(scheme("data:text/javascript;base64,AA=="), "data");
        assert_eq!(scheme("/tmp/worker.js"), "path");
    }
}
