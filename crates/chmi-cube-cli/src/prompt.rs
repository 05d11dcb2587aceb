use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use chmi_cube::{DataKind, Prompter};

const YES: &[&str] = &["a", "ano", "y", "yes", "souhlas", "samozřejmě", "certainly"];
const NO: &[&str] = &["n", "ne", "no", "nope", "nesouhlas"];
const END: &[&str] = &["k", "konec", "e", "end", "x", "."];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    End,
}

pub fn classify(input: &str) -> Option<Answer> {
    let word = input.trim().to_lowercase();
    if YES.contains(&word.as_str()) {
        Some(Answer::Yes)
    } else if NO.contains(&word.as_str()) {
        Some(Answer::No)
    } else if END.contains(&word.as_str()) {
        Some(Answer::End)
    } else {
        None
    }
}

/// Asks on stderr and reads answers from stdin until one is recognised.
pub struct TerminalPrompter {
    backup_dir: PathBuf,
}

impl TerminalPrompter {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    fn ask(&self, question: &str) -> bool {
        let stdin = io::stdin();
        loop {
            eprint!("{question} [ano/ne] ");
            let _ = io::stderr().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    log::warn!("No answer on stdin, assuming no");
                    return false;
                }
                Ok(_) => {}
            }

            match classify(&line) {
                Some(Answer::Yes) => return true,
                Some(Answer::No) => return false,
                Some(Answer::End) => {
                    log::info!("Session ended by user");
                    process::exit(0);
                }
                None => eprintln!("Please answer yes (a/ano/y/yes) or no (n/ne/no); k/konec ends."),
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn create_backup_dir(&mut self) -> bool {
        self.ask(&format!(
            "Backup directory {} does not exist. Create it?",
            self.backup_dir.display()
        ))
    }

    fn continue_online(&mut self, kind: DataKind) -> bool {
        self.ask(&format!(
            "A {} backup exists. Fetch live data anyway?",
            kind.to_string().to_lowercase()
        ))
    }

    fn overwrite_backup(&mut self, kind: DataKind) -> bool {
        self.ask(&format!(
            "Overwrite the {} backup with the live data?",
            kind.to_string().to_lowercase()
        ))
    }

    fn create_backup(&mut self, kind: DataKind) -> bool {
        self.ask(&format!(
            "No {} backup yet. Create one from the live data?",
            kind.to_string().to_lowercase()
        ))
    }
}

/// Answers every question the same way.
pub struct FixedPrompter(pub bool);

impl Prompter for FixedPrompter {
    fn create_backup_dir(&mut self) -> bool {
        self.0
    }

    fn continue_online(&mut self, _: DataKind) -> bool {
        self.0
    }

    fn overwrite_backup(&mut self, _: DataKind) -> bool {
        self.0
    }

    fn create_backup(&mut self, _: DataKind) -> bool {
        self.0
    }
}
