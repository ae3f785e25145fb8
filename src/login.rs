//! Best-effort detection of an already authenticated console.

use crate::instruction::{Instruction, InstructionKind};
use crate::session::Expectation;
use std::time::Duration;

/// How the login state is probed and classified. Every keyword is matched
/// case-insensitively except `prompt_markers`, which are literal characters.
#[derive(Debug, Clone)]
pub struct LoginProbe {
    /// Lines sent one after another until the state is known.
    pub probe_lines: Vec<String>,
    /// How long to read after each probe line.
    pub settle: Duration,
    pub prompt_markers: Vec<String>,
    pub help_keywords: Vec<String>,
    /// Text that means the console is asking for credentials.
    pub login_markers: Vec<String>,
    /// `WAIT` arguments that make a playbook step part of its login block.
    pub login_wait_keywords: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for LoginProbe {
    fn default() -> Self {
        Self {
            probe_lines: strings(&["", "?"]),
            settle: Duration::from_millis(500),
            prompt_markers: strings(&["#", ">", "$", "(config)"]),
            help_keywords: strings(&["commands", "help", "available", "syntax"]),
            login_markers: strings(&["login:", "username:", "password:", "user name:"]),
            login_wait_keywords: strings(&["login:", "username:", "user:", "password:"]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    LoggedIn,
    LoginRequired,
    /// Nothing conclusive came back.
    Unknown,
}

fn contains_any_ci(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .any(|needle| !needle.is_empty() && haystack.contains(&needle.to_lowercase()))
}

impl LoginProbe {
    /// Classify the response to a probe line.
    pub fn assess(&self, response: &str, known_prompt: Option<&str>) -> LoginState {
        if contains_any_ci(response, &self.login_markers) {
            return LoginState::LoginRequired;
        }
        if let Some(prompt) = known_prompt.map(str::trim).filter(|p| !p.is_empty()) {
            if response.contains(prompt) {
                return LoginState::LoggedIn;
            }
        }
        if self
            .prompt_markers
            .iter()
            .any(|marker| !marker.is_empty() && response.contains(marker.as_str()))
        {
            return LoginState::LoggedIn;
        }
        if contains_any_ci(response, &self.help_keywords) {
            return LoginState::LoggedIn;
        }
        LoginState::Unknown
    }

    /// One past the last instruction of the playbook's leading login block.
    ///
    /// The block is a run of `SEND`/`WAIT`/`PAUSE`/comment lines that contains a wait
    /// for a login keyword and ends at the first `WAIT PROMPT` after it. Returns
    /// `None` when the playbook does not start with such a block.
    pub fn login_block_end(&self, instructions: &[Instruction]) -> Option<usize> {
        let mut saw_login_wait = false;
        for (index, instruction) in instructions.iter().enumerate() {
            match instruction.kind {
                InstructionKind::Send | InstructionKind::Pause | InstructionKind::Comment => {}
                InstructionKind::Wait => match instruction.expectation() {
                    Some(Expectation::Prompt) if saw_login_wait => return Some(index + 1),
                    Some(Expectation::Prompt) => return None,
                    Some(Expectation::Text(text)) => {
                        if contains_any_ci(&text, &self.login_wait_keywords) {
                            saw_login_wait = true;
                        }
                    }
                    None => {}
                },
                _ => return None,
            }
        }
        None
    }
}

/// Credentials for the built-in login exchange.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub username_prompt: String,
    pub password_prompt: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            username_prompt: "login:".to_string(),
            password_prompt: "assword:".to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("username_prompt", &self.username_prompt)
            .field("password_prompt", &self.password_prompt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    #[test]
    fn test_assess() {
        let probe = LoginProbe::default();
        assert_eq!(probe.assess("\nswitch login: ", None), LoginState::LoginRequired);
        assert_eq!(probe.assess("Password:", None), LoginState::LoginRequired);
        assert_eq!(probe.assess("\nswitch# ", None), LoginState::LoggedIn);
        assert_eq!(
            probe.assess("[admin]% ", Some("[admin]%")),
            LoginState::LoggedIn
        );
        assert_eq!(
            probe.assess("Available commands:\n  show", None),
            LoginState::LoggedIn
        );
        assert_eq!(probe.assess("", None), LoginState::Unknown);
        assert_eq!(probe.assess("garbage", None), LoginState::Unknown);
    }

    #[test]
    fn test_login_block_end() {
        let probe = LoginProbe::default();
        let playbook = parse_str(
            "# login\nWAIT \"login:\"\nSEND admin\nWAIT \"Password:\"\nSEND secret\nWAIT PROMPT\nSEND \"show version\"\nWAIT PROMPT\n",
        )
        .unwrap();
        assert_eq!(probe.login_block_end(playbook.instructions()), Some(6));
    }

    #[test]
    fn test_no_login_block() {
        let probe = LoginProbe::default();
        let playbook = parse_str("SEND \"show version\"\nWAIT PROMPT\n").unwrap();
        assert_eq!(probe.login_block_end(playbook.instructions()), None);

        let playbook = parse_str("WAIT \"login:\"\nIF_CONTAINS x\nENDIF\nWAIT PROMPT\n").unwrap();
        assert_eq!(probe.login_block_end(playbook.instructions()), None);

        let playbook = parse_str("WAIT \"login:\"\nSEND admin\n").unwrap();
        assert_eq!(probe.login_block_end(playbook.instructions()), None);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("admin", "hunter2");
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
