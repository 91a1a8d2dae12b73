//! Command parsing and execution for the CLI.

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Result};
use chrono::{Local, TimeZone};
use sessionward_core::api::{ApiError, NETWORK_ERROR_MESSAGE};
use sessionward_core::{Config, Durability, SessionLifecycle};
use tracing::warn;

pub const USAGE: &str = "\
Usage: sessionward <command>

Commands:
  login [--remember] [username]   Sign in (password is prompted)
  logout                          Sign out and revoke the refresh token
  status                          Show the signed-in user and token expiry
  whoami                          Fetch the current user from the server
  get <path>                      Authenticated GET, prints the JSON response
  shell                           Interactive session (keeps non-remembered logins)
  help                            Show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        remember: bool,
        username: Option<String>,
    },
    Logout,
    Status,
    Whoami,
    Get {
        path: String,
    },
    Shell,
    Help,
}

impl Command {
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut args = args.iter().map(AsRef::as_ref);
        let command = match args.next() {
            None | Some("help") | Some("--help") | Some("-h") => Command::Help,
            Some("login") => {
                let mut remember = false;
                let mut username = None;
                for arg in args.by_ref() {
                    match arg {
                        "--remember" | "-r" => remember = true,
                        flag if flag.starts_with('-') => bail!("Unknown option for login: {}", flag),
                        name if username.is_none() => username = Some(name.to_string()),
                        extra => bail!("Unexpected argument: {}", extra),
                    }
                }
                return Ok(Command::Login { remember, username });
            }
            Some("logout") => Command::Logout,
            Some("status") => Command::Status,
            Some("whoami") => Command::Whoami,
            Some("get") => {
                let path = args.next().ok_or_else(|| anyhow!("get requires a path"))?;
                Command::Get {
                    path: normalize_path(path),
                }
            }
            Some("shell") => Command::Shell,
            Some(other) => bail!("Unknown command: {}", other),
        };

        if let Some(extra) = args.next() {
            bail!("Unexpected argument: {}", extra);
        }
        Ok(command)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

pub struct App {
    config: Config,
    session: SessionLifecycle,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let session = SessionLifecycle::from_config(&config)?;
        Ok(Self { config, session })
    }

    pub fn session(&self) -> &SessionLifecycle {
        &self.session
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Shell => self.shell().await,
            other => self.execute(other).await,
        }
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Login { remember, username } => self.login(remember, username).await,
            Command::Logout => self.logout().await,
            Command::Status => {
                self.status();
                Ok(())
            }
            Command::Whoami => self.whoami().await,
            Command::Get { path } => self.get(&path).await,
            Command::Shell => bail!("Already in the shell"),
            Command::Help => {
                println!("{}", USAGE);
                Ok(())
            }
        }
    }

    async fn login(&mut self, remember: bool, username: Option<String>) -> Result<()> {
        let username = match username {
            Some(name) => name,
            None => self.prompt_username()?,
        };
        let password = rpassword::prompt_password("Password: ")?;

        if username.trim().is_empty() || password.is_empty() {
            bail!("Username and password required");
        }

        let durability = Durability::from_remember(remember);
        let claims = self
            .session
            .login(username.trim(), &password, durability)
            .await
            .map_err(describe)?;

        self.config.last_username = Some(username.trim().to_string());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        match claims {
            Some(claims) => println!("Signed in as {}", claims.subject),
            None => println!("Signed in"),
        }
        if !remember {
            println!("Credentials are kept for this process only; use `shell` to stay signed in.");
        }
        Ok(())
    }

    fn prompt_username(&self) -> Result<String> {
        match self.config.last_username {
            Some(ref last) => print!("Username [{}]: ", last),
            None => print!("Username: "),
        }
        io::stdout().flush()?;

        let mut username = String::new();
        io::stdin().read_line(&mut username)?;
        let username = username.trim();
        if username.is_empty() {
            Ok(self.config.last_username.clone().unwrap_or_default())
        } else {
            Ok(username.to_string())
        }
    }

    async fn logout(&self) -> Result<()> {
        match self.session.logout().await {
            Ok(outcome) => {
                println!("Signed out ({})", outcome.code);
                Ok(())
            }
            Err(e) => {
                println!("Signed out locally; the server could not be told ({})", e);
                Ok(())
            }
        }
    }

    fn status(&self) {
        let Some(claims) = self.session.claims() else {
            println!("Not signed in");
            return;
        };

        println!("User:     {}", claims.subject);
        println!("Role:     {}", claims.role_label());
        println!(
            "Stored:   {}",
            match self.session.store().current_durability() {
                Durability::Persistent => "persistent",
                Durability::Ephemeral => "this process only",
            }
        );
        let expiry = claims
            .expires_at_epoch_ms
            .and_then(|ms| Local.timestamp_millis_opt(ms).single())
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let state = if self.session.is_expired() {
            " (expired, will refresh on next request)"
        } else {
            ""
        };
        println!("Expires:  {}{}", expiry, state);
    }

    async fn whoami(&self) -> Result<()> {
        let user = self.session.client().current_user().await.map_err(describe)?;
        println!("{} <{}>", user.full_name(), user.email);
        println!("Username: {}", user.username);
        println!("Role:     {}", user.role_label());
        println!("Status:   {}", user.status_label());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<()> {
        let value: serde_json::Value = self.session.client().get(path).await.map_err(describe)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok(())
    }

    async fn shell(&mut self) -> Result<()> {
        println!("sessionward shell - type `help` for commands, `exit` to quit");
        let stdin = io::stdin();
        loop {
            print!("sessionward> ");
            io::stdout().flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let args: Vec<&str> = line.split_whitespace().collect();
            match args.first() {
                None => continue,
                Some(&"exit") | Some(&"quit") => break,
                Some(_) => {}
            }

            let result = match Command::parse(&args) {
                Ok(command) => self.execute(command).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                eprintln!("Error: {}", e);
            }
        }
        Ok(())
    }
}

/// User-facing wording for request failures.
fn describe(error: ApiError) -> anyhow::Error {
    match error {
        ApiError::Network { .. } => anyhow!(NETWORK_ERROR_MESSAGE),
        ApiError::AuthStop { .. } | ApiError::Unauthorized => {
            anyhow!("Not signed in or session expired - run `sessionward login`")
        }
        other => anyhow!(other),
    }
}
