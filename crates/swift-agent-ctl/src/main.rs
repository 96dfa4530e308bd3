//! swift-agent - Command-line front end for the swift-agent credential cache.
//!
//! This utility allows you to:
//! - Start and stop a background agent for the current shell
//! - Print Swift credentials as shell `export` lines
//! - Show a cluster's capabilities
//! - Talk to the agent directly (`purge`, `reload`, `unlock`)
//!
//! # Usage
//!
//! ```bash
//! # Start an agent for this shell
//! eval "$(swift-agent start)"
//!
//! # Export credentials for the default auth
//! eval "$(swift-agent auth)"
//!
//! # Capabilities of the cluster behind an auth
//! swift-agent info --auth prod
//!
//! # Stop the agent
//! eval "$(swift-agent stop)"
//! ```

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use swift_agent_core::auth::agent::{AgentAuth, AgentOptions};
use swift_agent_core::client::{agent_socket, get_auth_with_unlock, is_socket, PID_ENV_VAR, SOCKET_ENV_VAR};
use swift_agent_core::cluster::{head_account, stamp};
use swift_agent_core::export::format_exports;
use swift_agent_core::{
    AgentClient, AgentError, Authenticator, CapabilityDocument, CapabilityFetcher, Config,
    Credentials, HttpCapabilityFetcher, PasswordPrompt, TerminalPrompt,
};
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DAEMON_BINARY: &str = "swift-agentd";
const LOG_FILE: &str = ".swift-agent.log";

/// Control utility for the swift-agent credential cache.
#[derive(Parser)]
#[command(name = "swift-agent")]
#[command(about = "Cache Swift credentials for the current shell")]
#[command(version)]
struct Cli {
    /// Path to config file [default: layered search]
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log debugging information to stderr (-vv for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an agent in the background and print its environment
    Start {
        /// Log agent output to ~/.swift-agent.log
        #[arg(long)]
        debug: bool,
    },

    /// Stop the agent named by the environment
    Stop,

    /// Print a storage URL and token as export lines
    Auth {
        /// The auth to use [default: default_auth]
        name: Option<String>,

        /// Check the token against the cluster when it came from the agent
        #[arg(long, overrides_with = "no_verify")]
        verify: bool,

        /// Skip token verification
        #[arg(long, overrides_with = "verify")]
        no_verify: bool,
    },

    /// Show the capabilities of a Swift cluster
    Info {
        /// URL of the cluster
        #[arg(conflicts_with = "auth")]
        url: Option<String>,

        /// Use the storage URL of this auth instead
        #[arg(long, value_name = "NAME")]
        auth: Option<String>,

        /// Bypass the agent's cached copy
        #[arg(long)]
        refresh: bool,
    },

    /// List configured auths
    #[command(alias = "ls")]
    List,

    /// Forget everything the agent cached for an auth or cluster URL
    Purge { target: String },

    /// Make the agent re-read its configuration
    Reload,

    /// Hand the agent a password for an auth
    Unlock { name: String },
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    config.context("Failed to load configuration")
}

fn auth_name(config: &Config, name: Option<String>) -> Result<String> {
    match name.or_else(|| config.default_auth().map(str::to_string)) {
        Some(name) => Ok(name),
        None => bail!("No auth endpoint specified, and no default defined"),
    }
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// The agent socket from the environment, or an error naming the variable.
fn require_agent() -> Result<PathBuf> {
    match agent_socket() {
        Some(path) => Ok(path),
        None => bail!("No swift-agent running ({SOCKET_ENV_VAR} is unset or not a socket)"),
    }
}

/// `swift-agentd` next to this executable, else whatever `PATH` finds.
fn daemon_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BINARY)))
        .filter(|path| path.is_file())
        .unwrap_or_else(|| PathBuf::from(DAEMON_BINARY))
}

fn print_exports(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

fn credential_exports(creds: &Credentials) -> Vec<String> {
    format_exports([
        ("OS_STORAGE_URL", Some(creds.storage_url.clone())),
        ("OS_AUTH_TOKEN", Some(creds.token.clone())),
        (
            "OS_AUTH_TOKEN_EXPIRES",
            creds.expires_unix().map(|e| e.to_string()),
        ),
    ])
}

fn format_auth_list(auths: &BTreeMap<&str, Option<&str>>) -> Vec<String> {
    auths
        .iter()
        .map(|(name, url)| format!("{:<20} {}", name, url.unwrap_or("(no auth)")))
        .collect()
}

/// Stop the agent and remove the socket named by the environment.
///
/// Anything already gone is ignored.
fn cleanup() -> Result<()> {
    if let Ok(pid) = std::env::var(PID_ENV_VAR) {
        let pid: libc::pid_t = pid
            .trim()
            .parse()
            .with_context(|| format!("Invalid {PID_ENV_VAR}: {pid}"))?;
        // SAFETY: kill has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGINT) } != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err).with_context(|| format!("Failed to stop agent {pid}"));
            }
        }
        debug!(pid, "Signalled agent");
    }

    if let Ok(socket) = std::env::var(SOCKET_ENV_VAR) {
        let socket = PathBuf::from(socket);
        tolerate_missing(std::fs::remove_file(&socket))
            .with_context(|| format!("Failed to remove {}", socket.display()))?;
        if let Some(dir) = socket.parent() {
            tolerate_missing(std::fs::remove_dir(dir))
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
    }
    Ok(())
}

fn tolerate_missing(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Handle the start command.
fn cmd_start(debug: bool) -> Result<ExitCode> {
    cleanup()?;

    let dir = tempfile::Builder::new()
        .prefix("swift-agent-")
        .tempdir()
        .context("Failed to create socket directory")?
        .keep();
    let socket = dir.join("socket");

    let (stdout, stderr) = if debug {
        let home = dirs::home_dir().context("Cannot find home directory")?;
        let log = OpenOptions::new()
            .append(true)
            .create(true)
            .mode(0o600)
            .open(home.join(LOG_FILE))
            .context("Failed to open agent log")?;
        let log_err = log.try_clone().context("Failed to open agent log")?;
        (Stdio::from(log), Stdio::from(log_err))
    } else {
        (Stdio::null(), Stdio::null())
    };

    let mut command = Command::new(daemon_binary());
    command.arg("--socket").arg(&socket);
    if debug {
        command.arg("--verbose");
    }
    let mut child = command
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .spawn()
        .with_context(|| format!("Failed to start {DAEMON_BINARY}"))?;

    // Wait for the socket so the next command can use it.
    for _ in 0..40 {
        if is_socket(&socket) {
            break;
        }
        if let Some(status) = child.try_wait()? {
            bail!("{DAEMON_BINARY} exited early ({status})");
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    print_exports(format_exports([
        (SOCKET_ENV_VAR, Some(socket.display().to_string())),
        (PID_ENV_VAR, Some(child.id().to_string())),
    ]));
    Ok(ExitCode::SUCCESS)
}

/// Handle the stop command.
fn cmd_stop() -> Result<ExitCode> {
    cleanup()?;
    print_exports(format_exports([
        (SOCKET_ENV_VAR, None::<String>),
        (PID_ENV_VAR, None),
    ]));
    Ok(ExitCode::SUCCESS)
}

/// Build an authenticator without the agent, prompting when a password is
/// needed and someone is there to type it.
fn local_authenticator(
    config: &Config,
    name: &str,
    prompt: &dyn PasswordPrompt,
) -> Result<Authenticator, AgentError> {
    match config.resolve(name, None) {
        Err(err) if err.is_password_required() && prompt.is_interactive() => {
            let password = prompt.prompt(name)?;
            config.resolve(name, Some(&password))
        }
        other => other,
    }
}

/// Credentials for `name` through the agent when one is running.
fn fetch_credentials(
    rt: &Runtime,
    config: &Config,
    name: &str,
    socket: Option<&Path>,
) -> Result<Authenticator> {
    let mut authenticator = match socket {
        Some(socket) => Authenticator::new(Box::new(AgentAuth::with_socket(
            name,
            AgentOptions::default(),
            socket.to_path_buf(),
            Arc::new(TerminalPrompt),
        ))),
        None => local_authenticator(config, name, &TerminalPrompt)?,
    };
    rt.block_on(authenticator.get_credentials(false))?;
    Ok(authenticator)
}

/// Handle the auth command.
fn cmd_auth(config: &Config, name: Option<String>, verify: Option<bool>) -> Result<ExitCode> {
    let name = auth_name(config, name)?;
    let rt = runtime()?;
    let socket = agent_socket();

    let authenticator = fetch_credentials(&rt, config, &name, socket.as_deref())?;
    let mut creds = authenticator
        .current()
        .cloned()
        .context("Authenticator returned no credentials")?;

    let verify = verify.unwrap_or_else(|| config.default_verify(&name));
    if let (true, Some(socket)) = (verify, &socket) {
        let insecure = config.is_insecure(&creds.storage_url);
        let checked = rt.block_on(head_account(&creds, config.agent.request_timeout(), insecure));
        match checked {
            Err(err) if err.is_unauthorized() && !authenticator.ever_prompted() => {
                debug!(auth_id = %name, "Token rejected, asking for a new password");
                let password = TerminalPrompt.prompt(&name)?;
                let mut client = AgentClient::connect(socket)?;
                client.unlock(&name, &password)?;
                creds = client.auth(&name)?;
            }
            other => other?,
        }
    }

    print_exports(credential_exports(&creds));
    Ok(ExitCode::SUCCESS)
}

/// Handle the info command.
fn cmd_info(
    config: &Config,
    url: Option<String>,
    auth: Option<String>,
    refresh: bool,
) -> Result<ExitCode> {
    let rt = runtime()?;
    let socket = agent_socket();

    let url = match url {
        Some(url) => url,
        None => {
            let name = auth_name(config, auth)?;
            match &socket {
                Some(socket) => get_auth_with_unlock(socket, &name, false, &TerminalPrompt)?
                    .1
                    .storage_url,
                None => {
                    let mut authenticator = local_authenticator(config, &name, &TerminalPrompt)?;
                    rt.block_on(authenticator.get_credentials(false))?.storage_url
                }
            }
        }
    };

    let doc = match &socket {
        Some(socket) => {
            let mut client = AgentClient::connect(socket)?;
            if refresh {
                client.reinfo(&url)?
            } else {
                client.info(&url)?
            }
        }
        None => {
            let fetcher = HttpCapabilityFetcher::from_config(config)?;
            let mut doc = rt.block_on(fetcher.fetch(&url))?;
            stamp(&mut doc, std::time::SystemTime::now());
            doc
        }
    };

    println!("{}", render_document(&doc)?);
    Ok(ExitCode::SUCCESS)
}

/// Pretty JSON with sorted keys.
fn render_document(doc: &CapabilityDocument) -> Result<String> {
    serde_json::to_string_pretty(doc).context("Failed to render capabilities")
}

/// Handle the list command.
fn cmd_list(config: &Config) -> Result<ExitCode> {
    for line in format_auth_list(&config.available_auths()) {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_purge(target: &str) -> Result<ExitCode> {
    let mut client = AgentClient::connect(&require_agent()?)?;
    client.purge(target)?;
    println!("Purged {target}.");
    Ok(ExitCode::SUCCESS)
}

fn cmd_reload() -> Result<ExitCode> {
    let mut client = AgentClient::connect(&require_agent()?)?;
    client.reload()?;
    println!("Configuration reloaded.");
    Ok(ExitCode::SUCCESS)
}

fn cmd_unlock(name: &str) -> Result<ExitCode> {
    let socket = require_agent()?;
    let password = TerminalPrompt.prompt(name)?;
    let mut client = AgentClient::connect(&socket)?;
    client.unlock(name, &password)?;
    println!("Unlocked {name}.");
    Ok(ExitCode::SUCCESS)
}

/// `--verify`, `--no-verify`, or neither.
fn verify_flag(verify: bool, no_verify: bool) -> Option<bool> {
    match (verify, no_verify) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Start { debug } => cmd_start(debug),
        Commands::Stop => cmd_stop(),
        Commands::Auth {
            name,
            verify,
            no_verify,
        } => cmd_auth(&load_config(config_path)?, name, verify_flag(verify, no_verify)),
        Commands::Info { url, auth, refresh } => {
            cmd_info(&load_config(config_path)?, url, auth, refresh)
        }
        Commands::List => cmd_list(&load_config(config_path)?),
        Commands::Purge { target } => cmd_purge(&target),
        Commands::Reload => cmd_reload(),
        Commands::Unlock { name } => cmd_unlock(&name),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verify_flags_are_tri_state() {
        let parse = |args: &[&str]| match Cli::try_parse_from(args).unwrap().command {
            Commands::Auth {
                verify, no_verify, ..
            } => verify_flag(verify, no_verify),
            _ => panic!("not auth"),
        };
        assert_eq!(parse(&["swift-agent", "auth"]), None);
        assert_eq!(parse(&["swift-agent", "auth", "--verify"]), Some(true));
        assert_eq!(parse(&["swift-agent", "auth", "prod", "--no-verify"]), Some(false));
        assert_eq!(
            parse(&["swift-agent", "auth", "--verify", "--no-verify"]),
            Some(false)
        );
    }

    #[test]
    fn info_url_conflicts_with_auth() {
        assert!(Cli::try_parse_from(["swift-agent", "info", "https://c", "--auth", "prod"]).is_err());
        assert!(Cli::try_parse_from(["swift-agent", "info", "--auth", "prod", "--refresh"]).is_ok());
    }

    #[test]
    fn credentials_export_lines() {
        let creds = Credentials::new("https://cluster.example/v1/AUTH_x", "tok123", None);
        assert_eq!(
            credential_exports(&creds),
            vec![
                "export OS_AUTH_TOKEN=tok123",
                "unset OS_AUTH_TOKEN_EXPIRES",
                "export OS_STORAGE_URL=https://cluster.example/v1/AUTH_x",
            ]
        );
    }

    #[test]
    fn credentials_with_expiry() {
        let creds =
            Credentials::from_unix("https://c/v1/AUTH_x", "", Some(1_700_000_000.5)).unwrap();
        let lines = credential_exports(&creds);
        assert!(lines.contains(&"export OS_AUTH_TOKEN_EXPIRES=1700000000.5".to_string()));
        assert!(lines.contains(&"unset OS_AUTH_TOKEN".to_string()));
    }

    #[test]
    fn auth_list_marks_missing_urls() {
        let mut auths = BTreeMap::new();
        auths.insert("prod", Some("https://keystone.example/v3/auth/tokens"));
        auths.insert("saio", None);
        assert_eq!(
            format_auth_list(&auths),
            vec![
                "prod                 https://keystone.example/v3/auth/tokens",
                "saio                 (no auth)",
            ]
        );
    }

    #[test]
    fn auth_name_falls_back_to_default() {
        let config = Config::from_toml_str(
            r#"
            [auth.only]
            use = "noauth"
            storage_url = "http://saio:8080/v1/AUTH_test"
            "#,
        )
        .unwrap();
        assert_eq!(auth_name(&config, None).unwrap(), "only");
        assert_eq!(auth_name(&config, Some("other".into())).unwrap(), "other");
        assert!(auth_name(&Config::default(), None).is_err());
    }

    #[test]
    fn missing_files_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        assert!(tolerate_missing(std::fs::remove_file(dir.path().join("nope"))).is_ok());
        assert!(tolerate_missing(std::fs::remove_dir(dir.path())).is_ok());
    }

    #[test]
    fn daemon_binary_is_named() {
        assert!(daemon_binary().ends_with(DAEMON_BINARY));
    }
}
