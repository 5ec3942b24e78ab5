//! Command-line argument parsing

use crate::config::{Credentials, SystemContext};
use crate::error::{Result, SyncError};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "registry-sync")]
#[command(about = "Synchronize images between container registries and local directories")]
#[command(version)]
pub struct Cli {
    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Signature policy file
    #[arg(long, global = true)]
    pub policy: Option<PathBuf>,

    /// Run without any signature policy check
    #[arg(long = "insecure-policy", global = true)]
    pub insecure_policy: bool,

    /// Timeout for the whole command, in seconds
    #[arg(long = "command-timeout", global = true)]
    pub command_timeout: Option<u64>,

    /// Use ARCH instead of the host architecture for image selection
    #[arg(long = "override-arch", global = true)]
    pub override_arch: Option<String>,

    /// Use OS instead of the host OS for image selection
    #[arg(long = "override-os", global = true)]
    pub override_os: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy all tags of SOURCE to DESTINATION
    ///
    /// SOURCE is `docker://REGISTRY/REPO[:TAG]`, `dir:PATH` or, with
    /// --source-yaml, a YAML source list. DESTINATION is
    /// `docker://REGISTRY[/PATH]` or `dir:PATH`.
    Sync(SyncArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SyncArgs {
    /// SOURCE and DESTINATION
    #[arg(value_name = "SOURCE DESTINATION", num_args = 0..)]
    pub locations: Vec<String>,

    /// Do not copy signatures from SOURCE images
    #[arg(long = "remove-signatures")]
    pub remove_signatures: bool,

    /// Sign the image using a GPG key with the specified FINGERPRINT
    #[arg(long = "sign-by", value_name = "FINGERPRINT")]
    pub sign_by: Option<String>,

    /// Interpret SOURCE as a YAML file with a list of images from different registries
    #[arg(long = "source-yaml")]
    pub source_yaml: bool,

    /// Credentials (USERNAME[:PASSWORD]) for accessing the source registry
    #[arg(long = "src-creds", value_name = "USERNAME[:PASSWORD]")]
    pub src_creds: Option<String>,

    /// Credentials (USERNAME[:PASSWORD]) for accessing the destination registry
    #[arg(long = "dest-creds", value_name = "USERNAME[:PASSWORD]")]
    pub dest_creds: Option<String>,

    /// Require HTTPS and verify certificates when talking to the source registry
    #[arg(long = "src-tls-verify", default_value_t = true, action = clap::ArgAction::Set)]
    pub src_tls_verify: bool,

    /// Require HTTPS and verify certificates when talking to the destination registry
    #[arg(long = "dest-tls-verify", default_value_t = true, action = clap::ArgAction::Set)]
    pub dest_tls_verify: bool,

    /// Directory with certificates (*.crt) for the source registry
    #[arg(long = "src-cert-dir", value_name = "PATH")]
    pub src_cert_dir: Option<PathBuf>,

    /// Directory with certificates (*.crt) for the destination registry
    #[arg(long = "dest-cert-dir", value_name = "PATH")]
    pub dest_cert_dir: Option<PathBuf>,

    /// Number of images synced at once, at most min(CPU count, 6)
    #[arg(long, short = 'j')]
    pub workers: Option<usize>,
}

impl SyncArgs {
    /// Fill unset credentials from the environment
    pub fn from_env(mut self) -> Self {
        if self.src_creds.is_none() {
            self.src_creds = std::env::var("REGISTRY_SYNC_SRC_CREDS").ok();
        }
        if self.dest_creds.is_none() {
            self.dest_creds = std::env::var("REGISTRY_SYNC_DEST_CREDS").ok();
        }
        self
    }

    pub fn source_context(&self) -> Result<SystemContext> {
        context(
            self.src_creds.as_deref(),
            self.src_tls_verify,
            self.src_cert_dir.clone(),
        )
    }

    pub fn destination_context(&self) -> Result<SystemContext> {
        context(
            self.dest_creds.as_deref(),
            self.dest_tls_verify,
            self.dest_cert_dir.clone(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(SyncError::Usage("--workers must be greater than 0".to_string()));
        }
        if self.sign_by.as_deref().is_some_and(str::is_empty) {
            return Err(SyncError::Usage("--sign-by needs a key fingerprint".to_string()));
        }
        Ok(())
    }
}

impl Cli {
    /// Fill the command timeout from the environment when not given
    pub fn from_env(mut self) -> Result<Self> {
        if self.command_timeout.is_none() {
            if let Ok(timeout) = std::env::var("REGISTRY_SYNC_TIMEOUT") {
                self.command_timeout = Some(parse_timeout(&timeout)?);
            }
        }
        self.command = match self.command {
            Command::Sync(args) => Command::Sync(args.from_env()),
        };
        Ok(self)
    }
}

fn parse_timeout(value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        SyncError::Usage(format!(
            "REGISTRY_SYNC_TIMEOUT must be a number of seconds, got '{}'",
            value
        ))
    })
}

fn context(
    creds: Option<&str>,
    tls_verify: bool,
    cert_dir: Option<PathBuf>,
) -> Result<SystemContext> {
    let credentials = creds.map(Credentials::parse).transpose()?;
    Ok(SystemContext::default()
        .with_credentials(credentials)
        .with_tls_verify(tls_verify)
        .with_cert_dir(cert_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_sync_flags() {
        let cli = parse(&[
            "registry-sync",
            "--override-arch",
            "arm64",
            "sync",
            "--src-tls-verify=false",
            "--dest-creds",
            "mirror:s3cret",
            "--source-yaml",
            "sources.yaml",
            "dir:/mirror",
        ]);
        assert_eq!(cli.override_arch.as_deref(), Some("arm64"));

        let Command::Sync(args) = cli.command;
        assert_eq!(args.locations, vec!["sources.yaml", "dir:/mirror"]);
        assert!(args.source_yaml);
        assert!(!args.source_context().unwrap().tls_verify);

        let destination = args.destination_context().unwrap();
        assert!(destination.tls_verify);
        assert_eq!(destination.credentials, Some(Credentials::new("mirror", "s3cret")));
    }

    #[test]
    fn test_argument_count_is_left_to_the_driver() {
        let cli = parse(&["registry-sync", "sync", "docker://quay.io/app"]);
        let Command::Sync(args) = cli.command;
        assert_eq!(args.locations.len(), 1);
    }

    #[test]
    fn test_validate() {
        let cli = parse(&["registry-sync", "sync", "--workers", "0", "a", "b"]);
        let Command::Sync(args) = cli.command;
        assert!(matches!(args.validate(), Err(SyncError::Usage(_))));
    }

    #[test]
    fn test_bad_credentials() {
        let cli = parse(&["registry-sync", "sync", "--src-creds", ":nouser", "a", "b"]);
        let Command::Sync(args) = cli.command;
        assert!(args.source_context().is_err());
    }

    #[test]
    fn test_env_timeout_must_be_numeric() {
        assert_eq!(parse_timeout("90").unwrap(), 90);
        assert_eq!(parse_timeout(" 15\n").unwrap(), 15);
        assert!(matches!(parse_timeout("10m"), Err(SyncError::Usage(_))));
        assert!(matches!(parse_timeout(""), Err(SyncError::Usage(_))));
    }
}
