//! Runs the `sync` command: builds contexts and the transport, then reports

use crate::cli::args::{Cli, Command, SyncArgs};
use crate::error::{Result, SyncError};
use crate::image::Platform;
use crate::logging::Logger;
use crate::sync::{SyncDriver, SyncOptions, SyncReport};
use crate::transport::{DefaultTransport, ImageTransport, PolicyContext};
use std::sync::Arc;
use std::time::Duration;

/// Platform of the running host, named the way image configs name it
fn host_platform() -> Platform {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    Platform::new(arch, std::env::consts::OS)
}

pub struct Runner {
    cli: Cli,
    output: Logger,
}

impl Runner {
    pub fn new(cli: Cli) -> Self {
        let output = if cli.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(cli.verbose)
        };
        Self { cli, output }
    }

    pub async fn run(&self) -> Result<SyncReport> {
        match &self.cli.command {
            Command::Sync(args) => self.sync(args).await,
        }
    }

    fn platform(&self) -> Platform {
        let host = host_platform();
        Platform::new(
            self.cli.override_arch.as_deref().unwrap_or(&host.architecture),
            self.cli.override_os.as_deref().unwrap_or(&host.os),
        )
    }

    fn options(&self, args: &SyncArgs) -> Result<SyncOptions> {
        Ok(SyncOptions {
            source_yaml: args.source_yaml,
            remove_signatures: args.remove_signatures,
            sign_by: args.sign_by.clone(),
            source_ctx: args.source_context()?,
            destination_ctx: args.destination_context()?,
            override_arch: self.cli.override_arch.clone(),
            timeout: self.cli.command_timeout.map(Duration::from_secs),
            workers: args.workers,
            report: self.cli.verbose,
            ..SyncOptions::default()
        })
    }

    async fn sync(&self, args: &SyncArgs) -> Result<SyncReport> {
        self.output.section("Registry Sync");
        args.validate()?;

        let options = self.options(args)?;
        let policy = PolicyContext::load(self.cli.policy.as_deref(), self.cli.insecure_policy)?;
        let transport: Arc<dyn ImageTransport> = Arc::new(DefaultTransport::new(self.platform()));
        let driver = SyncDriver::new(transport, policy);

        if let [source, destination] = args.locations.as_slice() {
            self.output.info(&format!("Syncing {} to {}", source, destination));
        }
        self.output.verbose(&format!(
            "Using up to {} workers",
            options.worker_count()
        ));
        if let Some(arch) = &options.override_arch {
            self.output.detail(&format!("Only images for architecture {}", arch));
        }
        if let Some(timeout) = options.timeout {
            self.output.detail(&format!(
                "Command timeout {}",
                self.output.format_duration(timeout)
            ));
        }

        let report = driver.run(&args.locations, &options).await?;
        self.print_report(&report);

        if report.failed > 0 {
            return Err(SyncError::Incomplete {
                failed: report.failed,
                total: report.images,
            });
        }
        Ok(report)
    }

    fn print_report(&self, report: &SyncReport) {
        for failure in &report.failures {
            self.output.error(failure);
        }

        self.output.summary(
            "Sync Summary",
            &[
                ("Sources", report.sources.to_string()),
                ("Images", report.images.to_string()),
                ("Copied", report.copied.to_string()),
                ("Skipped", report.skipped.to_string()),
                ("Failed", report.failed.to_string()),
                ("Duration", self.output.format_duration(self.output.elapsed())),
            ],
        );

        if report.failed == 0 {
            self.output.success(&format!(
                "Synced {} images from {} sources",
                report.images, report.sources
            ));
        } else {
            self.output.warning(&format!(
                "{} of {} images could not be synced",
                report.failed, report.images
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_platform_defaults_to_host() {
        let host = host_platform();
        assert!(!host.architecture.is_empty());
        assert_ne!(host.architecture, "x86_64");
        assert_ne!(host.architecture, "aarch64");
        assert_eq!(host.os, std::env::consts::OS);

        let runner = Runner::new(Cli::try_parse_from(["registry-sync", "sync", "a", "b"]).unwrap());
        assert_eq!(runner.platform(), host);
    }

    #[test]
    fn test_platform_overrides() {
        let cli = Cli::try_parse_from([
            "registry-sync",
            "--override-arch",
            "s390x",
            "--override-os",
            "windows",
            "sync",
            "a",
            "b",
        ])
        .unwrap();
        assert_eq!(Runner::new(cli).platform(), Platform::new("s390x", "windows"));
    }
}
