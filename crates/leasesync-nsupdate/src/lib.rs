// # nsupdate Update Applier
//
// This crate provides an UpdateApplier that sends transactions through the
// BIND `nsupdate` tool (RFC 2136 dynamic updates signed with TSIG).
//
// ## Script
//
// A transaction is rendered as one script and piped to `nsupdate` on stdin:
//
// ```text
// key hmac-sha512:rndc-key <secret>
// server 127.0.0.1
// update delete host1.example.com. A
// update add host1.example.com. 3600 A 10.0.0.2
// send
// update delete 2.0.0.10.in-addr.arpa. PTR
// update add 2.0.0.10.in-addr.arpa. 3600 PTR host1.example.com.
// send
// ```
//
// Every operation group ends with its own `send`, so each group is one
// update message and one commit on the server. `nsupdate` stops at the
// first rejected message and exits non-zero; groups sent before it stay
// committed.
//
// ## Security Requirements
//
// - The TSIG secret travels on stdin, never on the command line
// - The secret NEVER appears in logs or `Debug` output

use async_trait::async_trait;
use leasesync_core::config::{ApplierConfig, DEFAULT_NSUPDATE_PROGRAM};
use leasesync_core::traits::{ApplyReport, UpdateApplier};
use leasesync_core::transaction::Transaction;
use leasesync_core::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

const APPLIER_NAME: &str = "nsupdate";

/// Server used when none is configured
pub const LOCAL_SERVER: &str = "127.0.0.1";

/// nsupdate-backed update applier
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the applier will:
/// - Render the script and log it with the secret redacted
/// - NOT start `nsupdate`
/// - Report `dry_run: true` so the engine leaves the cache alone
#[derive(Clone)]
pub struct NsupdateApplier {
    program: PathBuf,
    algorithm: String,
    key_name: String,
    key_secret: String,
    server: Option<String>,
    dry_run: bool,
}

impl NsupdateApplier {
    /// Create an applier signing with `algorithm:key_name`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key name or secret is empty.
    pub fn new(
        algorithm: impl Into<String>,
        key_name: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let key_name = key_name.into();
        let key_secret = key_secret.into();

        if key_name.trim().is_empty() {
            return Err(Error::config("TSIG key name cannot be empty"));
        }
        if key_secret.trim().is_empty() {
            return Err(Error::config("TSIG key secret cannot be empty"));
        }

        Ok(Self {
            program: PathBuf::from(DEFAULT_NSUPDATE_PROGRAM),
            algorithm: algorithm.into(),
            key_name,
            key_secret,
            server: None,
            dry_run: false,
        })
    }

    /// Build from configuration
    pub fn from_config(config: &ApplierConfig) -> Result<Self> {
        config.validate()?;

        let applier = Self::new(&config.algorithm, &config.key_name, &config.key_secret)?
            .with_program(&config.program)
            .with_dry_run(config.dry_run);

        Ok(match &config.server {
            Some(server) => applier.with_server(server),
            None => applier,
        })
    }

    /// Send updates to `server` instead of the local resolver
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Run `program` instead of `nsupdate` from `PATH`
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Render the nsupdate script for a transaction
    ///
    /// With `redact` set the key line carries a placeholder instead of the
    /// secret, for logging.
    pub fn render_script(&self, transaction: &Transaction, redact: bool) -> String {
        let secret = if redact { "<redacted>" } else { self.key_secret.as_str() };
        let server = self.server.as_deref().unwrap_or(LOCAL_SERVER);

        let mut script = format!(
            "key {}:{} {}\nserver {}\n",
            self.algorithm, self.key_name, secret, server
        );
        for group in transaction.groups() {
            for op in &group.ops {
                script.push_str("update ");
                script.push_str(&op.to_string());
                script.push('\n');
            }
            script.push_str("send\n");
        }
        script
    }

    async fn run(&self, script: String) -> Result<()> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::apply(
                    APPLIER_NAME,
                    None,
                    format!("Failed to start {}: {}", self.program.display(), e),
                )
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            Error::apply(APPLIER_NAME, None, "stdin pipe not available")
        })?;

        let feed = async move {
            let result = stdin.write_all(script.as_bytes()).await;
            drop(stdin);
            result
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| {
            Error::apply(
                APPLIER_NAME,
                None,
                format!("Failed to wait for {}: {}", self.program.display(), e),
            )
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("nsupdate output: {}", stdout.trim());
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("{} exited with {}", self.program.display(), output.status),
                detail => detail.to_string(),
            };
            return Err(Error::apply(APPLIER_NAME, output.status.code(), message));
        }

        // The program may legitimately exit before reading all of stdin
        if let Err(e) = fed {
            warn!("nsupdate closed stdin early: {}", e);
        }

        Ok(())
    }
}

impl fmt::Debug for NsupdateApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NsupdateApplier")
            .field("program", &self.program)
            .field("algorithm", &self.algorithm)
            .field("key_name", &self.key_name)
            .field("key_secret", &"<redacted>")
            .field("server", &self.server)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

#[async_trait]
impl UpdateApplier for NsupdateApplier {
    async fn apply(&self, transaction: &Transaction) -> Result<ApplyReport> {
        if self.dry_run {
            info!(
                "[DRY-RUN] Would send {} update groups:\n{}",
                transaction.len(),
                self.render_script(transaction, true)
            );
            return Ok(ApplyReport::dry_run());
        }

        debug!(
            "nsupdate script:\n{}",
            self.render_script(transaction, true)
        );
        self.run(self.render_script(transaction, false)).await?;

        info!("DNS records updated ({} groups)", transaction.len());
        Ok(ApplyReport::committed(transaction.len()))
    }

    fn applier_name(&self) -> &'static str {
        APPLIER_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasesync_core::Binding;
    use leasesync_core::reconcile::{Change, UpdatedBinding};
    use leasesync_core::transaction::TransactionBuilder;
    use std::net::Ipv4Addr;

    const SECRET: &str = "c3VwZXItc2VjcmV0";

    fn applier() -> NsupdateApplier {
        NsupdateApplier::new("hmac-sha512", "rndc-key", SECRET).unwrap()
    }

    fn updated_transaction() -> Transaction {
        let updated = UpdatedBinding {
            binding: Binding::new("example.com", "host1", Ipv4Addr::new(10, 0, 0, 2)),
            previous: Ipv4Addr::new(10, 0, 0, 1),
        };
        TransactionBuilder::default().build(&[Change::Updated(&updated)])
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(NsupdateApplier::new("hmac-sha512", "rndc-key", "").is_err());
        assert!(NsupdateApplier::new("hmac-sha512", " ", SECRET).is_err());
    }

    #[test]
    fn test_render_script() {
        let script = applier()
            .with_server("192.0.2.53")
            .render_script(&updated_transaction(), false);

        assert_eq!(
            script,
            "key hmac-sha512:rndc-key c3VwZXItc2VjcmV0\n\
             server 192.0.2.53\n\
             update delete host1.example.com. A\n\
             update add host1.example.com. 3600 A 10.0.0.2\n\
             send\n\
             update delete 1.0.0.10.in-addr.arpa. PTR host1.example.com.\n\
             send\n\
             update delete 2.0.0.10.in-addr.arpa. PTR\n\
             update add 2.0.0.10.in-addr.arpa. 3600 PTR host1.example.com.\n\
             send\n"
        );
    }

    #[test]
    fn test_local_server_by_default() {
        let script = applier().render_script(&Transaction::default(), false);
        assert!(script.contains("server 127.0.0.1\n"));
    }

    #[test]
    fn test_secret_never_leaks() {
        let applier = applier();
        assert!(!format!("{:?}", applier).contains(SECRET));
        assert!(!applier.render_script(&updated_transaction(), true).contains(SECRET));
    }

    #[test]
    fn test_from_config() {
        let mut config = ApplierConfig::new(SECRET);
        config.server = Some("ns1.example.com".to_string());
        config.dry_run = true;

        let applier = NsupdateApplier::from_config(&config).unwrap();
        assert!(applier.is_dry_run());
        assert!(applier
            .render_script(&Transaction::default(), true)
            .contains("server ns1.example.com"));

        config.key_secret = String::new();
        assert!(NsupdateApplier::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_starts_nothing() {
        let applier = applier()
            .with_program("/nonexistent/nsupdate")
            .with_dry_run(true);

        let report = tokio_test::assert_ok!(applier.apply(&updated_transaction()).await);
        assert!(report.dry_run);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_program() {
        let applier = applier().with_program("cat");

        let report = applier.apply(&updated_transaction()).await.unwrap();
        assert_eq!(report, ApplyReport::committed(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_reports_status() {
        let applier = applier().with_program("false");

        let err = tokio_test::assert_err!(applier.apply(&updated_transaction()).await);
        assert!(matches!(err, Error::Apply { status: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_apply_error() {
        let applier = applier().with_program("/nonexistent/nsupdate");

        let err = applier.apply(&updated_transaction()).await.unwrap_err();
        assert!(matches!(err, Error::Apply { status: None, .. }));
        assert!(err.is_retryable());
    }
}
