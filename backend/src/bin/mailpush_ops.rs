//! Operator commands over the same wiring as the server.
//!
//! ```text
//! mailpush-ops renew-watches --horizon-hours 24
//! mailpush-ops rebase-cursor --account acct-1
//! mailpush-ops register --account acct-1 --user user-1 --mailbox someone@example.com
//! mailpush-ops deregister --account acct-1
//! ```
//!
//! Connection settings come from the same `MAILPUSH_*` environment and
//! config file as the server.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, eyre};
use ortho_config::OrthoConfig;
use mailpush::bootstrap::{Pipeline, PipelineSettings, connect_adapters};
use mailpush::domain::ports::NoOpSyncMetrics;
use mailpush::domain::{AccountId, AccountWatchService, MailboxAddress, UserId};
use mailpush::settings::AppSettings;
use tokio::runtime::Builder;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

/// `mailpush-ops` command arguments.
#[derive(Debug, Parser)]
#[command(
    name = "mailpush-ops",
    about = "Maintain provider push watches and sync cursors",
    version
)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Renew every watch expiring within the horizon.
    RenewWatches {
        #[arg(long = "horizon-hours", value_name = "hours", default_value_t = 24)]
        horizon_hours: u64,
    },
    /// Move an account's watermark to the provider's current cursor and
    /// tell its user to reload.
    RebaseCursor {
        #[arg(long, value_name = "id", value_parser = parse_account)]
        account: AccountId,
    },
    /// Register push delivery for an account.
    Register {
        #[arg(long, value_name = "id", value_parser = parse_account)]
        account: AccountId,
        #[arg(long, value_name = "id", value_parser = parse_user)]
        user: UserId,
        #[arg(long, value_name = "address", value_parser = parse_mailbox)]
        mailbox: MailboxAddress,
    },
    /// Stop push delivery for an account and forget its watch.
    Deregister {
        #[arg(long, value_name = "id", value_parser = parse_account)]
        account: AccountId,
    },
}

fn parse_account(raw: &str) -> Result<AccountId, String> {
    AccountId::new(raw).map_err(|error| error.to_string())
}

fn parse_user(raw: &str) -> Result<UserId, String> {
    UserId::new(raw).map_err(|error| error.to_string())
}

fn parse_mailbox(raw: &str) -> Result<MailboxAddress, String> {
    MailboxAddress::new(raw).map_err(|error| error.to_string())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    // Logs go to stderr so command output on stdout stays parseable.
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let args = CliArgs::parse();
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("create Tokio runtime")?;
    runtime.block_on(run(args.command))
}

async fn watch_service() -> Result<Arc<AccountWatchService>> {
    let settings = AppSettings::load_from_iter([OsString::from("mailpush-ops")])
        .map_err(|error| eyre!("failed to load configuration: {error}"))?;
    let config = settings.validate().wrap_err("invalid configuration")?;
    let adapters = connect_adapters(&config, Arc::new(NoOpSyncMetrics))
        .await
        .wrap_err("connect adapters")?;
    let pipeline = Pipeline::assemble(adapters, &PipelineSettings::from(&config));
    Ok(pipeline.watch_service)
}

async fn run(command: Command) -> Result<()> {
    let service = watch_service().await?;
    match command {
        Command::RenewWatches { horizon_hours } => {
            let horizon = Duration::from_secs(horizon_hours.saturating_mul(3600));
            let report = service.renew_due(horizon).await.wrap_err("renew watches")?;
            for account in &report.renewed {
                println!("renewed\t{account}");
            }
            for (account, reason) in &report.failed {
                println!("failed\t{account}\t{reason}");
            }
            info!(
                renewed = report.renewed.len(),
                failed = report.failed.len(),
                "watch renewal finished"
            );
            if !report.failed.is_empty() {
                return Err(eyre!("{} watch renewals failed", report.failed.len()));
            }
        }
        Command::RebaseCursor { account } => {
            let cursor = service
                .rebase_cursor(&account)
                .await
                .wrap_err_with(|| format!("rebase cursor for {account}"))?;
            println!("rebased\t{account}\t{cursor}");
        }
        Command::Register {
            account,
            user,
            mailbox,
        } => {
            let watch = service
                .register(account, user, mailbox)
                .await
                .wrap_err("register watch")?;
            println!(
                "registered\t{}\t{}\t{}",
                watch.account_id, watch.provider_cursor, watch.expires_at
            );
        }
        Command::Deregister { account } => {
            let removed = service
                .deregister(&account)
                .await
                .wrap_err_with(|| format!("deregister {account}"))?;
            let status = if removed { "removed" } else { "absent" };
            println!("{status}\t{account}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&["mailpush-ops", "renew-watches"], 24)]
    #[case(&["mailpush-ops", "renew-watches", "--horizon-hours", "6"], 6)]
    fn parses_renewal_horizon(#[case] argv: &[&str], #[case] expected: u64) {
        let args = CliArgs::try_parse_from(argv).expect("parse");
        match args.command {
            Command::RenewWatches { horizon_hours } => assert_eq!(horizon_hours, expected),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_mailbox() {
        let result = CliArgs::try_parse_from([
            "mailpush-ops",
            "register",
            "--account",
            "acct-1",
            "--user",
            "user-1",
            "--mailbox",
            "not-an-address",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn rebase_requires_account() {
        assert!(CliArgs::try_parse_from(["mailpush-ops", "rebase-cursor"]).is_err());
    }
}
