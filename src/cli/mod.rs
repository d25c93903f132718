mod commands;
mod middleware;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::error::{AppError, Result};

pub use middleware::Context;
use middleware::logged_in;

#[derive(Parser)]
#[command(name = "gator")]
#[command(about = "Collect RSS feeds into a local database", long_about = None)]
pub struct Cli {
    /// Config file [default: <config dir>/gator/config.toml]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch to an existing user
    Login { name: String },
    /// List users
    Users,
    /// Delete all users, feeds and posts
    Reset,
    /// Collect feeds every INTERVAL (e.g. 500ms, 30s, 1m, 1h30m) until Ctrl-C
    Agg {
        #[arg(value_parser = parse_interval)]
        interval: Duration,
    },
    /// Register a feed and follow it
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },
    /// List all feeds
    Feeds,
    /// Follow an existing feed
    Follow { url: String },
    /// List followed feeds
    Following,
    /// Stop following a feed
    Unfollow { url: String },
    /// Show the newest posts from followed feeds
    Browse {
        #[arg(default_value_t = 2)]
        limit: usize,
    },
}

pub async fn dispatch(ctx: &mut Context, command: Command) -> Result<()> {
    match command {
        Command::Register { name } => commands::register(ctx, &name).await,
        Command::Login { name } => commands::login(ctx, &name).await,
        Command::Users => commands::users(ctx).await,
        Command::Reset => commands::reset(ctx).await,
        Command::Agg { interval } => commands::aggregate(ctx, interval).await,
        Command::AddFeed { name, url } => {
            logged_in(ctx, |ctx, user| commands::add_feed(ctx, user, name, url)).await
        }
        Command::Feeds => commands::feeds(ctx).await,
        Command::Follow { url } => {
            logged_in(ctx, |ctx, user| commands::follow(ctx, user, url)).await
        }
        Command::Following => logged_in(ctx, commands::following).await,
        Command::Unfollow { url } => {
            logged_in(ctx, |ctx, user| commands::unfollow(ctx, user, url)).await
        }
        Command::Browse { limit } => {
            logged_in(ctx, |ctx, user| commands::browse(ctx, user, limit)).await
        }
    }
}

/// Parse durations such as `500ms`, `30s`, `5m`, `1h` or `1h30m`.
pub fn parse_interval(input: &str) -> Result<Duration> {
    let invalid = |reason: &str| AppError::InvalidInterval(format!("{input:?}: {reason}"));

    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid("empty"));
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid("number too large"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let (unit, tail) = rest.split_at(unit_len);
        rest = tail;

        let seconds = |factor: u64| {
            value
                .checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| invalid("number too large"))
        };
        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => seconds(1)?,
            "m" => seconds(60)?,
            "h" => seconds(3600)?,
            "" => return Err(invalid("missing unit (ms, s, m, h)")),
            _ => return Err(invalid("unknown unit, expected ms, s, m or h")),
        };
        total = total
            .checked_add(part)
            .ok_or_else(|| invalid("number too large"))?;
    }

    if total.is_zero() {
        return Err(invalid("must be greater than zero"));
    }
    Ok(total)
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
    fn parses_interval_units() {
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval(" 2h ").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_interval("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("1s500ms").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_bad_intervals() {
        for input in ["", "10", "0s", "5d", "ms", "1.5s", "-1s", "99999999999999999999s"] {
            assert!(
                matches!(parse_interval(input), Err(AppError::InvalidInterval(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn agg_takes_an_interval_argument() {
        let cli = Cli::try_parse_from(["gator", "agg", "1m"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Agg { interval } if interval == Duration::from_secs(60)
        ));

        assert!(Cli::try_parse_from(["gator", "agg", "soon"]).is_err());
        assert!(Cli::try_parse_from(["gator", "agg"]).is_err());
    }

    #[test]
    fn browse_defaults_to_two_posts() {
        let cli = Cli::try_parse_from(["gator", "browse"]).unwrap();
        assert!(matches!(cli.command, Command::Browse { limit: 2 }));

        let cli = Cli::try_parse_from(["gator", "--config", "/tmp/c.toml", "addfeed", "n", "u"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Command::AddFeed { .. }));
    }
}
