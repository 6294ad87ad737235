//! CLI argument definitions for marketlens.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `live` | Run one aggregation pass against all six providers |
//! | `cached` | Print the last cached aggregate |
//! | `status` | Circuit breaker state per provider |
//! | `watch` | Refresh periodically, one NDJSON line per pass |
//! | `flush` | Clear the cache |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$MARKETLENS_CONFIG` | TOML config file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! marketlens live --equity-symbol MSFT --news-limit 5 --pretty
//! marketlens watch --interval-secs 30 --iterations 10
//! marketlens --config marketlens.toml status
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use marketlens_core::LiveOptions;

/// Resilient multi-provider market data aggregator.
///
/// Fetches equities, crypto, forex, news, economic and quote data
/// concurrently; a failing provider leaves its slot empty instead of failing
/// the whole request.
#[derive(Debug, Parser)]
#[command(name = "marketlens", author, version, about = "Resilient market data aggregator")]
pub struct Cli {
    /// TOML config file. Falls back to $MARKETLENS_CONFIG, then built-in defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch all six categories now and print the aggregate.
    ///
    ///   marketlens live
    ///   marketlens live --crypto-ids bitcoin,solana --vs-currency eur
    Live(LiveArgs),

    /// Print the cached aggregate; exits 3 when nothing is cached.
    ///
    /// Needs `backend = "redis"`: an in-process cache is empty in a new process.
    Cached,

    /// Print the circuit breaker state of every provider.
    Status,

    /// Refresh on an interval and print one NDJSON line per aggregate.
    Watch(WatchArgs),

    /// Remove every cached aggregate and fragment. Needs `backend = "redis"`.
    Flush,
}

/// Per-category parameters; unset flags keep the defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct LiveArgs {
    #[arg(long)]
    pub equity_symbol: Option<String>,

    /// Comma-separated CoinGecko ids.
    #[arg(long, value_delimiter = ',')]
    pub crypto_ids: Option<Vec<String>>,

    #[arg(long)]
    pub vs_currency: Option<String>,

    #[arg(long)]
    pub forex_base: Option<String>,

    /// Comma-separated ISO currency codes.
    #[arg(long, value_delimiter = ',')]
    pub forex_symbols: Option<Vec<String>>,

    #[arg(long)]
    pub news_query: Option<String>,

    #[arg(long)]
    pub news_limit: Option<usize>,

    /// FRED series id, e.g. GDP or UNRATE.
    #[arg(long)]
    pub economic_series: Option<String>,

    #[arg(long)]
    pub economic_limit: Option<usize>,

    /// Comma-separated ticker symbols for the quote batch.
    #[arg(long, value_delimiter = ',')]
    pub quote_symbols: Option<Vec<String>>,
}

impl LiveArgs {
    pub fn to_options(&self) -> LiveOptions {
        let defaults = LiveOptions::default();
        let args = self.clone();
        LiveOptions {
            equity_symbol: args.equity_symbol.unwrap_or(defaults.equity_symbol),
            crypto_ids: args.crypto_ids.unwrap_or(defaults.crypto_ids),
            vs_currency: args.vs_currency.unwrap_or(defaults.vs_currency),
            forex_base: args.forex_base.unwrap_or(defaults.forex_base),
            forex_symbols: args.forex_symbols.unwrap_or(defaults.forex_symbols),
            news_query: args.news_query.unwrap_or(defaults.news_query),
            news_limit: args.news_limit.unwrap_or(defaults.news_limit),
            economic_series_id: args.economic_series.unwrap_or(defaults.economic_series_id),
            economic_limit: args.economic_limit.unwrap_or(defaults.economic_limit),
            quote_symbols: args.quote_symbols.unwrap_or(defaults.quote_symbols),
        }
    }
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub live: LiveArgs,

    /// Seconds between the start of consecutive passes.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_secs: u64,

    /// Stop after this many passes; runs until interrupted when unset.
    #[arg(long)]
    pub iterations: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_flags_override_only_given_fields() {
        let cli = Cli::parse_from([
            "marketlens",
            "live",
            "--crypto-ids",
            "bitcoin,solana",
            "--news-limit",
            "5",
        ]);
        let Command::Live(args) = cli.command else {
            panic!("expected live command");
        };

        let options = args.to_options();
        assert_eq!(options.crypto_ids, vec!["bitcoin", "solana"]);
        assert_eq!(options.news_limit, 5);
        assert_eq!(options.equity_symbol, LiveOptions::default().equity_symbol);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["marketlens", "status", "--pretty", "--config", "ml.toml"]);
        assert!(cli.pretty);
        assert_eq!(cli.config, Some(PathBuf::from("ml.toml")));
    }

    #[test]
    fn watch_rejects_zero_interval() {
        let parsed = Cli::try_parse_from(["marketlens", "watch", "--interval-secs", "0"]);
        assert!(parsed.is_err());
    }
}
