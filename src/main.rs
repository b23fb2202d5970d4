//! Console front end for the trading dashboard's log stream and session
//! controls.
//!
//! Usage:
//!   trading-dashboard [OPTIONS] <COMMAND>
//!
//! Options:
//!   -c, --config <FILE>     TOML config file
//!   -u, --user <ID>         User to mount (defaults to the last user)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use trading_dashboard_lib::commands::health::health;
use trading_dashboard_lib::commands::log_stream::{
    classified_log_messages, clear_log, log_messages, log_stream_status, recover_missed_logs,
};
use trading_dashboard_lib::commands::trading_session::{
    logout, mount_session, reset_session, run_trade_action, save_preferences, session_snapshot,
    MountSessionArgs, SavePreferencesArgs, TradeAction,
};
use trading_dashboard_lib::config::{ConfigOverrides, DashboardConfig};
use trading_dashboard_lib::state::AppState;
use trading_dashboard_lib::{bootstrap, telemetry, watch};

#[derive(Parser, Debug)]
#[command(name = "trading-dashboard")]
#[command(about = "Live trading log stream and session console")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "DASHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// User to mount; falls back to the last user, then guest
    #[arg(short, long)]
    user: Option<String>,

    /// Backend REST base (overrides config and environment)
    #[arg(long)]
    api_base: Option<String>,

    /// Log history base
    #[arg(long)]
    history_base: Option<String>,

    /// Push stream base (ws:// or wss://)
    #[arg(long)]
    stream_base: Option<String>,

    /// Directory holding the local database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Backfill size, 1 to 1000
    #[arg(long)]
    history_limit: Option<u16>,

    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print buffered lines, then stream live events until ctrl-c
    Watch,
    /// Reconcile and print the session mirror
    Status,
    /// Print the buffered log lines
    Messages {
        /// Include display classification
        #[arg(long)]
        classify: bool,
    },
    /// Append lines the server kept while the stream was down
    Recover,
    /// Empty the log buffer and its persisted copy
    ClearLog,
    StartTrading,
    StopTrading,
    CloseAll,
    /// Toggle a stock slot (0-based)
    ToggleSlot { index: usize },
    /// Close the position held in a stock slot (0-based)
    ClosePosition { index: usize },
    /// Persist view preferences
    Preferences {
        #[arg(long)]
        view: Option<String>,
        #[arg(long)]
        selection_type: Option<String>,
    },
    /// Clear the session mirror and log buffer, keeping the user
    Reset,
    /// Forget the current user and all of their local state
    Logout,
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = DashboardConfig::load(
        args.config.as_deref(),
        ConfigOverrides {
            api_base: args.api_base,
            history_base: args.history_base,
            stream_base: args.stream_base,
            data_dir: args.data_dir,
            history_limit: args.history_limit,
            log_level: args.log_level,
        },
    )
    .context("invalid configuration")?;

    telemetry::init("trading-dashboard", &config.log_level);

    let state = bootstrap(&config)
        .await
        .with_context(|| format!("failed to open database in {:?}", config.data_dir))?;

    if let Command::Watch = args.command {
        watch(&state, args.user, |line| println!("{line}")).await?;
        return Ok(());
    }

    let result = run_command(&state, args.user, args.command).await;
    state.context.teardown();
    result
}

async fn run_command(state: &AppState, user: Option<String>, command: Command) -> Result<()> {
    mount_session(
        state,
        Some(MountSessionArgs {
            user_id: user,
            role: None,
        }),
    )
    .await
    .context("failed to mount session")?;

    match command {
        Command::Watch => Ok(()),
        Command::Status => {
            print_json(&log_stream_status(state)?)?;
            print_json(&session_snapshot(state)?)
        }
        Command::Messages { classify: true } => print_json(&classified_log_messages(state).await?),
        Command::Messages { classify: false } => {
            for line in log_messages(state).await? {
                println!("{line}");
            }
            Ok(())
        }
        Command::Recover => print_json(&recover_missed_logs(state).await?),
        Command::ClearLog => print_json(&clear_log(state).await?),
        Command::StartTrading => print_json(&run_trade_action(state, TradeAction::StartAll).await?),
        Command::StopTrading => print_json(&run_trade_action(state, TradeAction::StopAll).await?),
        Command::CloseAll => print_json(&run_trade_action(state, TradeAction::CloseAll).await?),
        Command::ToggleSlot { index } => {
            print_json(&run_trade_action(state, TradeAction::ToggleSlot(index)).await?)
        }
        Command::ClosePosition { index } => {
            print_json(&run_trade_action(state, TradeAction::ClosePosition(index)).await?)
        }
        Command::Preferences {
            view,
            selection_type,
        } => {
            let args = SavePreferencesArgs {
                active_view: view,
                selection_type,
            };
            print_json(&save_preferences(state, args).await?)
        }
        Command::Reset => print_json(&reset_session(state).await?),
        Command::Logout => print_json(&logout(state).await?),
        Command::Health => print_json(&health(state).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
