// posview/posview_replay.rs
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};
use posview::account::{Account, AccountType, ClosedPosition, Login, PositionSnapshot, ViewMode};
use posview::config::ViewConfig;
use posview::feed_mock::ScriptedFeed;
use posview::subscription::SnapshotObserver;
use posview::{PosViewError, PositionHistoryView};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

/// Replays a JSON-lines script of UI and feed events against a position
/// history view and prints the view output after every step.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Position view script replayer")]
struct CliArgs {
  /// Script file, one JSON object per line
  script: PathBuf,

  /// JSON config file
  #[clap(long)]
  config: Option<PathBuf>,

  /// Auth token applied before the script runs
  #[clap(long, env = "POSVIEW_TOKEN")]
  token: Option<String>,

  /// Print only the final output
  #[clap(long)]
  final_only: bool,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ScriptOp {
  Accounts { accounts: Vec<Account> },
  Token { token: Option<String> },
  Mode { mode: ViewMode },
  Toggle,
  #[serde(rename = "type")]
  AccountType {
    #[serde(rename = "type")]
    account_type: AccountType,
  },
  Account { login: Login },
  Override { login: Option<Login> },
  /// Frame emitted by a feed connection; the latest one when `connection` is absent.
  Snapshot {
    #[serde(default)]
    connection: Option<usize>,
    payload: serde_json::Value,
  },
  ClosedResult { positions: Vec<ClosedPosition> },
  ClosedError { message: String },
  Refresh,
  Unmount,
}

struct LogObserver;

impl SnapshotObserver for LogObserver {
  fn on_snapshot(&self, login: &Login, snapshot: &PositionSnapshot) {
    info!("Snapshot for {}: {} positions, floating P&L {:.2}", login, snapshot.positions.len(), snapshot.total_profit());
  }
}

fn apply(view: &mut PositionHistoryView, feed: &ScriptedFeed, op: ScriptOp) -> Result<()> {
  let outcome: Result<(), PosViewError> = match op {
    ScriptOp::Accounts { accounts } => view.set_accounts(Arc::new(accounts)),
    ScriptOp::Token { token } => view.set_token(token),
    ScriptOp::Mode { mode } => view.set_view_mode(mode),
    ScriptOp::Toggle => view.toggle_view_mode(),
    ScriptOp::AccountType { account_type } => view.set_account_type(account_type),
    ScriptOp::Account { login } => view.set_account(login),
    ScriptOp::Override { login } => view.set_login_override(login),
    ScriptOp::Snapshot { connection, payload } => {
      let conn = match connection {
        Some(i) => feed.connection(i),
        None => feed.last_connection(),
      }
      .ok_or_else(|| anyhow!("No feed connection {:?} to emit from", connection))?;
      let accepted = conn.emit_json(&payload.to_string())?;
      if !accepted {
        info!("Snapshot from connection {} discarded (stale).", conn.id());
      }
      Ok(())
    }
    ScriptOp::ClosedResult { positions } => {
      complete_closed(view, Ok(positions));
      Ok(())
    }
    ScriptOp::ClosedError { message } => {
      complete_closed(view, Err(PosViewError::FetchFailed(message)));
      Ok(())
    }
    ScriptOp::Refresh => {
      view.refresh_closed();
      Ok(())
    }
    ScriptOp::Unmount => {
      view.shutdown();
      Ok(())
    }
  };
  // Feed errors are part of the view output; keep replaying.
  if let Err(e) = outcome {
    warn!("Step failed: {}", e);
  }
  Ok(())
}

fn complete_closed(view: &mut PositionHistoryView, result: Result<Vec<ClosedPosition>, PosViewError>) {
  match view.take_closed_request() {
    Some((ticket, request)) => {
      debug!("Answering closed position request for login {}.", request.login);
      view.complete_closed_fetch(ticket, result);
    }
    None => warn!("No closed position request pending, response ignored."),
  }
}

fn main() -> Result<()> {
  let args = CliArgs::parse();
  let config = ViewConfig::load(args.config.as_deref())?;
  env_logger::Builder::from_env(Env::default().default_filter_or(config.log_level.as_str())).init();

  let feed = ScriptedFeed::new();
  let mut view = PositionHistoryView::new(Arc::new(feed.clone()), &config);
  view.controller().add_observer(LogObserver);
  if let Some(token) = args.token.clone() {
    if let Err(e) = view.set_token(Some(token)) {
      warn!("Initial token failed: {}", e);
    }
  }

  let file = File::open(&args.script).with_context(|| format!("Cannot open script {}", args.script.display()))?;
  info!("Replaying {}", args.script.display());
  for (line_no, line) in BufReader::new(file).lines().enumerate() {
    let line = line?;
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }
    let op: ScriptOp = serde_json::from_str(trimmed)
      .with_context(|| format!("Line {}: invalid script step", line_no + 1))?;
    debug!("Line {}: {:?}", line_no + 1, op);
    apply(&mut view, &feed, op)?;
    if !args.final_only {
      println!("{}", serde_json::to_string(&view.output())?);
    }
  }
  if args.final_only {
    println!("{}", serde_json::to_string(&view.output())?);
  }
  info!("Replay done: {} connections opened, {} disconnected.", feed.open_count(), feed.disconnect_count());
  Ok(())
}
