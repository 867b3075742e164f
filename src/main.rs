mod agent;
mod cache;
mod config;
mod host;
mod http;
mod logging;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use url::Url;

use agent::{Agent, FetchDecision, Phase};
use cache::{ResponseSource, SqliteStorage};
use host::ConsoleHost;
use http::{HttpNetwork, Network, Request, Response};

type CliAgent = Agent<SqliteStorage, HttpNetwork, ConsoleHost>;

#[derive(Parser, Debug)]
#[command(name = "cachewarden")]
#[command(about = "An offline-first request interception agent with generational caching")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cachewarden/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache generation to run as (overrides config and CACHEWARDEN_GENERATION)
  #[arg(short, long)]
  generation: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the manifest; activates right away when skip_waiting is set
  Install,
  /// Delete stale generations and claim clients
  Activate,
  /// Route a request through the agent
  Fetch {
    /// Absolute URL or origin-relative path
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Accept header to send, e.g. text/html
    #[arg(short, long)]
    accept: Option<String>,
    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Deliver a control message, e.g. '{"type":"get-version"}'
  Message { json: String },
  /// Deliver a push, with optional payload text
  Push { payload: Option<String> },
  /// Deliver a notification click
  Click {
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    url: Option<String>,
  },
  /// Deliver a background sync
  Sync { tag: String },
  /// List partitions in the namespace
  Partitions,
}

#[derive(Serialize)]
struct FetchReport<'a> {
  intercepted: bool,
  source: Option<ResponseSource>,
  status: u16,
  status_text: &'a str,
  content_type: Option<&'a str>,
  headers: Vec<(&'a str, Cow<'a, str>)>,
  body_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let store = Arc::new(SqliteStorage::open(config.storage.path.as_deref())?);
  let network = Arc::new(HttpNetwork::new()?);
  let agent_config = config.into_agent_config(args.generation)?;

  let agent = Agent::new(agent_config, store, Arc::clone(&network), Arc::new(ConsoleHost));

  run(agent, &network, args.command).await
}

async fn run(agent: CliAgent, network: &HttpNetwork, command: Command) -> Result<()> {
  match command {
    Command::Install => {
      let outcome = agent.on_install().await?;
      print_json(&outcome)
    }
    Command::Activate => {
      let report = agent.resume(Phase::Installed).on_activate().await?;
      print_json(&report)
    }
    Command::Fetch {
      url,
      method,
      accept,
      output,
    } => {
      let agent = agent.resume(Phase::Activated);
      let request = build_request(&agent, &url, &method, accept)?;

      let (response, source) = match agent.on_fetch(&request).await? {
        FetchDecision::Passthrough => (network.fetch(&request).await?, None),
        FetchDecision::Respond(mut retrieval) => {
          // The process is about to exit; let the write land first
          retrieval.flush().await;
          (retrieval.response, Some(retrieval.source))
        }
      };

      if let Some(path) = output {
        std::fs::write(&path, &response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      }
      print_json(&fetch_report(&response, source))
    }
    Command::Message { json } => {
      let message: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Message is not valid JSON: {}", e))?;
      let (tx, rx) = oneshot::channel();

      agent
        .resume(Phase::Installed)
        .on_message(&message, Some(tx))
        .await?;

      match rx.await {
        Ok(reply) => print_json(&reply),
        Err(_) => Ok(()),
      }
    }
    Command::Push { payload } => {
      agent.on_push(payload.as_deref())?;
      Ok(())
    }
    Command::Click { action, url } => {
      agent.on_notification_click(action.as_deref(), url.as_deref())?;
      Ok(())
    }
    Command::Sync { tag } => print_json(&json!({ "tag": tag, "handled": agent.on_sync(&tag) })),
    Command::Partitions => {
      let partitions = agent.partitions();
      let listing: Vec<_> = partitions
        .list_all()
        .await?
        .into_iter()
        .map(|name| {
          let parsed = partitions.parse_name(&name).map(|p| p.to_string());
          json!({
            "name": name,
            "partition": parsed,
            "current": !partitions.is_stale(&name),
          })
        })
        .collect();
      print_json(&json!({ "generation": agent.generation(), "partitions": listing }))
    }
  }
}

fn build_request(
  agent: &CliAgent,
  target: &str,
  method: &str,
  accept: Option<String>,
) -> Result<Request> {
  let url = match Url::parse(target) {
    Ok(url) => url,
    Err(_) => agent.config().resolve(target)?,
  };
  let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let request = Request::get(url).with_method(method);
  Ok(match accept {
    Some(accept) => request.with_accept(accept),
    None => request,
  })
}

fn fetch_report(response: &Response, source: Option<ResponseSource>) -> FetchReport<'_> {
  FetchReport {
    intercepted: source.is_some(),
    source,
    status: response.status,
    status_text: &response.status_text,
    content_type: response.header("content-type"),
    headers: response
      .headers
      .iter()
      .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value)))
      .collect(),
    body_bytes: response.body.len(),
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let line = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", line);
  Ok(())
}
