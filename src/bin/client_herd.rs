/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Client herd demonstrator: connects a fleet of agents to a broker.
//!
//! Each agent opens its own TCP session and runs the full handshake, which
//! makes this a quick way to load a broker with sessions. The broker opens
//! one file descriptor per agent; raise the per-process FD limit
//! (`ulimit -n`) before starting large fleets.

use std::sync::Arc;

use clap::{ArgAction, Parser};
use futures::future::join_all;
use parking_lot::Mutex;

use oef_runtime::agent::{Agent, AgentHandler, NetworkProxy};
use oef_runtime::config::OefConfig;
use oef_runtime::error::OefError;

#[derive(Parser, Debug)]
#[command(
    name = "client_herd",
    about = "Connects a herd of agents to a broker.",
    disable_help_flag = true
)]
struct Args {
    /// Number of agents. Default 100.
    #[arg(short = 'n', long = "nbAgents", default_value_t = 100)]
    nb_agents: u32,

    /// Prefix used for all agents name. Default: Agent_
    #[arg(short = 'p', long, default_value = "Agent_")]
    prefix: String,

    /// Host address to connect. Default: 127.0.0.1
    #[arg(short = 'h', long, default_value = "127.0.0.1")]
    host: String,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

/// A minimal agent that only records search answers.
#[derive(Default)]
struct SimpleAgent {
    results: Mutex<Vec<String>>,
}

impl SimpleAgent {
    #[allow(dead_code)]
    fn results(&self) -> Vec<String> {
        self.results.lock().clone()
    }
}

impl AgentHandler for SimpleAgent {
    fn on_search_result(&self, _search_id: u32, agents: &[String]) {
        *self.results.lock() = agents.to_vec();
    }
}

async fn start_agent(name: String, host: String, config: OefConfig) -> Result<Agent, OefError> {
    let proxy = NetworkProxy::connect(&name, &host, config.network.port, &config).await?;
    let agent = Agent::new(Box::new(proxy), Arc::new(SimpleAgent::default()));
    agent.start().await?;
    Ok(agent)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = OefConfig::default();

    eprintln!(
        "Starting {} agents against {}:{}",
        args.nb_agents, args.host, config.network.port
    );

    let futures = (1..=args.nb_agents).map(|i| {
        start_agent(
            format!("{}{}", args.prefix, i),
            args.host.clone(),
            config.clone(),
        )
    });
    let results = join_all(futures).await;

    let mut agents = Vec::new();
    let mut failures = 0usize;
    for result in results {
        match result {
            Ok(agent) => agents.push(agent),
            Err(e) => {
                eprintln!("agent failed to start: {e}");
                failures += 1;
            }
        }
    }
    eprintln!("{} agents connected, {} failed", agents.len(), failures);

    for agent in &agents {
        agent.stop().await;
    }

    if failures > 0 {
        return Err(Box::new(OefError::HandshakeFailed) as Box<dyn std::error::Error>);
    }
    Ok(())
}
