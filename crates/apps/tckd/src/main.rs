use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tck_agent::TestAgent;
use tck_dispatcher::Dispatcher;
use tck_transport::Transport;
use tckd::TckConfig;

#[derive(Parser, Debug)]
#[command(name = "tckd", about = "Socket interop harness: dispatcher and test agent")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the flooding dispatcher until interrupted.
    Dispatcher {
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Run the Rust test agent against a test manager and a dispatcher.
    Agent {
        #[arg(long)]
        sdk_name: Option<String>,
        #[arg(long)]
        manager: Option<String>,
        #[arg(long)]
        dispatcher: Option<String>,
        /// Do not answer requests delivered to registered topics.
        #[arg(long, default_value_t = false)]
        no_reply: bool,
    },
    /// Parse the configuration and print the resolved values.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = TckConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Dispatcher { listen } => {
            if let Some(listen) = listen {
                config.dispatcher.listen = listen;
            }
            run_dispatcher(config).await
        }
        Command::Agent { sdk_name, manager, dispatcher, no_reply } => {
            if let Some(sdk_name) = sdk_name {
                config.agent.sdk_name = sdk_name;
            }
            if let Some(manager) = manager {
                config.agent.manager_addr = manager;
            }
            if let Some(dispatcher) = dispatcher {
                config.agent.dispatcher_addr = dispatcher;
            }
            if no_reply {
                config.agent.reply_to_requests = false;
            }
            run_agent(config).await
        }
        Command::CheckConfig => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

async fn run_dispatcher(config: TckConfig) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::bind(&config.dispatcher)
        .await
        .with_context(|| format!("binding dispatcher on {}", config.dispatcher.listen))?;
    let handle = dispatcher.spawn()?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    log::info!("tckd: interrupted, shutting down dispatcher");
    handle.shutdown().await;
    Ok(())
}

async fn run_agent(config: TckConfig) -> anyhow::Result<()> {
    let section = &config.agent;
    let transport = Transport::connect(section.dispatcher_addr.as_str(), section.transport_config())
        .await
        .with_context(|| format!("connecting to dispatcher {}", section.dispatcher_addr))?;
    let agent = TestAgent::connect(
        section.manager_addr.as_str(),
        &section.agent_config(),
        transport.clone(),
    )
    .await
        .with_context(|| format!("connecting to test manager {}", section.manager_addr))?;

    tokio::select! {
        result = agent.run() => result?,
        _ = tokio::signal::ctrl_c() => log::info!("tckd: interrupted, stopping agent"),
    }
    transport.close().await;
    Ok(())
}
