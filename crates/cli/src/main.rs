mod config;
mod error;
mod interrupt;
mod setup;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use runtime::{Agent, Message, OpenAiBackend, Role};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::Result;
use interrupt::Interrupts;
use setup::Runtime;

const CONFIG_FILE: &str = "steward.toml";

#[derive(Parser)]
#[command(name = "steward")]
#[command(about = "Tool-augmented LLM agents over MCP", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask an agent a single question
    Ask {
        agent: String,
        prompt: String,
        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Start an interactive chat with an agent
    Chat {
        agent: String,
        #[arg(long)]
        stream: bool,
    },
    /// List the tools an agent can call
    Tools { agent: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let live = Runtime::start(&config).await?;
    let interrupts = Interrupts::listen();

    let result = match &cli.command {
        Commands::Ask {
            agent,
            prompt,
            stream,
        } => cmd_ask(live.agent(agent)?, prompt, *stream, &interrupts).await,
        Commands::Chat { agent, stream } => {
            cmd_chat(live.agent(agent)?, *stream, &interrupts).await
        }
        Commands::Tools { agent } => cmd_tools(live.agent(agent)?),
    };

    live.shutdown().await;
    result
}

async fn cmd_ask(
    agent: &Agent<OpenAiBackend>,
    prompt: &str,
    stream: bool,
    interrupts: &Interrupts,
) -> Result<()> {
    let conversation = vec![Message::human(prompt)];
    let cancel = interrupts.begin_turn();

    let result = if stream {
        print_streaming(agent, conversation, cancel).await.map(|_| ())
    } else {
        agent
            .respond(&conversation, &cancel)
            .await
            .map(|reply| println!("{}", reply.text))
            .map_err(Into::into)
    };

    interrupts.end_turn();
    result
}

/// Ctrl-C cancels the running turn; at the prompt it exits.
async fn cmd_chat(
    agent: &Agent<OpenAiBackend>,
    stream: bool,
    interrupts: &Interrupts,
) -> Result<()> {
    println!("steward v{} · agent {}", env!("CARGO_PKG_VERSION"), agent.name());
    println!("Type 'quit' or Ctrl+D to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut conversation: Vec<Message> = Vec::new();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let mut turn = conversation.clone();
        turn.push(Message::human(input));
        let cancel = interrupts.begin_turn();

        if stream {
            println!();
            let appended = print_streaming(agent, turn.clone(), cancel).await;
            interrupts.end_turn();
            let appended = appended?;
            println!();
            // Keep the turn only if it produced a final answer.
            if appended.last().is_some_and(|m| m.role == Role::Ai && m.tool_calls().is_empty()) {
                turn.extend(appended);
                conversation = turn;
            }
        } else {
            let reply = agent.respond(&turn, &cancel).await;
            interrupts.end_turn();
            match reply {
                Ok(reply) => {
                    println!("\n{}\n", reply.text);
                    conversation = reply.conversation;
                }
                Err(e) => eprintln!("Error: {e}\n"),
            }
        }
    }

    println!("\nBye.");
    Ok(())
}

/// Print a streaming turn as it arrives; returns the appended messages.
async fn print_streaming(
    agent: &Agent<OpenAiBackend>,
    conversation: Vec<Message>,
    cancel: CancellationToken,
) -> Result<Vec<Message>> {
    let mut stream = agent.respond_streaming(conversation, cancel);
    let mut stdout = io::stdout();

    while let Some(fragment) = stream.text.recv().await {
        print!("{fragment}");
        stdout.flush()?;
    }
    println!();

    let mut appended = Vec::new();
    while let Some(message) = stream.messages.recv().await {
        appended.push(message);
    }
    Ok(appended)
}

fn cmd_tools(agent: &Agent<OpenAiBackend>) -> Result<()> {
    let tools = agent.catalog().definitions();
    if tools.is_empty() {
        println!("Agent {} has no tools.", agent.name());
        return Ok(());
    }

    println!("{:<32}  DESCRIPTION", "TOOL");
    println!("{}", "-".repeat(80));
    for tool in tools {
        println!("{:<32}  {}", tool.name, tool.description);
    }
    Ok(())
}
