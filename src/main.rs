use anyhow::Result;
use clap::{Parser, Subcommand};

use mcp402::{config, mcp, webapp};

#[derive(Parser)]
#[command(name = "mcp402")]
#[command(version, about = "Payment-gated MCP tool server")]
#[command(long_about = "\
Payment-gated MCP tool server

mcp402 serves MCP tools over stateless streamable HTTP. Each tool call is
charged per invocation: the caller presents an x402 payment claim in the
X-Payment header and the server verifies and settles it through a
facilitator before the tool runs.

TYPICAL WORKFLOW:

    mcp402 tools                                  # Inspect tools and prices
    mcp402 -f https://facilitator.example.com \\
           --destination 0xabc... serve           # Start serving (port 3000)

For more details on each command, use: mcp402 <command> --help
")]
struct Cli {
    /// Global configuration arguments
    #[command(flatten)]
    config: config::ConfigArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server (default)
    ///
    /// Example:
    ///
    ///  $ mcp402 serve
    ///
    ///  $ PORT=8080 mcp402 --allow-http serve
    ///
    Serve(webapp::ServeArgs),

    /// Print every tool's name, description, input schema and price as JSON
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let global_config = config::GlobalConfig::from_args(&cli.config)?;
    global_config.init_tracing();

    tracing::debug!("mcp402 starting");

    match cli.command.unwrap_or_else(|| Commands::Serve(webapp::ServeArgs::default())) {
        Commands::Serve(args) => webapp::run(args, &global_config).await?,
        Commands::Tools => {
            let registry = mcp::default_registry()?;
            println!("{}", serde_json::to_string_pretty(&registry.manifest())?);
        }
    }

    tracing::debug!("mcp402 shutting down");
    Ok(())
}
