// Copyright (c) 2025 Rajan Panneer Selvam
//
// Licensed under the Business Source License 1.1 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.mariadb.com/bsl11
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use clap::{Parser, Subcommand};
use std::error::Error;
use testprobe::{api, cli, config, utils};

#[derive(Parser)]
#[command(name = "testprobe")]
#[command(about = "Declarative Kafka integration test execution service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as a web server
    Server {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8085)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },

    /// Test bundle operations
    Bundle {
        #[command(subcommand)]
        command: cli::bundle::BundleCommands,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    utils::logging::init_logger();

    // Load configuration
    let config = config::load_config()?;

    // Parse command line arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { port, host } => {
            // Start web server
            api::server::run_server(host, port, config).await?;
        }
        Commands::Bundle { command } => {
            // Handle bundle commands
            cli::bundle::handle_command(command, &config).await?;
        }
    }

    Ok(())
}
