//! CLI argument definitions (spec §6 "CLI surface"): three subcommands,
//! `stdio`, `serve --port`, and `init`.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pml")]
#[command(author = "PML")]
#[command(version)]
#[command(about = "Procedural Memory Layer core", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the MCP protocol server reading/writing JSON-RPC on stdin/stdout.
    Stdio {
        /// Restrict exposed tools to this list of names.
        #[arg(long, value_delimiter = ',')]
        expose: Option<Vec<String>>,

        /// Hide built-in tools, exposing only names passed via `--expose`.
        #[arg(long)]
        only: bool,
    },

    /// Serve the same JSON-RPC protocol over HTTP.
    Serve {
        /// Port to bind; overrides `PML_PORT`/workspace config if given.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Scaffold a workspace `.pml.json` config.
    Init {
        /// Workspace directory to scaffold into (defaults to the current directory).
        #[arg(long, default_value = ".")]
        path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdio_with_expose_list() {
        let args = CliArgs::parse_from(["pml", "stdio", "--expose", "a,b,c"]);
        match args.command {
            Command::Stdio { expose, only } => {
                assert_eq!(expose, Some(vec!["a".to_string(), "b".to_string(), "c".to_string()]));
                assert!(!only);
            }
            other => panic!("expected Stdio, got {other:?}"),
        }
    }

    #[test]
    fn parses_serve_with_port() {
        let args = CliArgs::parse_from(["pml", "serve", "--port", "9090"]);
        match args.command {
            Command::Serve { port } => assert_eq!(port, Some(9090)),
            other => panic!("expected Serve, got {other:?}"),
        }
    }

    #[test]
    fn parses_init_default_path() {
        let args = CliArgs::parse_from(["pml", "init"]);
        match args.command {
            Command::Init { path } => assert_eq!(path, "."),
            other => panic!("expected Init, got {other:?}"),
        }
    }
}
