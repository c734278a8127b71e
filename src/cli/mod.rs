//! CLI command definitions and parsing
use crate::orchestrator::RequestedScope;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    author = "neur0map",
    about = "Ask one question across private, shared and federated search backends",
    long_about = "Quarry fans a question out to a tenant's private and shared vector indexes and to \
                  federated external sources, fuses the ranked results with Reciprocal Rank Fusion, \
                  filters them by relevance and synthesizes a cited answer."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/quarry/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question across the requested scopes
    Ask(AskArgs),

    /// Show the index, bucket and key prefix a scope resolves to
    Resolve {
        /// Tenant (organization) id
        #[arg(long)]
        tenant: String,

        /// Scope kind
        #[arg(long, value_parser = ["private", "shared"], default_value = "private")]
        scope: String,

        /// User id (required for private scope)
        #[arg(long)]
        user: Option<String>,

        /// Named collection
        #[arg(long)]
        collection: Option<String>,

        /// Document category for the key prefix
        #[arg(long, default_value = "documents")]
        category: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// Question to ask
    pub question: String,

    /// Tenant (organization) id
    #[arg(long)]
    pub tenant: String,

    /// User id (required when searching private scope)
    #[arg(long)]
    pub user: Option<String>,

    /// Scopes to search: private, shared, all or external:<name> (repeatable).
    /// Defaults to all with --user, shared without
    #[arg(short, long = "scope")]
    pub scopes: Vec<RequestedScope>,

    /// Restrict private/shared search to named collections (repeatable)
    #[arg(long = "collection")]
    pub collections: Vec<String>,

    /// Maximum number of results (defaults to retrieval.top_k)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Relevance threshold on 0-100 (defaults to retrieval.min_relevance_score)
    #[arg(long)]
    pub min_score: Option<f64>,

    /// Also return results below the threshold
    #[arg(long)]
    pub low_confidence: bool,

    /// Profile to use (e.g., "fast", "accurate")
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Environment variable holding the credential forwarded to external sources
    #[arg(long, value_name = "VAR")]
    pub credential_env: Option<String>,

    /// Answer tone, passed through to answer generation
    #[arg(long)]
    pub tone: Option<String>,

    /// Answer language
    #[arg(long)]
    pub language: Option<String>,

    /// Citation style ("none" disables markers)
    #[arg(long)]
    pub citation_style: Option<String>,

    /// Show the response in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl AskArgs {
    /// Requested scopes, or the default for whether a user was given
    pub fn effective_scopes(&self) -> Vec<RequestedScope> {
        if !self.scopes.is_empty() {
            return self.scopes.clone();
        }
        match self.user.as_deref() {
            Some(user) if !user.trim().is_empty() => vec![RequestedScope::All],
            _ => vec![RequestedScope::Shared],
        }
    }
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_parses_repeated_scopes() {
        let cli = Cli::try_parse_from([
            "quarry",
            "ask",
            "What is our refund policy?",
            "--tenant",
            "acme",
            "--user",
            "u1",
            "--scope",
            "private",
            "--scope",
            "external:wiki",
            "--collection",
            "Legal",
            "-k",
            "5",
        ])
        .unwrap();

        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(
            args.scopes,
            vec![
                RequestedScope::Private,
                RequestedScope::External("wiki".into())
            ]
        );
        assert_eq!(args.collections, vec!["Legal".to_string()]);
        assert_eq!(args.top_k, Some(5));
    }

    fn ask_args(extra: &[&str]) -> AskArgs {
        let mut argv = vec!["quarry", "ask", "q", "--tenant", "acme"];
        argv.extend_from_slice(extra);
        let Commands::Ask(args) = Cli::try_parse_from(argv).unwrap().command else {
            panic!("expected ask");
        };
        args
    }

    #[test]
    fn ask_defaults_to_all_scopes_with_user() {
        let args = ask_args(&["--user", "u1"]);
        assert_eq!(args.effective_scopes(), vec![RequestedScope::All]);
        assert!(!args.json);
    }

    #[test]
    fn ask_without_user_defaults_to_shared() {
        assert_eq!(ask_args(&[]).effective_scopes(), vec![RequestedScope::Shared]);
        assert_eq!(
            ask_args(&["--user", " "]).effective_scopes(),
            vec![RequestedScope::Shared]
        );
        // An explicit scope is never replaced
        assert_eq!(
            ask_args(&["--scope", "private"]).effective_scopes(),
            vec![RequestedScope::Private]
        );
    }

    #[test]
    fn rejects_unknown_scope() {
        assert!(Cli::try_parse_from(["quarry", "ask", "q", "--tenant", "acme", "--scope", "public"]).is_err());
    }
}
