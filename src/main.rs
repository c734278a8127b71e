use quarry::cli::{AskArgs, Cli, Commands, ConfigAction};
use quarry::config::Config;
use quarry::error::{QuarryError, Result};
use quarry::handler::HandlerOptions;
use quarry::orchestrator::{AllowAll, CallerContext, QueryOrchestrator, QueryRequest};
use quarry::retrieval::{AggregatedResponse, AnswerOrigin};
use quarry::scope::{CollectionFilter, ScopeKind};
use std::path::PathBuf;
use std::sync::Arc;

const PREVIEW_CHARS: usize = 160;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Ask(args) => {
            cmd_ask(cli.config, args)?;
        }
        Commands::Resolve {
            tenant,
            scope,
            user,
            collection,
            category,
        } => {
            cmd_resolve(cli.config, &tenant, &scope, user, collection, &category)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_filter = if verbose { "quarry=debug" } else { "quarry=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_ask(config_path: Option<PathBuf>, args: AskArgs) -> Result<()> {
    let config = load_config(config_path, args.profile.clone())?;

    let backends = config.backends()?;
    let settings = config.orchestrator_settings()?;
    let orchestrator =
        QueryOrchestrator::new(config.resolver(), backends, Arc::new(AllowAll), settings);

    let mut caller = CallerContext::new(args.tenant.as_str(), args.user.as_deref());
    if let Some(var) = &args.credential_env {
        match std::env::var(var) {
            Ok(credential) if !credential.is_empty() => caller = caller.with_credential(credential),
            _ => tracing::warn!("Credential variable {} is not set", var),
        }
    }

    let mut request = QueryRequest::new(args.question.as_str(), args.effective_scopes())
        .with_top_k(args.top_k.unwrap_or(config.retrieval.top_k))
        .with_min_relevance_score(
            args.min_score
                .unwrap_or(config.retrieval.min_relevance_score),
        )
        .with_low_confidence(args.low_confidence)
        .with_options(HandlerOptions {
            tone: args.tone.clone(),
            language: args.language.clone(),
            citation_style: args.citation_style.clone(),
            ..Default::default()
        });
    for name in &args.collections {
        request = request.with_collection_filter(CollectionFilter::new(
            name.as_str(),
            [ScopeKind::Private, ScopeKind::Shared],
        )?);
    }

    let rt = tokio::runtime::Runtime::new().map_err(|e| QuarryError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;
    let response = rt.block_on(orchestrator.orchestrate(&caller, &request))?;

    if args.json {
        let json = serde_json::to_string_pretty(&response).map_err(|e| QuarryError::Json {
            source: e,
            context: "Failed to serialize response".to_string(),
        })?;
        println!("{}", json);
    } else {
        print_response(&response);
    }

    Ok(())
}

fn print_response(response: &AggregatedResponse) {
    let origin = match response.answer_origin {
        AnswerOrigin::SourceVerbatim => "from source",
        AnswerOrigin::Synthesized => "synthesized",
        AnswerOrigin::Fallback => "fallback",
        AnswerOrigin::NoInformation => "no information",
    };
    println!("Answer ({}):", origin);
    println!("{}", response.synthesized_answer);

    println!(
        "\nSources: {} relevant of {} retrieved (threshold {:.1})",
        response.total_after_filter, response.total_retrieved, response.threshold_applied
    );
    for (i, result) in response.results.iter().enumerate() {
        let page = result
            .page_number
            .map(|p| format!(" (p. {})", p))
            .unwrap_or_default();
        println!(
            "  [{}] {:5.1}  {:<10} {}{}",
            i + 1,
            result.score,
            result.source_type.to_string(),
            result.display_title(),
            page
        );
        println!("        {}", result.preview(PREVIEW_CHARS).replace('\n', " "));
    }

    if let Some(low) = &response.low_confidence {
        if !low.is_empty() {
            println!("\nLow-confidence results:");
            for result in low {
                println!(
                    "  {:5.1}  {:<10} {}",
                    result.score,
                    result.source_type.to_string(),
                    result.display_title()
                );
            }
        }
    }

    for source in response.missing_sources() {
        println!(
            "\n⚠ {} does not exist. Create the collection or configure the source first.",
            source
        );
    }
    for failure in response
        .failures
        .iter()
        .filter(|f| f.kind != quarry::retrieval::ErrorKind::NotFound)
    {
        println!(
            "\n⚠ {} unavailable ({}): {}",
            failure.source_type, failure.kind, failure.message
        );
    }
}

fn cmd_resolve(
    config_path: Option<PathBuf>,
    tenant: &str,
    scope: &str,
    user: Option<String>,
    collection: Option<String>,
    category: &str,
) -> Result<()> {
    let config = load_config(config_path, None)?;
    let kind = if scope == "shared" {
        ScopeKind::Shared
    } else {
        ScopeKind::Private
    };

    let resolver = config.resolver();
    let resolved = resolver.resolve(tenant, kind, user.as_deref(), collection.as_deref())?;

    println!("Scope:      {}", kind);
    println!("Index:      {}", resolved.index_name);
    println!("Bucket:     {}", resolved.bucket_name);
    println!("Key prefix: {}", resolved.key_prefix(category));
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, None)?;
            let value = serde_json::to_value(&config).map_err(|e| QuarryError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match &section {
                Some(name) => value.get(name.as_str()).cloned().ok_or_else(|| {
                    QuarryError::Config(format!("Unknown config section: {}", name))
                })?,
                None => value,
            };

            let json = serde_json::to_string_pretty(&shown).map_err(|e| QuarryError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  External sources: {}", config.external_sources.len());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'quarry config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
