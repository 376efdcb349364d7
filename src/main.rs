use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};

use vigil_alerts::{LogDispatcher, WebhookDispatcher};
use vigil_core::alert::AlertDispatcher;
use vigil_core::request::AssessmentRequest;
use vigil_engine::{
    AlertDecisionPolicy, AlertOutcome, AssessmentOutcome, CoordinatorConfig, PipelineCoordinator, RoleRegistry,
};
use vigil_llm::{OpenAiConfig, OpenAiReasoner, ReliableConfig, ReliableReasoner};
use vigil_settings::{DispatchKind, DispatchSettings, ReasonerSettings, VigilSettings};
use vigil_telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

/// Multi-role public health risk assessment.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, long_about = None)]
struct Cli {
    /// Settings file (defaults to ./vigil.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the pipeline engine
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one observation through the assessment pipeline
    Assess {
        /// WHO region code, e.g. AFRO
        #[arg(short, long)]
        region: String,

        /// Timeframe label, e.g. 2024-Q1
        #[arg(short, long)]
        timeframe: String,

        /// JSON observation file; read from stdin when omitted
        #[arg(short, long)]
        observation: Option<PathBuf>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// List enabled regions and their experts
    Regions,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = vigil_settings::load_settings(cli.config.as_deref()).context("failed to load settings")?;
    let telemetry = init_telemetry(TelemetryConfig {
        log_level: settings.telemetry.level()?,
        module_levels: settings.telemetry.parsed_module_levels(),
        json: settings.telemetry.json,
        metrics_enabled: true,
    })?;
    if cli.verbose {
        telemetry.set_module_level("vigil_engine", Level::DEBUG)?;
    }

    match cli.command {
        Commands::Assess {
            region,
            timeframe,
            observation,
            json,
        } => {
            let observation = read_observation(observation.as_deref())?;
            let request = AssessmentRequest::new(observation, region, timeframe);
            let outcome = assess(&settings, &telemetry, request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
        }
        Commands::Regions => {
            let registry = RoleRegistry::initialize(&settings.regions)?;
            for expert in registry.experts() {
                if let Some(region) = expert.region() {
                    println!("{region}\t{}", expert.name());
                }
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}

async fn assess(
    settings: &VigilSettings,
    telemetry: &TelemetryGuard,
    request: AssessmentRequest,
) -> anyhow::Result<AssessmentOutcome> {
    let registry = Arc::new(RoleRegistry::initialize(&settings.regions)?);
    let reasoner = build_reasoner(&settings.reasoner)?;
    let dispatcher = build_dispatcher(&settings.dispatch)?;
    let policy = AlertDecisionPolicy::from_settings(&settings.policy)?;

    let mut coordinator = PipelineCoordinator::new(
        registry,
        Arc::new(reasoner),
        dispatcher,
        policy,
        CoordinatorConfig::from(&settings.pipeline),
    )?;
    if let Some(metrics) = telemetry.metrics() {
        coordinator = coordinator.with_metrics(metrics);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping at the next stage boundary");
            on_interrupt.cancel();
        }
    });

    info!(request_id = %request.id(), region = request.region(), "starting assessment");
    let result = coordinator.assess_with_cancel(request, cancel).await;
    if let Some(metrics) = telemetry.metrics() {
        for m in metrics.snapshot() {
            debug!(name = %m.name, labels = ?m.labels, kind = ?m.metric_type, value = m.value, "metric");
        }
    }
    Ok(result?)
}

fn build_reasoner(settings: &ReasonerSettings) -> anyhow::Result<ReliableReasoner<OpenAiReasoner>> {
    let Some(api_key) = settings.api_key.as_ref().filter(|k| !k.is_empty()) else {
        bail!("no reasoner credentials: set reasoner.api_key, VIGIL_REASONER__API_KEY or OPENAI_API_KEY");
    };
    let inner = OpenAiReasoner::new(OpenAiConfig {
        base_url: settings.base_url.clone(),
        model: settings.model.clone(),
        api_key: api_key.secret().clone(),
        temperature: settings.temperature.map(|t| t as f32),
        max_tokens: settings.max_tokens,
        request_timeout: Duration::from_secs(settings.request_timeout_secs),
    })?;

    let retry = &settings.retry;
    Ok(ReliableReasoner::new(
        inner,
        ReliableConfig {
            max_retries: retry.max_retries,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            jitter_factor: retry.jitter_factor,
            circuit_breaker_threshold: retry.circuit_breaker_threshold,
            circuit_breaker_cooldown: Duration::from_secs(retry.circuit_breaker_cooldown_secs),
        },
    ))
}

fn build_dispatcher(settings: &DispatchSettings) -> anyhow::Result<Arc<dyn AlertDispatcher>> {
    match settings.kind {
        DispatchKind::Log => Ok(Arc::new(LogDispatcher::new())),
        DispatchKind::Webhook => {
            let url = settings.webhook_url.clone().unwrap_or_default();
            let webhook = WebhookDispatcher::new(url, Duration::from_secs(settings.timeout_secs))?;
            Ok(Arc::new(webhook))
        }
    }
}

/// Observation JSON from `path`, or stdin when piped. An interactive stdin
/// with no file gives an empty observation.
fn read_observation(path: Option<&Path>) -> anyhow::Result<serde_json::Value> {
    let raw = match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))?,
        None if std::io::stdin().is_terminal() => return Ok(serde_json::Value::Object(Default::default())),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("failed to read stdin")?;
            buf
        }
    };
    parse_observation(&raw)
}

fn parse_observation(raw: &str) -> anyhow::Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    serde_json::from_str(raw).context("observation is not valid JSON")
}

fn print_outcome(outcome: &AssessmentOutcome) {
    println!("request   {}", outcome.request_id);
    println!("region    {} ({})", outcome.region, outcome.timeframe);
    println!("level     {}", outcome.level);
    for (category, score) in &outcome.scores {
        println!("  {:<22} {score:.3}", category.as_str());
    }
    match &outcome.alert {
        AlertOutcome::Skipped => println!("alert     skipped"),
        AlertOutcome::Dispatched { ack } => match &ack.reference {
            Some(reference) => println!("alert     {} via {} ({reference})", ack.alert_id, ack.channel),
            None => println!("alert     {} via {}", ack.alert_id, ack.channel),
        },
        AlertOutcome::DispatchFailed { alert_id, error, .. } => {
            println!("alert     {alert_id} NOT delivered: {error}")
        }
    }
}
