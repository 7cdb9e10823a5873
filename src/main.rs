use clap::{Parser, Subcommand};
use relay_bus::{
    config::Config,
    correlator::{ReplyListener, RequestReplyCorrelator},
    error::{AppError, Result},
    messaging::{InMemoryBroker, MessageHeaders, MessagingError},
    observability,
    retry::RetryTier,
    topology::{validate_entity_name, TopologyManager},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "relay-bus")]
#[command(about = "Request/reply messaging toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "RELAY_BUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate queue, topic or subscription names
    #[command(name = "check-name")]
    CheckName {
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,
    },

    /// Provision the configured topology against the in-process broker
    Provision,

    /// Run a person lookup over request/reply
    Demo {
        /// Person ID to look up
        #[arg(long, default_value = "p1")]
        id: String,

        /// Name the responder answers with
        #[arg(long, default_value = "Alice")]
        name: String,

        /// Retry tier for sends (defaults to retry.default_tier)
        #[arg(short, long)]
        tier: Option<RetryTier>,

        /// Match replies by correlation ID instead of first delivery
        #[arg(long)]
        correlated: bool,

        /// Print Prometheus metrics afterwards
        #[arg(long)]
        metrics: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct PersonQuery {
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Person {
    id: String,
    name: String,
}

const REQUEST_QUEUE: &str = "req.person.get";
const RESPONSE_QUEUE: &str = "res.person.get";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error [{}]: {}", e.error_code(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(Some(path.as_path()))?,
        None => Config::load()?,
    };
    config.validate()?;

    observability::init_tracing(&config.observability)?;
    observability::init_metrics()?;
    tracing::info!("Starting relay-bus v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(broker = ?config.broker, "Configuration loaded");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::CheckName { names } => check_names(&names),
        Commands::Provision => provision(&config).await,
        Commands::Demo {
            id,
            name,
            tier,
            correlated,
            metrics,
        } => {
            let tier = tier.unwrap_or(config.retry.default_tier);
            demo(&config, id, name, tier, correlated, &cancel).await?;
            if metrics {
                print!("{}", observability::gather_metrics());
            }
            Ok(())
        }
    }
}

fn check_names(names: &[String]) -> Result<()> {
    let mut invalid = 0;

    for name in names {
        match validate_entity_name(name) {
            Ok(()) => println!("ok       {}", name),
            Err(e) => {
                invalid += 1;
                println!("invalid  {:?}: {}", name, e);
            }
        }
    }

    if invalid > 0 {
        return Err(AppError::Messaging(MessagingError::Validation(format!(
            "{} of {} name(s) invalid",
            invalid,
            names.len()
        ))));
    }
    Ok(())
}

async fn provision(config: &Config) -> Result<()> {
    let broker = InMemoryBroker::new();
    let topology = TopologyManager::with_policy(
        Arc::new(broker),
        config.provisioning.entity_policy(),
    );

    tracing::info!(
        namespace = %config.broker.namespace,
        size_tier = %config.provisioning.size_tier,
        "Provisioning topology"
    );

    let mut created = 0;
    let mut existing = 0;
    let mut tally = |outcome: relay_bus::topology::Provisioned| {
        if outcome.was_created() {
            created += 1;
        } else {
            existing += 1;
        }
        outcome
    };

    for queue in &config.topology.queues {
        let outcome = tally(topology.ensure_queue(queue).await?);
        println!("queue         {:<40} {}", queue, outcome);
    }

    for topic in &config.topology.topics {
        let outcome = tally(topology.ensure_topic(&topic.name).await?);
        println!("topic         {:<40} {}", topic.name, outcome);

        for subscription in &topic.subscriptions {
            let outcome = tally(topology.ensure_subscription(&topic.name, subscription).await?);
            println!(
                "subscription  {:<40} {}",
                format!("{}/{}", topic.name, subscription),
                outcome
            );
        }
    }

    println!("{} created, {} already existed", created, existing);
    Ok(())
}

async fn demo(
    config: &Config,
    id: String,
    name: String,
    tier: RetryTier,
    correlated: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let broker = InMemoryBroker::new();
    let topology = TopologyManager::with_policy(
        Arc::new(broker.clone()),
        config.provisioning.entity_policy(),
    );
    topology.ensure_queue(REQUEST_QUEUE).await?;
    topology.ensure_queue(RESPONSE_QUEUE).await?;

    let correlator = RequestReplyCorrelator::with_config(
        Arc::new(broker),
        config.correlator.correlator_config(),
    );

    let responder = correlator
        .receive_and_reply(
            REQUEST_QUEUE,
            RESPONSE_QUEUE,
            move |query: PersonQuery| {
                let name = name.clone();
                async move {
                    Ok::<_, MessagingError>(Person {
                        id: query.id,
                        name,
                    })
                }
            },
            tier,
            cancel,
        )
        .await?;

    let query = PersonQuery { id };
    let person: Person = if correlated {
        let listener =
            ReplyListener::start(correlator.clone(), RESPONSE_QUEUE, tier, cancel).await?;
        let person = listener
            .request(&query, REQUEST_QUEUE, MessageHeaders::new(), tier, cancel)
            .await;
        listener.close().await;
        person?
    } else {
        correlator
            .request_reply(
                &query,
                REQUEST_QUEUE,
                RESPONSE_QUEUE,
                MessageHeaders::new(),
                tier,
                cancel,
            )
            .await?
    };

    responder.close().await;
    println!("{}", serde_json::to_string_pretty(&person)?);
    Ok(())
}
