//! nidsfuzz CLI - main entry point

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use nidsfuzz_core::{FuzzerConfig, ProtoType};
use nidsfuzz_fuzzer::{FuzzerBuilder, MutationAlgorithm};
use nidsfuzz_mutate::{MutationConfig, RepetitionMode};
use nidsfuzz_rules::RuleSet;
use nidsfuzz_select::SelectionAlgorithm;

#[derive(Parser)]
#[command(name = "nidsfuzz")]
#[command(about = "Differential fuzzer for network intrusion detection signatures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fuzz campaign
    Run {
        /// Load a FuzzerConfig from this TOML file; CLI flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        initiator_addr: Option<String>,
        #[arg(long)]
        responder_addr: Option<String>,
        #[arg(long)]
        tuning_port: Option<u16>,
        #[arg(long)]
        tuned_port: Option<u16>,

        /// Rule files to load (repeatable)
        #[arg(long = "rule-file")]
        rule_files: Vec<String>,

        #[arg(long)]
        protocol: Option<String>,

        #[arg(long, default_value = "sequential")]
        selection_algorithm: String,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        batch_num: Option<usize>,

        #[arg(long, default_value = "pass-through")]
        mutation_algorithm: String,
        #[arg(long)]
        repetition_mode: Option<String>,

        #[arg(long)]
        output_dir: Option<String>,
        #[arg(long)]
        accumulation_threshold: Option<u32>,
    },
    /// Re-inject a saved packets.bin archive against a fresh responder
    Replay {
        /// Directory containing packets.bin
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        responder_addr: String,
        #[arg(long, default_value_t = 9000)]
        tuning_port: u16,
        #[arg(long, default_value_t = 9001)]
        tuned_port: u16,
    },
    /// Parse a rule file and print per-rule summaries without fuzzing
    Inspect {
        /// Rule files to load (repeatable)
        #[arg(long = "rule-file")]
        rule_files: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = nidsfuzz_core::logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            initiator_addr,
            responder_addr,
            tuning_port,
            tuned_port,
            rule_files,
            protocol,
            selection_algorithm,
            batch_size,
            batch_num,
            mutation_algorithm,
            repetition_mode,
            output_dir,
            accumulation_threshold,
        } => {
            let mut cfg = match &config {
                Some(path) => FuzzerConfig::from_file(path)?,
                None => FuzzerConfig::default(),
            };

            if let Some(v) = initiator_addr {
                cfg.initiator_addr = v;
            }
            if let Some(v) = responder_addr {
                cfg.responder_addr = v;
            }
            if let Some(v) = tuning_port {
                cfg.tuning_port = v;
            }
            if let Some(v) = tuned_port {
                cfg.tuned_port = v;
            }
            if !rule_files.is_empty() {
                cfg.rule_files = rule_files;
            }
            if protocol.is_some() {
                cfg.protocol = protocol;
            }
            cfg.selection_algorithm = selection_algorithm;
            if let Some(v) = batch_size {
                cfg.batch_size = v;
            }
            if let Some(v) = batch_num {
                cfg.batch_num = v;
            }
            cfg.mutation_algorithm = mutation_algorithm;
            if let Some(v) = repetition_mode {
                cfg.repetition_mode = v;
            }
            if let Some(v) = output_dir {
                cfg.output_dir = v;
            }
            if let Some(v) = accumulation_threshold {
                cfg.accumulation_threshold = v;
            }

            run_campaign(cfg).await?;
        }
        Commands::Replay {
            output_dir,
            responder_addr,
            tuning_port,
            tuned_port,
        } => {
            replay(&output_dir, &responder_addr, tuning_port, tuned_port).await?;
        }
        Commands::Inspect { rule_files } => {
            inspect(&rule_files)?;
        }
    }

    Ok(())
}

async fn run_campaign(cfg: FuzzerConfig) -> anyhow::Result<()> {
    if cfg.rule_files.is_empty() {
        anyhow::bail!("no rule files provided; pass --rule-file at least once or set rule_files in --config");
    }

    let ruleset = RuleSet::from_files(cfg.rule_files.iter().map(PathBuf::from))?;
    tracing::info!(
        activated = ruleset.activated().len(),
        commented = ruleset.commented().len(),
        unresolved = ruleset.unresolved().len(),
        "loaded rule set"
    );

    let selection_algorithm = match cfg.selection_algorithm.as_str() {
        "sequential" => SelectionAlgorithm::Sequential,
        "random" => SelectionAlgorithm::Random,
        "combination" => SelectionAlgorithm::Combination,
        other => {
            tracing::warn!(requested = %other, "unknown selection algorithm, falling back to sequential");
            SelectionAlgorithm::Sequential
        }
    };

    let mutation_config = MutationConfig {
        repetition_mode: if cfg.repetition_mode == "element-wise" {
            RepetitionMode::ElementWise
        } else {
            RepetitionMode::BlockWise
        },
        ..MutationConfig::default()
    };

    let mutation = match cfg.mutation_algorithm.as_str() {
        "blending" => MutationAlgorithm::Blending,
        "repetition" => MutationAlgorithm::Repetition(mutation_config),
        "obfuscation" => {
            let proto = cfg.protocol.as_deref().map(ProtoType::of).unwrap_or(ProtoType::Text);
            MutationAlgorithm::Obfuscation(proto, mutation_config)
        }
        _ => MutationAlgorithm::PassThrough,
    };

    let mut nids_logs = std::collections::HashMap::new();
    for (platform, log) in &cfg.nids_logs {
        let regex = regex::Regex::new(&log.regex)?;
        nids_logs.insert(platform.clone(), (PathBuf::from(&log.path), regex));
    }

    let fuzzer = FuzzerBuilder::new(&cfg.initiator_addr, &cfg.responder_addr, cfg.tuning_port, cfg.tuned_port)
        .setup_selection(ruleset, selection_algorithm, cfg.protocol.clone(), cfg.batch_size, cfg.batch_num)
        .setup_generation(mutation)
        .setup_sanitization(nids_logs, cfg.accumulation_threshold, cfg.port_window)
        .output_dir(cfg.output_path())
        .build();

    let findings = fuzzer.run().await?;
    tracing::info!(findings, "fuzz campaign complete");
    println!("campaign complete: {findings} finding(s) written to {}", cfg.output_dir);

    Ok(())
}

async fn replay(output_dir: &std::path::Path, responder_addr: &str, tuning_port: u16, tuned_port: u16) -> anyhow::Result<()> {
    let packets_path = output_dir.join("packets.bin");
    let bundles = nidsfuzz_fuzzer::load_packets(&packets_path)?;

    let broker = nidsfuzz_inject::MessageBroker::new();
    let addr = format!("{responder_addr}:{tuned_port}");

    for (bundle_idx, bundle) in bundles.iter().enumerate() {
        for (pair_idx, (request, response)) in bundle.iter().enumerate() {
            let responder = nidsfuzz_inject::Responder::bind(&addr, broker.clone()).await?;
            let initiator = nidsfuzz_inject::Initiator::new(
                format!("{responder_addr}:{tuning_port}"),
                addr.clone(),
                "127.0.0.1".parse().unwrap(),
            );

            let mut allocator = nidsfuzz_inject::PortAllocator::new(16);
            let bind_port = allocator.allocate(false).await?;

            let accept = responder.accept_one();
            let inject = initiator.inject(request, response, bind_port);
            let (_accepted, echoed) = tokio::join!(accept, inject);

            println!("bundle {bundle_idx} pair {pair_idx}: echoed {:?}", echoed.ok().flatten().map(|b| b.len()));
        }
    }

    Ok(())
}

fn inspect(rule_files: &[String]) -> anyhow::Result<()> {
    if rule_files.is_empty() {
        anyhow::bail!("no rule files provided");
    }

    let ruleset = RuleSet::from_files(rule_files.iter().map(PathBuf::from))?;

    for rule in ruleset.activated() {
        let buffers: Vec<&str> = rule.body.signature.keys().map(|b| b.as_str()).collect();
        let flowbits = rule.body.flowbits.iter().flat_map(|fb| fb.setters().iter().chain(fb.checkers())).collect::<Vec<_>>();
        println!("{}  service={}  buffers={:?}  flowbits={:?}", rule.id(), rule.service(), buffers, flowbits);
    }

    for (line, err) in ruleset.unresolved() {
        println!("unparsed: {line}  ({err})");
    }

    Ok(())
}
