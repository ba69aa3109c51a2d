//! jobctx CLI - submit workloads through a context environment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobctx_client::{JobState, LocalClusterClient, SubmissionHandle};
use jobctx_core::config::{
    ATTACHED, DEFAULT_PARALLELISM, LOCAL_STAGE_DURATION_MS, SHUTDOWN_CANCEL_TIMEOUT_MS,
    SHUTDOWN_ON_ATTACHED_EXIT,
};
use jobctx_core::{Configuration, ExecutionResult, Stage};
use jobctx_env::{
    run_hooks_on_signal, ContextEnvironmentFactory, ContextRegistry, ResultSlot, ShutdownHooks,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobctx")]
#[command(about = "Submit workloads in attached or detached mode", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file (flat object)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dynamic property, e.g. -D attached=false
    #[arg(short = 'D', value_name = "KEY=VALUE", global = true)]
    properties: Vec<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a job on the in-process cluster
    Run {
        /// Job name
        job_name: String,
        /// Stage to add (repeatable); defaults to "source" and "sink"
        #[arg(long = "stage")]
        stages: Vec<String>,
        /// Return right after submission
        #[arg(long)]
        detached: bool,
        /// Cancel the job if this process is terminated
        #[arg(long)]
        shutdown_on_exit: bool,
        /// Parallelism for the job
        #[arg(long)]
        parallelism: Option<i32>,
        /// After a detached submission, reattach and wait for the job
        #[arg(long)]
        follow: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Merge the configuration file and `-D` properties.
fn load_configuration(path: Option<&PathBuf>, properties: &[String]) -> Result<Configuration> {
    let mut configuration = match path {
        Some(path) => Configuration::from_json_file(path)?,
        None => Configuration::new(),
    };
    for property in properties {
        let (key, value) = Configuration::parse_property(property)?;
        configuration.set_string(key, value);
    }
    Ok(configuration)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut configuration = load_configuration(cli.config.as_ref(), &cli.properties)?;

    match cli.command {
        Commands::Run {
            job_name,
            stages,
            detached,
            shutdown_on_exit,
            parallelism,
            follow,
            json,
        } => {
            if detached {
                configuration.set(&ATTACHED, false);
            }
            if shutdown_on_exit {
                configuration.set(&SHUTDOWN_ON_ATTACHED_EXIT, true);
            }
            if let Some(parallelism) = parallelism {
                configuration.set(&DEFAULT_PARALLELISM, parallelism);
            }

            let client = Arc::new(LocalClusterClient::new());
            let hooks = ShutdownHooks::new();
            let registry = ContextRegistry::new();
            registry.install(ContextEnvironmentFactory::new(
                client.clone(),
                configuration,
                hooks.clone(),
                ResultSlot::new(),
            ))?;

            let mut env = registry
                .environment()?
                .context("no context environment installed")?;
            let stages = if stages.is_empty() {
                vec!["source".to_string(), "sink".to_string()]
            } else {
                stages
            };
            for stage in stages {
                env.add_stage(Stage::new(stage));
            }
            info!("{}", env);

            let execution = env.execute(&job_name);
            tokio::pin!(execution);
            let outcome = tokio::select! {
                outcome = &mut execution => outcome,
                signal = run_hooks_on_signal(hooks.clone()) => match signal {
                    Ok(name) => {
                        warn!("Interrupted by {}", name);
                        registry.uninstall();
                        std::process::exit(130);
                    }
                    Err(_) => execution.await,
                },
            };
            let result = outcome?;
            print_result(&result, json)?;

            if follow && result.is_detached() {
                follow_job(&client, &result, json).await?;
            }

            registry.uninstall();
        }

        Commands::Config { json } => {
            configuration.set(&ATTACHED, configuration.get(&ATTACHED)?);
            configuration.set(
                &SHUTDOWN_ON_ATTACHED_EXIT,
                configuration.get(&SHUTDOWN_ON_ATTACHED_EXIT)?,
            );
            configuration.set(&DEFAULT_PARALLELISM, configuration.get(&DEFAULT_PARALLELISM)?);
            configuration.set(
                &SHUTDOWN_CANCEL_TIMEOUT_MS,
                configuration.get(&SHUTDOWN_CANCEL_TIMEOUT_MS)?,
            );
            configuration.set(
                &LOCAL_STAGE_DURATION_MS,
                configuration.get(&LOCAL_STAGE_DURATION_MS)?,
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&configuration)?);
            } else {
                println!("Configuration ({} keys)", configuration.len());
                for (key, value) in configuration.iter() {
                    println!("  {} = {}", key, value);
                }
            }
        }
    }

    Ok(())
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", result);
        if let ExecutionResult::Attached(r) = result {
            for (name, value) in &r.accumulators {
                println!("  {}: {}", name, value);
            }
        }
    }
    Ok(())
}

/// Reattach to a detached job and wait for it, logging stage progress.
async fn follow_job(client: &LocalClusterClient, result: &ExecutionResult, json: bool) -> Result<()> {
    let job_id = result.job_id();
    let handle = client
        .handle(&job_id)
        .await
        .with_context(|| format!("job {} is unknown to the cluster", job_id))?;

    let completion = handle.await_result();
    tokio::pin!(completion);
    let mut progress = tokio::time::interval(std::time::Duration::from_millis(50));
    let mut last_done = None;

    loop {
        tokio::select! {
            outcome = &mut completion => {
                let finished: ExecutionResult = outcome?.into();
                return print_result(&finished, json);
            }
            _ = progress.tick() => {
                if let Some(JobState::Running { stages_done }) = client.job_state(&job_id).await {
                    if last_done != Some(stages_done) {
                        info!("Job {}: {} stage(s) done", job_id, stages_done);
                        last_done = Some(stages_done);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_configuration_merges_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobctx.json");
        std::fs::write(&path, r#"{"attached": true, "default-parallelism": 2}"#).unwrap();

        let configuration = load_configuration(
            Some(&path),
            &["attached=false".to_string(), "shutdown-on-attached-exit=true".to_string()],
        )
        .unwrap();

        assert!(!configuration.get(&ATTACHED).unwrap());
        assert!(configuration.get(&SHUTDOWN_ON_ATTACHED_EXIT).unwrap());
        assert_eq!(configuration.get(&DEFAULT_PARALLELISM).unwrap(), 2);
    }

    #[test]
    fn test_load_configuration_rejects_bad_property() {
        assert!(load_configuration(None, &["attached".to_string()]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_detached_job() {
        let client = Arc::new(LocalClusterClient::new());
        let mut env = jobctx_env::ContextEnvironment::new(
            client.clone(),
            Configuration::new().with(&ATTACHED, false),
            ShutdownHooks::new(),
            ResultSlot::new(),
        )
        .unwrap();
        env.add_stage(Stage::new("read")).add_stage(Stage::new("write"));

        let result = env.execute("follow").await.unwrap();
        assert!(result.is_detached());
        follow_job(&client, &result, true).await.unwrap();
        assert!(client.job_state(&result.job_id()).await.unwrap().is_finished());

        let unknown = ExecutionResult::detached(jobctx_core::JobId::new());
        assert!(follow_job(&client, &unknown, false).await.is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "jobctx", "run", "wordcount", "--stage", "read", "--stage", "count", "--detached",
            "-D", "local.stage-duration-ms=10",
        ])
        .unwrap();
        assert_eq!(cli.properties, vec!["local.stage-duration-ms=10".to_string()]);
        match cli.command {
            Commands::Run {
                job_name,
                stages,
                detached,
                ..
            } => {
                assert_eq!(job_name, "wordcount");
                assert_eq!(stages, vec!["read", "count"]);
                assert!(detached);
            }
            _ => panic!("Wrong command"),
        }
    }
}
