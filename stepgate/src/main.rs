//! Command-line front end for stepgate.
//!
//! Jobs live under `.stepgate/jobs/` in the current directory. Every command
//! prints its result as pretty JSON (except `prompt`, which prints the
//! rendered markdown) and exits with a code from [`stepgate::exit_codes`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use stepgate::core::gate_spec::GateSpec;
use stepgate::core::lifecycle::TransitionOutcome;
use stepgate::core::types::{Evidence, ModelClaim, NextAction};
use stepgate::exit_codes;
use stepgate::io::config::{StepgateConfig, load_config};
use stepgate::io::file_store::FileStore;
use stepgate::io::init::{InitOptions, StepgatePaths, init_workspace};
use stepgate::io::plan_file::load_plan;
use stepgate::io::shell::HostShell;
use stepgate::logging;
use stepgate::orchestrator::{GateCheck, Orchestrator, PlanningUpdate, Submission};

type CliOrchestrator = Orchestrator<FileStore, HostShell>;

#[derive(Parser)]
#[command(
    name = "stepgate",
    version,
    about = "Evidence-gated job/step state machine for coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.stepgate/` with a default config.
    Init {
        /// Rewrite the config of an existing workspace. Jobs are kept.
        #[arg(short, long)]
        force: bool,
    },
    /// Create a job in PLANNING.
    New {
        #[arg(long)]
        title: String,
        #[arg(long)]
        goal: String,
        /// Policy overrides as a JSON object, or `@path` to a JSON file.
        #[arg(long)]
        policies: Option<String>,
    },
    /// Print the next planning-interview questions.
    Questions { job: String },
    /// Answer one interview question. VALUE is JSON; bare text is a string.
    Answer {
        job: String,
        key: String,
        value: String,
    },
    /// Compile a plan file into the job's steps.
    Plan { job: String, file: PathBuf },
    /// Move a job from PLANNING to READY.
    Ready { job: String },
    /// Move a job from READY to EXECUTING.
    Start { job: String },
    Pause { job: String },
    Resume { job: String },
    Archive { job: String },
    /// Record human approval for a step.
    Approve { job: String, step: String },
    /// Print the prompt for the current step.
    Prompt { job: String },
    /// Submit evidence for the current step.
    Submit {
        job: String,
        step: String,
        #[arg(long, value_parser = parse_claim)]
        claim: ModelClaim,
        #[arg(long, default_value = "")]
        summary: String,
        /// Evidence as a JSON object, or `@path` to a JSON file.
        #[arg(long)]
        evidence: Option<String>,
        #[arg(long)]
        devlog: Option<String>,
        #[arg(long)]
        commit: Option<String>,
    },
    /// Show one job's progress, or list every job.
    Status { job: Option<String> },
    /// Evaluate gates ad hoc without recording anything.
    Gates {
        /// JSON array of gates, or `@path` to a JSON file.
        #[arg(long)]
        gates: String,
        /// Evidence as a JSON object, or `@path` to a JSON file.
        #[arg(long)]
        evidence: Option<String>,
        /// Use this job's policies and repository root.
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        repo_root: Option<PathBuf>,
        /// Changed files, overriding `evidence.changed_files`.
        #[arg(long = "changed-file")]
        changed_files: Vec<String>,
    },
}

fn parse_claim(raw: &str) -> Result<ModelClaim, String> {
    raw.parse()
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    if let Command::Init { force } = cli.command {
        let paths = init_workspace(&root, &InitOptions { force })?;
        println!("{}", paths.stepgate_dir.display());
        return Ok(exit_codes::OK);
    }

    let orch = open_workspace(&root)?;
    match cli.command {
        Command::Init { .. } => Ok(exit_codes::OK),
        Command::New {
            title,
            goal,
            policies,
        } => {
            let policies = match policies {
                Some(raw) => {
                    let overrides = json_object(&read_json_arg(&raw)?, "policies")?;
                    Some(
                        orch.settings()
                            .default_policies
                            .merged_with(&overrides)
                            .context("parse policies")?,
                    )
                }
                None => None,
            };
            let job = orch.create_job(&title, &goal, policies)?;
            print_json(&job)?;
            Ok(exit_codes::OK)
        }
        Command::Questions { job } => {
            print_json(&orch.next_questions(&job)?)?;
            Ok(exit_codes::OK)
        }
        Command::Answer { job, key, value } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let update = PlanningUpdate::from_answer(&key, value).map_err(anyhow::Error::msg)?;
            let report = orch.update_planning(&job, update)?;
            print_json(&report)?;
            Ok(code_for(report.updated))
        }
        Command::Plan { job, file } => {
            let steps = load_plan(&file)?;
            let report = orch.compile_and_replace_steps(&job, &steps)?;
            print_json(&report)?;
            Ok(code_for(report.replaced))
        }
        Command::Ready { job } => {
            let report = orch.set_ready(&job)?;
            print_json(&report)?;
            Ok(code_for(report.ready))
        }
        Command::Start { job } => transition(orch.start(&job)?),
        Command::Pause { job } => transition(orch.pause(&job)?),
        Command::Resume { job } => transition(orch.resume(&job)?),
        Command::Archive { job } => transition(orch.archive(&job)?),
        Command::Approve { job, step } => {
            print_json(&orch.approve_step(&job, &step)?)?;
            Ok(exit_codes::OK)
        }
        Command::Prompt { job } => match orch.current_step_prompt(&job)? {
            Some(prompt) => {
                println!("{}", prompt.prompt);
                Ok(exit_codes::OK)
            }
            None => {
                eprintln!("job {job} has no active step");
                Ok(exit_codes::REJECTED)
            }
        },
        Command::Submit {
            job,
            step,
            claim,
            summary,
            evidence,
            devlog,
            commit,
        } => {
            let evidence = match evidence {
                Some(raw) => json_object(&read_json_arg(&raw)?, "evidence")?,
                None => Evidence::new(),
            };
            let outcome = orch.submit(
                &job,
                Submission {
                    step_id: step,
                    model_claim: claim,
                    summary,
                    evidence,
                    devlog_line: devlog,
                    commit_hash: commit,
                },
            )?;
            print_json(&outcome)?;
            Ok(match (outcome.accepted, outcome.next_action) {
                (true, NextAction::JobComplete) => exit_codes::COMPLETE,
                (true, _) => exit_codes::OK,
                (false, _) => exit_codes::REJECTED,
            })
        }
        Command::Status { job: Some(job) } => {
            print_json(&orch.job_snapshot(&job)?)?;
            Ok(exit_codes::OK)
        }
        Command::Status { job: None } => {
            print_json(&orch.list_jobs()?)?;
            Ok(exit_codes::OK)
        }
        Command::Gates {
            gates,
            evidence,
            job,
            repo_root,
            changed_files,
        } => {
            let gates: Vec<GateSpec> =
                serde_json::from_value(read_json_arg(&gates)?).context("parse gates")?;
            let evidence = match evidence {
                Some(raw) => json_object(&read_json_arg(&raw)?, "evidence")?,
                None => Evidence::new(),
            };
            let job = job.map(|id| orch.get_job(&id)).transpose()?;
            let policies = job.as_ref().map(|j| j.policies.clone()).unwrap_or_default();
            let repo_root = repo_root.or_else(|| job.as_ref().and_then(|j| j.effective_repo_root()));
            let report = orch.evaluate_gates(GateCheck {
                gates: &gates,
                evidence: &evidence,
                repo_root: repo_root.as_deref(),
                policies: &policies,
                changed_files: (!changed_files.is_empty()).then_some(changed_files.as_slice()),
            });
            print_json(&report)?;
            Ok(code_for(report.all_passed))
        }
    }
}

fn open_workspace(root: &Path) -> Result<CliOrchestrator> {
    let paths = StepgatePaths::new(root);
    if !paths.stepgate_dir.is_dir() {
        bail!(
            "no .stepgate workspace in {} (run `stepgate init`)",
            root.display()
        );
    }
    let config: StepgateConfig = load_config(&paths.config_path)?;
    config.validate()?;
    Ok(Orchestrator::with_settings(
        FileStore::new(paths.jobs_dir),
        HostShell,
        (&config).into(),
    ))
}

fn transition(outcome: TransitionOutcome) -> Result<i32> {
    print_json(&outcome)?;
    Ok(code_for(outcome.is_success()))
}

fn code_for(success: bool) -> i32 {
    if success {
        exit_codes::OK
    } else {
        exit_codes::REJECTED
    }
}

/// Inline JSON, or the contents of a file when prefixed with `@`.
fn read_json_arg(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("parse json argument")
}

fn json_object(value: &Value, what: &str) -> Result<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        _ => bail!("{what} must be a JSON object"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
