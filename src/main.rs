use anyhow::Context;
use clap::Parser;
use mender::analysis::{analyze, AnalysisRequest};
use mender::config::{Args, Config, Settings};
use mender::context;
use mender::display::Display;
use mender::llm::ModelClient;
use mender::patch::apply::FixApplier;
use mender::patch::confirm::ConfirmationGate;
use mender::patch::run::run_fixes;
use std::io::IsTerminal;
use std::process::ExitCode;

const INTERRUPTED_EXIT: i32 = 130;

/// Default log filter when `RUST_LOG` is unset. The terminal view owns the
/// screen while it is up, so only errors are let through then.
fn default_filter(debug: bool, view: bool) -> &'static str {
    if debug {
        "mender=debug"
    } else if view {
        "mender=error"
    } else {
        "mender=info"
    }
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    // Debug logging needs a plain terminal.
    let use_view = !args.no_ui && !args.debug && std::io::stdout().is_terminal();
    init_tracing(default_filter(args.debug, use_view));

    let work_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("Error: cannot determine working directory: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let settings = Settings::load();
    let config = match Config::resolve(args, &settings, work_dir, |key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let display = if use_view {
        Display::with_terminal().unwrap_or_else(|err| {
            tracing::warn!("terminal view unavailable ({}); falling back to plain output", err);
            Display::headless()
        })
    } else {
        Display::headless()
    };

    tokio::select! {
        result = run(&config, display.clone()) => {
            display.dispose();
            match result {
                Ok(code) => code,
                Err(err) => {
                    eprintln!("Error: {:#}", err);
                    ExitCode::FAILURE
                }
            }
        }
        _ = tokio::signal::ctrl_c() => exit_interrupted(&display),
    }
}

/// Restore the terminal and leave now. Returning from `main` instead would
/// wait on blocking tasks, such as a confirmation prompt reading stdin.
fn exit_interrupted(display: &Display) -> ! {
    display.dispose();
    eprintln!("Interrupted.");
    std::process::exit(INTERRUPTED_EXIT);
}

/// Gather, analyze and (in fix mode) repair, up to `max_iterations` times.
async fn run(config: &Config, display: Display) -> anyhow::Result<ExitCode> {
    let mut display = display;
    let mut client = ModelClient::new(config, Some(display.clone()))?;
    let test_command = config.test_command_line();

    for iteration in 1..=config.max_iterations {
        if iteration > 1 {
            tracing::info!("repair iteration {}/{}", iteration, config.max_iterations);
        }

        let repo = context::gather(config, &display)
            .await
            .context("Failed to gather repository context")?;
        if iteration > 1 && repo.tests_passed {
            eprintln!("Tests pass after {} repair iteration(s).", iteration - 1);
            return Ok(ExitCode::SUCCESS);
        }
        if repo.tests_passed {
            tracing::info!("test command passed; analyzing anyway");
        }

        let request = AnalysisRequest {
            test_command: &test_command,
            system_prompt: config.system_prompt.as_deref(),
            fix: config.fix,
        };
        let response = analyze(&client, &request, &repo).await?;

        let shown_in_view = display.has_terminal();
        display.dispose();

        if !config.fix {
            println!("{}", response);
            return Ok(ExitCode::SUCCESS);
        }
        if shown_in_view || !config.stream {
            eprintln!("{}", response);
        }

        // Prompts need a cooked terminal, so the fix stage reports as plain text.
        let fix_display = Display::headless();
        client.set_display(Some(fix_display.clone()));
        let gate = ConfirmationGate::stdin();
        let applier = FixApplier::new(
            &client,
            &config.work_dir,
            config.auto_apply,
            &gate,
            &fix_display,
        );
        let summary = run_fixes(&response, &applier).await;
        eprintln!("{}", summary.message());

        if summary.files_modified == 0 {
            return Ok(ExitCode::FAILURE);
        }
        display = fix_display;
    }

    Ok(ExitCode::SUCCESS)
}
