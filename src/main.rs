use std::io::{self, Write};
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use translation_arena::cli::{resolve_models, Args, Command, RateTarget, TranslateArgs};
use translation_arena::render;
use translation_arena::{ArenaClient, ArenaConfig, ArenaError, Controller, Phase, Rating};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".bright_red().bold(), e.to_string().bright_red());
            ExitCode::FAILURE
        }
    }
}

// Logs go to stderr; stdout carries the rendered translations.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,translation_arena=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<(), ArenaError> {
    if let Command::Completions { shell } = args.command {
        clap_complete::generate(shell, &mut Args::command(), "translation-arena", &mut io::stdout());
        return Ok(());
    }

    let mut config = ArenaConfig::load(args.config.as_deref())?;
    if let Some(url) = args.base_url {
        config.base_url = url;
        config.validate()?;
    }
    let client = ArenaClient::new(config)?;

    match args.command {
        Command::Models => {
            let models = client.available_models().await?;
            println!("{}", render::render_models(&models));
            Ok(())
        }
        Command::Translate(opts) => translate(client, opts).await,
        Command::Completions { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// translate
// ---------------------------------------------------------------------------

async fn translate(client: ArenaClient, opts: TranslateArgs) -> Result<(), ArenaError> {
    let models = if opts.models.is_empty() {
        let available = client.available_models().await?;
        resolve_models(&opts.models, &available)
    } else {
        opts.models.clone()
    };

    let mut controller = Controller::new(client);
    controller.translate(&opts.text, models)?;
    println!("{}", "Translating...".bright_cyan().bold());
    stream_progress(&mut controller).await;

    if opts.retry_failed {
        let failed = controller
            .session()
            .map(|s| s.errored_models())
            .unwrap_or_default();
        if !failed.is_empty() {
            for model in &failed {
                if let Err(e) = controller.retry(model) {
                    warn!(model = %model, error = %e, "retry not started");
                }
            }
            stream_progress(&mut controller).await;
        }
    }

    let Some(session) = controller.session() else {
        return Ok(());
    };
    println!("\n{}\n", render::render_session(session));
    if session.phase() == Phase::AuthBlocked {
        return Err(ArenaError::Auth("log in and try again".to_string()));
    }
    if opts.no_vote || !session.can_vote() {
        return Ok(());
    }

    apply_flag_ratings(&mut controller, &opts.ratings)?;
    if opts.interactive {
        prompt_ratings(&mut controller).await?;
    }

    let rated = controller
        .session()
        .is_some_and(|s| s.slots().any(|slot| slot.rating.is_some()));
    if !rated {
        println!(
            "{}",
            "No ratings given; rate with --rate CARD=VALUE or --interactive to vote.".dimmed()
        );
        return Ok(());
    }

    for notice in controller.submit_votes().await? {
        println!("{}", render::render_notice(&notice));
    }
    match controller.session() {
        Some(session) if session.is_revealed() => {
            println!("\n{}", render::render_session(session));
            Ok(())
        }
        _ => Err(ArenaError::Submission("votes were not recorded".to_string())),
    }
}

async fn stream_progress(controller: &mut Controller) {
    controller
        .run_until_settled(|session, applied| {
            for model in &applied.changed {
                if let Some((index, slot)) = session
                    .slots()
                    .enumerate()
                    .find(|(_, slot)| &slot.model_id == model)
                {
                    println!("{}", render::status_line(slot, index));
                }
            }
            for notice in &applied.notices {
                println!("{}", render::render_notice(notice));
            }
        })
        .await;
}

fn apply_flag_ratings(
    controller: &mut Controller,
    ratings: &[(RateTarget, Rating)],
) -> Result<(), ArenaError> {
    for (target, rating) in ratings {
        let model = controller
            .session()
            .and_then(|s| target.resolve(s))
            .ok_or_else(|| ArenaError::validation(format!("no translation for {}", target)))?;
        controller.rate(&model, *rating)?;
    }
    Ok(())
}

async fn prompt_ratings(controller: &mut Controller) -> Result<(), ArenaError> {
    let Some(session) = controller.session() else {
        return Ok(());
    };
    let scale = session.rating_scale();
    let targets: Vec<(usize, String)> = session
        .slots()
        .enumerate()
        .filter(|(_, slot)| slot.is_filled())
        .map(|(index, slot)| (index, slot.model_id.clone()))
        .collect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    for (index, model) in targets {
        loop {
            print!(
                "Rate {} [1-{}, r=reject, Enter=skip]: ",
                render::card_label(index).bright_cyan(),
                scale
            );
            io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                return Ok(());
            };
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            let rated = line
                .parse::<Rating>()
                .map_err(ArenaError::Validation)
                .and_then(|rating| controller.rate(&model, rating));
            match rated {
                Ok(()) => break,
                Err(e) => println!("{}", e.to_string().yellow()),
            }
        }
    }
    Ok(())
}
