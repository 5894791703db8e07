use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::protocol::ModelInfo;
use crate::reconciler::StreamSession;
use crate::slot::Rating;

#[derive(Parser)]
#[command(name = "translation-arena")]
#[command(version)]
#[command(about = "Stream translations from several models side by side, rate them blind, vote")]
pub struct Args {
    /// Path to a TOML config file (defaults to $ARENA_CONFIG, then ./arena.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL, overriding config and environment
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the models the backend offers
    Models,
    /// Translate text with several models and rate the results
    Translate(TranslateArgs),
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args)]
pub struct TranslateArgs {
    /// Source text to translate
    pub text: String,

    /// Model to ask; repeat for more (defaults to the backend's selection)
    #[arg(long = "model", short = 'm')]
    pub models: Vec<String>,

    /// Rate a translation: CARD=VALUE or MODEL=VALUE, VALUE being stars or "reject"
    #[arg(long = "rate", value_parser = parse_rate_arg)]
    pub ratings: Vec<(RateTarget, Rating)>,

    /// Retry every failed model once after the stream ends
    #[arg(long)]
    pub retry_failed: bool,

    /// Prompt for a rating per translation
    #[arg(long, short)]
    pub interactive: bool,

    /// Show the translations without voting
    #[arg(long)]
    pub no_vote: bool,
}

/// Which translation a `--rate` flag points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateTarget {
    /// 1-based card number as printed.
    Card(usize),
    Model(String),
}

impl RateTarget {
    /// Resolve to a model id within `session`.
    pub fn resolve(&self, session: &StreamSession) -> Option<String> {
        match self {
            RateTarget::Card(n) => session
                .slots()
                .nth(n.checked_sub(1)?)
                .map(|s| s.model_id.clone()),
            RateTarget::Model(m) => session.slot(m).map(|s| s.model_id.clone()),
        }
    }
}

impl fmt::Display for RateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateTarget::Card(n) => write!(f, "card {}", n),
            RateTarget::Model(m) => write!(f, "model {}", m),
        }
    }
}

pub fn parse_rate_arg(s: &str) -> Result<(RateTarget, Rating), String> {
    let (target, value) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected TARGET=VALUE, got '{}'", s))?;
    let target = target.trim();
    if target.is_empty() {
        return Err(format!("missing card or model in '{}'", s));
    }
    let target = match target.parse::<usize>() {
        Ok(0) => return Err("cards are numbered from 1".to_string()),
        Ok(n) => RateTarget::Card(n),
        Err(_) => RateTarget::Model(target.to_string()),
    };
    Ok((target, value.parse::<Rating>()?))
}

/// Models to request: the explicit `-m` list when given, otherwise every
/// model the backend marks as selected by default.
pub fn resolve_models(explicit: &[String], available: &[ModelInfo]) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    available
        .iter()
        .filter(|m| m.selected)
        .map(|m| m.key.clone())
        .collect()
}
