//! Terminal rendering. Everything here is a pure function of session state;
//! printing is left to the caller.

use colored::*;

use crate::protocol::ModelInfo;
use crate::reconciler::{Notice, Phase, StreamSession};
use crate::slot::{Slot, SlotState};

pub const HIDDEN_MODEL_LABEL: &str = "model hidden";

pub fn card_label(index: usize) -> String {
    format!("Translation {}", index + 1)
}

pub fn format_cost(cost: f64) -> String {
    format!("${:.6}", cost)
}

/// One line per model for `models`, with the output price when known.
pub fn render_models(models: &[ModelInfo]) -> String {
    if models.is_empty() {
        return "No models available".yellow().to_string();
    }
    let width = models.iter().map(|m| m.key.len()).max().unwrap_or(0);
    models
        .iter()
        .map(|m| {
            let marker = if m.selected { "*" } else { " " };
            let price = match m.output_cost {
                Some(out) => format!("${}/m", trim_price(out)).bright_green().to_string(),
                None => String::new(),
            };
            let key = format!("{:<width$}", m.key, width = width);
            format!("{} {}  {}  {}", marker, key.bright_white(), m.name, price)
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn trim_price(price: f64) -> String {
    let text = format!("{:.2}", price);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Short progress line for one slot, used while results stream in.
pub fn status_line(slot: &Slot, index: usize) -> String {
    let label = card_label(index);
    match &slot.state {
        SlotState::Pending if slot.retrying => format!("{} {}", label, "retrying...".yellow()),
        SlotState::Pending => format!("{} {}", label, "waiting...".dimmed()),
        SlotState::Filled(payload) => format!(
            "{} {} ({})",
            label,
            "received".bright_green(),
            format_cost(payload.cost)
        ),
        SlotState::Errored(msg) => format!("{} {} {}", label, "failed:".bright_red(), msg),
    }
}

/// Full card for one slot. The model id stays hidden until `revealed`.
pub fn render_card(slot: &Slot, index: usize, revealed: bool) -> String {
    let mut header = format!("── {} ──", card_label(index)).bright_cyan().bold().to_string();
    let model = if revealed {
        slot.model_id.bright_white().to_string()
    } else {
        HIDDEN_MODEL_LABEL.dimmed().to_string()
    };
    header.push_str(&format!(" [{}]", model));
    if slot.duplicate {
        header.push_str(&format!(" {}", "[duplicate]".yellow()));
    }

    let mut lines = vec![header];
    match &slot.state {
        SlotState::Pending if slot.retrying => lines.push("Retrying...".yellow().to_string()),
        SlotState::Pending => lines.push("Waiting for translation...".dimmed().to_string()),
        SlotState::Filled(payload) => {
            lines.push(payload.text.clone());
            let rating = match slot.rating {
                Some(r) => r.to_string(),
                None => "unrated".dimmed().to_string(),
            };
            lines.push(format!(
                "{} {}   {} {}",
                "Rating:".bright_yellow(),
                rating,
                "Cost:".bright_yellow(),
                format_cost(payload.cost)
            ));
        }
        SlotState::Errored(msg) => {
            lines.push(format!("{} {}", "Error:".bright_red(), msg));
            lines.push("(retry with --retry-failed)".dimmed().to_string());
        }
    }
    lines.join("\n")
}

pub fn render_session(session: &StreamSession) -> String {
    let revealed = session.is_revealed();
    let mut out: Vec<String> = session
        .slots()
        .enumerate()
        .map(|(i, slot)| render_card(slot, i, revealed))
        .collect();

    out.push(format!(
        "{} {}",
        "Total cost:".bright_yellow(),
        format_cost(session.total_cost())
    ));
    let phase = match session.phase() {
        Phase::Streaming => "streaming".yellow(),
        Phase::Completed => "complete".bright_green(),
        Phase::Disconnected => "interrupted".bright_red(),
        Phase::AuthBlocked => "login required".bright_red(),
    };
    out.push(format!("{} {}", "Status:".bright_yellow(), phase));
    out.join("\n\n")
}

pub fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::Info(msg) => msg.bright_blue().to_string(),
        Notice::Success(msg) => msg.bright_green().to_string(),
        Notice::Error(msg) => msg.bright_red().to_string(),
        Notice::AuthPrompt(msg) => format!("{} {}", "[login]".on_red().bright_white(), msg.bright_red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TranslationResult;
    use crate::reconciler::{SessionEvent, TranslationRequest};
    use crate::slot::{Rating, SlotPayload};

    fn plain() {
        colored::control::set_override(false);
    }

    fn filled(model: &str) -> Slot {
        let mut slot = Slot::pending(model);
        slot.state = SlotState::Filled(SlotPayload {
            result_id: 1,
            text: "ދިވެހި".into(),
            cost: 0.0015,
            fingerprint: None,
            preset: None,
        });
        slot
    }

    #[test]
    fn test_card_hides_model_until_revealed() {
        plain();
        let slot = filled("gemini-2.5-pro");
        let hidden = render_card(&slot, 0, false);
        assert!(hidden.contains("Translation 1"));
        assert!(hidden.contains(HIDDEN_MODEL_LABEL));
        assert!(!hidden.contains("gemini-2.5-pro"));

        let shown = render_card(&slot, 0, true);
        assert!(shown.contains("gemini-2.5-pro"));
        assert!(shown.contains("ދިވެހި"));
    }

    #[test]
    fn test_card_states() {
        plain();
        let mut slot = Slot::pending("m");
        assert!(render_card(&slot, 1, false).contains("Waiting for translation"));
        slot.retrying = true;
        assert!(render_card(&slot, 1, false).contains("Retrying"));
        slot.retrying = false;
        slot.state = SlotState::Errored("rate limited".into());
        let card = render_card(&slot, 1, false);
        assert!(card.contains("Translation 2"));
        assert!(card.contains("rate limited"));
        assert!(card.contains("--retry-failed"));
    }

    #[test]
    fn test_card_duplicate_and_rating() {
        plain();
        let mut slot = filled("m");
        slot.duplicate = true;
        slot.rating = Some(Rating::Stars(2));
        let card = render_card(&slot, 0, false);
        assert!(card.contains("[duplicate]"));
        assert!(card.contains("★★"));
        assert!(card.contains("$0.001500"));
    }

    #[test]
    fn test_format_cost_six_decimals() {
        assert_eq!(format_cost(0.002 + 0.001), "$0.003000");
        assert_eq!(format_cost(0.0), "$0.000000");
    }

    #[test]
    fn test_render_session_total_and_order() {
        plain();
        let request = TranslationRequest::new("hi", ["a", "b"]).unwrap();
        let mut session = StreamSession::new(1, request, 3);
        session.apply(SessionEvent::Result(TranslationResult {
            model: "b".into(),
            id: 2,
            query_id: 1,
            translation: "from b".into(),
            cost: 0.25,
            response_hash: None,
            preset: None,
        }));
        let text = render_session(&session);
        let first = text.find("Translation 1").unwrap();
        let from_b = text.find("from b").unwrap();
        assert!(first < text.find("Waiting for translation").unwrap());
        assert!(text.find("Translation 2").unwrap() < from_b);
        assert!(text.contains("Total cost: $0.250000"));
        assert!(text.contains("streaming"));
    }

    #[test]
    fn test_render_models_with_price() {
        plain();
        let models = vec![
            ModelInfo {
                key: "gpt-4o".into(),
                name: "GPT-4o".into(),
                input_cost: Some(2.5),
                output_cost: Some(10.0),
                selected: true,
            },
            ModelInfo {
                key: "claude".into(),
                name: "Claude".into(),
                input_cost: None,
                output_cost: None,
                selected: false,
            },
        ];
        let text = render_models(&models);
        assert!(text.contains("$10/m"));
        assert!(text.lines().next().unwrap().starts_with('*'));
        assert!(text.lines().nth(1).unwrap().ends_with("Claude"));
    }

    #[test]
    fn test_status_line() {
        plain();
        let slot = filled("m");
        assert!(status_line(&slot, 2).contains("Translation 3 received"));
    }
}
