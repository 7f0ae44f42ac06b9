use crate::config::HistoryTemplate;

pub const DEFAULT_TURN_FORMAT: &str = "User: {{input}}\nAssistant: {{output}}";

const INPUT_PLACEHOLDER: &str = "{{input}}";
const OUTPUT_PLACEHOLDER: &str = "{{output}}";

/// One completed exchange of an iterative session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub input: String,
    pub output: String,
}

impl HistoryTemplate {
    pub fn turn_format(&self) -> &str {
        match self {
            HistoryTemplate::Flat(format) => format,
            HistoryTemplate::Structured { turn_format, .. } => turn_format,
        }
    }

    pub fn system_prefix(&self) -> Option<&str> {
        match self {
            HistoryTemplate::Flat(_) => None,
            HistoryTemplate::Structured { system_prefix, .. } => system_prefix.as_deref(),
        }
    }
}

/// Substitutes both placeholders in a single pass, so placeholder text inside an input or
/// output is left alone.
pub fn render_turn(format: &str, input: &str, output: &str) -> String {
    let mut rendered = String::with_capacity(format.len() + input.len() + output.len());
    let mut rest = format;
    while let Some(idx) = rest.find("{{") {
        rendered.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if let Some(after) = tail.strip_prefix(INPUT_PLACEHOLDER) {
            rendered.push_str(input);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(OUTPUT_PLACEHOLDER) {
            rendered.push_str(output);
            rest = after;
        } else {
            rendered.push_str("{{");
            rest = &tail[2..];
        }
    }
    rendered.push_str(rest);
    rendered
}

/// Prompt for the next iterative turn: the optional preamble, every prior turn in order, then
/// the new input, newline-separated. With no prior turns the input is returned unchanged.
pub fn render_with_history(
    template: Option<&HistoryTemplate>,
    turns: &[HistoryTurn],
    input: &str,
) -> String {
    if turns.is_empty() {
        return input.to_string();
    }

    let format = template.map_or(DEFAULT_TURN_FORMAT, HistoryTemplate::turn_format);
    let mut parts: Vec<String> = Vec::with_capacity(turns.len() + 2);
    if let Some(prefix) = template.and_then(HistoryTemplate::system_prefix) {
        parts.push(prefix.to_string());
    }
    parts.extend(
        turns
            .iter()
            .map(|turn| render_turn(format, &turn.input, &turn.output)),
    );
    parts.push(input.to_string());
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns() -> Vec<HistoryTurn> {
        vec![
            HistoryTurn {
                input: "2+2?".to_string(),
                output: "4".to_string(),
            },
            HistoryTurn {
                input: "times 3?".to_string(),
                output: "12".to_string(),
            },
        ]
    }

    #[test]
    fn third_turn_concatenates_prior_turns_then_input() {
        let template = HistoryTemplate::Flat("User: {{input}}\nAssistant: {{output}}".to_string());
        let rendered = render_with_history(Some(&template), &turns(), "minus 1?");
        assert_eq!(
            rendered,
            "User: 2+2?\nAssistant: 4\nUser: times 3?\nAssistant: 12\nminus 1?"
        );
    }

    #[test]
    fn first_turn_is_sent_verbatim() {
        let template = HistoryTemplate::Structured {
            system_prefix: Some("Context:".to_string()),
            turn_format: "Q: {{input}} A: {{output}}".to_string(),
        };
        assert_eq!(render_with_history(Some(&template), &[], "hello"), "hello");
    }

    #[test]
    fn structured_template_prepends_preamble_once() {
        let template = HistoryTemplate::Structured {
            system_prefix: Some("Context:".to_string()),
            turn_format: "Q: {{input}} A: {{output}}".to_string(),
        };
        assert_eq!(
            render_with_history(Some(&template), &turns(), "next"),
            "Context:\nQ: 2+2? A: 4\nQ: times 3? A: 12\nnext"
        );
    }

    #[test]
    fn default_format_applies_without_template() {
        let rendered = render_with_history(None, &turns()[..1], "again");
        assert_eq!(rendered, "User: 2+2?\nAssistant: 4\nagain");
    }

    #[test]
    fn placeholders_inside_values_are_not_expanded() {
        assert_eq!(
            render_turn("{{input}}|{{output}}|{{other}}", "{{output}}", "x"),
            "{{output}}|x|{{other}}"
        );
    }
}
