use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, ATTACH_COMMAND, GENERATION_COMMANDS, GENERATION_OPTION_KEYS, NO_ARG_COMMANDS,
    RAW_ARG_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_words(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// Splits leading `key=value` options off a generation prompt.
fn parse_generation_args(arg: &str) -> (BTreeMap<String, Value>, String) {
    let mut options = BTreeMap::new();
    let mut rest = arg.trim_start();
    loop {
        let word_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let word = &rest[..word_len];
        let Some((key, value)) = word.split_once('=') else {
            break;
        };
        let key = key.to_ascii_lowercase();
        if !GENERATION_OPTION_KEYS.contains(&key.as_str()) || value.is_empty() {
            break;
        }
        options.insert(key, Value::String(value.to_string()));
        rest = rest[word_len..].trim_start();
    }
    (options, rest.trim().to_string())
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, GENERATION_COMMANDS) {
                let (options, prompt) = parse_generation_args(arg);
                let mut intent = Intent::new(action, text);
                intent.command_args = options;
                intent.prompt = Some(prompt);
                return intent;
            }

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("value".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == ATTACH_COMMAND.command {
                let mut words = split_words(arg).into_iter();
                let mut intent = Intent::new(ATTACH_COMMAND.action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(words.next().unwrap_or_default()),
                );
                intent.prompt = Some(words.collect::<Vec<_>>().join(" "));
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("chat", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_chat() {
        let intent = parse_intent("  what is rust?  ");
        assert_eq!(intent.action, "chat");
        assert_eq!(intent.prompt.as_deref(), Some("what is rust?"));
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn imagine_with_options() {
        let intent = parse_intent("/imagine model=Anime resolution=Wide a fox in the snow");
        assert_eq!(intent.action, "generate_image");
        assert_eq!(intent.command_args["model"], json!("Anime"));
        assert_eq!(intent.command_args["resolution"], json!("Wide"));
        assert_eq!(intent.prompt.as_deref(), Some("a fox in the snow"));
    }

    #[test]
    fn unknown_option_keys_stay_in_prompt() {
        let intent = parse_intent("/imagine style=oil a=b painting");
        assert!(intent.command_args.is_empty());
        assert_eq!(intent.prompt.as_deref(), Some("style=oil a=b painting"));
    }

    #[test]
    fn speech_language_option() {
        let intent = parse_intent("/speech language=French bonjour tout le monde");
        assert_eq!(intent.action, "generate_speech");
        assert_eq!(intent.arg("language"), Some("French"));
        assert_eq!(intent.prompt.as_deref(), Some("bonjour tout le monde"));
    }

    #[test]
    fn settings_commands() {
        let model = parse_intent("/image_model Kandinsky");
        assert_eq!(model.action, "set_image_model");
        assert_eq!(model.arg("value"), Some("Kandinsky"));

        let persona = parse_intent("/persona Answer like a pirate.");
        assert_eq!(persona.action, "set_instructions");
        assert_eq!(persona.arg("value"), Some("Answer like a pirate."));

        assert_eq!(parse_intent("/style").action, "toggle_style");
        assert_eq!(parse_intent("/STOP").action, "stop");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn attach_takes_quoted_path_and_message() {
        let intent = parse_intent("/attach \"/tmp/my notes.txt\" summarize this");
        assert_eq!(intent.action, "chat");
        assert_eq!(intent.arg("path"), Some("/tmp/my notes.txt"));
        assert_eq!(intent.prompt.as_deref(), Some("summarize this"));
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
