// Terminal display surface: the same session actions as the web page, one line at a time.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use crate::language::Language;
use crate::session::{SendOutcome, SessionController, SessionState};

#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Empty,
    Text(&'a str),
    Reset,
    Language(&'a str),
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> ChatInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    // A doubled slash sends the rest, single slash included, as a message.
    if trimmed.starts_with("//") {
        return ChatInput::Text(&trimmed[1..]);
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatInput::Text(line.trim_end_matches(['\r', '\n']));
    };
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, arg)| (name, arg.trim()));
    match name {
        "reset" | "clear" => ChatInput::Reset,
        "language" | "lang" => ChatInput::Language(arg),
        "quit" | "exit" => ChatInput::Quit,
        _ => ChatInput::Unknown(name),
    }
}

const HELP: &str = "Type a message and press Enter. Commands: /reset, /language <English|Hindi|Malayalam|Tamil>, /quit. Start a message with // to send a leading slash";

/// Drives one session over any line reader/writer pair. Returns the final state.
pub async fn run_chat<R, W>(
    controller: &SessionController,
    mut state: SessionState,
    input: R,
    mut output: W,
) -> Result<SessionState>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output
        .write_all(format!("{}\nLanguage: {}\n", HELP, state.language()).as_bytes())
        .await?;
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let reply = match parse_input(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Reset => {
                state.reset();
                "Chat cleared.".to_string()
            }
            // Typed names are matched leniently, then set by their exact label.
            ChatInput::Language(choice) => match choice
                .parse::<Language>()
                .and_then(|language| state.select_language(language.label()))
            {
                Ok(language) => format!("Language: {}", language),
                Err(e) => format!("{}. Language is still {}.", e, state.language()),
            },
            ChatInput::Unknown(name) => format!("Unknown command /{}. {}", name, HELP),
            ChatInput::Text(text) => {
                let language = state.language();
                match controller.send(&mut state, text, language).await {
                    SendOutcome::Replied => {
                        let last = state.transcript().messages().last();
                        format!("AI: {}", last.map(|m| m.text.as_str()).unwrap_or_default())
                    }
                    SendOutcome::Failed(_) => format!(
                        "AI [error]: {}",
                        state.notice().map(|n| n.text.as_str()).unwrap_or_default()
                    ),
                    SendOutcome::Ignored => continue,
                }
            }
        };
        output.write_all(format!("{}\n", reply).as_bytes()).await?;
        output.flush().await?;
        // A fresh prompt line is an empty input field.
        state.acknowledge_clear();
    }

    Ok(state)
}

pub async fn run_terminal_chat(controller: &SessionController, language: Language) -> Result<()> {
    info!(%language, "Starting terminal chat session...");
    let state = run_chat(
        controller,
        SessionState::with_language(language),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;
    info!(messages = state.transcript().len(), "Chat session finished.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationError, GenerationService};
    use crate::session::Message;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Canned(Result<String, GenerationError>);

    #[async_trait]
    impl GenerationService for Canned {
        async fn generate(&self, _: &[Message], _: &str) -> Result<String, GenerationError> {
            self.0.clone()
        }
    }

    fn controller(reply: Result<String, GenerationError>) -> SessionController {
        SessionController::new(Arc::new(Canned(reply)), Duration::from_secs(5))
    }

    async fn drive(controller: &SessionController, script: &str) -> (SessionState, String) {
        let mut out = Vec::new();
        let state = run_chat(controller, SessionState::new(), script.as_bytes(), &mut out)
            .await
            .unwrap();
        (state, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("   "), ChatInput::Empty);
        assert_eq!(parse_input("hello there"), ChatInput::Text("hello there"));
        assert_eq!(parse_input("/reset"), ChatInput::Reset);
        assert_eq!(parse_input("/language  Tamil "), ChatInput::Language("Tamil"));
        assert_eq!(parse_input("/lang"), ChatInput::Language(""));
        assert_eq!(parse_input("/quit"), ChatInput::Quit);
        assert_eq!(parse_input("/dance"), ChatInput::Unknown("dance"));
    }

    #[test]
    fn test_parse_input_slash_escape() {
        assert_eq!(parse_input("// I feel low"), ChatInput::Text("/ I feel low"));
        assert_eq!(parse_input("  //reset"), ChatInput::Text("/reset"));
        assert_eq!(parse_input("//"), ChatInput::Text("/"));
    }

    #[tokio::test]
    async fn test_chat_sends_escaped_slash_message() {
        let controller = controller(Ok("I'm here.".to_string()));
        let (state, out) = drive(&controller, "// I feel low\n").await;

        assert!(out.contains("AI: I'm here."));
        assert_eq!(
            state.transcript().messages()[0].text,
            "/ I feel low\n\nRespond in English"
        );
    }

    #[tokio::test]
    async fn test_chat_language_is_lenient() {
        let controller = controller(Ok("ok".to_string()));
        let (state, out) = drive(&controller, "/language tamil\n").await;

        assert!(out.contains("Language: Tamil"));
        assert_eq!(state.language(), Language::Tamil);
    }

    #[tokio::test]
    async fn test_chat_prints_reply() {
        let controller = controller(Ok("I'm sorry to hear that.".to_string()));
        let (state, out) = drive(&controller, "I feel anxious\n/quit\nignored\n").await;

        assert!(out.contains("AI: I'm sorry to hear that."));
        assert_eq!(state.transcript().len(), 2);
        assert!(!state.pending_clear());
    }

    #[tokio::test]
    async fn test_chat_reset_and_language() {
        let controller = controller(Ok("ok".to_string()));
        let (state, out) = drive(&controller, "hi\n/language Hindi\n/language Dutch\n/reset\n").await;

        assert!(out.contains("Language: Hindi"));
        assert!(out.contains("Language is still Hindi"));
        assert!(out.contains("Chat cleared."));
        assert!(state.transcript().is_empty());
        assert_eq!(state.language(), Language::Hindi);
    }

    #[tokio::test]
    async fn test_chat_reports_failure_and_continues() {
        let controller = controller(Err(GenerationError::RateLimited));
        let (state, out) = drive(&controller, "hello\n").await;

        assert!(out.contains("AI [error]: Too many requests"));
        assert!(state.transcript().is_empty());
    }
}
