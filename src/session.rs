use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::model::{ChatRequest, GenerationOptions, Message};
use crate::model_gateway::{ModelGateway, reborrow_echo};

const MAX_HISTORY_MESSAGES: usize = 40;
const CHAT_NUM_PREDICT: u32 = 512;
const TRANSCRIPT_DIR: &str = "data/logs";

pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful, concise assistant. \
Answer in the user's language. \
Do NOT repeat the user's message. \
Provide a direct, useful answer.";

/// Free-form chat history for the interactive shell.
pub struct ChatSession<'a, G> {
    gateway: &'a G,
    cfg: &'a Config,
    history: Vec<Message>,
    system_messages: Vec<Message>,
}

impl<'a, G> ChatSession<'a, G>
where
    G: ModelGateway,
{
    pub fn new(gateway: &'a G, cfg: &'a Config) -> Self {
        let system_messages = vec![Message::system(CHAT_SYSTEM_PROMPT)];
        let history = system_messages.clone();
        Self {
            gateway,
            cfg,
            history,
            system_messages,
        }
    }

    pub fn reset(&mut self) {
        self.history = self.system_messages.clone();
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &[Message] {
        &self.history
    }

    /// Appends a completed exchange. Failed turns are never recorded.
    pub fn record(&mut self, user_input: &str, reply: &str) {
        self.history.push(Message::user(user_input));
        self.history.push(Message::assistant(reply));
        self.trim_history();
    }

    pub async fn run_turn(
        &mut self,
        user_input: &str,
        echo: Option<&mut (dyn Write + Send)>,
    ) -> Result<String> {
        let mut echo = echo;
        let mut messages = self.history.clone();
        messages.push(Message::user(user_input));

        let request = ChatRequest {
            model: self.cfg.model.clone(),
            messages,
            options: GenerationOptions {
                num_predict: Some(CHAT_NUM_PREDICT),
                ..GenerationOptions::from_config(self.cfg, self.cfg.num_ctx)
            },
        };
        let reply = self
            .gateway
            .chat(request, reborrow_echo(&mut echo))
            .await?;

        self.record(user_input, &reply);
        Ok(reply)
    }

    /// Writes the history as JSON lines, creating parent directories.
    pub fn save_transcript(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create '{}'", dir.display()))?;
        }

        let file = File::create(path)
            .with_context(|| format!("Failed to create transcript '{}'", path.display()))?;
        let mut writer = BufWriter::new(file);
        for message in &self.history {
            serde_json::to_writer(&mut writer, message)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        info!(
            path = %path.display(),
            message_count = self.history.len(),
            "saved chat transcript"
        );
        Ok(())
    }

    fn trim_history(&mut self) {
        if self.history.len() <= MAX_HISTORY_MESSAGES {
            return;
        }

        // Exchanges are user/assistant pairs; drop whole pairs only.
        let system_len = self.system_messages.len();
        let exchanges = &self.history[system_len.min(self.history.len())..];
        let keep_tail = MAX_HISTORY_MESSAGES.saturating_sub(system_len) / 2 * 2;
        let tail_start = exchanges.len().saturating_sub(keep_tail);

        let mut trimmed = self.system_messages.clone();
        trimmed.extend_from_slice(&exchanges[tail_start..]);
        self.history = trimmed;
    }
}

pub fn default_transcript_path() -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    Path::new(TRANSCRIPT_DIR).join(format!("chat_{stamp}.jsonl"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{CHAT_SYSTEM_PROMPT, ChatSession, MAX_HISTORY_MESSAGES, default_transcript_path};
    use crate::config::Config;
    use crate::model::{Message, MessageRole};
    use crate::model_gateway::testing::ScriptedGateway;

    #[tokio::test]
    async fn turns_send_history_and_record_replies() {
        let cfg = Config::default();
        let gateway = ScriptedGateway::replying(&["Salom!", "Yaxshi."]);
        let mut session = ChatSession::new(&gateway, &cfg);

        session.run_turn("salom", None).await.expect("first turn");
        session.run_turn("qalaysan?", None).await.expect("second turn");

        let chats = gateway.chats.borrow();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].messages.len(), 2);
        assert_eq!(chats[0].messages[0].content, CHAT_SYSTEM_PROMPT);
        assert_eq!(chats[1].messages.len(), 4);
        assert_eq!(chats[1].messages[2], Message::assistant("Salom!"));
        assert_eq!(chats[1].options.num_predict, Some(512));
        assert_eq!(session.history().len(), 5);
    }

    #[tokio::test]
    async fn failed_turns_leave_history_untouched() {
        let cfg = Config::default();
        let gateway = ScriptedGateway::failing("boom");
        let mut session = ChatSession::new(&gateway, &cfg);

        assert!(session.run_turn("salom", None).await.is_err());
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn reset_keeps_only_the_system_prompt() {
        let cfg = Config::default();
        let gateway = ScriptedGateway::default();
        let mut session = ChatSession::new(&gateway, &cfg);
        session.record("a", "b");
        session.reset();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, MessageRole::System);
    }

    #[test]
    fn history_is_trimmed_but_keeps_system_prompt() {
        let cfg = Config::default();
        let gateway = ScriptedGateway::default();
        let mut session = ChatSession::new(&gateway, &cfg);
        for idx in 0..MAX_HISTORY_MESSAGES {
            session.record(&format!("q{idx}"), &format!("a{idx}"));
        }

        let history = session.history();
        assert!(history.len() <= MAX_HISTORY_MESSAGES);
        assert_eq!(history[0].role, MessageRole::System);
        assert_eq!(history[1].role, MessageRole::User);
        assert_eq!(
            history.last().map(|message| message.content.as_str()),
            Some(format!("a{}", MAX_HISTORY_MESSAGES - 1).as_str())
        );
    }

    #[test]
    fn trimmed_history_alternates_user_and_assistant() {
        let cfg = Config::default();
        let gateway = ScriptedGateway::default();
        let mut session = ChatSession::new(&gateway, &cfg);
        for idx in 0..(MAX_HISTORY_MESSAGES * 2 + 3) {
            session.record(&format!("q{idx}"), &format!("a{idx}"));
        }

        let exchanges = &session.history()[1..];
        assert_eq!(exchanges.len() % 2, 0);
        for pair in exchanges.chunks(2) {
            assert_eq!(pair[0].role, MessageRole::User);
            assert_eq!(pair[1].role, MessageRole::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }

    #[test]
    fn transcript_is_written_as_json_lines() {
        let cfg = Config::default();
        let gateway = ScriptedGateway::default();
        let mut session = ChatSession::new(&gateway, &cfg);
        session.record("привет", "здравствуйте");

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("refiner-transcript-{stamp}"));
        let path = dir.join("nested").join("chat.jsonl");
        session.save_transcript(&path).expect("save should succeed");

        let contents = fs::read_to_string(&path).expect("transcript should exist");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: Message = serde_json::from_str(lines[1]).expect("valid json line");
        assert_eq!(parsed, Message::user("привет"));
        assert!(lines[2].contains(r#""role":"assistant""#));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn default_transcript_path_is_timestamped() {
        let path = default_transcript_path();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name");
        assert!(path.starts_with("data/logs"));
        assert!(name.starts_with("chat_") && name.ends_with(".jsonl"));
        assert_eq!(name.len(), "chat_20250101_120000.jsonl".len());
    }
}
