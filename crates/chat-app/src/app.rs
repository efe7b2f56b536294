use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use hiwar_llm::{ProviderError, ResponseProvider, create_provider};
use hiwar_storage::StorageError;
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::chat::{
    ChatResult, ChatSession, ConversationId, Role, SendOutcome, conversation_preview,
};
use crate::database::{ConversationRepository, open_backend};
use crate::debounce::{DebounceSender, debounce};
use crate::settings::ChatSettings;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to open conversation storage on `{stage}`: {source}"))]
    OpenStorage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to create response provider on `{stage}`: {source}"))]
    CreateProvider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// Installs the fmt subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Opens storage, builds the provider and restores the session described by `settings`.
pub async fn bootstrap(settings: &ChatSettings) -> AppResult<ChatSession> {
    let backend = open_backend(&settings.storage)
        .await
        .context(OpenStorageSnafu {
            stage: "bootstrap-open-backend",
        })?;
    let provider = create_provider(settings.provider.to_provider_config()).context(
        CreateProviderSnafu {
            stage: "bootstrap-create-provider",
        },
    )?;

    let repository = ConversationRepository::from_settings(backend, &settings.storage);
    Ok(session_with(settings, provider, repository))
}

pub fn session_with(
    settings: &ChatSettings,
    provider: Arc<dyn ResponseProvider>,
    repository: ConversationRepository,
) -> ChatSession {
    ChatSession::new(settings.session_config(), provider, repository)
}

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New(Option<String>),
    List,
    Select(ConversationId),
    Delete(ConversationId),
    Rename { id: ConversationId, title: String },
    Search(String),
    Retry,
    Cancel,
    Clear,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, rest)| (name, rest.trim()));
        match (name, rest) {
            ("new", "") => Self::New(None),
            ("new", title) => Self::New(Some(title.to_string())),
            ("list", _) => Self::List,
            ("select", id) if !id.is_empty() => Self::Select(ConversationId::new(id)),
            ("delete", id) if !id.is_empty() => Self::Delete(ConversationId::new(id)),
            ("rename", rest) => match rest.split_once(char::is_whitespace) {
                Some((id, title)) if !title.trim().is_empty() => Self::Rename {
                    id: ConversationId::new(id),
                    title: title.trim().to_string(),
                },
                _ => Self::Invalid("usage: /rename <id> <title>".to_string()),
            },
            ("search", term) => Self::Search(term.to_string()),
            ("retry", _) => Self::Retry,
            ("cancel", _) => Self::Cancel,
            ("clear", _) => Self::Clear,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            ("select" | "delete", _) => Self::Invalid(format!("usage: /{name} <id>")),
            _ => Self::Invalid(format!("unknown command: /{name}")),
        }
    }
}

const HELP: &str = "/new [title]  /list  /select <id>  /delete <id>  /rename <id> <title>\n\
/search <term>  /retry  /cancel  /clear  /quit";

type PendingSend = JoinHandle<ChatResult<Option<SendOutcome>>>;

/// Line-oriented front end. Sends run in the background so `/cancel` and
/// other commands stay responsive; `/search` output is debounced.
pub async fn run<R, W>(
    session: ChatSession,
    settings: &ChatSettings,
    input: R,
    mut output: W,
) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let (search_sender, mut searches) = debounce::<String>(settings.search_debounce());
    let mut pending = FuturesUnordered::<PendingSend>::new();

    write_line(&mut output, HELP).await?;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.context(ReadInputSnafu { stage: "read-command-line" })?;
                let Some(line) = line else { break };
                let command = Command::parse(&line);
                if command == Command::Quit {
                    break;
                }
                if let Some(task) =
                    handle_command(&session, command, &search_sender, &mut output).await?
                {
                    pending.push(task);
                }
            }
            Some(term) = searches.next() => {
                write_search_results(&session, &term, &mut output).await?;
            }
            Some(finished) = pending.next(), if !pending.is_empty() => {
                write_send_result(&session, finished, &mut output).await?;
            }
        }
    }

    drop(search_sender);
    while let Some(term) = searches.next().await {
        write_search_results(&session, &term, &mut output).await?;
    }
    while let Some(finished) = pending.next().await {
        write_send_result(&session, finished, &mut output).await?;
    }
    Ok(())
}

async fn handle_command<W>(
    session: &ChatSession,
    command: Command,
    search_sender: &DebounceSender<String>,
    output: &mut W,
) -> AppResult<Option<PendingSend>>
where
    W: AsyncWrite + Unpin,
{
    match command {
        Command::Send(content) => {
            let session = session.clone();
            return Ok(Some(tokio::spawn(async move {
                session.send_message(&content).await.map(Some)
            })));
        }
        Command::Retry => {
            let session = session.clone();
            return Ok(Some(tokio::spawn(
                async move { session.retry_last_message().await },
            )));
        }
        Command::New(title) => {
            let id = session.create_conversation(title.as_deref());
            write_line(output, &format!("created {id}")).await?;
        }
        Command::List => {
            let current = session.snapshot().current_conversation_id;
            for conversation in session.conversations() {
                let marker = if current.as_ref() == Some(&conversation.id) {
                    "*"
                } else {
                    " "
                };
                let line = format!(
                    "{marker} {} | {} | {}",
                    conversation.id,
                    conversation.title,
                    conversation_preview(&conversation.messages)
                );
                write_line(output, &line).await?;
            }
        }
        Command::Select(id) => {
            let line = if session.select_conversation(&id) {
                format!("selected {id}")
            } else {
                format!("no conversation {id}")
            };
            write_line(output, &line).await?;
        }
        Command::Delete(id) => {
            let line = if session.delete_conversation(&id) {
                format!("deleted {id}")
            } else {
                format!("no conversation {id}")
            };
            write_line(output, &line).await?;
        }
        Command::Rename { id, title } => {
            let line = if session.rename_conversation(&id, &title) {
                format!("renamed {id}")
            } else {
                format!("no conversation {id}")
            };
            write_line(output, &line).await?;
        }
        Command::Search(term) => {
            search_sender.send(term);
        }
        Command::Cancel => {
            if !session.cancel_active_send() {
                write_line(output, "nothing to cancel").await?;
            }
        }
        Command::Clear => {
            session.clear_current_conversation();
            session.clear_error();
            write_line(output, "cleared").await?;
        }
        Command::Help => write_line(output, HELP).await?,
        Command::Invalid(message) => write_line(output, &message).await?,
        Command::Empty | Command::Quit => {}
    }
    Ok(None)
}

async fn write_search_results<W>(session: &ChatSession, term: &str, output: &mut W) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let matches = session.filtered_conversations(term);
    write_line(output, &format!("search \"{term}\": {} match(es)", matches.len())).await?;
    for conversation in matches {
        write_line(output, &format!("  {} | {}", conversation.id, conversation.title)).await?;
    }
    for hit in session.search(term) {
        if let Some(index) = hit.message_index {
            let line = format!("  {}#{index}: {}", hit.conversation_id, hit.match_text);
            write_line(output, &line).await?;
        }
    }
    Ok(())
}

async fn write_send_result<W>(
    session: &ChatSession,
    finished: Result<ChatResult<Option<SendOutcome>>, tokio::task::JoinError>,
    output: &mut W,
) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let line = match finished {
        Err(error) => {
            tracing::warn!(error = %error, "send task ended abnormally");
            format!("error: {error}")
        }
        Ok(Err(error)) => format!("error: {error}"),
        Ok(Ok(None)) => "nothing to retry".to_string(),
        Ok(Ok(Some(SendOutcome::Completed {
            conversation_id, ..
        }))) => session
            .conversation(&conversation_id)
            .and_then(|conversation| {
                conversation
                    .messages
                    .iter()
                    .rev()
                    .find(|message| message.role == Role::Assistant)
                    .map(|message| format!("assistant: {}", message.content))
            })
            .unwrap_or_else(|| format!("reply dropped: {conversation_id} no longer exists")),
        Ok(Ok(Some(SendOutcome::Failed { error, .. }))) => format!("error: {error}"),
        Ok(Ok(Some(SendOutcome::Aborted { .. }))) => "cancelled".to_string(),
    };
    write_line(output, &line).await
}

async fn write_line<W>(output: &mut W, line: &str) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    output
        .write_all(format!("{line}\n").as_bytes())
        .await
        .context(WriteOutputSnafu {
            stage: "write-output-line",
        })?;
    output.flush().await.context(WriteOutputSnafu {
        stage: "flush-output",
    })
}
