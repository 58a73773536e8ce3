use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chatline_backend::{BackendConfig, BackendError, ChatBackend, HttpBackend};
use chatline_chat::{AttachedFile, ChatSession, MessageId, RecordedAudioDictation, StillImageFile};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::commands::{self, Command, HELP};
use crate::render::{ReplyRenderer, history_line};
use crate::settings::{ClientSettings, SettingsStore};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReplError {
    #[snafu(display("failed to set up the backend on `{stage}`, {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type ReplResult<T> = Result<T, ReplError>;

/// Line-oriented front end. Sends run as background tasks so `/stop` stays responsive.
pub struct Repl {
    settings: SettingsStore,
    backend: Arc<dyn ChatBackend>,
    session: Arc<ChatSession>,
    renderer: JoinHandle<()>,
}

enum Flow {
    Continue,
    Quit,
}

impl Repl {
    pub fn new(settings: SettingsStore) -> ReplResult<Self> {
        let current = settings.settings();
        let (backend, session) = build_session(&current)?;
        let renderer = spawn_renderer(&session);
        restore_identity(&session, &current);

        Ok(Self {
            settings,
            backend,
            session,
            renderer,
        })
    }

    pub async fn run(mut self) -> ReplResult<()> {
        println!("chatline, /help for commands");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
            stage: "read-line",
        })? {
            let command = match commands::parse(&line) {
                Ok(command) => command,
                Err(error) => {
                    println!("{error}");
                    continue;
                }
            };
            if let Flow::Quit = self.handle(command, &mut lines).await? {
                break;
            }
        }

        self.session.cancel();
        self.renderer.abort();
        Ok(())
    }

    async fn handle(
        &mut self,
        command: Command,
        lines: &mut Lines<BufReader<Stdin>>,
    ) -> ReplResult<Flow> {
        match command {
            Command::Send(text) => self.spawn_send(text),
            Command::Attach(path) => match AttachedFile::read_from_path(&path).await {
                Ok(file) => report_staged(&file, self.session.stage_file(file.clone())),
                Err(error) => println!("{error}"),
            },
            Command::Capture(path) => {
                let provider = StillImageFile::new(path.clone());
                match self.session.capture_image(&provider).await {
                    Ok(true) => println!("staged {}", path.display()),
                    Ok(false) => println!("{} is already staged", path.display()),
                    Err(error) => println!("{error}"),
                }
            }
            Command::Dictate(recording) => self.dictate(recording, lines).await?,
            Command::Files => self.print_files(),
            Command::Remove(number) => {
                match number.checked_sub(1).and_then(|index| self.session.remove_staged(index)) {
                    Some(file) => println!("removed {}", file.name),
                    None => println!("no staged file {number}"),
                }
            }
            Command::Stop => {
                if !self.session.cancel() {
                    println!("nothing to stop");
                }
            }
            Command::Rate { message_id, kind } => {
                match self
                    .session
                    .report_feedback(MessageId::new(message_id), kind)
                    .await
                {
                    Ok(()) => println!("{} recorded", kind.as_str()),
                    Err(error) => println!("{error}"),
                }
            }
            Command::Contact { kind, message } => {
                match self.session.submit_contact(kind, &message).await {
                    Ok(()) => println!("thank you for your response"),
                    Err(error) => println!("{error}"),
                }
            }
            Command::Identify { email, name } => self.identify(email, name).await,
            Command::Logout => {
                self.session.sign_out();
                self.save_identity(String::new(), String::new());
                println!("signed out");
            }
            Command::Login => match self.session.login_url() {
                Ok(url) => println!("open {url} in a browser to sign in"),
                Err(error) => println!("{error}"),
            },
            Command::History => {
                for message in self.session.messages() {
                    println!("{}", history_line(&message));
                }
            }
            Command::Reload => self.reload()?,
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn spawn_send(&self, text: String) {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            // Failures are already rendered from session events.
            if let Err(error) = session.send(&text).await {
                tracing::debug!(error = %error, "send ended without a reply");
            }
        });
    }

    async fn dictate(
        &self,
        recording: PathBuf,
        lines: &mut Lines<BufReader<Stdin>>,
    ) -> ReplResult<()> {
        let provider = RecordedAudioDictation::new(Arc::clone(&self.backend), recording)
            .with_timeout(self.settings.settings().request_timeout());
        println!("recording, press Enter when done");

        let mut stop_read: std::io::Result<Option<String>> = Ok(None);
        let until = async {
            stop_read = lines.next_line().await;
        };
        let transcript = self.session.dictate(&provider, until).await;
        stop_read.context(ReadInputSnafu {
            stage: "wait-dictation-stop",
        })?;

        match transcript {
            Ok(transcript) => {
                println!("you said: {transcript}");
                self.spawn_send(transcript);
            }
            Err(error) => println!("{error}"),
        }
        Ok(())
    }

    fn print_files(&self) {
        let staged = self.session.staged();
        if staged.is_empty() {
            println!("no files staged");
        }
        for (index, file) in staged.iter().enumerate() {
            println!("{}. {} ({} bytes, {})", index + 1, file.name, file.size, file.mime_type);
        }
    }

    async fn identify(&self, email: String, name: String) {
        match self.session.identify(email.clone(), name.clone()).await {
            Ok(()) => println!("signed in as {}", if name.is_empty() { &email } else { &name }),
            Err(error) => println!("identity kept locally, {error}"),
        }
        self.save_identity(email, name);
    }

    fn save_identity(&self, email: String, name: String) {
        if let Err(error) = self.settings.save_identity(email, name) {
            tracing::warn!(error = %error, "failed to save identity");
        }
    }

    /// Swaps in fresh settings. A new backend means a new conversation.
    fn reload(&mut self) -> ReplResult<()> {
        if self.session.state().active_send().is_some() {
            println!("a reply is in progress, /stop it first");
            return Ok(());
        }

        let current = self.settings.reload();
        let (backend, session) = build_session(&current)?;
        self.renderer.abort();
        self.renderer = spawn_renderer(&session);
        restore_identity(&session, &current);
        self.backend = backend;
        self.session = session;

        println!(
            "settings reloaded from {}, new conversation",
            self.settings.config_path().display()
        );
        Ok(())
    }
}

fn build_session(
    settings: &ClientSettings,
) -> ReplResult<(Arc<dyn ChatBackend>, Arc<ChatSession>)> {
    let backend: Arc<dyn ChatBackend> = Arc::new(
        HttpBackend::new(BackendConfig::new(settings.base_url.clone())).context(BackendSnafu {
            stage: "build-backend",
        })?,
    );
    let session = Arc::new(ChatSession::new(
        Arc::clone(&backend),
        settings.session_options(),
    ));
    Ok((backend, session))
}

fn restore_identity(session: &Arc<ChatSession>, settings: &ClientSettings) {
    if !settings.has_identity() {
        return;
    }

    let session = Arc::clone(session);
    let email = settings.email.clone();
    let name = settings.name.clone();
    tokio::spawn(async move {
        if let Err(error) = session.identify(email, name).await {
            tracing::warn!(error = %error, "failed to register saved identity");
        }
    });
}

fn spawn_renderer(session: &ChatSession) -> JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        let mut renderer = ReplyRenderer::new();
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(output) = renderer.render(&event) {
                        print!("{output}");
                        let _ = std::io::stdout().flush();
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "renderer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn report_staged(file: &AttachedFile, staged: bool) {
    if staged {
        println!("staged {} ({} bytes, {})", file.name, file.size, file.mime_type);
    } else {
        println!("{} is already staged", file.name);
    }
}
