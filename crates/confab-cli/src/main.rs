//! Confab command-line client.

use clap::{Parser, Subcommand};
use confab_client::{
    Credentials, Installation, Session, SessionConfig, SessionEvent,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod config;
mod store;

use config::CliConfig;
use store::SessionStore;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(
        "no installation configured; pass --installation or run `confab login` first"
    )]
    MissingInstallation,
    #[error("no credentials; pass --api-key/--username or run `confab login` first")]
    MissingCredentials,
    #[error("no usable config directory on this platform")]
    NoConfigDir,
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Client(#[from] confab_client::ClientError),
}

/// Confab chat client
#[derive(Parser, Debug)]
#[command(name = "confab")]
#[command(about = "Command-line client for the Confab chat service")]
#[command(version)]
struct Cli {
    /// Installation base URL, e.g. https://digitalcrew.teamwork.com
    #[arg(long, env = "CONFAB_INSTALLATION")]
    installation: Option<String>,

    /// API key (logged in with the key-login flow)
    #[arg(long, env = "CONFAB_API_KEY")]
    api_key: Option<String>,

    /// Reuse an existing tw-auth session token
    #[arg(long, env = "CONFAB_AUTH")]
    auth: Option<String>,

    /// Username for password login
    #[arg(long, env = "CONFAB_USERNAME")]
    username: Option<String>,

    /// Password for password login
    #[arg(long, env = "CONFAB_PASSWORD")]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and cache the session
    Login,
    /// Show the logged-in user
    Whoami,
    /// List people on the installation
    People,
    /// List rooms
    Rooms,
    /// Send a message to a handle (or #room-title)
    Send {
        /// Recipient: a handle, or #title for a room
        to: String,
        /// Message text
        message: String,
    },
    /// Print events as they arrive
    Listen,
    /// Run an echo bot that answers direct messages and mentions
    Bot {
        /// Reply text; `{message}` is replaced with the triggering content
        #[arg(long, default_value = "you said: {message}")]
        reply: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confab_cli=info,confab_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = CliConfig::default_path()?;
    let mut file_config = CliConfig::load(&config_path)?;
    let store_path = SessionStore::default_path()?;
    let mut sessions = SessionStore::load(&store_path)?;

    let session = build_session(&cli, &file_config, &sessions)?;
    session.connect().await?;

    let result = run(&cli.command, &session).await;

    if let Some(user) = session.current_user() {
        if let Some(token) = session.wire().http().token() {
            let installation = session
                .wire()
                .http()
                .installation()
                .base()
                .to_string();
            sessions.record_login(user.person.id(), &installation, &token);
            sessions.save(&store_path)?;
            file_config.installation = Some(installation);
            file_config.auth = Some(token);
            file_config.save(&config_path)?;
        }
    }

    session.close().await;
    result
}

fn build_session(
    cli: &Cli,
    file_config: &CliConfig,
    sessions: &SessionStore,
) -> Result<Session, CliError> {
    let cached = sessions.any_login();

    let installation = cli
        .installation
        .clone()
        .or_else(|| file_config.installation.clone())
        .or_else(|| cached.as_ref().map(|(installation, _)| installation.clone()))
        .ok_or(CliError::MissingInstallation)?;

    let credentials = if let Some(key) = &cli.api_key {
        Credentials::ApiKey(key.clone())
    } else if let Some(token) = &cli.auth {
        Credentials::Token(token.clone())
    } else if let (Some(username), Some(password)) = (&cli.username, &cli.password) {
        Credentials::Login { username: username.clone(), password: password.clone() }
    } else if let Some(token) = &file_config.auth {
        Credentials::Token(token.clone())
    } else if let Some((_, token)) = cached {
        Credentials::Token(token)
    } else {
        return Err(CliError::MissingCredentials);
    };

    let installation = Installation::new(&installation)?;
    Ok(Session::new(SessionConfig::new(installation, credentials)))
}

async fn run(command: &Command, session: &Session) -> Result<(), CliError> {
    match command {
        Command::Login | Command::Whoami => {
            let user = session.current_user().ok_or(CliError::MissingCredentials)?;
            println!(
                "@{} ({}) on installation {}",
                user.person.handle(),
                user.person.full_name(),
                user.installation_id
            );
            Ok(())
        }
        Command::People => {
            let mut people = session.get_all_people().await?;
            people.sort_by_key(|p| p.handle());
            for person in people {
                println!(
                    "@{:<20} {:<24} {}",
                    person.handle(),
                    person.full_name(),
                    person.status().as_str()
                );
            }
            Ok(())
        }
        Command::Rooms => {
            for room in session.get_all_rooms().await? {
                let title = room.title().unwrap_or_else(|| {
                    let handles: Vec<String> = room.handles();
                    format!("({})", handles.join(", "))
                });
                println!(
                    "{:<8} {:<10} unread={} {}",
                    room.id().map_or_else(|| "-".to_string(), |id| id.to_string()),
                    format!("{:?}", room.kind()).to_lowercase(),
                    room.unread_count(),
                    title
                );
            }
            Ok(())
        }
        Command::Send { to, message } => {
            let sent = if let Some(title) = to.strip_prefix('#') {
                let room = session.get_room_by_title(title).await?;
                session.send_message(&room, message).await?
            } else {
                let person = session.get_person_by_handle(to).await?;
                session.send_message_to_person(&person, message).await?
            };
            println!("sent message {} to {to}", sent.id());
            Ok(())
        }
        Command::Listen => {
            let mut events = session.events();
            println!("listening; ctrl-c to stop");
            while let Ok(event) = events.recv().await {
                print_event(&event);
            }
            Ok(())
        }
        Command::Bot { reply } => {
            let template = reply.clone();
            println!("bot running; ctrl-c to stop");
            bot::Bot::new(session.clone(), move |_trigger, content: &str| {
                bot::Reply::Text(template.replace("{message}", content))
            })
            .run()
            .await;
            Ok(())
        }
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Message { room, message } => {
            let author = match message.author() {
                confab_client::Author::Person(person) => format!("@{}", person.handle()),
                confab_client::Author::Id(id) => format!("#{id}"),
                confab_client::Author::Unknown => "?".to_string(),
            };
            let target = room
                .title()
                .unwrap_or_else(|| format!("room {}", room.id().unwrap_or_default()));
            println!("[{target}] {author}: {}", message.content());
        }
        SessionEvent::MessageMention { message, .. } => {
            println!("*** mentioned: {}", message.content());
        }
        SessionEvent::RoomTyping { person, is_typing, .. } => {
            if *is_typing {
                println!("… @{} is typing", person.handle());
            }
        }
        SessionEvent::Disconnect => println!("-- disconnected"),
        SessionEvent::Reconnect { downtime, .. } => {
            println!("-- reconnected after {downtime:?}");
        }
        other => println!("-- {}", other.kind()),
    }
}
