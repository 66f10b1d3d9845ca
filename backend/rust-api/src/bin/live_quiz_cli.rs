// Admin command line for live quizzes: lifecycle control and room watching.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use livequiz_api::client::{
    ClientError, HttpLiveQuizApi, RealtimeChannel, RosterReconciler, SessionController,
};
use livequiz_api::models::live_quiz::CreateLiveQuizRequest;
use livequiz_api::models::{RoomId, ServerMessage, SessionSnapshot};
use livequiz_api::utils::time::{local_offset, parse_utc_offset};

#[derive(Parser)]
#[command(name = "live-quiz-cli")]
#[command(about = "Control and watch live quiz sessions", long_about = None)]
struct Cli {
    /// Server root URL
    #[arg(short, long, env = "LIVEQUIZ_SERVER", default_value = "http://127.0.0.1:8081")]
    server: String,

    /// Admin bearer token
    #[arg(short, long, env = "LIVEQUIZ_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a draft quiz
    Create {
        #[arg(long)]
        title: String,

        #[arg(long)]
        department: Option<String>,

        /// Time limit in seconds; omit for an untimed quiz
        #[arg(long)]
        time_limit: Option<i64>,
    },

    /// List quizzes, optionally for one department
    List {
        #[arg(long)]
        department: Option<String>,
    },

    /// Show a quiz's current state
    Status { quiz_id: String },

    Start { quiz_id: String },

    End { quiz_id: String },

    /// Schedule a live window from local wall-clock times
    Schedule {
        quiz_id: String,

        /// e.g. 2026-05-01T10:00 (or an RFC 3339 instant)
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Offset the local times are read in, e.g. +05:30; defaults to this machine's
        #[arg(long)]
        utc_offset: Option<String>,
    },

    CancelSchedule { quiz_id: String },

    /// Join a quiz room as an observer and print its events until it ends
    Watch { quiz_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livequiz_api=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut api = HttpLiveQuizApi::new(&cli.server)?;
    if let Some(token) = &cli.token {
        api = api.with_token(token);
    }
    let api = Arc::new(api);

    let result = match cli.command {
        Commands::Create {
            title,
            department,
            time_limit,
        } => {
            let request = CreateLiveQuizRequest {
                title,
                department_id: department,
                time_limit,
            };
            api.create(&request).await.map(|s| print_snapshot(&s))
        }
        Commands::List { department } => api.list(department.as_deref()).await.map(|sessions| {
            for session in &sessions {
                println!(
                    "{}\t{}\t{}",
                    session.quiz_id, session.status, session.title
                );
            }
        }),
        Commands::Status { quiz_id } => {
            let controller = SessionController::new(api.clone(), quiz_id);
            controller.refresh().await.map(|s| print_snapshot(&s))
        }
        Commands::Start { quiz_id } => {
            let controller = SessionController::new(api.clone(), quiz_id);
            match controller.refresh().await {
                Ok(_) => controller.start().await.map(|s| print_snapshot(&s)),
                Err(e) => Err(e),
            }
        }
        Commands::End { quiz_id } => {
            let controller = SessionController::new(api.clone(), quiz_id);
            match controller.refresh().await {
                Ok(_) => controller.end().await.map(|s| print_snapshot(&s)),
                Err(e) => Err(e),
            }
        }
        Commands::Schedule {
            quiz_id,
            start,
            end,
            utc_offset,
        } => {
            let offset = match utc_offset {
                Some(raw) => parse_utc_offset(&raw)?,
                None => local_offset(),
            };
            let controller = SessionController::new(api.clone(), quiz_id);
            match controller.refresh().await {
                Ok(_) => controller
                    .schedule_local(&start, &end, offset)
                    .await
                    .map(|s| print_snapshot(&s)),
                Err(e) => Err(e),
            }
        }
        Commands::CancelSchedule { quiz_id } => {
            let controller = SessionController::new(api.clone(), quiz_id);
            match controller.refresh().await {
                Ok(_) => controller.cancel_schedule().await.map(|s| print_snapshot(&s)),
                Err(e) => Err(e),
            }
        }
        Commands::Watch { quiz_id } => {
            return watch(&api, &quiz_id).await;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(exit_code(&e));
    }
    Ok(())
}

async fn watch(api: &HttpLiveQuizApi, quiz_id: &str) -> anyhow::Result<()> {
    let url = api.realtime_url()?;
    let channel = RealtimeChannel::connect(url.as_str())
        .await
        .context("Failed to open realtime channel")?;

    let room = RoomId::quiz(quiz_id);
    let mut roster = RosterReconciler::new(room.clone());
    let mut subscription = channel.join_room(room, None)?;

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else {
                    eprintln!("Connection closed");
                    break;
                };
                roster.apply(&event);
                print_event(&event, &roster);
                if matches!(event, ServerMessage::Ended { .. }) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(subscription);
    channel.dispose();
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    println!("quiz:      {}", snapshot.quiz_id);
    println!("title:     {}", snapshot.title);
    println!("status:    {}", snapshot.status);
    if let Some(limit) = snapshot.time_limit {
        println!("limit:     {}s", limit);
    }
    if let Some(started_at) = snapshot.started_at {
        println!("started:   {}", started_at.to_rfc3339());
    }
    if let (Some(start), Some(end)) = (snapshot.live_start_at, snapshot.live_end_at) {
        println!("window:    {} .. {}", start.to_rfc3339(), end.to_rfc3339());
    } else if let Some(end) = snapshot.live_end_at {
        println!("closes:    {}", end.to_rfc3339());
    }
    if let Some(reason) = snapshot.end_reason {
        println!("ended:     {}", reason.as_str());
    }
}

fn print_event(event: &ServerMessage, roster: &RosterReconciler) {
    match event {
        ServerMessage::Joined { session, .. } => {
            println!("joined; quiz is {}", session.status);
        }
        ServerMessage::Status { status, .. } => println!("status: {}", status),
        ServerMessage::Roster { .. } => {
            let names: Vec<&str> = roster
                .participants()
                .iter()
                .map(|p| p.display_name.as_str())
                .collect();
            println!("roster ({}): {}", names.len(), names.join(", "));
        }
        ServerMessage::TimerSnapshot { snapshot, .. } => {
            println!(
                "timer: {}s of {}s left",
                snapshot.remaining_seconds, snapshot.total_seconds
            );
        }
        ServerMessage::Ended { reason, .. } => println!("ended: {}", reason.as_str()),
        ServerMessage::ErrorNotice { message, .. } => eprintln!("notice: {}", message),
        other => tracing::debug!(event = other.event_name(), "Ignored event"),
    }
}

fn exit_code(err: &ClientError) -> i32 {
    match err {
        ClientError::Transport(_) => 3,
        ClientError::AccessDenied(_) => 4,
        _ => 1,
    }
}
