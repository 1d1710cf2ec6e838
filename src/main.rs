mod completion;
mod dataset;
mod image_gen;
mod orchestrator;
mod tools;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info};

use completion::{build_backend_from_env, CompletionRequest, StreamEvent, WireMessage};
use dataset::SummaryOptions;
use image_gen::{build_image_delegate_from_env, ImageAttachment};
use orchestrator::{
    CancelToken, PromptConfig, SessionState, StoredMessage, TurnReply, TurnRequest, TurnRouter,
};
use tools::ChartPayload;

#[derive(Parser, Debug)]
#[command(
    name = "tabula-cortex",
    about = "Conversational analytics over tweet exports and YouTube channel data"
)]
struct Cli {
    /// Optional one-shot prompt; if omitted the CLI enters interactive mode.
    #[arg(short, long)]
    prompt: Option<String>,

    /// CSV file to load into the session before the first turn.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Channel-data JSON file to load into the session before the first turn.
    #[arg(long)]
    channel: Option<PathBuf>,

    /// Image to attach to the first turn (base64 is derived from the file).
    #[arg(long)]
    image: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one throwaway message to the completion endpoint to verify
    /// connectivity and credentials.
    ApiSmoke,
    /// Parse a CSV file offline and print the per-column summary the model
    /// would see.
    SummarizeCsv {
        /// Path to the CSV file.
        path: PathBuf,
    },
    /// Parse a channel-data JSON file offline and print its shape.
    PeekChannel {
        /// Path to the channel JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        match command {
            Commands::ApiSmoke => return run_api_smoke().await,
            Commands::SummarizeCsv { path } => return run_summarize_csv(&path),
            Commands::PeekChannel { path } => return run_peek_channel(&path),
        }
    }

    let backend = build_backend_from_env(true).context("Completion backend initialization failed")?;
    let image_delegate =
        build_image_delegate_from_env(true).context("Image delegate initialization failed")?;
    let prompt_config = PromptConfig::from_env().context("Prompt template failed to load")?;

    let router = TurnRouter::new(backend)
        .with_image_delegate(image_delegate)
        .with_prompt(prompt_config);

    let mut session = SessionState::new();
    if let Some(path) = &cli.csv {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV from {}", path.display()))?;
        session.load_csv(&text)?;
        println!("Loaded CSV: {}", path.display());
    }
    if let Some(path) = &cli.channel {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read channel data from {}", path.display()))?;
        session.load_channel(&raw)?;
        println!("Loaded channel data: {}", path.display());
    }

    let first_images = match &cli.image {
        Some(path) => vec![load_image(path)?],
        None => Vec::new(),
    };

    let mut history: Vec<StoredMessage> = Vec::new();

    if let Some(prompt) = cli.prompt {
        let request = TurnRequest {
            text: prompt,
            images: first_images,
            csv_attached: false,
        };
        run_turn(&router, &session, &mut history, request).await?;
        return Ok(());
    }

    run_repl(&router, &session, first_images).await
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

async fn run_repl(
    router: &TurnRouter,
    session: &SessionState,
    mut pending_images: Vec<ImageAttachment>,
) -> anyhow::Result<()> {
    println!("Tabula Cortex ready. Type 'exit' to quit.\n");
    let stdin = io::stdin();
    let mut history: Vec<StoredMessage> = Vec::new();

    loop {
        print!("You > ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }
        let trimmed = buffer.trim();

        if trimmed.eq_ignore_ascii_case("exit") {
            info!("User exited CLI");
            break;
        }
        if trimmed.is_empty() {
            continue;
        }

        let request = TurnRequest {
            text: trimmed.to_owned(),
            images: std::mem::take(&mut pending_images),
            csv_attached: false,
        };
        if let Err(err) = run_turn(router, session, &mut history, request).await {
            error!(?err, "Turn failed");
            println!("Something went wrong: {err:#}\n");
        }
    }

    Ok(())
}

async fn run_turn(
    router: &TurnRouter,
    session: &SessionState,
    history: &mut Vec<StoredMessage>,
    request: TurnRequest,
) -> anyhow::Result<()> {
    let reply = router
        .dispatch(session, history, &request, CancelToken::new())
        .await?;

    match reply {
        TurnReply::Completed(outcome) => {
            if outcome.text.is_empty() && !outcome.tool_calls.is_empty() {
                println!(
                    "\nTabula ran {} tool calls but could not settle on an answer. Try rephrasing.\n",
                    outcome.tool_calls.len()
                );
            } else {
                println!("\nTabula ({}):\n{}\n", outcome.mode, outcome.text);
            }
            for chart in &outcome.charts {
                println!("  [render] {}", describe_chart(chart));
            }
            history.push(StoredMessage::user(request.text));
            history.push(StoredMessage::from_outcome(&outcome));
        }
        TurnReply::Streaming { mode, mut events } => {
            print!("\nTabula ({mode}):\n");
            let mut assembled = String::new();
            while let Some(event) = events.next().await {
                match event? {
                    StreamEvent::Text { text } => {
                        print!("{text}");
                        io::stdout().flush()?;
                        assembled.push_str(&text);
                    }
                    StreamEvent::FullResponse { parts } => {
                        for part in &parts {
                            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                                print!("{text}");
                                assembled.push_str(text);
                            }
                        }
                        io::stdout().flush()?;
                    }
                }
            }
            println!("\n");
            history.push(StoredMessage::user(request.text));
            history.push(StoredMessage::assistant(assembled));
        }
    }

    Ok(())
}

fn describe_chart(chart: &ChartPayload) -> String {
    match chart {
        ChartPayload::EngagementChart { points } => {
            format!("engagement chart ({} ranked rows)", points.len())
        }
        ChartPayload::MetricVsTimeChart { metric, points } => {
            format!("{metric} over time ({} points)", points.len())
        }
        ChartPayload::PlayVideoCard { title, video_url, .. } => {
            format!("video card: {title} ({video_url})")
        }
        ChartPayload::GeneratedImage { mime_type, prompt, .. } => {
            format!("generated image ({mime_type}) for prompt: {prompt}")
        }
        ChartPayload::ToolError { error } => format!("tool error: {error}"),
    }
}

async fn run_api_smoke() -> anyhow::Result<()> {
    let backend = build_backend_from_env(false).context("API configuration required for smoke")?;

    println!("Sending a one-message request to the completion endpoint...");
    let response = backend
        .complete(CompletionRequest {
            messages: vec![
                WireMessage::system("Reply with a single short sentence."),
                WireMessage::user("Say hello."),
            ],
            stream: false,
            tools: None,
            tool_choice: None,
        })
        .await?;

    println!("Endpoint replied: {}", response.text());
    println!("API smoke completed");
    Ok(())
}

fn run_summarize_csv(path: &std::path::Path) -> anyhow::Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV from {}", path.display()))?;

    let mut session = SessionState::new();
    session.load_csv(&text)?;
    let dataset = session.csv.as_ref().context("CSV did not load")?;

    println!("{}", dataset.summary(&SummaryOptions::default()));
    println!("\nSlim projection:\n{}", dataset.slim_csv());
    Ok(())
}

fn run_peek_channel(path: &std::path::Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read channel data from {}", path.display()))?;

    let mut session = SessionState::new();
    session.load_channel(&raw)?;
    let channel = session.channel.as_ref().context("Channel did not load")?;

    println!(
        "Channel {} ({} videos, downloaded {})",
        channel.channel_url,
        channel.videos.len(),
        channel.downloaded_at
    );
    for (idx, video) in channel.videos.iter().take(10).enumerate() {
        println!("{}", channel_video_line(idx + 1, video));
    }
    Ok(())
}

fn channel_video_line(rank: usize, video: &dataset::Video) -> String {
    format!(
        "  {}. {}: {} views, published {}",
        rank, video.title, video.view_count, video.published_at
    )
}

fn load_image(path: &std::path::Path) -> anyhow::Result<ImageAttachment> {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    let bytes =
        fs::read(path).with_context(|| format!("Failed to read image from {}", path.display()))?;
    let mime_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };

    Ok(ImageAttachment {
        data: BASE64_STANDARD.encode(bytes),
        mime_type: mime_type.to_string(),
    })
}
