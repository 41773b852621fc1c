//! `boardwright complete` -- send one prompt and print the reply.
//!
//! The reply goes to stdout; usage goes to stderr so output can be piped.
//!
//! # Example
//!
//! ```text
//! boardwright complete "Summarize this dashboard"
//! boardwright complete "Hello" --model gpt-4 --stream
//! ```

use std::io::Write;

use boardwright_core::Orchestrator;
use boardwright_llm::{Message, ModelRequest, ModelResponse, StreamChunk};
use boardwright_types::config::OrchestratorConfig;
use clap::Args;
use tokio::sync::mpsc;

/// Arguments for the `boardwright complete` subcommand.
#[derive(Args)]
pub struct CompleteArgs {
    /// Prompt text.
    pub prompt: String,

    /// Model id (defaults to the configured primary model).
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt.
    #[arg(short, long)]
    pub system: Option<String>,

    /// Upper bound on completion tokens.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 - 2.0).
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Print the reply as it streams.
    #[arg(long)]
    pub stream: bool,
}

impl CompleteArgs {
    fn to_request(&self, default_model: &str) -> ModelRequest {
        let model = self.model.as_deref().unwrap_or(default_model);
        let mut request = ModelRequest::new(model, vec![Message::user(self.prompt.clone())]);
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;
        request.system_prompt = self.system.clone();
        request
    }
}

pub async fn run(args: CompleteArgs, config: OrchestratorConfig) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(&config);
    let request = args.to_request(orchestrator.primary_model());

    let response = if args.stream {
        stream(&orchestrator, request).await?
    } else {
        let response = orchestrator.complete(request, None).await?;
        println!("{}", response.content);
        response
    };

    print_usage(&response);
    Ok(())
}

async fn stream(orchestrator: &Orchestrator, request: ModelRequest) -> anyhow::Result<ModelResponse> {
    let (tx, mut rx) = mpsc::channel::<StreamChunk>(64);
    let printer = async move {
        let mut stdout = std::io::stdout();
        while let Some(chunk) = rx.recv().await {
            // A closed stdout is not worth aborting the call for.
            let _ = stdout.write_all(chunk.delta.as_bytes());
            let _ = stdout.flush();
        }
        println!();
    };
    let (result, ()) = tokio::join!(orchestrator.stream_complete(request, None, tx), printer);
    Ok(result?)
}

fn print_usage(response: &ModelResponse) {
    let usage = &response.usage;
    let cost = usage
        .estimated_cost
        .map(|c| format!(", ~${c:.6}"))
        .unwrap_or_default();
    eprintln!(
        "[{} {}] {} prompt + {} completion = {} tokens{}, {} ms{}",
        response.provider,
        response.model,
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total_tokens,
        cost,
        response.latency_ms,
        if response.cached { ", cached" } else { "" },
    );
}
