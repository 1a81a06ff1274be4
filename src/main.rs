use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{info, warn};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use finrag::agents::{
    ContentExtractor, HandoutOptions, HandoutPipeline, QualityAssessor, QualityReview,
    SearchAgent, SearchDepth, SectionWriter,
};
use finrag::chunking::Chunker;
use finrag::config::AppConfig;
use finrag::database::{QdrantStore, VectorStore};
use finrag::embeddings::EmbeddingClient;
use finrag::gemini::GeminiClient;
use finrag::generation::{GenerationClient, GenerationParams};
use finrag::ingest::Ingestor;
use finrag::rag::{AnswerStatus, ChatMessage, RagPipeline};
use finrag::retriever::Retriever;
use finrag::retry::RetryPolicy;
use finrag::search::{SearchProvider, SerpApiClient};

/// Financial-literacy question answering and handout generation over a document corpus
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed and store every document of the data directory
    Ingest {
        /// Directory of source documents (defaults to DATA_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Remove all stored chunks before ingesting
        #[arg(long)]
        clear: bool,
    },
    /// Answer a single question
    Ask {
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long, default_value = "English")]
        language: String,
    },
    /// Interactive multi-turn chat; type 'exit' to quit
    Chat {
        #[arg(long, default_value = "English")]
        language: String,
    },
    /// Generate an educational handout for a topic
    Handout {
        topic: String,
        /// Skip web search augmentation even when enabled in the configuration
        #[arg(long)]
        no_search: bool,
        /// Enable web search augmentation for this run
        #[arg(long, conflicts_with = "no_search")]
        search: bool,
        #[arg(long)]
        depth: Option<SearchDepth>,
    },
    /// Show collection and provider status
    Status,
}

/// Shared providers built once from the configuration
struct Services {
    config: AppConfig,
    gemini: Arc<GeminiClient>,
    store: Arc<dyn VectorStore>,
}

impl Services {
    fn new(config: AppConfig) -> Result<Self> {
        let store = QdrantStore::new(config.qdrant.clone())
            .context("Failed to initialize Qdrant client")?;
        let gemini =
            GeminiClient::new(config.gemini.clone()).context("Failed to initialize Gemini client")?;
        Ok(Services {
            config,
            gemini: Arc::new(gemini),
            store: Arc::new(store),
        })
    }

    fn embedder(&self) -> Arc<dyn EmbeddingClient> {
        self.gemini.clone()
    }

    fn generator(&self) -> Arc<dyn GenerationClient> {
        self.gemini.clone()
    }

    /// A collection with the wrong vector size is a configuration error
    async fn ensure_collection(&self) -> Result<()> {
        let collection = &self.config.retrieval.collection;
        self.store
            .ensure_collection(collection, self.config.gemini.embedding_dimension as u64)
            .await
            .with_context(|| format!("Collection {} is not usable", collection))
    }

    fn retriever(&self) -> Retriever {
        Retriever::new(
            self.embedder(),
            self.store.clone(),
            &self.config.retrieval,
            self.config.retry,
        )
    }

    fn rag(&self) -> RagPipeline {
        RagPipeline::new(
            self.retriever(),
            self.generator(),
            self.config.retrieval.clone(),
            self.config.generation,
            self.config.retry,
        )
    }

    fn handout_pipeline(&self) -> HandoutPipeline {
        let handout = &self.config.handout;
        let extractor = ContentExtractor::new(
            self.retriever(),
            self.config.retrieval.clone(),
            handout.context_chars,
        );

        let search = match SerpApiClient::new(self.config.search.clone()) {
            Ok(client) => {
                let provider: Arc<dyn SearchProvider> = Arc::new(client);
                Some(SearchAgent::new(
                    provider,
                    handout.search_timeout,
                    self.config.retry,
                ))
            }
            Err(e) => {
                if handout.search_enabled {
                    warn!("Web search disabled: {}", e);
                }
                None
            }
        };

        let writer = SectionWriter::new(
            self.generator(),
            GenerationParams::handout_section(&self.config.generation),
            RetryPolicy::new(handout.max_section_attempts, self.config.retry.base_delay),
        );

        let assessor = QualityAssessor::new(
            self.generator(),
            GenerationParams::quality_review(&self.config.generation),
        );

        HandoutPipeline::new(extractor, search, writer, handout).with_assessor(assessor)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let services = Services::new(config)?;

    match args.command {
        Command::Ingest { dir, clear } => {
            let dir = dir.unwrap_or_else(|| services.config.data_dir.clone());
            services.ensure_collection().await?;

            let chunker = Chunker::new(services.config.chunking)?;
            let ingestor = Ingestor::new(
                chunker,
                services.embedder(),
                services.store.clone(),
                services.config.retrieval.collection.clone(),
                services.config.retry,
            );
            let report = ingestor
                .ingest_directory(&dir, clear)
                .await
                .context("Failed to ingest documents")?;

            println!(
                "Processed {} files, stored {} chunks",
                report.files_processed, report.chunks_stored
            );
            for (file, reason) in &report.failures {
                println!("  skipped {}: {}", file, reason);
            }
        }

        Command::Ask {
            question,
            top_k,
            threshold,
            language,
        } => {
            let rag = services.rag();
            rag.prepare().await.context("Collection is not usable")?;
            let mut query = rag.query(question).with_language(language);
            if let Some(top_k) = top_k {
                query = query.with_top_k(top_k);
            }
            if let Some(threshold) = threshold {
                query = query.with_threshold(threshold);
            }

            let answer = rag.answer(&query).await.context("Failed to answer")?;
            print_answer(&answer);
        }

        Command::Chat { language } => {
            let rag = services.rag();
            rag.prepare().await.context("Collection is not usable")?;
            run_chat_loop(&rag, &language)
                .await
                .context("Error in chat loop")?;
        }

        Command::Handout {
            topic,
            no_search,
            search,
            depth,
        } => {
            services.ensure_collection().await?;
            let mut options = HandoutOptions::from(&services.config.handout);
            if no_search {
                options.search_enabled = false;
            } else if search {
                options.search_enabled = true;
            }
            if let Some(depth) = depth {
                options.search_depth = depth;
            }

            let outcome = services
                .handout_pipeline()
                .generate(&topic, options)
                .await
                .context("Failed to generate handout")?;

            let metrics = outcome.handout.metrics();
            println!(
                "Handout written to {}",
                outcome
                    .output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
            println!(
                "{} words, {} sections, {} bullet points, {} readability, search augmentation {}",
                metrics.word_count,
                metrics.section_count,
                metrics.bullet_points,
                metrics.readability,
                outcome.augmentation.label()
            );
            match &outcome.review {
                QualityReview::Assessed(assessment) => {
                    println!("Quality score {:.1}/10", assessment.score);
                    for improvement in &assessment.improvements {
                        println!("  - {}", improvement);
                    }
                }
                QualityReview::Unavailable(reason) => {
                    println!("Quality review unavailable: {}", reason)
                }
                QualityReview::Disabled => {}
            }
            let failed = outcome.failed_sections();
            if !failed.is_empty() {
                println!("Failed sections: {}", failed.join(", "));
            }
        }

        Command::Status => {
            let status = services.rag().status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn print_answer(answer: &finrag::rag::Answer) {
    println!("\n{}", answer.text);
    match &answer.status {
        AnswerStatus::Answered => {}
        AnswerStatus::Degraded(reason) => println!("\n(answered without document evidence: {})", reason),
        AnswerStatus::Blocked => println!("\n(response withheld by the safety filter)"),
    }
    if !answer.sources.is_empty() {
        println!("\nSources:");
        for source in &answer.sources {
            println!(
                "  - {} (page {}, relevance {:.2})",
                source.source_filename, source.page_number, source.score
            );
        }
    }
}

/// Interactive chat; the conversation lives only in this loop
async fn run_chat_loop(rag: &RagPipeline, language: &str) -> Result<()> {
    info!("Ready to answer financial questions. Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();
    let mut history: Vec<ChatMessage> = Vec::new();

    loop {
        print!("\nYour question: ");
        stdout.flush()?;

        buffer.clear();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }

        let question = buffer.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            info!("Goodbye!");
            break;
        }

        history.push(ChatMessage::user(question));
        match rag.chat(&history, language).await {
            Ok(answer) => {
                print_answer(&answer);
                history.push(ChatMessage::assistant(answer.text));
            }
            Err(e) => {
                warn!("Failed to answer: {}", e);
                println!("\nI apologize, but I encountered an error. Please try rephrasing your question.");
                history.pop();
            }
        }
    }

    Ok(())
}
