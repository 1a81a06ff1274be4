pub mod agents;
pub mod chunking;
pub mod config;
pub mod context;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod ingest;
pub mod rag;
pub mod retriever;
pub mod retry;
pub mod search;
