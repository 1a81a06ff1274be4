mod common;

use std::sync::Arc;

use common::*;
use finrag::database::{MemoryStore, VectorStore};
use finrag::error::{GenerationError, PipelineError, RetrievalError, VectorStoreError};
use finrag::generation::SafetyLevel;
use finrag::rag::{AnswerStatus, ChatMessage};
use finrag::retriever::Query;

#[tokio::test]
async fn test_grounded_answer_carries_sources() {
    let store = seeded_store().await;
    let generator = ScriptedGenerator::replying("Keep three months of expenses.");
    let rag = rag(store, generator.clone(), retrieval_config());

    let answer = rag
        .answer(&rag.query("How do I build an emergency fund?"))
        .await
        .unwrap();

    assert_eq!(answer.status, AnswerStatus::Answered);
    assert!(answer.context_used);
    assert_eq!(answer.sources[0].source_filename, "saving.pdf");

    let calls = generator.calls();
    assert_eq!(calls.len(), 1);
    let (prompt, context, params) = &calls[0];
    assert!(prompt.contains("User Question: How do I build an emergency fund?"));
    assert!(context.starts_with("[Source: saving.pdf, page 1"));
    assert!(context.chars().count() <= retrieval_config().max_context_chars);
    assert_eq!(params.safety, SafetyLevel::Strict);
}

#[tokio::test]
async fn test_no_evidence_answers_in_degraded_mode() {
    let store = seeded_store().await;
    let generator = ScriptedGenerator::replying("General guidance.");
    let rag = rag(store.clone(), generator.clone(), retrieval_config());

    let query = Query::new("zebra migration patterns", &retrieval_config())
        .with_top_k(5)
        .with_threshold(0.3);
    let results = retriever(store, &retrieval_config())
        .retrieve(&query)
        .await
        .unwrap();
    assert!(results.is_empty());

    let answer = rag.answer(&query).await.unwrap();
    assert!(matches!(answer.status, AnswerStatus::Degraded(_)));
    assert!(answer.sources.is_empty());
    assert!(!answer.context_used);
    assert_eq!(answer.text, "General guidance.");
    assert_eq!(generator.calls()[0].1, "");
}

#[tokio::test]
async fn test_no_evidence_declines_when_ungrounded_answers_are_off() {
    let store = seeded_store().await;
    let generator = ScriptedGenerator::replying("unused");
    let config = finrag::config::RetrievalConfig {
        allow_ungrounded: false,
        ..retrieval_config()
    };
    let rag = rag(store, generator.clone(), config);

    let answer = rag.answer(&rag.query("zebra migration patterns")).await.unwrap();
    assert!(matches!(answer.status, AnswerStatus::Degraded(_)));
    assert!(answer.sources.is_empty());
    assert!(generator.calls().is_empty());
}

#[tokio::test]
async fn test_unreachable_store_is_an_error_without_fallback() {
    // The collection was never created
    let store: Arc<dyn VectorStore> = Arc::new(MemoryStore::new());
    let config = finrag::config::RetrievalConfig {
        allow_ungrounded: false,
        ..retrieval_config()
    };
    let rag = rag(store.clone(), ScriptedGenerator::replying("unused"), config);

    let err = rag.answer(&rag.query("index funds")).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Retrieval(RetrievalError::Unavailable(_))
    ));

    let fallback = common::rag(store, ScriptedGenerator::replying("From memory."), retrieval_config());
    let answer = fallback.answer(&fallback.query("index funds")).await.unwrap();
    assert!(matches!(answer.status, AnswerStatus::Degraded(_)));
}

#[tokio::test]
async fn test_offline_store_still_answers_in_degraded_mode() {
    let store: Arc<dyn VectorStore> = Arc::new(OfflineStore);
    let rag = rag(store, ScriptedGenerator::replying("From memory."), retrieval_config());

    rag.prepare().await.unwrap();
    let answer = rag.answer(&rag.query("What is a Roth IRA?")).await.unwrap();

    assert!(matches!(answer.status, AnswerStatus::Degraded(_)));
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn test_offline_store_fails_startup_without_fallback() {
    let store: Arc<dyn VectorStore> = Arc::new(OfflineStore);
    let config = finrag::config::RetrievalConfig {
        allow_ungrounded: false,
        ..retrieval_config()
    };
    let rag = rag(store, ScriptedGenerator::replying("unused"), config);

    assert!(matches!(
        rag.prepare().await,
        Err(VectorStoreError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_wrong_vector_size_fails_startup_even_with_fallback() {
    let store: Arc<dyn VectorStore> = Arc::new(MemoryStore::new());
    store
        .ensure_collection(COLLECTION, DIMENSION as u64 / 2)
        .await
        .unwrap();
    let rag = rag(store, ScriptedGenerator::replying("unused"), retrieval_config());

    assert!(matches!(
        rag.prepare().await,
        Err(VectorStoreError::DimensionMismatch { .. })
    ));
}

#[tokio::test]
async fn test_blocked_generation_gets_fallback_and_is_not_retried() {
    let store = seeded_store().await;
    let generator = ScriptedGenerator::new(|_| {
        Err(GenerationError::Blocked {
            reason: "SAFETY".to_string(),
        })
    });
    let rag = rag(store, generator.clone(), retrieval_config());

    let answer = rag.answer(&rag.query("index funds fees")).await.unwrap();
    assert_eq!(answer.status, AnswerStatus::Blocked);
    assert!(answer.text.starts_with("I'm sorry"));
    assert_eq!(generator.calls().len(), 1);
}

#[tokio::test]
async fn test_service_errors_are_retried_then_surfaced() {
    let store = seeded_store().await;
    let generator =
        ScriptedGenerator::new(|_| Err(GenerationError::Service("503 unavailable".to_string())));
    let rag = rag(store, generator.clone(), retrieval_config());

    let err = rag.answer(&rag.query("index funds fees")).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Generation(GenerationError::Service(_))
    ));
    assert_eq!(generator.calls().len(), 2);
}

#[tokio::test]
async fn test_chat_retrieves_for_latest_turn_only() {
    let store = seeded_store().await;
    let generator = ScriptedGenerator::replying("Pay on time.");
    let rag = rag(store, generator.clone(), retrieval_config());

    let history = vec![
        ChatMessage::user("Tell me about index funds"),
        ChatMessage::assistant("Index funds track an index."),
        ChatMessage::user("How do credit scores work?"),
    ];
    let answer = rag.chat(&history, "Spanish").await.unwrap();

    assert_eq!(answer.status, AnswerStatus::Answered);
    assert!(answer
        .sources
        .iter()
        .all(|source| source.source_filename == "credit.pdf"));

    let (prompt, context, _) = &generator.calls()[0];
    assert!(prompt.starts_with("Respond in Spanish."));
    assert!(prompt.contains("Assistant: Index funds track an index."));
    assert!(prompt.contains("User Question: How do credit scores work?"));
    assert!(context.chars().count() <= retrieval_config().chat_context_chars);
}

#[tokio::test]
async fn test_chat_without_user_turn() {
    let store = seeded_store().await;
    let generator = ScriptedGenerator::replying("unused");
    let rag = rag(store, generator.clone(), retrieval_config());

    let answer = rag
        .chat(&[ChatMessage::assistant("Hello!")], "English")
        .await
        .unwrap();
    assert!(answer.text.contains("didn't receive a question"));
    assert!(generator.calls().is_empty());
}

#[tokio::test]
async fn test_retrieval_is_sorted_and_thresholded() {
    let store = seeded_store().await;
    let config = retrieval_config();
    let query = Query::new("emergency fund savings account credit", &config).with_threshold(0.05);

    let results = retriever(store, &config).retrieve(&query).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= query.top_k);
    assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
    assert!(results.iter().all(|r| r.score >= query.score_threshold));
}

#[tokio::test]
async fn test_reingestion_is_idempotent() {
    let store = seeded_store().await;
    let before = store.status(COLLECTION).await.unwrap().point_count;

    let ingestor = ingestor(store.clone());
    for document in corpus() {
        ingestor.ingest_document(&document).await.unwrap();
    }

    assert_eq!(store.status(COLLECTION).await.unwrap().point_count, before);
}

#[tokio::test]
async fn test_status_reports_collection() {
    let store = seeded_store().await;
    let rag = rag(store, ScriptedGenerator::replying("unused"), retrieval_config());

    let status = rag.status().await;
    assert_eq!(status.point_count, Some(3));
    assert_eq!(status.collection_dimension, Some(DIMENSION as u64));
    assert!(status.store_healthy);
    assert_eq!(status.embedding_model, "feature-hashing");
    assert_eq!(status.generation_model, "scripted");
}
