use crate::chunking::{chunk_with_config, ChunkingConfig};
use crate::embeddings::StrategySelection;
use crate::error::ChatError;
use crate::generator::{generate_answer, Generator};
use crate::history::HistoryStore;
use crate::ingest::document_from_pdf;
use crate::models::{Answer, ChatOptions, Document, RetrievalResult, StrategyKind};
use crate::retriever::Retriever;
use tracing::info;
use uuid::Uuid;

/// One user's documents and the retrieval index built over them.
///
/// Sessions are independent: each owns its own index, and the embedding
/// strategy chosen at construction never changes afterwards.
pub struct Session {
    options: ChatOptions,
    chunking: ChunkingConfig,
    documents: Vec<Document>,
    retriever: Retriever,
    fallback_reason: Option<String>,
}

impl Session {
    pub fn new(options: ChatOptions, selection: StrategySelection) -> Result<Self, ChatError> {
        options.validate()?;
        let chunking = ChunkingConfig::try_from(&options)?;

        Ok(Self {
            options,
            chunking,
            documents: Vec::new(),
            retriever: Retriever::new(selection.strategy),
            fallback_reason: selection.fallback_reason,
        })
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.retriever.strategy_kind()
    }

    pub fn describe_strategy(&self) -> String {
        self.retriever.describe_strategy()
    }

    /// Why the neural strategy was not used, if it was not.
    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.retriever.chunk_count()
    }

    pub fn document(&self, document_id: &str) -> Option<&Document> {
        self.documents
            .iter()
            .find(|document| document.document_id == document_id)
    }

    /// Adds documents (replacing any with the same id) and rebuilds the index
    /// over the whole set. Returns the new chunk count.
    pub fn add_documents(&mut self, documents: Vec<Document>) -> Result<usize, ChatError> {
        let mut next = self.documents.clone();
        for document in documents {
            next.retain(|existing| existing.document_id != document.document_id);
            next.push(document);
        }
        self.replace_documents(next)
    }

    pub fn add_pdf(&mut self, filename: &str, bytes: &[u8]) -> Result<usize, ChatError> {
        let document = document_from_pdf(filename, bytes)?;
        info!(
            filename,
            document_id = %document.document_id,
            chars = document.text.chars().count(),
            "pdf extracted"
        );
        self.add_documents(vec![document])
    }

    /// Drops every document and the index ("clear file chunks").
    pub fn clear_documents(&mut self) {
        self.documents.clear();
        self.retriever.clear();
    }

    pub fn rebuild(&mut self) -> Result<usize, ChatError> {
        let documents = self.documents.clone();
        self.replace_documents(documents)
    }

    fn replace_documents(&mut self, documents: Vec<Document>) -> Result<usize, ChatError> {
        let chunks = documents
            .iter()
            .flat_map(|document| chunk_with_config(&document.document_id, &document.text, self.chunking))
            .collect::<Vec<_>>();

        let count = self.retriever.rebuild(chunks)?;
        self.documents = documents;
        Ok(count)
    }

    pub fn retrieve(&self, question: &str, k: Option<usize>) -> Result<RetrievalResult, ChatError> {
        self.retriever
            .retrieve(question, k.unwrap_or(self.options.top_k))
    }

    /// Retrieves context for `question`, generates a grounded answer and, when a
    /// history store is given, records the turn under `conversation_id`.
    pub async fn ask(
        &self,
        generator: &dyn Generator,
        question: &str,
        conversation: Option<(&dyn HistoryStore, Uuid)>,
    ) -> Result<Answer, ChatError> {
        let context = self.retrieve(question, None)?;
        let answer = generate_answer(generator, question, context).await?;

        if let Some((store, conversation_id)) = conversation {
            store.save(conversation_id, question.trim(), &answer)?;
        }
        Ok(answer)
    }
}
