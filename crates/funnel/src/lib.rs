//! Retrieval-augmented dispatch of typed operations through LLM function
//! calling.
//!
//! Operations are registered once into an [`OperationRegistry`], each with a
//! parameter schema synthesized from its input type. A [`Retriever`]
//! shortlists the operations relevant to a user message, a [`ChatBackend`]
//! picks one, and the [`Dispatcher`] validates the arguments and runs it.

pub mod chat;
pub mod dispatcher;
pub mod error;
pub mod openai;
pub mod operation;
pub mod registry;
pub mod retriever;
pub mod schema;
pub mod types;

pub use chat::{ChatBackend, ChatDecision, ChatRequest};
pub use dispatcher::{
    latest_user_message, DispatchRequest, DispatchResult, Dispatcher, Outcome, Timings,
};
pub use error::{DispatchError, FailureKind, OperationFailure, RegistryError, SchemaError};
pub use openai::OpenAiBackend;
pub use operation::{Operation, OperationDescriptor, ValidatedArguments};
pub use registry::{OperationCatalog, OperationRegistry, MANIFEST_FILE};
pub use retriever::{embedding_text, Embedder, EmbeddingRetriever, Retriever, TokenHashEmbedder};
pub use types::*;
