//! Account verification gate
//!
//! The gate runs at the start of every invocation. It tries to pull an
//! identifier out of the latest message, resolves it to an account, and
//! otherwise produces a message asking the customer for their details.

use async_trait::async_trait;
use chorus_ai::{Message, ResponseFormat, structured::parse_structured};
use serde::Deserialize;

use crate::error::Result;
use crate::llm::ChatModel;
use crate::state::ConversationState;
use crate::transport::TurnRequest;

/// Name attached to every message the gate appends
pub const VERIFY_NODE_NAME: &str = "verify_info";

const EXTRACTION_PROMPT: &str = "You work on a music store's customer support desk. \
Read the conversation and pull out the customer's account identifier if they gave one. \
An identifier is a numeric customer ID, an email address, or a phone number. \
Only report an identifier the customer actually supplied; if there is none, return an empty string.";

const CLARIFY_PROMPT: &str = "You are the first point of contact for a music store's customer support. \
Before any request can be handled, the customer's account has to be verified. \
Verification needs one of: their customer ID, the email address on the account, or its phone number. \
If the customer has not given any of these yet, ask for one politely. \
If they gave an identifier that could not be matched to an account, ask them to double-check it and try again.";

/// Pulls a candidate identifier out of a message; empty means none found
#[async_trait]
pub trait IdentifierExtractor: Send + Sync {
    async fn extract(&self, message: &Message) -> Result<String>;
}

/// Maps an identifier to an account id; empty means no match
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Result<String>;
}

/// Produces the message that asks the customer for an identifier
#[async_trait]
pub trait ClarifyingResponder: Send + Sync {
    async fn respond(&self, history: &[Message]) -> Result<Message>;
}

/// Result of one pass through the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    AlreadyVerified,
    Verified { account_id: String },
    NeedsInput,
}

/// Text appended once an account is matched
pub fn confirmation_text(account_id: &str) -> String {
    format!(
        "Thank you for providing your information! I was able to verify your account with customer id {account_id}."
    )
}

/// Composition of the three verification collaborators
pub struct VerificationGate {
    extractor: Box<dyn IdentifierExtractor>,
    resolver: Box<dyn AccountResolver>,
    responder: Box<dyn ClarifyingResponder>,
}

impl VerificationGate {
    pub fn new(
        extractor: Box<dyn IdentifierExtractor>,
        resolver: Box<dyn AccountResolver>,
        responder: Box<dyn ClarifyingResponder>,
    ) -> Self {
        Self {
            extractor,
            resolver,
            responder,
        }
    }

    /// Build a gate whose extractor and responder are backed by `model`
    pub fn with_model(model: ChatModel, resolver: Box<dyn AccountResolver>) -> Self {
        Self::new(
            Box::new(LlmIdentifierExtractor::new(model.clone())),
            resolver,
            Box::new(LlmClarifyingResponder::new(model)),
        )
    }

    /// Run the gate against `state`, appending at most one message.
    ///
    /// Collaborator failures propagate and leave `state` untouched.
    pub async fn run(&self, state: &mut ConversationState) -> Result<GateOutcome> {
        if state.is_verified() {
            return Ok(GateOutcome::AlreadyVerified);
        }

        if let Some(last) = state.last_message() {
            let identifier = self.extractor.extract(last).await?;
            let identifier = identifier.trim();
            if !identifier.is_empty() {
                let account_id = self.resolver.resolve(identifier).await?;
                if !account_id.is_empty() {
                    tracing::debug!(account_id = %account_id, "Account verified");
                    state.set_account_id(account_id.clone())?;
                    state.push(
                        Message::assistant(confirmation_text(&account_id))
                            .with_name(VERIFY_NODE_NAME),
                    );
                    return Ok(GateOutcome::Verified { account_id });
                }
                tracing::debug!(identifier, "Identifier did not match an account");
            }
        }

        let reply = self.responder.respond(state.messages()).await?;
        state.push(reply.with_name(VERIFY_NODE_NAME));
        Ok(GateOutcome::NeedsInput)
    }
}

#[derive(Debug, Deserialize)]
struct ExtractedIdentifier {
    identifier: String,
}

fn identifier_format() -> ResponseFormat {
    ResponseFormat::new(
        "UserInput",
        serde_json::json!({
            "type": "object",
            "properties": {
                "identifier": {
                    "type": "string",
                    "description": "Customer ID, email address, or phone number; empty if none was given."
                }
            },
            "required": ["identifier"],
            "additionalProperties": false
        }),
    )
}

/// Extractor that asks the model for a structured `{identifier}` answer
pub struct LlmIdentifierExtractor {
    model: ChatModel,
}

impl LlmIdentifierExtractor {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl IdentifierExtractor for LlmIdentifierExtractor {
    async fn extract(&self, message: &Message) -> Result<String> {
        let request = TurnRequest {
            system_prompt: Some(EXTRACTION_PROMPT.to_string()),
            messages: vec![message.clone()],
            tools: vec![],
            response_format: Some(identifier_format()),
        };
        let reply = self.model.invoke(request, None).await?;
        let extracted: ExtractedIdentifier = parse_structured(&reply)?;
        Ok(extracted.identifier)
    }
}

/// Responder that drafts the clarifying question with the model
pub struct LlmClarifyingResponder {
    model: ChatModel,
}

impl LlmClarifyingResponder {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ClarifyingResponder for LlmClarifyingResponder {
    async fn respond(&self, history: &[Message]) -> Result<Message> {
        let request = TurnRequest {
            system_prompt: Some(CLARIFY_PROMPT.to_string()),
            messages: history.to_vec(),
            tools: vec![],
            response_format: None,
        };
        self.model.invoke(request, None).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic gate collaborators for tests

    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Error;

    /// Finds the first token that looks like an id, email or phone number
    #[derive(Default)]
    pub struct TokenExtractor {
        pub calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IdentifierExtractor for TokenExtractor {
        async fn extract(&self, message: &Message) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !matches!(message, Message::User { .. }) {
                return Ok(String::new());
            }
            let text = message.text();
            let token = text
                .split_whitespace()
                .map(|t| t.trim_end_matches(['.', ',', '!']))
                .find(|t| t.contains('@') || t.starts_with('+') || t.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or_default();
            Ok(token.to_string())
        }
    }

    /// Table-driven resolver; `fail` simulates an unavailable lookup
    #[derive(Default)]
    pub struct TableResolver {
        pub accounts: HashMap<String, String>,
        pub fail: bool,
    }

    impl TableResolver {
        pub fn with(entries: &[(&str, &str)]) -> Self {
            Self {
                accounts: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl AccountResolver for TableResolver {
        async fn resolve(&self, identifier: &str) -> Result<String> {
            if self.fail {
                return Err(Error::Capability("lookup unavailable".into()));
            }
            Ok(self.accounts.get(identifier).cloned().unwrap_or_default())
        }
    }

    /// Always asks for an identifier
    #[derive(Default)]
    pub struct AskAgain {
        pub calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClarifyingResponder for AskAgain {
        async fn respond(&self, _history: &[Message]) -> Result<Message> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Message::assistant(
                "Could you share your customer ID, email, or phone number?",
            ))
        }
    }

    pub fn gate(resolver: TableResolver) -> VerificationGate {
        VerificationGate::new(
            Box::new(TokenExtractor::default()),
            Box::new(resolver),
            Box::new(AskAgain::default()),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::testing::*;
    use super::*;
    use crate::error::Error;
    use crate::llm::testing::{ScriptedTransport, chat_model};

    fn counted_gate(resolver: TableResolver) -> (VerificationGate, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let extractor = TokenExtractor::default();
        let responder = AskAgain::default();
        let extract_calls = extractor.calls.clone();
        let respond_calls = responder.calls.clone();
        let gate = VerificationGate::new(Box::new(extractor), Box::new(resolver), Box::new(responder));
        (gate, extract_calls, respond_calls)
    }

    #[tokio::test]
    async fn test_verifies_known_identifier() {
        let gate = gate(TableResolver::with(&[("10", "10")]));
        let mut state = ConversationState::new();
        state.push(Message::user("My customer ID is 10"));

        let outcome = gate.run(&mut state).await.unwrap();
        assert_eq!(outcome, GateOutcome::Verified { account_id: "10".into() });
        assert_eq!(state.account_id(), Some("10"));
        let last = state.last_message().unwrap();
        assert_eq!(last.name(), Some(VERIFY_NODE_NAME));
        assert_eq!(
            last.text(),
            "Thank you for providing your information! I was able to verify your account with customer id 10."
        );
    }

    #[tokio::test]
    async fn test_unknown_identifier_asks_again() {
        let (gate, _, respond_calls) = counted_gate(TableResolver::with(&[("10", "10")]));
        let mut state = ConversationState::new();
        state.push(Message::user("it's 999"));

        let outcome = gate.run(&mut state).await.unwrap();
        assert_eq!(outcome, GateOutcome::NeedsInput);
        assert!(!state.is_verified());
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.last_message().unwrap().name(), Some(VERIFY_NODE_NAME));
        assert_eq!(respond_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_log_skips_extraction() {
        let (gate, extract_calls, respond_calls) = counted_gate(TableResolver::default());
        let mut state = ConversationState::new();

        let outcome = gate.run(&mut state).await.unwrap();
        assert_eq!(outcome, GateOutcome::NeedsInput);
        assert_eq!(extract_calls.load(Ordering::SeqCst), 0);
        assert_eq!(respond_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_already_verified_is_untouched() {
        let (gate, extract_calls, respond_calls) = counted_gate(TableResolver::default());
        let mut state = ConversationState::new();
        state.set_account_id("3").unwrap();
        state.push(Message::user("what albums do you have?"));

        let outcome = gate.run(&mut state).await.unwrap();
        assert_eq!(outcome, GateOutcome::AlreadyVerified);
        assert_eq!(state.messages().len(), 1);
        assert_eq!(extract_calls.load(Ordering::SeqCst), 0);
        assert_eq!(respond_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolver_failure_leaves_state_unchanged() {
        let gate = gate(TableResolver {
            fail: true,
            ..Default::default()
        });
        let mut state = ConversationState::new();
        state.push(Message::user("My customer ID is 10"));
        let before = state.clone();

        let err = gate.run(&mut state).await.unwrap_err();
        assert!(matches!(err, Error::Capability(_)));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn test_llm_extractor_requests_structured_output() {
        let transport = Arc::new(ScriptedTransport::new(vec![Message::assistant(
            r#"{"identifier": "luisg@embraer.com.br"}"#,
        )]));
        let extractor = LlmIdentifierExtractor::new(chat_model(transport.clone()));

        let id = extractor
            .extract(&Message::user("my email is luisg@embraer.com.br"))
            .await
            .unwrap();
        assert_eq!(id, "luisg@embraer.com.br");

        let requests = transport.requests.lock();
        let format = requests[0].response_format.as_ref().unwrap();
        assert_eq!(format.name, "UserInput");
        assert_eq!(requests[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_llm_extractor_rejects_malformed_output() {
        let transport = Arc::new(ScriptedTransport::new(vec![Message::assistant("not json")]));
        let extractor = LlmIdentifierExtractor::new(chat_model(transport));
        assert!(extractor.extract(&Message::user("hi")).await.is_err());
    }

    #[tokio::test]
    async fn test_llm_responder_sees_full_history() {
        let transport = Arc::new(ScriptedTransport::new(vec![Message::assistant(
            "Please share your customer ID.",
        )]));
        let responder = LlmClarifyingResponder::new(chat_model(transport.clone()));
        let history = vec![Message::user("hi"), Message::assistant("hello"), Message::user("help")];

        let reply = responder.respond(&history).await.unwrap();
        assert_eq!(reply.text(), "Please share your customer ID.");
        assert_eq!(transport.requests.lock()[0].messages.len(), 3);
    }
}
