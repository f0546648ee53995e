//! Core domain types for the Knowledge Engine client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::KenectError;

/// One variable-to-value assignment: SPARQL variable name (without the
/// `?` sigil) mapped to a literal string value. An empty map signals a
/// fully unbound query.
pub type Binding = BTreeMap<String, String>;

/// An ordered sequence of bindings.
pub type BindingSet = Vec<Binding>;

/// Namespace prefixes: short name mapped to its URI string. BTreeMap
/// keeps prefix application order deterministic (alphabetical).
pub type PrefixMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// KnowledgeBaseId
// ---------------------------------------------------------------------------

/// URI identifying a Knowledge Base towards the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnowledgeBaseId(pub Url);

impl KnowledgeBaseId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for KnowledgeBaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for KnowledgeBaseId {
    type Err = KenectError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| {
            KenectError::invalid_argument(format!("knowledge base id must be a URI: {e}"))
        })?;
        Ok(Self(url))
    }
}

// ---------------------------------------------------------------------------
// InteractionId
// ---------------------------------------------------------------------------

/// Identifier assigned by the engine when a knowledge interaction is
/// registered. Opaque to the client; used to scope later requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionId(pub String);

impl InteractionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InteractionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InteractionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InteractionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// SmartConnector
// ---------------------------------------------------------------------------

/// Descriptor for a Smart Connector, sent once at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartConnector {
    /// URI identifying the owning Knowledge Base.
    pub knowledge_base_id: KnowledgeBaseId,
    /// Human-readable name.
    pub knowledge_base_name: String,
    /// Human-readable description.
    pub knowledge_base_description: String,
    /// Whether the engine's reasoner is enabled for this connector.
    pub reasoner_enabled: bool,
}

// ---------------------------------------------------------------------------
// InteractionType
// ---------------------------------------------------------------------------

/// The four kinds of knowledge interaction the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionType {
    Ask,
    Answer,
    React,
    Post,
}

impl InteractionType {
    pub const ALL: [InteractionType; 4] = [
        InteractionType::Ask,
        InteractionType::Answer,
        InteractionType::React,
        InteractionType::Post,
    ];

    /// The type name used on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            InteractionType::Ask => "AskKnowledgeInteraction",
            InteractionType::Answer => "AnswerKnowledgeInteraction",
            InteractionType::React => "ReactKnowledgeInteraction",
            InteractionType::Post => "PostKnowledgeInteraction",
        }
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl std::str::FromStr for InteractionType {
    type Err = KenectError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        InteractionType::ALL
            .into_iter()
            .find(|ty| ty.wire_name() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = InteractionType::ALL
                    .into_iter()
                    .map(InteractionType::wire_name)
                    .collect();
                KenectError::invalid_argument(format!(
                    "interaction type must be one of {valid:?}, got {s:?}"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// GraphPattern
// ---------------------------------------------------------------------------

/// A SPARQL-like triple template with `?var` placeholders and
/// `prefix:local` shorthand. Opaque multi-line text; only the converter
/// performs substitutions on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphPattern(pub String);

impl GraphPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GraphPattern {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for GraphPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// KnowledgeInteraction
// ---------------------------------------------------------------------------

/// A knowledge interaction declaration, registered with the engine.
///
/// Ask/Answer carry a single graph pattern; React carries an argument
/// and a result pattern; Post carries an argument pattern and an
/// optional result pattern.
#[derive(Debug, Clone)]
pub struct KnowledgeInteraction {
    /// Name of the interaction, chosen by the caller.
    pub name: String,
    /// Which of the four interaction kinds this is.
    pub ty: InteractionType,
    /// Namespace prefixes used by the patterns.
    pub prefixes: PrefixMap,
    /// Single pattern for Ask/Answer interactions.
    pub graph_pattern: Option<GraphPattern>,
    /// Argument pattern for React/Post interactions.
    pub argument_pattern: Option<GraphPattern>,
    /// Result pattern for React (required) and Post (optional).
    pub result_pattern: Option<GraphPattern>,
}

impl KnowledgeInteraction {
    pub fn ask(name: impl Into<String>, prefixes: PrefixMap, pattern: GraphPattern) -> Self {
        Self {
            name: name.into(),
            ty: InteractionType::Ask,
            prefixes,
            graph_pattern: Some(pattern),
            argument_pattern: None,
            result_pattern: None,
        }
    }

    pub fn answer(name: impl Into<String>, prefixes: PrefixMap, pattern: GraphPattern) -> Self {
        Self {
            ty: InteractionType::Answer,
            ..Self::ask(name, prefixes, pattern)
        }
    }

    pub fn react(
        name: impl Into<String>,
        prefixes: PrefixMap,
        argument: GraphPattern,
        result: GraphPattern,
    ) -> Self {
        Self {
            name: name.into(),
            ty: InteractionType::React,
            prefixes,
            graph_pattern: None,
            argument_pattern: Some(argument),
            result_pattern: Some(result),
        }
    }

    pub fn post(
        name: impl Into<String>,
        prefixes: PrefixMap,
        argument: GraphPattern,
        result: Option<GraphPattern>,
    ) -> Self {
        Self {
            name: name.into(),
            ty: InteractionType::Post,
            prefixes,
            graph_pattern: None,
            argument_pattern: Some(argument),
            result_pattern: result,
        }
    }

    /// Check that the patterns match the interaction type. Runs before
    /// any network call during registration.
    pub fn validate(&self) -> crate::error::Result<()> {
        let err = |msg: String| Err(KenectError::invalid_argument(msg));
        match self.ty {
            InteractionType::Ask | InteractionType::Answer => {
                if self.graph_pattern.is_none() {
                    return err(format!("{} requires a graph pattern", self.ty));
                }
                if self.argument_pattern.is_some() || self.result_pattern.is_some() {
                    return err(format!(
                        "{} takes a single graph pattern, not argument/result patterns",
                        self.ty
                    ));
                }
            }
            InteractionType::React => {
                if self.argument_pattern.is_none() || self.result_pattern.is_none() {
                    return err(format!(
                        "{} requires argument and result patterns",
                        self.ty
                    ));
                }
                if self.graph_pattern.is_some() {
                    return err(format!("{} does not take a plain graph pattern", self.ty));
                }
            }
            InteractionType::Post => {
                if self.argument_pattern.is_none() {
                    return err(format!("{} requires an argument pattern", self.ty));
                }
                if self.graph_pattern.is_some() {
                    return err(format!("{} does not take a plain graph pattern", self.ty));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HandleRequest
// ---------------------------------------------------------------------------

/// A pending unit of work delivered by the engine for an Answer/React
/// interaction. Lives for one poll/respond cycle; every field is
/// required, and a response missing any of them is a protocol error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleRequest {
    /// Token identifying this request; echoed back with the answer.
    pub handle_request_id: i64,
    /// The interaction this request targets.
    pub knowledge_interaction_id: InteractionId,
    /// Bindings awaiting an answer from the caller's handler.
    pub binding_set: BindingSet,
}
