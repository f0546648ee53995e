//! SPARQL triple store client.
//!
//! Writes go to the update endpoint as `INSERT DATA` updates with a
//! `application/sparql-update` body; reads go to the query endpoint and
//! come back as standard SPARQL results JSON.

use std::collections::BTreeMap;

use oxrdf::Triple;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use kenect_shared::{
    AppConfig, BindingSet, GraphPattern, KenectError, PrefixMap, Result, StoreConfig,
};

use crate::convert;

/// User-Agent string for store requests.
const USER_AGENT: &str = concat!("kenect/", env!("CARGO_PKG_VERSION"));

/// Timeout for store requests.
const REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// ServerErrorPolicy
// ---------------------------------------------------------------------------

/// What to do when the store answers an update with HTTP 500.
///
/// Some deployments return 500 for updates they nevertheless apply;
/// `IgnoreServerErrors` reproduces the tolerant behavior for those,
/// logging the error at debug level and reporting success. Every other
/// non-success status is surfaced regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerErrorPolicy {
    /// Surface HTTP 500 to the caller (default).
    #[default]
    Propagate,
    /// Log HTTP 500 at debug level and report success.
    IgnoreServerErrors,
}

impl std::str::FromStr for ServerErrorPolicy {
    type Err = KenectError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "propagate" => Ok(Self::Propagate),
            "ignore" => Ok(Self::IgnoreServerErrors),
            other => Err(KenectError::config(format!(
                "on_server_error must be \"propagate\" or \"ignore\", got {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SPARQL results JSON
// ---------------------------------------------------------------------------

/// Standard SPARQL results JSON document.
#[derive(Debug, Clone, Deserialize)]
pub struct SparqlResults {
    pub head: SparqlHead,
    pub results: SparqlBindings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SparqlHead {
    /// Variables selected by the query.
    #[serde(default)]
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SparqlBindings {
    /// One map per solution, variable name to term.
    pub bindings: Vec<BTreeMap<String, SparqlTerm>>,
}

/// One RDF term in a SPARQL result.
#[derive(Debug, Clone, Deserialize)]
pub struct SparqlTerm {
    /// "uri", "literal", or "bnode".
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default, rename = "xml:lang")]
    pub lang: Option<String>,
}

// ---------------------------------------------------------------------------
// TripleStore
// ---------------------------------------------------------------------------

/// Client for a triple store with separate query and update endpoints.
pub struct TripleStore {
    query_endpoint: Url,
    update_endpoint: Url,
    client: Client,
    policy: ServerErrorPolicy,
}

impl TripleStore {
    /// Create a store client for the given endpoints.
    pub fn new(query_endpoint: Url, update_endpoint: Url) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| KenectError::Store(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            query_endpoint,
            update_endpoint,
            client,
            policy: ServerErrorPolicy::default(),
        })
    }

    /// Create a store client from loaded configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let StoreConfig {
            query_endpoint,
            update_endpoint,
            on_server_error,
        } = &config.store;

        let query = Url::parse(query_endpoint)
            .map_err(|e| KenectError::config(format!("invalid query endpoint: {e}")))?;
        let update = Url::parse(update_endpoint)
            .map_err(|e| KenectError::config(format!("invalid update endpoint: {e}")))?;
        let policy: ServerErrorPolicy = on_server_error.parse()?;

        Ok(Self::new(query, update)?.with_policy(policy))
    }

    /// Override the server-error policy for updates.
    pub fn with_policy(mut self, policy: ServerErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Convert bindings to Turtle and insert the triples into the store.
    ///
    /// Returns the number of triples inserted.
    #[instrument(skip_all, fields(endpoint = %self.update_endpoint))]
    pub async fn store_bindings(
        &self,
        pattern: &GraphPattern,
        bindings: &BindingSet,
        prefixes: &PrefixMap,
    ) -> Result<usize> {
        let turtle = convert::to_turtle(pattern, bindings, prefixes)?;
        self.insert_turtle(&turtle).await
    }

    /// Parse Turtle text and submit its triples as a SPARQL update.
    #[instrument(skip_all, fields(endpoint = %self.update_endpoint))]
    pub async fn insert_turtle(&self, turtle: &str) -> Result<usize> {
        let triples = parse_turtle(turtle)?;
        if triples.is_empty() {
            debug!("no triples to insert");
            return Ok(0);
        }

        let update = insert_data_update(&triples);
        debug!(triples = triples.len(), "submitting SPARQL update");

        let response = self
            .client
            .post(self.update_endpoint.clone())
            .header(CONTENT_TYPE, "application/sparql-update")
            .body(update)
            .send()
            .await
            .map_err(|e| KenectError::Store(format!("update request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(triples = triples.len(), "update accepted");
            return Ok(triples.len());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::INTERNAL_SERVER_ERROR
            && self.policy == ServerErrorPolicy::IgnoreServerErrors
        {
            debug!(%status, body = %body, "ignoring server error on update");
            return Ok(triples.len());
        }

        Err(KenectError::Store(format!(
            "update rejected: HTTP {status}: {body}"
        )))
    }

    /// Run a SPARQL SELECT query and parse the results JSON.
    #[instrument(skip_all, fields(endpoint = %self.query_endpoint))]
    pub async fn select(&self, query: &str) -> Result<SparqlResults> {
        let response = self
            .client
            .post(self.query_endpoint.clone())
            .header(CONTENT_TYPE, "application/sparql-query")
            .header(ACCEPT, "application/sparql-results+json")
            .body(query.to_string())
            .send()
            .await
            .map_err(|e| KenectError::Store(format!("query request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KenectError::Store(format!("failed to read query response: {e}")))?;

        if !status.is_success() {
            return Err(KenectError::Store(format!(
                "query rejected: HTTP {status}: {body}"
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| KenectError::protocol(format!("malformed SPARQL results: {e}")))
    }

    /// Read every triple in the store as plain (subject, predicate, object)
    /// value strings.
    pub async fn read_all_triples(&self) -> Result<Vec<(String, String, String)>> {
        let results = self.select("SELECT ?s ?p ?o WHERE { ?s ?p ?o }").await?;

        results
            .results
            .bindings
            .iter()
            .map(|solution| {
                let term = |var: &str| {
                    solution.get(var).map(|t| t.value.clone()).ok_or_else(|| {
                        KenectError::protocol(format!("solution is missing variable ?{var}"))
                    })
                };
                Ok((term("s")?, term("p")?, term("o")?))
            })
            .collect()
    }
}

/// Parse Turtle text into an in-memory triple collection.
fn parse_turtle(turtle: &str) -> Result<Vec<Triple>> {
    let mut triples = Vec::new();
    for parsed in oxttl::TurtleParser::new().for_slice(turtle.as_bytes()) {
        let triple =
            parsed.map_err(|e| KenectError::parse(format!("invalid turtle: {e}")))?;
        triples.push(triple);
    }
    Ok(triples)
}

/// Render triples as a SPARQL `INSERT DATA` update.
fn insert_data_update(triples: &[Triple]) -> String {
    let mut update = String::from("INSERT DATA {\n");
    for triple in triples {
        update.push_str(&format!("  {triple} .\n"));
    }
    update.push('}');
    update
}
