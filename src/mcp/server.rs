//! Knowledge base MCP server implementation

use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use mindvault::{Error, KnowledgeBase, NoteId, OwnerId};

use crate::commands::Session;

/// Parameters for kb_search tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Search query")]
    pub query: String,
    #[schemars(description = "Maximum number of results (default: 10, max: 100)")]
    #[serde(default)]
    pub limit: usize,
}

/// Parameters for kb_ask tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AskParams {
    #[schemars(description = "Question to answer from the notes")]
    pub question: String,
}

/// Parameters for kb_related tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RelatedParams {
    #[schemars(description = "Note id (uuid)")]
    pub id: String,
    #[schemars(description = "Maximum number of suggestions (default: 5)")]
    #[serde(default)]
    pub limit: usize,
}

/// Parameters for kb_get_note tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetNoteParams {
    #[schemars(description = "Note id (uuid)")]
    pub id: String,
}

fn to_mcp_error(e: Error) -> McpError {
    match e {
        Error::InvalidInput(_) | Error::InvalidOwner(_) | Error::NoteNotFound(_) => {
            McpError::invalid_params(e.to_string(), None)
        }
        other => McpError::internal_error(other.to_string(), None),
    }
}

fn parse_id(id: &str) -> Result<NoteId, McpError> {
    id.parse()
        .map_err(|_| McpError::invalid_params(format!("Invalid note id: {}", id), None))
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::internal_error(format!("JSON serialization failed: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

/// MCP service bound to one owner.
#[derive(Clone)]
pub struct KbService {
    kb: Arc<KnowledgeBase>,
    owner: OwnerId,
    tool_router: ToolRouter<Self>,
}

impl KbService {
    pub fn new(kb: Arc<KnowledgeBase>, owner: OwnerId) -> Self {
        Self {
            kb,
            owner,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl KbService {
    #[tool(description = "Search the knowledge base. Uses vector similarity when embeddings are available, falling back to full-text and then keyword matching. Scores are only present for vector results.")]
    async fn kb_search(&self, params: Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        let response = self
            .kb
            .search(&self.owner, &params.0.query, params.0.limit)
            .await
            .map_err(to_mcp_error)?;
        json_result(&response)
    }

    #[tool(description = "Answer a question using only the owner's notes. Returns the answer and the notes it was grounded on.")]
    async fn kb_ask(&self, params: Parameters<AskParams>) -> Result<CallToolResult, McpError> {
        let response = self
            .kb
            .ask(&self.owner, &params.0.question)
            .await
            .map_err(to_mcp_error)?;
        json_result(&response)
    }

    #[tool(description = "Suggest notes related to a note, as candidates for new [[links]]. Never returns the note itself.")]
    async fn kb_related(&self, params: Parameters<RelatedParams>) -> Result<CallToolResult, McpError> {
        let id = parse_id(&params.0.id)?;
        let response = self
            .kb
            .related(&self.owner, id, params.0.limit)
            .await
            .map_err(to_mcp_error)?;
        json_result(&response)
    }

    #[tool(description = "Get the note link graph: nodes with connection counts and [[link]] edges.")]
    async fn kb_graph(&self) -> Result<CallToolResult, McpError> {
        let graph = self.kb.graph(&self.owner).map_err(to_mcp_error)?;
        json_result(&graph)
    }

    #[tool(description = "Get the full content and links of a note by id.")]
    async fn kb_get_note(&self, params: Parameters<GetNoteParams>) -> Result<CallToolResult, McpError> {
        let id = parse_id(&params.0.id)?;
        let note = self
            .kb
            .get_note(&self.owner, id)
            .map_err(to_mcp_error)?
            .ok_or_else(|| to_mcp_error(Error::NoteNotFound(id)))?;
        json_result(&note)
    }
}

#[tool_handler]
impl ServerHandler for KbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Personal knowledge base. Search notes, ask grounded questions and inspect the link graph.".to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server over stdio until the client disconnects.
pub async fn run_mcp_server(session: &Session) -> Result<()> {
    use tokio::io::{stdin, stdout};

    let owner = *session.owner()?;
    info!(owner_id = %owner, "Starting MCP server");
    let service = KbService::new(session.kb.clone(), owner);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_map_to_invalid_params() {
        let err = to_mcp_error(Error::InvalidInput("empty query".into()));
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);

        let err = to_mcp_error(Error::Generation("quota".into()));
        assert_eq!(err.code, rmcp::model::ErrorCode::INTERNAL_ERROR);
    }

    #[test]
    fn test_parse_id() {
        assert!(parse_id("nope").is_err());
        let id = NoteId::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_search_params_default_limit() {
        let params: SearchParams = serde_json::from_str(r#"{"query": "france"}"#).unwrap();
        assert_eq!(params.limit, 0);
    }
}
