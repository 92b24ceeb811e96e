use super::{ToolCall, ToolDefinition, ToolResult};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Boxed future returned by [`ToolProvider::call_tool`].
pub type ProviderFuture<'a> = BoxFuture<'a, ToolResult>;

/// A source of tools the backend may call.
///
/// Failures are reported in-band as a [`ToolResult`] with `is_error` set so
/// the backend can see them and self-correct.
pub trait ToolProvider: Send + Sync {
    fn list_tools(&self) -> Vec<ToolDefinition>;

    fn call_tool<'a>(&'a self, call: &'a ToolCall) -> ProviderFuture<'a>;
}

impl<T: ToolProvider + ?Sized> ToolProvider for Arc<T> {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        (**self).list_tools()
    }

    fn call_tool<'a>(&'a self, call: &'a ToolCall) -> ProviderFuture<'a> {
        (**self).call_tool(call)
    }
}

/// Name → provider lookup over a list of providers.
///
/// The first provider to advertise a name owns it; later duplicates are
/// dropped with a warning.
#[derive(Default)]
pub struct ToolIndex {
    providers: Vec<Arc<dyn ToolProvider>>,
    owners: HashMap<String, usize>,
    definitions: Vec<ToolDefinition>,
}

impl std::fmt::Debug for ToolIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolIndex")
            .field(
                "tools",
                &self.definitions.iter().map(|d| &d.name).collect::<Vec<_>>(),
            )
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl ToolIndex {
    pub fn build(providers: &[Arc<dyn ToolProvider>]) -> Self {
        let mut owners = HashMap::new();
        let mut definitions = Vec::new();
        for (slot, provider) in providers.iter().enumerate() {
            for def in provider.list_tools() {
                if let Some(owner) = owners.get(&def.name) {
                    warn!(
                        "Duplicate tool name '{}': provider #{slot} ignored, keeping provider #{owner}",
                        def.name
                    );
                    continue;
                }
                owners.insert(def.name.clone(), slot);
                definitions.push(def);
            }
        }
        debug!(
            "Tool index built: {} tool(s) from {} provider(s)",
            definitions.len(),
            providers.len()
        );
        Self {
            providers: providers.to_vec(),
            owners,
            definitions,
        }
    }

    /// Every advertised tool, in provider order.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn contains(&self, name: &str) -> bool {
        self.owners.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Route a call to its owning provider. Unknown names produce an error
    /// result rather than failing the round.
    pub async fn call(&self, call: &ToolCall) -> ToolResult {
        let Some(provider) = self
            .owners
            .get(&call.name)
            .and_then(|&slot| self.providers.get(slot))
        else {
            warn!("Backend requested unknown tool '{}'", call.name);
            return ToolResult::error(&call.id, format!("Error: unknown tool '{}'", call.name));
        };
        let mut result = provider.call_tool(call).await;
        if result.call_id != call.id {
            result.call_id = call.id.clone();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed {
        tools: Vec<&'static str>,
        reply: &'static str,
    }

    impl ToolProvider for Fixed {
        fn list_tools(&self) -> Vec<ToolDefinition> {
            self.tools
                .iter()
                .map(|name| ToolDefinition::new(*name, "fixed", json!({"type": "object"})))
                .collect()
        }

        fn call_tool<'a>(&'a self, call: &'a ToolCall) -> ProviderFuture<'a> {
            Box::pin(async move { ToolResult::ok(&call.id, self.reply) })
        }
    }

    fn providers() -> Vec<Arc<dyn ToolProvider>> {
        vec![
            Arc::new(Fixed {
                tools: vec!["lookup", "shared"],
                reply: "first",
            }),
            Arc::new(Fixed {
                tools: vec!["shared", "other"],
                reply: "second",
            }),
        ]
    }

    #[test]
    fn duplicates_keep_first_provider() {
        let index = ToolIndex::build(&providers());
        let names: Vec<_> = index.definitions().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["lookup", "shared", "other"]);
        assert_eq!(index.len(), 3);
        assert!(index.contains("other"));
    }

    #[tokio::test]
    async fn routes_to_owner() {
        let index = ToolIndex::build(&providers());
        let shared = index
            .call(&ToolCall::new("c1", "shared", json!({})))
            .await;
        assert_eq!(shared, ToolResult::ok("c1", "first"));
        let other = index.call(&ToolCall::new("c2", "other", json!({}))).await;
        assert_eq!(other.content, "second");
    }

    #[tokio::test]
    async fn unknown_tool_is_error_result() {
        let index = ToolIndex::build(&providers());
        let result = index
            .call(&ToolCall::new("c9", "missing", json!({})))
            .await;
        assert!(result.is_error);
        assert_eq!(result.call_id, "c9");
        assert!(result.content.contains("unknown tool 'missing'"));
    }

    #[test]
    fn empty_index() {
        let index = ToolIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.definitions().is_empty());
    }
}
