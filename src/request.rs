use crate::binary::jid::Jid;
use crate::binary::node::{Node, NodeContent, NodeValue};
use crate::client::Client;
use crate::error::WaError;
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// The type of an info/query stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQueryType {
    Get,
    Set,
}

impl InfoQueryType {
    fn as_str(self) -> &'static str {
        match self {
            InfoQueryType::Get => "get",
            InfoQueryType::Set => "set",
        }
    }
}

/// A typed request/response exchange; builds an `iq` stanza for [`Client::send_iq`].
#[derive(Debug, Clone)]
pub struct InfoQuery {
    pub namespace: String,
    pub query_type: InfoQueryType,
    pub to: Jid,
    pub id: Option<String>,
    pub content: Option<NodeContent>,
    pub timeout: Option<Duration>,
}

impl InfoQuery {
    pub fn get(namespace: impl Into<String>, to: Jid, content: Option<NodeContent>) -> Self {
        Self {
            namespace: namespace.into(),
            query_type: InfoQueryType::Get,
            to,
            id: None,
            content,
            timeout: None,
        }
    }

    pub fn set(namespace: impl Into<String>, to: Jid, content: Option<NodeContent>) -> Self {
        Self {
            namespace: namespace.into(),
            query_type: InfoQueryType::Set,
            to,
            id: None,
            content,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Shape of inbound stanzas a subscription reacts to. Unset components are
/// wildcards; the tuple is (tag, attribute key and optional value, first
/// child's tag).
#[derive(Debug, Clone, Default)]
pub struct NodePattern {
    pub tag: String,
    pub attr: Option<(String, Option<String>)>,
    pub child: Option<String>,
}

impl NodePattern {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr_key(mut self, key: impl Into<String>) -> Self {
        self.attr = Some((key.into(), None));
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attr = Some((key.into(), Some(value.into())));
        self
    }

    pub fn first_child(mut self, tag: impl Into<String>) -> Self {
        self.child = Some(tag.into());
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        if node.tag != self.tag {
            return false;
        }
        match &self.attr {
            Some((key, Some(value))) => {
                if node.attrs.get(key).map(|v| v.to_string()) != Some(value.clone()) {
                    return false;
                }
            }
            Some((key, None)) => {
                if !node.attrs.contains_key(key) {
                    return false;
                }
            }
            None => {}
        }
        match &self.child {
            Some(tag) => node
                .children()
                .and_then(<[Node]>::first)
                .is_some_and(|first| first.tag == *tag),
            None => true,
        }
    }
}

pub type NodeHandler = Arc<dyn Fn(&Node) -> bool + Send + Sync>;

pub(crate) struct Subscription {
    pub(crate) id: usize,
    pub(crate) pattern: NodePattern,
    pub(crate) handler: NodeHandler,
}

/// Maps a stanza bearing an error to the request error it should fail with.
pub fn assert_node_error_free(node: &Node) -> Result<(), WaError> {
    if node.tag == "stream:error" || node.tag == "xmlstreamend" {
        return Err(WaError::ConnectionClosed);
    }

    let is_error_type = node
        .attrs()
        .optional_string("type")
        .is_some_and(|t| t == "error");
    if !is_error_type && node.tag != "error" {
        return Ok(());
    }

    let error_node = if node.tag == "error" {
        Some(node)
    } else {
        node.get_optional_child("error")
    };
    let (code, text) = error_node
        .map(|n| {
            let mut parser = n.attrs();
            let code = parser.optional_u64("code").unwrap_or(0) as u16;
            let text = parser.optional_string("text").unwrap_or_default();
            (code, text)
        })
        .unwrap_or((0, String::new()));
    Err(WaError::NodeError { code, text })
}

impl Client {
    /// New unique stanza id: per-connection random prefix plus a counter that
    /// starts at 1.
    pub fn generate_message_tag(&self) -> String {
        let epoch = self.tag_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.tag_prefix, epoch)
    }

    /// Sends a stanza and waits for the response correlated by its `id`.
    /// Uses the configured default deadline; see [`Self::query_with_timeout`].
    pub async fn query(&self, node: Node) -> Result<Node, WaError> {
        self.query_with_timeout(node, self.config.default_query_timeout)
            .await
    }

    /// Like [`Self::query`] with an explicit deadline; `None` waits until the
    /// session terminates.
    pub async fn query_with_timeout(
        &self,
        mut node: Node,
        timeout: Option<Duration>,
    ) -> Result<Node, WaError> {
        let req_id = match node.attrs.get("id") {
            Some(id) => id.to_string(),
            None => {
                let id = self.generate_message_tag();
                node.attrs
                    .insert("id".to_string(), NodeValue::Text(id.clone()));
                id
            }
        };

        let (tx, rx) = oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(req_id.clone(), tx);

        if let Err(e) = self.send_node(node).await {
            self.response_waiters.lock().await.remove(&req_id);
            warn!(target: "Client", "failed to send request {req_id}: {e}");
            return Err(WaError::ConnectionClosed);
        }

        let response = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(result) => result,
                Err(_) => {
                    // Expired waiters are removed; a late response is dropped.
                    self.response_waiters.lock().await.remove(&req_id);
                    return Err(WaError::Timeout);
                }
            },
            None => rx.await,
        };

        let node = response.map_err(|_| WaError::ConnectionClosed)?;
        assert_node_error_free(&node)?;
        Ok(node)
    }

    /// Builds and sends an `iq` stanza, returning the correlated result.
    pub async fn send_iq(&self, query: InfoQuery) -> Result<Node, WaError> {
        let id = query.id.unwrap_or_else(|| self.generate_message_tag());
        let mut node = Node::default();
        node.tag = "iq".to_string();
        node.attrs.insert("id".to_string(), NodeValue::Text(id));
        node.attrs.insert(
            "xmlns".to_string(),
            NodeValue::Text(query.namespace),
        );
        node.attrs.insert(
            "type".to_string(),
            NodeValue::Text(query.query_type.as_str().to_string()),
        );
        node.attrs
            .insert("to".to_string(), NodeValue::Jid(query.to));
        node.content = query.content;

        let timeout = query.timeout.or(self.config.default_query_timeout);
        self.query_with_timeout(node, timeout).await
    }

    /// Registers a pattern subscription; handlers run on the read loop in
    /// registration order and return whether they consumed the stanza.
    pub fn subscribe(
        &self,
        pattern: NodePattern,
        handler: impl Fn(&Node) -> bool + Send + Sync + 'static,
    ) -> usize {
        let id = self
            .subscription_counter
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        self.subscriptions.lock().unwrap().push(Subscription {
            id,
            pattern,
            handler: Arc::new(handler),
        });
        id
    }

    pub fn unsubscribe(&self, id: usize) -> bool {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() < before
    }

    /// Wakes the waiter registered for this stanza's id, if any.
    pub(crate) async fn deliver_response(&self, node: &Node) -> bool {
        let Some(id) = node.attrs.get("id").map(|v| v.to_string()) else {
            return false;
        };
        let Some(waiter) = self.response_waiters.lock().await.remove(&id) else {
            return false;
        };
        if waiter.send(node.clone()).is_err() {
            debug!(target: "Client", "response waiter for {id} was dropped");
        }
        true
    }

    /// Runs matching subscriptions in registration order; true when any
    /// handler consumed the stanza.
    pub(crate) fn dispatch_subscriptions(&self, node: &Node) -> bool {
        let matching: Vec<NodeHandler> = {
            let subscriptions = self.subscriptions.lock().unwrap();
            subscriptions
                .iter()
                .filter(|s| s.pattern.matches(node))
                .map(|s| s.handler.clone())
                .collect()
        };
        let mut handled = false;
        for handler in matching {
            handled |= handler(node);
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::NodeBuilder;

    fn iq_result_node() -> Node {
        NodeBuilder::new("iq")
            .attr("type", "result")
            .attr("id", "x.1")
            .build()
    }

    #[test]
    fn test_pattern_components() {
        let node = NodeBuilder::new("iq")
            .attr("type", "set")
            .children([NodeBuilder::new("pair-device").build()])
            .build();

        assert!(NodePattern::tag("iq").matches(&node));
        assert!(NodePattern::tag("iq").attr("type", "set").matches(&node));
        assert!(NodePattern::tag("iq").attr_key("type").matches(&node));
        assert!(NodePattern::tag("iq")
            .attr("type", "set")
            .first_child("pair-device")
            .matches(&node));

        assert!(!NodePattern::tag("presence").matches(&node));
        assert!(!NodePattern::tag("iq").attr("type", "get").matches(&node));
        assert!(!NodePattern::tag("iq").attr_key("from").matches(&node));
        assert!(!NodePattern::tag("iq").first_child("ping").matches(&node));
    }

    #[test]
    fn test_pattern_first_child_only() {
        let node = NodeBuilder::new("iq")
            .children([
                NodeBuilder::new("list").build(),
                NodeBuilder::new("count").build(),
            ])
            .build();

        assert!(NodePattern::tag("iq").first_child("list").matches(&node));
        assert!(!NodePattern::tag("iq").first_child("count").matches(&node));
    }

    #[test]
    fn test_error_free_result() {
        assert!(assert_node_error_free(&iq_result_node()).is_ok());
    }

    #[test]
    fn test_error_child_maps_to_node_error() {
        let node = NodeBuilder::new("iq")
            .attr("type", "error")
            .children([NodeBuilder::new("error")
                .attr("code", "404")
                .attr("text", "item-not-found")
                .build()])
            .build();

        assert_eq!(
            assert_node_error_free(&node),
            Err(WaError::NodeError {
                code: 404,
                text: "item-not-found".to_string()
            })
        );
    }

    #[test]
    fn test_stream_error_maps_to_connection_closed() {
        let node = NodeBuilder::new("stream:error").build();
        assert_eq!(
            assert_node_error_free(&node),
            Err(WaError::ConnectionClosed)
        );
    }

    mod dispatch {
        use super::*;
        use crate::config::ClientConfig;
        use crate::store::MemoryStore;
        use std::sync::Mutex;

        async fn client_under_test() -> Arc<Client> {
            Client::new(ClientConfig::default(), Arc::new(MemoryStore::new()))
                .await
                .unwrap()
        }

        #[tokio::test]
        async fn test_subscriptions_run_in_registration_order() {
            let client = client_under_test().await;
            let order = Arc::new(Mutex::new(Vec::new()));

            let seen = order.clone();
            client.subscribe(NodePattern::tag("presence"), move |_| {
                seen.lock().unwrap().push(1);
                false
            });
            let seen = order.clone();
            client.subscribe(NodePattern::tag("presence"), move |_| {
                seen.lock().unwrap().push(2);
                true
            });

            let node = NodeBuilder::new("presence").build();
            assert!(client.dispatch_subscriptions(&node));
            assert_eq!(*order.lock().unwrap(), vec![1, 2]);

            // A stanza nothing matches is not handled.
            assert!(!client.dispatch_subscriptions(&NodeBuilder::new("iq").build()));
        }

        #[tokio::test]
        async fn test_unsubscribe_stops_dispatch() {
            let client = client_under_test().await;
            let hits = Arc::new(Mutex::new(0u32));

            let counter = hits.clone();
            let id = client.subscribe(NodePattern::tag("receipt"), move |_| {
                *counter.lock().unwrap() += 1;
                true
            });

            let node = NodeBuilder::new("receipt").build();
            client.dispatch_subscriptions(&node);
            assert!(client.unsubscribe(id));
            assert!(!client.unsubscribe(id));
            client.dispatch_subscriptions(&node);

            assert_eq!(*hits.lock().unwrap(), 1);
        }

        #[tokio::test]
        async fn test_late_registration_is_not_retroactive() {
            let client = client_under_test().await;
            let node = NodeBuilder::new("notification").build();

            // The stanza arrives before anyone subscribes.
            assert!(!client.dispatch_subscriptions(&node));

            let hits = Arc::new(Mutex::new(0u32));
            let counter = hits.clone();
            client.subscribe(NodePattern::tag("notification"), move |_| {
                *counter.lock().unwrap() += 1;
                true
            });
            assert_eq!(*hits.lock().unwrap(), 0);
        }
    }
}
