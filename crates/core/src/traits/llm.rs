//! Brain (conversational LLM) service trait

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::llm_types::{BrainReply, BrainRequest, BrainStreamEvent};

/// Brain service interface. Implementations cover both the non-streaming
/// and streaming modes of spec §4.4; `generate_stream` falls back to
/// `generate` internally when the SSE endpoint is unavailable or returns a
/// non-SSE content type, so callers only need one call site.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// `POST /reply` — blocking round trip.
    async fn generate(&self, request: BrainRequest) -> Result<BrainReply>;

    /// `POST /reply/stream` — tokens are pushed onto `tx` as they arrive;
    /// the final `BrainStreamEvent::Done` carries the resolved reply and
    /// is always the last value sent before the call returns.
    async fn generate_stream(&self, request: BrainRequest, tx: mpsc::Sender<BrainStreamEvent>) -> Result<BrainReply>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockBrain {
        reply: BrainReply,
    }

    #[async_trait]
    impl LanguageModel for MockBrain {
        async fn generate(&self, _request: BrainRequest) -> Result<BrainReply> {
            Ok(self.reply.clone())
        }

        async fn generate_stream(&self, _request: BrainRequest, tx: mpsc::Sender<BrainStreamEvent>) -> Result<BrainReply> {
            let _ = tx.send(BrainStreamEvent::Token(self.reply.text.clone())).await;
            let _ = tx.send(BrainStreamEvent::Done(self.reply.clone())).await;
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "mock-brain"
        }
    }

    #[tokio::test]
    async fn mock_brain_streams_token_then_done() {
        let brain = MockBrain {
            reply: BrainReply {
                text: "We close at 5 PM.".into(),
                transfer: None,
                hangup: false,
            },
        };
        let (tx, mut rx) = mpsc::channel(4);
        let request = BrainRequest {
            tenant_id: "t1".into(),
            call_id: "c1".into(),
            transcript: "when do you close".into(),
            history: vec![],
            transfer_profiles: vec![],
            assistant_context: vec![],
        };
        let reply = brain.generate_stream(request, tx).await.unwrap();
        assert_eq!(reply.text, "We close at 5 PM.");

        assert!(matches!(rx.recv().await, Some(BrainStreamEvent::Token(_))));
        assert!(matches!(rx.recv().await, Some(BrainStreamEvent::Done(_))));
    }
}
