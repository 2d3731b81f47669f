//! Push channel abstraction.
//!
//! The server push connection (websocket in production) is consumed
//! through this trait as a stream of raw, duck-typed messages. All shape
//! normalization happens after [`recv`](PushChannel::recv), in
//! [`dentra_types::normalize`], so the reconciler only sees canonical
//! events.

use async_trait::async_trait;
use dentra_types::RawPushMessage;

/// A source of raw server push messages.
#[async_trait]
pub trait PushChannel: Send {
    /// Receives the next message.
    /// Returns `None` when the channel has closed for good.
    async fn recv(&mut self) -> Option<RawPushMessage>;
}

/// An in-memory channel pair for testing.
pub mod mock {
    use super::*;
    use tokio::sync::mpsc;

    /// Test-side handle that injects push messages.
    #[derive(Clone)]
    pub struct MockChannelHandle {
        tx: mpsc::UnboundedSender<RawPushMessage>,
    }

    impl MockChannelHandle {
        /// Queues a message for the channel; ignored if the channel is gone.
        pub fn push(&self, message: RawPushMessage) {
            let _ = self.tx.send(message);
        }
    }

    /// Engine-side channel fed by a [`MockChannelHandle`].
    pub struct MockChannel {
        rx: mpsc::UnboundedReceiver<RawPushMessage>,
    }

    /// Creates a connected handle/channel pair.
    pub fn pair() -> (MockChannelHandle, MockChannel) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MockChannelHandle { tx }, MockChannel { rx })
    }

    #[async_trait]
    impl PushChannel for MockChannel {
        async fn recv(&mut self) -> Option<RawPushMessage> {
            self.rx.recv().await
        }
    }
}
