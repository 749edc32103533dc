//! Outbound media stream (cloud connection).
//!
//! `StreamSession` is the typed, exclusively owned handle for an opened stream. It is
//! acquired first during pipeline start and closed exactly once, either by the controller
//! on stop or when the session is dropped.

use anyhow::Result;
use std::time::Instant;

/// Connection to the streaming/cloud endpoint.
pub trait StreamConnector: Send {
    fn endpoint(&self) -> &str;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// An opened stream. Closing is idempotent.
pub struct StreamSession {
    connector: Option<Box<dyn StreamConnector>>,
    endpoint: String,
    opened_at: Instant,
}

impl StreamSession {
    pub fn open(mut connector: Box<dyn StreamConnector>) -> Result<Self> {
        connector.open()?;
        let endpoint = connector.endpoint().to_string();
        log::info!("stream session opened: {}", endpoint);
        Ok(Self {
            connector: Some(connector),
            endpoint,
            opened_at: Instant::now(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.connector.is_some()
    }

    /// Release the stream. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut connector) = self.connector.take() else {
            return Ok(());
        };
        log::info!(
            "stream session closed: {} (open {:.1}s)",
            self.endpoint,
            self.opened_at.elapsed().as_secs_f32()
        );
        connector.close()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("stream session close failed: {}", err);
        }
    }
}

/// Local stand-in for the cloud endpoint.
#[derive(Debug)]
pub struct LoopbackStream {
    endpoint: String,
    connected: bool,
}

impl LoopbackStream {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connected: false,
        }
    }
}

impl LoopbackStream {
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl StreamConnector for LoopbackStream {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn open(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingStream {
        closes: Arc<AtomicUsize>,
        fail_open: bool,
    }

    impl StreamConnector for CountingStream {
        fn endpoint(&self) -> &str {
            "counting"
        }

        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(anyhow!("endpoint unreachable"));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn close_runs_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut session = StreamSession::open(Box::new(CountingStream {
            closes: closes.clone(),
            fail_open: false,
        }))
        .unwrap();
        session.close().unwrap();
        session.close().unwrap();
        assert!(!session.is_open());
        drop(session);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_open_session() {
        let closes = Arc::new(AtomicUsize::new(0));
        let session = StreamSession::open(Box::new(CountingStream {
            closes: closes.clone(),
            fail_open: false,
        }))
        .unwrap();
        assert_eq!(session.endpoint(), "counting");
        drop(session);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_open_yields_no_session() {
        let closes = Arc::new(AtomicUsize::new(0));
        let result = StreamSession::open(Box::new(CountingStream {
            closes: closes.clone(),
            fail_open: true,
        }));
        assert!(result.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }
}
