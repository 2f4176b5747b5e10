//! Scripted in-memory broker transport for engine tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use viewer_api::{BrokerTransport, InboundMessage, Payload, TransportEvent, ViewerError};

#[derive(Debug, Default)]
pub(crate) struct TransportLog {
    /// Client id каждой попытки подключения.
    pub connects: Vec<String>,
    /// Только успешные подписки.
    pub subscriptions: Vec<String>,
    pub disconnects: usize,
}

/// Управление транспортом из теста.
#[derive(Clone)]
pub(crate) struct Script {
    pub log: Arc<Mutex<TransportLog>>,
    connect_results: Arc<Mutex<VecDeque<Result<(), ViewerError>>>>,
    subscribe_results: Arc<Mutex<VecDeque<Result<(), ViewerError>>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Script {
    /// Следующие попытки connect завершатся ошибкой.
    pub fn fail_connects(&self, n: usize) {
        let mut results = self.connect_results.lock().unwrap();
        for _ in 0..n {
            results.push_back(Err(ViewerError::io("connection refused")));
        }
    }

    /// Следующий connect будет отвергнут брокером.
    pub fn reject_connect(&self) {
        self.connect_results
            .lock()
            .unwrap()
            .push_back(Err(ViewerError::config("not authorized")));
    }

    /// Следующие subscribe завершатся ошибкой.
    pub fn fail_subscribes(&self, n: usize) {
        let mut results = self.subscribe_results.lock().unwrap();
        for _ in 0..n {
            results.push_back(Err(ViewerError::io("request channel closed")));
        }
    }

    pub fn publish(&self, topic: &str, payload: &str) {
        let _ = self.events.send(TransportEvent::Message(InboundMessage {
            topic: topic.to_string(),
            payload: Payload::from(payload),
            ts_ms: viewer_api::now_ms(),
        }));
    }

    pub fn drop_connection(&self) {
        let _ = self.events.send(TransportEvent::Disconnected("network unreachable".into()));
    }

    pub fn connects(&self) -> usize {
        self.log.lock().unwrap().connects.len()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.log.lock().unwrap().subscriptions.clone()
    }
}

pub(crate) struct ScriptedTransport {
    log: Arc<Mutex<TransportLog>>,
    connect_results: Arc<Mutex<VecDeque<Result<(), ViewerError>>>>,
    subscribe_results: Arc<Mutex<VecDeque<Result<(), ViewerError>>>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(TransportLog::default()));
        let connect_results = Arc::new(Mutex::new(VecDeque::new()));
        let subscribe_results = Arc::new(Mutex::new(VecDeque::new()));
        let transport = Self {
            log: log.clone(),
            connect_results: connect_results.clone(),
            subscribe_results: subscribe_results.clone(),
            events: rx,
        };
        let script = Script {
            log,
            connect_results,
            subscribe_results,
            events: tx,
        };
        (transport, script)
    }
}

impl BrokerTransport for ScriptedTransport {
    fn connect<'a>(
        &'a mut self,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>> {
        Box::pin(async move {
            self.log.lock().unwrap().connects.push(client_id.to_string());
            let result = self.connect_results.lock().unwrap().pop_front();
            result.unwrap_or(Ok(()))
        })
    }

    fn subscribe<'a>(
        &'a mut self,
        filter: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.subscribe_results.lock().unwrap().pop_front();
            if let Some(Err(e)) = result {
                return Err(e);
            }
            self.log.lock().unwrap().subscriptions.push(filter.to_string());
            Ok(())
        })
    }

    fn next_event(&mut self) -> Pin<Box<dyn Future<Output = TransportEvent> + Send + '_>> {
        Box::pin(async move {
            match self.events.recv().await {
                Some(event) => event,
                None => std::future::pending().await,
            }
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.log.lock().unwrap().disconnects += 1;
        })
    }
}

/// Ждать выполнения условия (под paused time шаги мгновенные).
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
