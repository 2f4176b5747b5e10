use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use viewer_api::{
    BrokerEndpoint, BrokerProtocol, BrokerTransport, InboundMessage, Payload, TransportEvent,
    ViewerError, now_ms,
};

/// Ёмкость очереди запросов AsyncClient → EventLoop.
const REQUEST_CAPACITY: usize = 16;

/// MQTT 3.1.1 поверх rumqttc. Каждый connect() создаёт новую пару
/// client/eventloop с новым client id; сессия всегда чистая.
///
/// После CONNACK eventloop опрашивается в отдельной задаче, поэтому
/// запросы `AsyncClient` (subscribe, disconnect) всегда разбираются,
/// даже когда никто не ждёт `next_event()`.
pub struct MqttTransport {
    endpoint: BrokerEndpoint,
    session: Option<Session>,
}

struct Session {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    poller: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

impl MqttTransport {
    pub fn new(endpoint: BrokerEndpoint) -> Self {
        Self {
            endpoint,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

pub(crate) fn mqtt_options(endpoint: &BrokerEndpoint, client_id: &str) -> MqttOptions {
    let mut options = match endpoint.protocol {
        // Для WebSocket rumqttc ждёт полный URL вместо host.
        BrokerProtocol::Ws => {
            let url = format!(
                "{}://{}:{}{}",
                endpoint.scheme(),
                endpoint.host,
                endpoint.port,
                endpoint.ws_path
            );
            MqttOptions::new(client_id, url, endpoint.port)
        }
        BrokerProtocol::Tcp => MqttOptions::new(client_id, endpoint.host.as_str(), endpoint.port),
    };
    options.set_keep_alive(Duration::from_secs(endpoint.keep_alive_secs.max(5)));
    options.set_clean_session(true);
    options.set_max_packet_size(endpoint.max_packet_size, endpoint.max_packet_size);
    match (endpoint.protocol, endpoint.tls) {
        (BrokerProtocol::Tcp, false) => {}
        (BrokerProtocol::Tcp, true) => {
            options.set_transport(Transport::tls_with_default_config());
        }
        (BrokerProtocol::Ws, false) => {
            options.set_transport(Transport::Ws);
        }
        (BrokerProtocol::Ws, true) => {
            options.set_transport(Transport::wss_with_default_config());
        }
    }
    options
}

/// Отказ брокера в CONNACK из-за учётных данных или протокола
/// повтором не исправить.
fn connect_error(endpoint: &BrokerEndpoint, e: ConnectionError) -> ViewerError {
    let message = format!("MQTT connect to {endpoint}: {e}");
    match e {
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId,
        ) => ViewerError::config(message),
        _ => ViewerError::io(message),
    }
}

/// Опрос eventloop'а до первой ошибки. Очередь событий неограничена:
/// задача не должна останавливаться, пока ConnectionManager занят.
fn spawn_poller(mut eventloop: EventLoop, tx: mpsc::UnboundedSender<TransportEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    TransportEvent::Message(InboundMessage {
                        topic: publish.topic,
                        payload: Payload::from_bytes(publish.payload.to_vec()),
                        ts_ms: now_ms(),
                    })
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    TransportEvent::Disconnected("broker sent DISCONNECT".into())
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    tracing::debug!(pkid = ack.pkid, codes = ?ack.return_codes, "suback");
                    continue;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::debug!("DISCONNECT sent, event loop stopped");
                    break;
                }
                Ok(_) => continue,
                Err(e) => TransportEvent::Disconnected(e.to_string()),
            };

            let last = matches!(event, TransportEvent::Disconnected(_));
            if tx.send(event).is_err() || last {
                break;
            }
        }
    })
}

impl BrokerTransport for MqttTransport {
    fn connect<'a>(
        &'a mut self,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>> {
        Box::pin(async move {
            self.session = None;
            let options = mqtt_options(&self.endpoint, client_id);
            let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        tracing::debug!(endpoint = %self.endpoint, code = ?ack.code, "connack received");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(connect_error(&self.endpoint, e)),
                }
            }

            let (tx, events) = mpsc::unbounded_channel();
            let poller = spawn_poller(eventloop, tx);
            self.session = Some(Session {
                client,
                events,
                poller,
            });
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a mut self,
        filter: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>> {
        Box::pin(async move {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| ViewerError::io("MQTT subscribe: not connected"))?;
            session
                .client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(|e| ViewerError::io(format!("MQTT subscribe {filter}: {e}")))
        })
    }

    fn next_event(&mut self) -> Pin<Box<dyn Future<Output = TransportEvent> + Send + '_>> {
        Box::pin(async move {
            let Some(session) = self.session.as_mut() else {
                return TransportEvent::Disconnected("not connected".into());
            };

            let event = session.events.recv().await;
            match event {
                Some(TransportEvent::Message(message)) => TransportEvent::Message(message),
                Some(TransportEvent::Disconnected(reason)) => {
                    self.session = None;
                    TransportEvent::Disconnected(reason)
                }
                None => {
                    self.session = None;
                    TransportEvent::Disconnected("event loop stopped".into())
                }
            }
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(mut session) = self.session.take() else {
                return;
            };
            if let Err(e) = session.client.disconnect().await {
                tracing::debug!(error = %e, "MQTT disconnect request failed");
                return;
            }
            // Дать eventloop'у отправить DISCONNECT.
            if tokio::time::timeout(Duration::from_secs(1), &mut session.poller).await.is_err() {
                tracing::debug!("MQTT event loop did not stop in time");
            }
            tracing::info!(endpoint = %self.endpoint, "MQTT disconnected");
        })
    }
}
