use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tck_transport::{Listener, Transport};
use tck_wire::{
    handshake_bytes, CallOptions, Code, Command, CommandFrame, Envelope, JsonSplitter, Message,
    Status, READ_CHUNK,
};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::listener::{ForwardingListener, ManagerLink};
use crate::AgentError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub sdk_name: String,
    /// Answer REQUESTs delivered to registered topics with an echo RESPONSE.
    pub reply_to_requests: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { sdk_name: "rust".to_string(), reply_to_requests: true }
    }
}

pub struct TestAgent {
    sdk_name: String,
    transport: Transport,
    reader: OwnedReadHalf,
    link: ManagerLink,
    listener: Arc<dyn Listener>,
    manager_addr: SocketAddr,
}

impl TestAgent {
    /// Connects to the test manager and sends the handshake.
    pub async fn connect(
        manager_addr: impl ToSocketAddrs,
        config: &AgentConfig,
        transport: Transport,
    ) -> Result<Self, AgentError> {
        let stream = TcpStream::connect(manager_addr).await?;
        let _ = stream.set_nodelay(true);
        let manager_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let link = ManagerLink::new(writer);

        let handshake = handshake_bytes(&config.sdk_name)?;
        link.send_raw(&handshake).await?;
        log::info!("test_agent: {} connected to test manager <{}>", config.sdk_name, manager_addr);

        let listener: Arc<dyn Listener> = Arc::new(ForwardingListener::new(
            link.clone(),
            transport.downgrade(),
            config.reply_to_requests,
        ));

        Ok(Self {
            sdk_name: config.sdk_name.clone(),
            transport,
            reader,
            link,
            listener,
            manager_addr,
        })
    }

    pub fn sdk_name(&self) -> &str {
        &self.sdk_name
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Serves commands until the test manager closes the connection.
    pub async fn run(mut self) -> Result<(), AgentError> {
        let mut splitter = JsonSplitter::new();
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            let n = self.reader.read(&mut buffer).await?;
            if n == 0 {
                log::info!(
                    "test_agent: test manager <{}> closed the connection",
                    self.manager_addr
                );
                break;
            }
            splitter.extend(&buffer[..n]);
            while let Some(object) = splitter.next_object()? {
                let status = match CommandFrame::parse(&object) {
                    Ok(frame) => self.execute(frame).await,
                    Err(err) => {
                        log::warn!("test_agent: bad command: {}", err);
                        Status::fail(Code::InvalidArgument, err.to_string())
                    }
                };
                self.link.send(&Envelope::status(&status)?).await?;
            }
        }
        self.link.shutdown().await;
        Ok(())
    }

    async fn execute(&self, frame: CommandFrame) -> Status {
        let CommandFrame { command, message } = frame;
        log::debug!("test_agent: {} {}", command, message.id);
        match command {
            Command::Send => self.transport.send(&message).await,
            Command::RegisterListener => {
                self.transport.register_listener(&message.source, self.listener.clone())
            }
            Command::UnregisterListener => {
                self.transport.unregister_listener(&message.source, &self.listener)
            }
            Command::InvokeMethod => self.invoke_method(message).await,
        }
    }

    /// Issues the request and reports OK once it is written; the RESPONSE is
    /// forwarded later as `onReceive`.
    async fn invoke_method(&self, message: Message) -> Status {
        let method = message.sink.clone().unwrap_or_else(|| message.source.clone());
        let mut options = self.transport.default_call_options();
        if let Some(ttl_ms) = message.ttl_ms {
            options = CallOptions { ttl_ms, ..options };
        }
        options = options.with_priority(message.priority);

        let call = match self.transport.invoke_method(&method, message.payload, options).await {
            Ok(call) => call,
            Err(err) => return err.status(),
        };

        let link = self.link.clone();
        tokio::spawn(async move {
            match call.await {
                Ok(response) => link.send_on_receive(&response).await,
                Err(err) => log::warn!("test_agent: invoke {} failed: {}", method, err),
            }
        });
        Status::ok()
    }
}
